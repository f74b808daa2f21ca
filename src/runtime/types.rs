//! Shared runtime surface types for both dispatch paths.
//!
//! The CPU path executes in-process on the built-in primitive engine. The GPU
//! path stops at launch planning and hands the result to an external
//! [`crate::runtime::gpu::KernelLauncher`].

use std::fmt;

use rayon::ThreadPool;

/// Structured runtime error reported by external backend collaborators.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The launcher has no compiled kernel under the requested name.
    #[error("no kernel named '{name}'")]
    UnknownKernel { name: String },
    /// Generic backend failure message.
    #[error("backend error: {message}")]
    Message { message: String },
}

/// Per-execution options handed to runtime entry points.
///
/// The intra-op pool is borrowed for the lifetime of one call. Nothing in this
/// crate stores, resizes or shuts it down.
#[derive(Clone, Copy, Default)]
pub struct RunOptions<'p> {
    intra_op_thread_pool: Option<&'p ThreadPool>,
}

impl<'p> RunOptions<'p> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_intra_op_thread_pool(mut self, pool: &'p ThreadPool) -> Self {
        self.intra_op_thread_pool = Some(pool);
        self
    }

    pub fn intra_op_thread_pool(&self) -> Option<&'p ThreadPool> {
        self.intra_op_thread_pool
    }
}

impl fmt::Debug for RunOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field(
                "intra_op_threads",
                &self.intra_op_thread_pool.map(ThreadPool::current_num_threads),
            )
            .finish()
    }
}
