// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! CPU execution path.
//!
//! # Architecture
//!
//! | Module        | Role                                                    |
//! |---------------|---------------------------------------------------------|
//! | `engine.rs`   | Engine, stream, memory descriptors and memory objects   |
//! | `matmul.rs`   | Matmul primitive descriptor and primitive               |
//! | `dispatch.rs` | Library-delegation dispatcher and raw runtime entries   |
//!
//! The dispatcher owns no threads. Each call borrows the intra-op pool from
//! [`crate::runtime::RunOptions`] and binds a fresh engine and stream to it.

pub mod dispatch;
pub mod engine;
pub mod matmul;

pub use dispatch::{
    __kdispatch_cpu_runtime_matmul, dispatch_matmul, kd_cpu_runtime_matmul, ConfigBuffer,
    DispatchError,
};
pub use engine::{ArgSlot, Engine, EngineKind, MemDesc, Memory, PrimitiveError, Stream};
pub use matmul::{MatmulPrimitive, MatmulPrimitiveDesc};
