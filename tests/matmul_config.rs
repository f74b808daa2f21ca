use kdispatch::config::{FusedOp, MatmulConfig, MatmulConfigError};
use proptest::prelude::*;

fn any_op() -> impl Strategy<Value = FusedOp> {
    prop::sample::select(FusedOp::ALL.to_vec())
}

#[test]
fn hex_layout_is_stable() {
    let config = MatmulConfig {
        fused_ops: vec![FusedOp::Relu],
        transpose_lhs: true,
        transpose_rhs: true,
    };
    assert_eq!(hex::encode(config.encode()), "4b444d4301010203");
}

#[test]
fn oversized_op_count_is_rejected_before_reading_tags() {
    // ULEB128 for 65 is a single byte 0x41.
    let bytes = b"KDMC\x01\x41";
    assert_eq!(
        MatmulConfig::decode(bytes),
        Err(MatmulConfigError::TooManyOps(65))
    );
}

#[test]
fn unterminated_count_is_rejected() {
    let err = MatmulConfig::decode(b"KDMC\x01\x80").unwrap_err();
    assert!(matches!(err, MatmulConfigError::Count(_)), "{err:?}");
}

proptest! {
    #[test]
    fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..32)) {
        let _ = MatmulConfig::decode(&bytes);
    }

    #[test]
    fn encoded_configs_decode(
        ops in prop::collection::vec(any_op(), 0..8),
        transpose_lhs in any::<bool>(),
        transpose_rhs in any::<bool>(),
    ) {
        let config = MatmulConfig { fused_ops: ops, transpose_lhs, transpose_rhs };
        prop_assert_eq!(MatmulConfig::decode(&config.encode()), Ok(config));
    }

    #[test]
    fn reserved_flag_bits_are_rejected(flags in 4u8..=255) {
        let bytes = [b'K', b'D', b'M', b'C', 1, 0, flags];
        prop_assert_eq!(
            MatmulConfig::decode(&bytes),
            Err(MatmulConfigError::ReservedFlags(flags & !0x03))
        );
    }
}
