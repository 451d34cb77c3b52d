//! Conversions between interleave parameters and their register encodings.
//!
//! Ways use the "encoded number of interleave ways" (ENIW) scheme: powers of
//! two map to their log2 (codes 0..=4), the 3/6/12 family maps to codes
//! 8..=10. Granularity is encoded as log2(bytes) − 8, i.e. 256 << code.

use thiserror::Error;

/// Hard ceiling on decoder fan-out and region target count.
pub const MAX_INTERLEAVE_WAYS: u16 = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterleaveError {
    #[error("invalid interleave ways {0}")]
    InvalidWays(u16),

    #[error("invalid interleave granularity {0}")]
    InvalidGranularity(u64),
}

/// Encode interleave ways for a decoder control register.
pub fn eniw_from_ways(ways: u16) -> Result<u8, InterleaveError> {
    match ways {
        1 | 2 | 4 | 8 | 16 => Ok(ways.trailing_zeros() as u8),
        3 | 6 | 12 => Ok(8 + (ways / 3).trailing_zeros() as u8),
        _ => Err(InterleaveError::InvalidWays(ways)),
    }
}

/// Decode a ways code. Reserved codes yield 0, the invalid-ways sentinel,
/// rather than a fabricated value.
pub fn ways_from_eniw(eniw: u8) -> u16 {
    match eniw {
        0..=4 => 1 << eniw,
        8..=10 => 3 << (eniw - 8),
        _ => 0,
    }
}

/// Encode interleave granularity (bytes) for a decoder control register.
pub fn eig_from_granularity(granularity: u64) -> Result<u8, InterleaveError> {
    if !granularity.is_power_of_two() || granularity < 256 {
        return Err(InterleaveError::InvalidGranularity(granularity));
    }
    Ok((granularity.trailing_zeros() - 8) as u8)
}

/// Decode a granularity code into bytes.
pub fn granularity_from_eig(eig: u8) -> u64 {
    256 << eig
}

/// The eight ways values the decode hardware supports.
pub fn interleave_ways_valid(ways: u16) -> bool {
    matches!(ways, 1 | 2 | 3 | 4 | 6 | 8 | 12 | 16)
}

/// Power of two, at least 256 bytes, capped at 16K.
pub fn interleave_granularity_valid(granularity: u64) -> bool {
    granularity.is_power_of_two() && granularity >= 256 && (granularity >> 15) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ways_round_trip() {
        for ways in [1u16, 2, 3, 4, 6, 8, 12, 16] {
            let code = eniw_from_ways(ways).unwrap();
            assert_eq!(ways_from_eniw(code), ways, "ways {ways} code {code}");
        }
    }

    #[test]
    fn ways_codes() {
        assert_eq!(eniw_from_ways(1), Ok(0));
        assert_eq!(eniw_from_ways(16), Ok(4));
        assert_eq!(eniw_from_ways(3), Ok(8));
        assert_eq!(eniw_from_ways(6), Ok(9));
        assert_eq!(eniw_from_ways(12), Ok(10));
    }

    #[test]
    fn ways_rejects_undefined_values() {
        for ways in [0u16, 5, 7, 9, 17, 24, 32] {
            assert_eq!(eniw_from_ways(ways), Err(InterleaveError::InvalidWays(ways)));
        }
    }

    #[test]
    fn reserved_way_codes_decode_to_sentinel() {
        for code in [5u8, 6, 7, 11, 12, 0xff] {
            assert_eq!(ways_from_eniw(code), 0);
        }
    }

    #[test]
    fn granularity_round_trip() {
        for k in 0..=7u8 {
            let granularity = 256u64 << k;
            let code = eig_from_granularity(granularity).unwrap();
            assert_eq!(code, k);
            assert_eq!(granularity_from_eig(code), granularity);
        }
    }

    #[test]
    fn granularity_rejects_small_or_unaligned() {
        assert!(eig_from_granularity(0).is_err());
        assert!(eig_from_granularity(128).is_err());
        assert!(eig_from_granularity(257).is_err());
        assert!(eig_from_granularity(3 * 256).is_err());
    }

    #[test]
    fn granularity_validity_caps_at_16k() {
        assert!(interleave_granularity_valid(256));
        assert!(interleave_granularity_valid(16384));
        assert!(!interleave_granularity_valid(32768));
        assert!(!interleave_granularity_valid(512 + 1));
    }

    proptest! {
        #[test]
        fn ways_encode_succeeds_only_on_defined_set(ways in 0u16..64) {
            let defined = interleave_ways_valid(ways);
            prop_assert_eq!(eniw_from_ways(ways).is_ok(), defined);
        }

        #[test]
        fn granularity_round_trips_over_field_domain(code in 0u8..=7) {
            let granularity = granularity_from_eig(code);
            prop_assert_eq!(eig_from_granularity(granularity), Ok(code));
        }
    }
}
