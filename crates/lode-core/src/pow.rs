//! Proof-of-work math.
//!
//! A block is acceptable when its hash, read as a 256-bit big-endian
//! integer, is at most `MAX_HASH / (work_target + 1)`. This is the integer
//! form of "the work represented by the hash exceeds the target".

use crate::constants::FEE_PER_32_BYTES;
use crate::types::Hash256;

/// Largest hash acceptable for a given work target, big-endian.
///
/// Computes `floor((2^256 - 1) / (work_target + 1))` by limb-wise long
/// division over the 32 bytes of the all-ones value. Each step divides
/// `rem * 256 + 0xFF` by the divisor; the quotient always fits one byte
/// because the remainder stays below the divisor.
pub fn threshold_for_target(work_target: u64) -> [u8; 32] {
    let divisor = work_target as u128 + 1;
    let mut out = [0u8; 32];
    let mut rem: u128 = 0;
    for byte in &mut out {
        let cur = (rem << 8) | 0xFF;
        *byte = (cur / divisor) as u8;
        rem = cur % divisor;
    }
    out
}

/// Whether a block hash satisfies a work target.
pub fn hash_meets_target(hash: &Hash256, work_target: u64) -> bool {
    hash.0 <= threshold_for_target(work_target)
}

/// Storage fee for a block of the given canonical-encoding length,
/// deducted from the coins the block issues. Discourages bloat.
pub fn storage_fee(encoded_len: usize) -> u64 {
    (encoded_len as u64 / 32) * FEE_PER_32_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_one_accepts_lower_half() {
        // divisor 2: threshold is 0x7FFF.. so the top bit decides.
        let t = threshold_for_target(1);
        assert_eq!(t[0], 0x7F);
        assert!(t[1..].iter().all(|&b| b == 0xFF));
        assert!(hash_meets_target(&Hash256([0x7F; 32]), 1));
        assert!(!hash_meets_target(&Hash256([0x80; 32]), 1));
    }

    #[test]
    fn threshold_shrinks_as_target_grows() {
        let easy = threshold_for_target(1_000);
        let hard = threshold_for_target(1_000_000);
        assert!(hard < easy);
    }

    #[test]
    fn zero_hash_meets_any_target() {
        assert!(hash_meets_target(&Hash256::ZERO, u64::MAX));
    }

    #[test]
    fn max_hash_meets_only_trivial_target() {
        let max = Hash256([0xFF; 32]);
        assert!(hash_meets_target(&max, 0));
        assert!(!hash_meets_target(&max, 1));
    }

    #[test]
    fn threshold_roundtrip_against_reference_division() {
        // For small divisors the quotient has a closed form:
        // floor((2^256 - 1) / 4) = 0x3FFF...FF.
        let t = threshold_for_target(3);
        assert_eq!(t[0], 0x3F);
        assert!(t[1..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn storage_fee_scales_with_length() {
        assert_eq!(storage_fee(0), 0);
        assert_eq!(storage_fee(31), 0);
        assert_eq!(storage_fee(32), FEE_PER_32_BYTES);
        assert_eq!(storage_fee(160), 5 * FEE_PER_32_BYTES);
    }
}
