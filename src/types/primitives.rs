// Primitives SFC - Minimal fundamental types
use serde::{Deserialize, Serialize};
use std::fmt;

/// Staker / validator-owner identity (20 bytes, hex-displayed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Derives an address from an opaque public key blob (Blake3, first 20 bytes).
    /// The key itself is never verified here.
    pub fn from_pubkey(pubkey: &[u8]) -> Self {
        let hash = blake3::hash(pubkey);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash.as_bytes()[..20]);
        Address(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }
}

/// Validator identifier, allocated sequentially starting at 1
pub type ValidatorId = u64;

/// Epoch number (sealed epochs start at 1; 0 is the genesis baseline)
pub type EpochNumber = u64;

/// Unix timestamp in seconds
pub type Timestamp = u64;

/// Balance in native token units (u128 = sufficient for centuries)
/// 1 TOKEN = 10^12 units
pub type Balance = u128;

/// Monetary constants
pub const TOKEN: Balance = 1_000_000_000_000; // 10^12
pub const MILLITOKEN: Balance = 1_000_000_000; // 10^9
pub const MICROTOKEN: Balance = 1_000_000; // 10^6

/// Fixed-point unit for ratios (commission, reward shares, refund ratios).
/// A ratio of `UNIT` means 100%.
pub const UNIT: u128 = 1_000_000_000_000_000_000; // 10^18

/// Builds a fixed-point ratio from a percentage.
pub const fn percent(p: u128) -> u128 {
    UNIT / 100 * p
}

/// Floor of `a * b / d`, split so token-scale operands cannot overflow
/// the 128-bit intermediate.
pub fn mul_div(a: u128, b: u128, d: u128) -> u128 {
    debug_assert!(d > 0, "mul_div by zero");
    let q = a / d;
    let r = a % d;
    q * b + r * b / d
}

/// Applies a `UNIT`-scaled ratio to an amount (truncating).
pub fn apply_ratio(amount: Balance, ratio: u128) -> Balance {
    mul_div(amount, ratio, UNIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_units() {
        assert_eq!(TOKEN, 1_000_000_000_000);
        assert_eq!(1000 * MILLITOKEN, TOKEN);
        assert_eq!(1_000_000 * MICROTOKEN, TOKEN);
    }

    #[test]
    fn test_address_from_pubkey_deterministic() {
        let a = Address::from_pubkey(b"validator-key");
        let b = Address::from_pubkey(b"validator-key");
        assert_eq!(a, b);
        assert_ne!(a, Address::from_pubkey(b"other-key"));
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(100), UNIT);
        assert_eq!(percent(30), 3 * UNIT / 10);
        assert_eq!(percent(0), 0);
    }

    #[test]
    fn test_apply_ratio_truncates() {
        assert_eq!(apply_ratio(10, percent(15)), 1); // floor(1.5)
        assert_eq!(apply_ratio(100, percent(15)), 15);
        assert_eq!(apply_ratio(0, percent(50)), 0);
    }

    #[test]
    fn test_mul_div_large_operands() {
        // 10^18 * 10^18 / 10^18 would overflow a naive product path
        assert_eq!(mul_div(UNIT, UNIT, UNIT), UNIT);
        assert_eq!(mul_div(7 * TOKEN, UNIT, 2 * TOKEN), 7 * UNIT / 2);
    }
}
