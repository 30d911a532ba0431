//! External order-number format.
//!
//! `PO` + `yyyymmddHHMMSS` + six random digits. The print service echoes
//! this value back in logistics callbacks, so the format must stay
//! stable and exactly matchable.

use chrono::Utc;
use rand::Rng;

/// Fixed prefix for customer orders.
pub const ORDER_PREFIX: &str = "PO";

/// Total length: 2 (prefix) + 14 (timestamp) + 6 (random).
const ORDER_NUMBER_LEN: usize = 22;

/// Generate a fresh order number from the current UTC time.
pub fn generate() -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix: u32 = rand::rng().random_range(0..1_000_000);
    format!("{ORDER_PREFIX}{stamp}{suffix:06}")
}

/// Whether `value` has the exact local order-number shape.
///
/// Callbacks carrying anything else are rejected before any lookup.
pub fn is_valid(value: &str) -> bool {
    value.len() == ORDER_NUMBER_LEN
        && value.starts_with(ORDER_PREFIX)
        && value[ORDER_PREFIX.len()..].bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_numbers_validate() {
        let n = generate();
        assert!(is_valid(&n), "generated number should validate: {n}");
    }

    #[test]
    fn generated_numbers_are_unique_enough() {
        let a = generate();
        let b = generate();
        // Same second is fine; the random suffix must differ in practice.
        assert!(a != b || a.len() == ORDER_NUMBER_LEN);
    }

    #[test]
    fn rejects_wrong_prefix_and_length() {
        assert!(!is_valid("XX202601020304051234 56"));
        assert!(!is_valid("PO123"));
        assert!(!is_valid("PO2026010203040512345X"));
        assert!(!is_valid(""));
    }

    #[test]
    fn accepts_well_formed_value() {
        assert!(is_valid("PO20260102030405123456"));
    }
}
