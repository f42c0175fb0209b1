//! Validation and fee arithmetic
//!
//! Pure, stateless helpers used by the escrow manager and milestone tracker.
//! Fee splits are exact: no rounding remainder is ever lost.

use chrono::{DateTime, Utc};

use crate::EscrowResult;
use crate::error::EscrowError;

/// Result of splitting an amount into a platform fee and a remainder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    /// Platform fee, `floor(amount * fee_percent / 100)`
    pub fee: u64,
    /// Remainder, `amount - fee`
    pub remainder: u64,
}

/// Split `amount` by `fee_percent`, guaranteeing `fee + remainder == amount`
pub fn calculate_fee(amount: u64, fee_percent: u8) -> EscrowResult<FeeSplit> {
    if fee_percent > 100 {
        return Err(EscrowError::validation(format!(
            "Fee percent {fee_percent} exceeds 100"
        )));
    }

    // 128-bit intermediate so amount * percent cannot overflow
    let fee = (u128::from(amount) * u128::from(fee_percent) / 100) as u64;
    Ok(FeeSplit {
        fee,
        remainder: amount - fee,
    })
}

/// Require the three milestone arrays to have equal lengths
pub fn validate_milestone_arrays(len1: usize, len2: usize, len3: usize) -> EscrowResult<()> {
    if len1 == len2 && len2 == len3 {
        Ok(())
    } else {
        Err(EscrowError::validation(format!(
            "Milestone array length mismatch: {len1} descriptions, {len2} amounts, {len3} due dates"
        )))
    }
}

/// Sum milestone amounts; overflow fails the whole operation, never wraps
pub fn calculate_total_amount(amounts: &[u64]) -> EscrowResult<u64> {
    amounts.iter().try_fold(0u64, |total, &amount| {
        total
            .checked_add(amount)
            .ok_or_else(|| EscrowError::overflow("Milestone amounts overflow u64"))
    })
}

/// A participant identifier is valid if it is a nonzero, non-empty identity
pub fn is_valid_address(address: &str) -> bool {
    let trimmed = address.trim();
    !trimmed.is_empty() && !trimmed.chars().all(|c| c == '0')
}

/// A deadline is valid only if it is strictly in the future
pub fn is_deadline_valid(deadline: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    deadline > now
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_split_is_exact() {
        let split = calculate_fee(1000, 20).unwrap();
        assert_eq!(split.fee, 200);
        assert_eq!(split.remainder, 800);

        // Floor division, remainder preserved
        let split = calculate_fee(999, 10).unwrap();
        assert_eq!(split.fee, 99);
        assert_eq!(split.remainder, 900);
        assert_eq!(split.fee + split.remainder, 999);
    }

    #[test]
    fn fee_split_exact_for_all_percentages() {
        for amount in [0u64, 1, 7, 99, 1000, u64::MAX] {
            for percent in 0..=100u8 {
                let split = calculate_fee(amount, percent).unwrap();
                assert_eq!(split.fee + split.remainder, amount);
                assert_eq!(
                    u128::from(split.fee),
                    u128::from(amount) * u128::from(percent) / 100
                );
            }
        }
    }

    #[test]
    fn fee_percent_over_100_rejected() {
        assert!(matches!(
            calculate_fee(1000, 101),
            Err(EscrowError::Validation(_))
        ));
    }

    #[test]
    fn zero_and_full_percent() {
        let split = calculate_fee(1000, 0).unwrap();
        assert_eq!((split.fee, split.remainder), (0, 1000));

        let split = calculate_fee(1000, 100).unwrap();
        assert_eq!((split.fee, split.remainder), (1000, 0));
    }

    #[test]
    fn milestone_array_shapes() {
        assert!(validate_milestone_arrays(3, 3, 3).is_ok());
        assert!(validate_milestone_arrays(0, 0, 0).is_ok());
        assert!(validate_milestone_arrays(3, 2, 3).is_err());
        assert!(validate_milestone_arrays(1, 1, 2).is_err());
    }

    #[test]
    fn total_amount_sums_and_guards_overflow() {
        assert_eq!(calculate_total_amount(&[]).unwrap(), 0);
        assert_eq!(calculate_total_amount(&[100, 200, 300]).unwrap(), 600);
        assert!(matches!(
            calculate_total_amount(&[u64::MAX, 1]),
            Err(EscrowError::Overflow(_))
        ));
    }

    #[test]
    fn address_validity() {
        assert!(is_valid_address("npub1client"));
        assert!(!is_valid_address(""));
        assert!(!is_valid_address("   "));
        assert!(!is_valid_address("0000000000"));
    }

    #[test]
    fn deadline_validity_is_strict() {
        let now = Utc::now();
        assert!(is_deadline_valid(now + chrono::Duration::seconds(1), now));
        assert!(!is_deadline_valid(now, now));
        assert!(!is_deadline_valid(now - chrono::Duration::seconds(1), now));
    }
}
