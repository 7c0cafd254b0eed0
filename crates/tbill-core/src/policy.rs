use serde::{Deserialize, Serialize};

use crate::error::TBillError;

/// Shortest lock period a policy may be registered for, one day in seconds.
pub const MIN_PERIOD: u64 = 86_400;

/// Number of decimal places in the fixed-point interest rate representation.
pub const INTEREST_RATE_DECIMALS: u32 = 6;

/// Fixed-point scale for interest rates: a rate of 15_000 is 1.5%.
pub const RATE_SCALE: u64 = 1_000_000;

/// A (lock period → interest rate) pair governing new purchases.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterestPolicy {
    /// Lock period in seconds, at least [`MIN_PERIOD`].
    pub period: u64,
    /// Rate scaled by [`RATE_SCALE`].
    pub interest_rate: u64,
}

/// Ordered set of interest policies, at most one per distinct period.
///
/// Policies keep the insertion order of first-seen periods; updating an
/// existing period's rate rewrites it in place.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyRegistry {
    policies: Vec<InterestPolicy>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rate for `period`, or overwrite the rate of an existing
    /// policy with the same period.
    pub fn set_rate(&mut self, period: u64, interest_rate: u64) -> Result<(), TBillError> {
        if period < MIN_PERIOD {
            return Err(TBillError::InvalidPeriod { period });
        }
        match self.policies.iter_mut().find(|p| p.period == period) {
            Some(policy) => policy.interest_rate = interest_rate,
            None => self.policies.push(InterestPolicy {
                period,
                interest_rate,
            }),
        }
        Ok(())
    }

    /// All policies in insertion order of their periods.
    pub fn policies(&self) -> &[InterestPolicy] {
        &self.policies
    }

    /// Rate for an exact period match. No interpolation, no nearest-period
    /// fallback.
    pub fn rate_for(&self, period: u64) -> Option<u64> {
        self.policies
            .iter()
            .find(|p| p.period == period)
            .map(|p| p.interest_rate)
    }
}
