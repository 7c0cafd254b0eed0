use thiserror::Error;

use crate::token::TokenError;

/// Canonical error type surfaced by the ledger operations.
///
/// Every variant aborts the triggering operation with no state mutation; the
/// caller may retry once the underlying condition is fixed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TBillError {
    /// Lock period shorter than the one-day minimum.
    #[error("period {period}s is below the minimum lock period")]
    InvalidPeriod { period: u64 },

    /// Purchase amount must be positive.
    #[error("purchase amount must be positive")]
    InvalidAmount,

    /// No interest policy registered for the requested period.
    #[error("no interest policy for period {period}s")]
    NoMatchingPolicy { period: u64 },

    /// Redemption attempted before the holding's release time.
    #[error("holding locked until {release_timestamp}, current time {now}")]
    NotYetReleased { release_timestamp: u64, now: u64 },

    /// No live holding with this id for the calling owner.
    #[error("no holding with id {id}")]
    HoldingNotFound { id: usize },

    /// The token collaborator refused to move principal.
    #[error("principal transfer failed: {source}")]
    PrincipalTransferFailed {
        #[source]
        source: TokenError,
    },

    /// The token collaborator refused to move interest out of the fund.
    #[error("interest transfer failed: {source}")]
    InterestTransferFailed {
        #[source]
        source: TokenError,
    },
}
