//! Core state machine for a fixed-term, interest-bearing token-lock ledger.
//!
//! Account holders deposit a fungible spot token for a chosen lock period, the
//! ledger records a holding with the interest rate locked at purchase time,
//! and after the period elapses the holder redeems the holding for principal
//! plus interest, the interest paid out of a separate funding account.
//!
//! The crate is split into three focused modules:
//!
//! * [`policy`] — the ordered registry of (lock period → interest rate)
//!   policies that govern new purchases.
//! * [`token`] — the fungible-token collaborator the ledger moves value
//!   through, plus an in-memory reference implementation.
//! * [`ledger`] — the holding ledger itself: per-owner holding storage with
//!   compact id reuse, the buy/redeem transitions, and the locked-total
//!   accounting.
//!
//! The ledger never stores token balances; it only orchestrates transfers
//! through the [`token::TokenTransferPort`] it is constructed with.

pub mod ledger;
pub mod policy;
pub mod token;

mod error;

pub use error::TBillError;
