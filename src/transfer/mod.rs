//! Money movement out of ledger accounts
//!
//! # Ordering
//!
//! ```text
//! internal:   guard → record(success=false) → commit(debit+credit)
//! withdrawal: guard → lock account → record → hold(available -= amount)
//!                   → provider payout → settle(debit held)
//! ```
//!
//! The hold is taken inside the store under the account row lock, so workers
//! in other processes cannot pay out the same funds. A provider failure
//! releases the hold and marks the record `GatewayError`; the balance is
//! untouched. The debit never precedes the payout.

pub mod locks;
pub mod service;

pub use locks::AccountLocks;
pub use service::{TransferService, TreasuryReport};
