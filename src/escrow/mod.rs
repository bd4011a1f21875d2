//! Escrow Settlement Engine
//!
//! # Lifecycle
//!
//! ```text
//! create (fee → sink) → support* (default account → escrow:{id})
//!                     → close(success)  : each pledge → owner's default account
//!                     → close(!success) : each pledge → its source account
//!                     → is_over = true
//!                     → late pledges → their source accounts
//! ```
//!
//! Pledges settle one at a time; a pledge whose destination no longer points
//! at the campaign is skipped, so a close can be re-run after a crash.

pub mod engine;
pub mod worker;

pub use engine::{CloseReport, CompanyDraft, EscrowEngine, SweepReport};
pub use worker::{EscrowSweeper, SweeperConfig};
