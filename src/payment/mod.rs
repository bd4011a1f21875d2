//! Payment Request State Machine
//!
//! Hosted top-up pages: `create_payment` opens one at the provider,
//! `accept_payment` (webhook) settles it. The Awaiting → Paid transition and
//! the credit are one atomic compare-and-swap, so replayed webhooks never
//! credit twice.

pub mod service;
pub mod state;

pub use service::{AcceptOutcome, PaymentService};
pub use state::PaymentStatus;
