//! spledger - Financial core of the SPApp community platform
//!
//! Internal ledger, hosted payments through the SPWorlds provider and
//! crowdfunding escrow, safe under concurrent requests and replayed webhooks.
//!
//! # Modules
//!
//! - [`core_types`] - Scopes, ids and transaction endpoints
//! - [`models`] - Accounts, transactions, payment requests, campaigns, bans
//! - [`store`] - Ledger store traits with PostgreSQL and in-memory backends
//! - [`guard`] - Bans and sliding-window rate limits
//! - [`gateway`] - Paced SPWorlds API client
//! - [`transfer`] - Internal transfers and card withdrawals
//! - [`payment`] - Payment request state machine and webhook settlement
//! - [`escrow`] - Crowdfunding pledges, payout and refund
//! - [`account`] - Default account opening

// Core types - must be first!
pub mod core_types;

pub mod error;
pub mod models;

// Infrastructure
pub mod config;
pub mod db;
pub mod logging;
pub mod store;

// Services
pub mod account;
pub mod escrow;
pub mod gateway;
pub mod guard;
pub mod payment;
pub mod transfer;

// Convenient re-exports at crate root
pub use account::AccountService;
pub use config::AppConfig;
pub use core_types::{AccountId, CompanyId, Endpoint, PaymentId, Scope, TransCode, TransactionId, UserId};
pub use error::{ErrorCategory, LedgerError};
pub use escrow::{CloseReport, CompanyDraft, EscrowEngine, EscrowSweeper};
pub use gateway::{PaymentGateway, SpWorldsClient};
pub use guard::{AbuseGuard, RateLimitRule};
pub use models::{Account, AccountTransaction, CrowdfundCompany, FailReason, PaymentRequest};
pub use payment::{AcceptOutcome, PaymentService, PaymentStatus};
pub use transfer::{TransferService, TreasuryReport};
