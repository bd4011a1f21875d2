//! Ledger Store
//!
//! Durable accounts and transaction records; the source of truth for balances.
//!
//! # Atomicity
//!
//! Every method that moves a balance is one durable unit: the balance change
//! and the transaction/payment/pledge record it belongs to are committed
//! together or not at all. Implementations serialize concurrent units that
//! touch the same account (row locks in PostgreSQL, a single lock in memory),
//! so a read-check-write can never lose an update.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::core_types::{AccountId, CompanyId, PaymentId, Scope, TransCode, TransactionId, UserId};
use crate::error::LedgerError;
use crate::models::{
    Account, AccountTransaction, CrowdfundCompany, FailReason, ForbiddenAction,
    ForbiddenUserAction, NewAccount, NewCompany, NewForbiddenAction, NewPaymentRequest,
    NewTransaction, PaymentRequest,
};
use crate::payment::PaymentStatus;

/// Result of settling a recorded transaction against balances
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Source debited, destination (if internal) credited, record marked successful
    Committed(AccountTransaction),
    /// Balance untouched, record marked `InsufficientFunds`
    InsufficientFunds(AccountTransaction),
}

/// Result of a compare-and-swap on a payment status
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentTransition {
    Applied(PaymentRequest),
    /// Status was no longer Awaiting; nothing changed
    Unchanged(PaymentStatus),
}

/// Kinds of activity counted by sliding-window rate limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum Activity {
    /// Payment requests still Awaiting
    UnresolvedPayments = 1,
    Comments = 2,
    FileUploads = 3,
}

impl Activity {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create_account(&self, new: NewAccount) -> Result<Account, LedgerError>;

    async fn get_account(&self, scope: Scope, id: AccountId)
    -> Result<Option<Account>, LedgerError>;

    async fn default_account(
        &self,
        scope: Scope,
        owner: UserId,
    ) -> Result<Option<Account>, LedgerError>;

    async fn accounts_of(&self, owner: UserId) -> Result<Vec<Account>, LedgerError>;

    /// Sum of all balances in a scope
    async fn total_balance(&self, scope: Scope) -> Result<Decimal, LedgerError>;

    /// Persist an attempt with `success = false, fail_reason = Unknown`
    async fn record_transaction(
        &self,
        new: NewTransaction,
    ) -> Result<AccountTransaction, LedgerError>;

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<AccountTransaction>, LedgerError>;

    async fn transactions_of(
        &self,
        scope: Scope,
        initiator: UserId,
    ) -> Result<Vec<AccountTransaction>, LedgerError>;

    /// Mark a not-yet-successful record as failed. Balances are untouched.
    ///
    /// Records holding funds (`AwaitingPayout`) must go through
    /// `release_withdrawal` instead.
    async fn fail_transaction(&self, id: TransactionId, reason: FailReason)
    -> Result<(), LedgerError>;

    /// Atomically debit the record's source account, credit its destination
    /// when that is an internal account, and mark the record successful.
    ///
    /// The balance check happens inside the unit. Committing an already
    /// successful record returns it unchanged.
    async fn commit_transfer(&self, id: TransactionId) -> Result<CommitOutcome, LedgerError>;

    /// Reserve the record's amount on its source account and mark it
    /// `AwaitingPayout`, atomically.
    ///
    /// Returns `false` (record marked `InsufficientFunds`) when the available
    /// balance is short. Holding an already held record returns `true`.
    async fn hold_withdrawal(&self, id: TransactionId) -> Result<bool, LedgerError>;

    /// Debit the held amount and mark the record successful. Idempotent.
    async fn settle_withdrawal(&self, id: TransactionId)
    -> Result<AccountTransaction, LedgerError>;

    /// Drop the hold and mark the record failed with `reason`
    async fn release_withdrawal(
        &self,
        id: TransactionId,
        reason: FailReason,
    ) -> Result<(), LedgerError>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_payment(&self, new: NewPaymentRequest) -> Result<PaymentRequest, LedgerError>;

    async fn get_payment(
        &self,
        scope: Scope,
        id: PaymentId,
    ) -> Result<Option<PaymentRequest>, LedgerError>;

    async fn find_by_trans_code(
        &self,
        scope: Scope,
        code: TransCode,
    ) -> Result<Option<PaymentRequest>, LedgerError>;

    /// Store the provider's pay URL and shared secret
    async fn attach_link(&self, id: PaymentId, pay_url: &str, hash: &str)
    -> Result<(), LedgerError>;

    /// CAS Awaiting -> Canceled
    async fn cancel_payment(&self, id: PaymentId) -> Result<PaymentTransition, LedgerError>;

    /// CAS Awaiting -> Paid and credit the destination account by `amount`, atomically
    async fn settle_payment(
        &self,
        id: PaymentId,
        amount: Decimal,
        payer: &str,
    ) -> Result<PaymentTransition, LedgerError>;
}

#[async_trait]
pub trait CrowdfundStore: Send + Sync {
    async fn insert_company(&self, new: NewCompany) -> Result<CrowdfundCompany, LedgerError>;

    async fn get_company(
        &self,
        scope: Scope,
        id: CompanyId,
    ) -> Result<Option<CrowdfundCompany>, LedgerError>;

    /// Attribute a successful pledge and add it to `current_amount`
    async fn add_pledge(
        &self,
        company: CompanyId,
        tx: TransactionId,
        amount: Decimal,
    ) -> Result<CrowdfundCompany, LedgerError>;

    /// Successful pledges attributed to the campaign
    async fn pledges(&self, company: CompanyId) -> Result<Vec<AccountTransaction>, LedgerError>;

    /// Credit `recipient` with the pledge amount and rewrite its destination,
    /// atomically. Returns `false` (and does nothing) when the destination no
    /// longer points at the campaign's escrow.
    async fn settle_pledge(
        &self,
        company: CompanyId,
        tx: TransactionId,
        recipient: AccountId,
    ) -> Result<bool, LedgerError>;

    /// CAS is_over false -> true
    async fn mark_over(&self, company: CompanyId) -> Result<bool, LedgerError>;

    /// Non-over campaigns whose end date has passed, across all scopes
    async fn due_companies(&self, now: DateTime<Utc>)
    -> Result<Vec<CrowdfundCompany>, LedgerError>;

    /// Over campaigns with a successful pledge still held in their escrow
    async fn stranded_companies(&self) -> Result<Vec<CrowdfundCompany>, LedgerError>;
}

#[async_trait]
pub trait GuardStore: Send + Sync {
    async fn insert_forbidden(
        &self,
        new: NewForbiddenAction,
    ) -> Result<ForbiddenAction, LedgerError>;

    /// A ban covering `action` (or ALL) in `scope` still active at `now`
    async fn active_forbidden(
        &self,
        user: UserId,
        scope: Scope,
        action: ForbiddenUserAction,
        now: DateTime<Utc>,
    ) -> Result<Option<ForbiddenAction>, LedgerError>;

    /// Count activity of `user` created at or after `since`
    async fn count_recent(
        &self,
        user: UserId,
        activity: Activity,
        since: DateTime<Utc>,
    ) -> Result<u64, LedgerError>;

    /// Log activity performed by collaborators outside the ledger (comments, uploads)
    async fn record_activity(
        &self,
        user: UserId,
        activity: Activity,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError>;
}
