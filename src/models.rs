//! Ledger records: accounts, transactions, payment requests, campaigns and
//! ban records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::{
    AccountId, CompanyId, Endpoint, PaymentId, Scope, TransCode, TransactionId, UserId,
};
use crate::error::LedgerError;
use crate::payment::PaymentStatus;

// ============================================================================
// Account
// ============================================================================

/// Ledger account
///
/// # Invariants (ENFORCED by the private balance):
/// - balance is never negative
/// - `0 <= held <= balance`; held funds cannot be debited by anything but
///   the withdrawal that holds them
/// - all mutations go through `debit` / `credit` / `hold` / `release` / `debit_held`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: UserId,
    pub scope: Scope,
    balance: Decimal,
    held: Decimal,
    pub is_default: bool,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub const DEFAULT_NAME: &'static str = "main";

    /// Rebuild an account from storage. A negative stored balance is data corruption.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: AccountId,
        owner: UserId,
        scope: Scope,
        balance: Decimal,
        held: Decimal,
        is_default: bool,
        name: String,
        created_at: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        if balance < Decimal::ZERO {
            return Err(LedgerError::Internal(format!(
                "account {} has negative balance {}",
                id, balance
            )));
        }
        if held < Decimal::ZERO || held > balance {
            return Err(LedgerError::Internal(format!(
                "account {} holds {} of balance {}",
                id, held, balance
            )));
        }
        Ok(Self {
            id,
            owner,
            scope,
            balance,
            held,
            is_default,
            name,
            created_at,
        })
    }

    #[inline]
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    /// Reserved for withdrawals awaiting the provider
    #[inline]
    pub fn held(&self) -> Decimal {
        self.held
    }

    #[inline]
    pub fn available(&self) -> Decimal {
        self.balance - self.held
    }

    /// Remove funds. Fails without touching the balance if `amount > available`.
    pub fn debit(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation("debit amount must be positive"));
        }
        if amount > self.available() {
            return Err(LedgerError::InsufficientFunds);
        }
        self.balance -= amount;
        Ok(())
    }

    /// Reserve funds without moving them
    pub fn hold(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation("hold amount must be positive"));
        }
        if amount > self.available() {
            return Err(LedgerError::InsufficientFunds);
        }
        self.held += amount;
        Ok(())
    }

    pub fn release(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO || amount > self.held {
            return Err(LedgerError::Internal(format!(
                "account {} cannot release {} of {} held",
                self.id, amount, self.held
            )));
        }
        self.held -= amount;
        Ok(())
    }

    /// Debit funds previously reserved with `hold`
    pub fn debit_held(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        self.release(amount)?;
        self.balance -= amount;
        Ok(())
    }

    pub fn credit(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation("credit amount must be positive"));
        }
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Internal("balance overflow".into()))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub owner: UserId,
    pub scope: Scope,
    pub is_default: bool,
    pub name: String,
}

// ============================================================================
// Transactions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum TransactionType {
    Internal = 1,
    /// Withdrawal to the payment provider
    Output = 2,
}

impl TransactionType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransactionType::Internal),
            2 => Some(TransactionType::Output),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum FailReason {
    Unknown = 0,
    InsufficientFunds = 1,
    GatewayError = 2,
    /// Funds held; provider payout not yet confirmed
    AwaitingPayout = 3,
}

impl FailReason {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(FailReason::Unknown),
            1 => Some(FailReason::InsufficientFunds),
            2 => Some(FailReason::GatewayError),
            3 => Some(FailReason::AwaitingPayout),
            _ => None,
        }
    }
}

/// Audit record of one balance-affecting attempt.
///
/// Recorded before the balance check, so failed attempts are audited too.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountTransaction {
    pub id: TransactionId,
    pub initiator: UserId,
    pub tx_type: TransactionType,
    pub amount: Decimal,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub success: bool,
    pub fail_reason: Option<FailReason>,
    pub scope: Scope,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub initiator: UserId,
    pub tx_type: TransactionType,
    pub amount: Decimal,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub scope: Scope,
}

// ============================================================================
// Payment requests
// ============================================================================

/// Externally-hosted top-up page tracked until the provider calls back
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRequest {
    pub id: PaymentId,
    pub initiator: UserId,
    pub destination: AccountId,
    pub amount: u32,
    pub trans_code: TransCode,
    /// Provider-issued shared secret; never exposed to the payer
    #[serde(skip_serializing)]
    pub hash: String,
    pub data: String,
    pub pay_url: String,
    pub expires_at: DateTime<Utc>,
    pub status: PaymentStatus,
    pub payer: String,
    pub scope: Scope,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentRequest {
    pub initiator: UserId,
    pub destination: AccountId,
    pub amount: u32,
    pub data: String,
    pub expires_at: DateTime<Utc>,
    pub scope: Scope,
}

// ============================================================================
// Crowdfunding
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrowdfundCompany {
    pub id: CompanyId,
    pub owner: UserId,
    pub scope: Scope,
    pub title: String,
    pub short_description: String,
    pub goal: Decimal,
    /// Pledged so far; settled only when the campaign closes
    pub current_amount: Decimal,
    pub end_date: DateTime<Utc>,
    /// One-way latch
    pub is_over: bool,
    pub created_at: DateTime<Utc>,
}

impl CrowdfundCompany {
    #[inline]
    pub fn goal_reached(&self) -> bool {
        self.current_amount >= self.goal
    }

    #[inline]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_over && self.end_date <= now
    }
}

#[derive(Debug, Clone)]
pub struct NewCompany {
    pub owner: UserId,
    pub scope: Scope,
    pub title: String,
    pub short_description: String,
    pub goal: Decimal,
    pub end_date: DateTime<Utc>,
}

// ============================================================================
// Restrictions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum ForbiddenUserAction {
    /// Wildcard: covers every other action
    All = 1,
    UploadFiles = 2,
    CreateComments = 3,
    CreateCrowdfundings = 4,
    CreatePayments = 5,
    CreateTransactions = 6,
    BuyItems = 7,
    CreateShop = 8,
}

impl ForbiddenUserAction {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        use ForbiddenUserAction::*;
        [
            All,
            UploadFiles,
            CreateComments,
            CreateCrowdfundings,
            CreatePayments,
            CreateTransactions,
            BuyItems,
            CreateShop,
        ]
        .into_iter()
        .find(|a| a.id() == id)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ForbiddenUserAction::All => "ALL",
            ForbiddenUserAction::UploadFiles => "UPLOAD_FILES",
            ForbiddenUserAction::CreateComments => "CREATE_COMMENTS",
            ForbiddenUserAction::CreateCrowdfundings => "CREATE_CROWDFUNDINGS",
            ForbiddenUserAction::CreatePayments => "CREATE_PAYMENTS",
            ForbiddenUserAction::CreateTransactions => "CREATE_TRANSACTIONS",
            ForbiddenUserAction::BuyItems => "BUY_ITEMS",
            ForbiddenUserAction::CreateShop => "CREATE_SHOP",
        }
    }

    /// Does a ban on `self` cover `action`?
    #[inline]
    pub fn covers(&self, action: ForbiddenUserAction) -> bool {
        *self == ForbiddenUserAction::All || *self == action
    }
}

impl fmt::Display for ForbiddenUserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted ban record
#[derive(Debug, Clone, PartialEq)]
pub struct ForbiddenAction {
    pub id: i64,
    pub user: UserId,
    pub scope: Scope,
    pub action: ForbiddenUserAction,
    pub forbidden_until: DateTime<Utc>,
    pub reason: String,
}

impl ForbiddenAction {
    pub fn info(&self) -> ForbiddenInfo {
        ForbiddenInfo {
            action: self.action,
            scope: self.scope,
            forbidden_until: self.forbidden_until,
            reason: self.reason.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewForbiddenAction {
    pub user: UserId,
    pub scope: Scope,
    pub action: ForbiddenUserAction,
    pub forbidden_until: DateTime<Utc>,
    pub reason: String,
}

/// Active restriction returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForbiddenInfo {
    pub action: ForbiddenUserAction,
    pub scope: Scope,
    pub forbidden_until: DateTime<Utc>,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(balance: i64) -> Account {
        Account::from_parts(
            AccountId(1),
            UserId(1),
            Scope::Sp,
            Decimal::from(balance),
            Decimal::ZERO,
            true,
            Account::DEFAULT_NAME.into(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_debit_never_goes_negative() {
        let mut acc = account(10);
        assert!(matches!(
            acc.debit(Decimal::from(11)),
            Err(LedgerError::InsufficientFunds)
        ));
        assert_eq!(acc.balance(), Decimal::from(10));

        acc.debit(Decimal::from(10)).unwrap();
        assert_eq!(acc.balance(), Decimal::ZERO);
    }

    #[test]
    fn test_non_positive_amounts_rejected() {
        let mut acc = account(10);
        assert!(acc.debit(Decimal::ZERO).is_err());
        assert!(acc.credit(Decimal::from(-1)).is_err());
        assert_eq!(acc.balance(), Decimal::from(10));
    }

    #[test]
    fn test_negative_stored_balance_is_rejected() {
        let res = Account::from_parts(
            AccountId(1),
            UserId(1),
            Scope::Sp,
            Decimal::from(-5),
            Decimal::ZERO,
            true,
            "main".into(),
            Utc::now(),
        );
        assert!(res.is_err());

        let res = Account::from_parts(
            AccountId(1),
            UserId(1),
            Scope::Sp,
            Decimal::from(5),
            Decimal::from(6),
            true,
            "main".into(),
            Utc::now(),
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_held_funds_cannot_be_spent_twice() {
        let mut acc = account(10);
        acc.hold(Decimal::from(7)).unwrap();
        assert_eq!(acc.available(), Decimal::from(3));
        assert_eq!(acc.balance(), Decimal::from(10));

        assert!(matches!(
            acc.hold(Decimal::from(4)),
            Err(LedgerError::InsufficientFunds)
        ));
        assert!(matches!(
            acc.debit(Decimal::from(4)),
            Err(LedgerError::InsufficientFunds)
        ));
        acc.debit(Decimal::from(3)).unwrap();

        acc.debit_held(Decimal::from(7)).unwrap();
        assert_eq!(acc.balance(), Decimal::ZERO);
        assert_eq!(acc.held(), Decimal::ZERO);
        assert!(acc.release(Decimal::from(1)).is_err());
    }

    #[test]
    fn test_release_frees_held_funds() {
        let mut acc = account(10);
        acc.hold(Decimal::from(10)).unwrap();
        acc.release(Decimal::from(10)).unwrap();
        assert_eq!(acc.available(), Decimal::from(10));
        acc.debit(Decimal::from(10)).unwrap();
    }

    #[test]
    fn test_wildcard_ban_covers_everything() {
        assert!(ForbiddenUserAction::All.covers(ForbiddenUserAction::CreatePayments));
        assert!(ForbiddenUserAction::CreatePayments.covers(ForbiddenUserAction::CreatePayments));
        assert!(!ForbiddenUserAction::UploadFiles.covers(ForbiddenUserAction::CreatePayments));
    }

    #[test]
    fn test_action_id_roundtrip() {
        assert_eq!(
            ForbiddenUserAction::from_id(6),
            Some(ForbiddenUserAction::CreateTransactions)
        );
        assert_eq!(ForbiddenUserAction::from_id(0), None);
        assert_eq!(FailReason::from_id(2), Some(FailReason::GatewayError));
        assert_eq!(TransactionType::from_id(3), None);
    }
}
