//! Ledger Error Types
//!
//! One taxonomy for every money-moving operation. Each variant carries a
//! stable code, an HTTP status suggestion and a category telling the caller
//! whether to retry, fix the input, or stop.

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::models::ForbiddenInfo;

/// What the caller should do about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient: provider or rate limit, try again later
    RetryLater,
    /// The request itself is wrong
    FixInput,
    /// Banned, not the owner, or otherwise not permitted
    NotAllowed,
    NotFound,
    Internal,
}

#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    // === Not Found ===
    #[error("Account not found")]
    AccountNotFound,

    #[error("Payment not found")]
    PaymentNotFound,

    #[error("Crowdfunding company not found")]
    CompanyNotFound,

    // === Not Allowed ===
    #[error("Action {} is forbidden until {}", .0.action, .0.forbidden_until)]
    ForbiddenAction(ForbiddenInfo),

    #[error("Only the owner or an admin can do this")]
    NotOwner,

    #[error("Wrong payment hash")]
    WrongPaymentHash,

    #[error("The user cannot support their own company")]
    CantSupportYourOwnCompany,

    #[error("Company goal is not reached")]
    GoalNotReached,

    // === Validation ===
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Crowdfunding company is already over")]
    CompanyClosed,

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    // === Retry Later ===
    #[error("Too many requests")]
    TooManyRequests,

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    // === System ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }

    /// Stable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::AccountNotFound => "ACCOUNT_NOT_FOUND",
            LedgerError::PaymentNotFound => "PAYMENT_NOT_FOUND",
            LedgerError::CompanyNotFound => "CROWD_COMPANY_NOT_FOUND",
            LedgerError::ForbiddenAction(_) => "FORBIDDEN_ACTION",
            LedgerError::NotOwner => "FORBIDDEN",
            LedgerError::WrongPaymentHash => "WRONG_PAYMENT_HASH",
            LedgerError::CantSupportYourOwnCompany => "CANT_SUPPORT_YOUR_OWN_COMPANY",
            LedgerError::GoalNotReached => "GOAL_NOT_REACHED",
            LedgerError::Validation(_) => "VALIDATION_FAILED",
            LedgerError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            LedgerError::CompanyClosed => "COMPANY_CLOSED",
            LedgerError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            LedgerError::TooManyRequests => "TOO_MANY_REQUESTS",
            LedgerError::Gateway(_) => "GATEWAY_ERROR",
            LedgerError::Database(_) => "DATABASE_ERROR",
            LedgerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::AccountNotFound
            | LedgerError::PaymentNotFound
            | LedgerError::CompanyNotFound => 404,
            LedgerError::ForbiddenAction(_)
            | LedgerError::NotOwner
            | LedgerError::WrongPaymentHash
            | LedgerError::GoalNotReached => 403,
            LedgerError::CantSupportYourOwnCompany
            | LedgerError::Validation(_)
            | LedgerError::InsufficientFunds => 400,
            LedgerError::CompanyClosed | LedgerError::InvalidStateTransition(_) => 409,
            LedgerError::TooManyRequests => 429,
            LedgerError::Gateway(_) => 503,
            LedgerError::Database(_) | LedgerError::Internal(_) => 500,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            LedgerError::AccountNotFound
            | LedgerError::PaymentNotFound
            | LedgerError::CompanyNotFound => ErrorCategory::NotFound,
            LedgerError::ForbiddenAction(_)
            | LedgerError::NotOwner
            | LedgerError::WrongPaymentHash
            | LedgerError::GoalNotReached
            | LedgerError::CantSupportYourOwnCompany => ErrorCategory::NotAllowed,
            LedgerError::Validation(_)
            | LedgerError::InsufficientFunds
            | LedgerError::CompanyClosed
            | LedgerError::InvalidStateTransition(_) => ErrorCategory::FixInput,
            LedgerError::TooManyRequests | LedgerError::Gateway(_) => ErrorCategory::RetryLater,
            LedgerError::Database(_) | LedgerError::Internal(_) => ErrorCategory::Internal,
        }
    }

    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::RetryLater
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Database(e.to_string())
    }
}

impl From<GatewayError> for LedgerError {
    fn from(e: GatewayError) -> Self {
        LedgerError::Gateway(e.to_string())
    }
}
