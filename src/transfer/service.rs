//! Transfer Service
//!
//! Internal transfers and withdrawals to provider cards. Every attempt that
//! gets past validation and the guard leaves exactly one transaction record.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::locks::AccountLocks;
use crate::core_types::{AccountId, Endpoint, Scope, UserId};
use crate::error::LedgerError;
use crate::gateway::{PaymentGateway, WithdrawalOrder};
use crate::guard::AbuseGuard;
use crate::logging::LEDGER_TRACE_TARGET;
use crate::models::{
    Account, AccountTransaction, FailReason, ForbiddenUserAction, NewTransaction, TransactionType,
};
use crate::store::{AccountStore, CommitOutcome};

/// Ledger vs provider view of one scope's money
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreasuryReport {
    pub scope: Scope,
    /// Sum of all account balances
    pub ledger_total: Decimal,
    /// Merchant card balance; `None` when the provider could not be reached
    pub provider_balance: Option<Decimal>,
}

pub struct TransferService {
    accounts: Arc<dyn AccountStore>,
    guard: Arc<AbuseGuard>,
    gateway: Arc<dyn PaymentGateway>,
    locks: AccountLocks,
}

impl TransferService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        guard: Arc<AbuseGuard>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            accounts,
            guard,
            gateway,
            locks: AccountLocks::new(),
        }
    }

    /// Move `amount` from the initiator's default account to `destination`.
    ///
    /// `InternalAccount` destinations are credited; `SystemSink` and `Escrow`
    /// destinations have no credit leg.
    pub async fn create_internal_transaction(
        &self,
        initiator: UserId,
        amount: Decimal,
        destination: Endpoint,
        scope: Scope,
    ) -> Result<AccountTransaction, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation("amount must be positive"));
        }
        if matches!(destination, Endpoint::ExternalCard(_)) {
            return Err(LedgerError::validation(
                "internal transfers cannot target a card; use a withdrawal",
            ));
        }

        self.guard
            .ensure_allowed(initiator, ForbiddenUserAction::CreateTransactions, scope)
            .await?;

        let source = self
            .accounts
            .default_account(scope, initiator)
            .await?
            .ok_or(LedgerError::AccountNotFound)?;

        let _lock = self.locks.lock(source.id).await;

        let tx = self
            .accounts
            .record_transaction(NewTransaction {
                initiator,
                tx_type: TransactionType::Internal,
                amount,
                source: Endpoint::InternalAccount(source.id),
                destination: destination.clone(),
                scope,
            })
            .await?;
        debug!(target: LEDGER_TRACE_TARGET, tx_id = %tx.id, "transfer recorded");

        if let Endpoint::InternalAccount(dest_id) = destination
            && self.accounts.get_account(scope, dest_id).await?.is_none()
        {
            warn!(tx_id = %tx.id, dest = %dest_id, scope = %scope, "Transfer destination not found");
            return Err(LedgerError::AccountNotFound);
        }

        match self.accounts.commit_transfer(tx.id).await? {
            CommitOutcome::Committed(tx) => {
                info!(
                    tx_id = %tx.id,
                    user_id = %initiator,
                    from = %tx.source,
                    to = %tx.destination,
                    amount = %tx.amount,
                    scope = %scope,
                    "Internal transfer committed"
                );
                Ok(tx)
            }
            CommitOutcome::InsufficientFunds(tx) => {
                debug!(tx_id = %tx.id, balance = %source.balance(), amount = %amount, "Transfer rejected: insufficient funds");
                Err(LedgerError::InsufficientFunds)
            }
        }
    }

    /// Send `amount` from one of the user's accounts to a provider card.
    ///
    /// The amount is held in the store before the provider is paid; the debit
    /// commits only after the payout succeeds.
    pub async fn withdraw_money(
        &self,
        user: UserId,
        account_id: AccountId,
        amount: u32,
        card: &str,
        scope: Scope,
    ) -> Result<AccountTransaction, LedgerError> {
        let card = card.trim();
        if card.is_empty() {
            return Err(LedgerError::validation("destination card is empty"));
        }
        if amount == 0 {
            return Err(LedgerError::validation("amount must be positive"));
        }

        self.guard
            .ensure_allowed(user, ForbiddenUserAction::CreateTransactions, scope)
            .await?;

        let _lock = self.locks.lock(account_id).await;

        let account = self
            .accounts
            .get_account(scope, account_id)
            .await?
            .filter(|a| a.owner == user)
            .ok_or(LedgerError::AccountNotFound)?;

        let amount_dec = Decimal::from(amount);
        let tx = self
            .accounts
            .record_transaction(NewTransaction {
                initiator: user,
                tx_type: TransactionType::Output,
                amount: amount_dec,
                source: Endpoint::InternalAccount(account.id),
                destination: Endpoint::ExternalCard(card.to_string()),
                scope,
            })
            .await?;
        debug!(target: LEDGER_TRACE_TARGET, tx_id = %tx.id, "withdrawal recorded");

        // Reserved in the store, so other workers see it before the payout
        if !self.accounts.hold_withdrawal(tx.id).await? {
            debug!(tx_id = %tx.id, available = %account.available(), "Withdrawal rejected: insufficient funds");
            return Err(LedgerError::InsufficientFunds);
        }

        let order = WithdrawalOrder {
            receiver: card.to_string(),
            amount,
            comment: format!("AID: {} | TID: {}", account.id, tx.id),
        };
        if let Err(e) = self.gateway.send_withdrawal(&order, scope).await {
            error!(tx_id = %tx.id, account_id = %account.id, error = %e, "Gateway withdrawal failed");
            self.accounts
                .release_withdrawal(tx.id, FailReason::GatewayError)
                .await?;
            return Err(e.into());
        }

        match self.accounts.settle_withdrawal(tx.id).await {
            Ok(tx) => {
                info!(
                    tx_id = %tx.id,
                    user_id = %user,
                    account_id = %account.id,
                    card = %card,
                    amount = amount,
                    scope = %scope,
                    "Withdrawal committed"
                );
                Ok(tx)
            }
            Err(e) => {
                // Provider already paid out; the hold stays until reconciled
                error!(tx_id = %tx.id, account_id = %account.id, error = %e, "Withdrawal sent but debit failed");
                Err(e)
            }
        }
    }

    /// Ledger total and provider card balance for one scope
    pub async fn treasury_report(&self, scope: Scope) -> Result<TreasuryReport, LedgerError> {
        let ledger_total = self.accounts.total_balance(scope).await?;
        let provider_balance = match self.gateway.get_balance(scope).await {
            Ok(card) => Some(Decimal::from(card.balance)),
            Err(e) => {
                warn!(scope = %scope, error = %e, "Provider balance unavailable");
                None
            }
        };
        Ok(TreasuryReport {
            scope,
            ledger_total,
            provider_balance,
        })
    }

    pub async fn account(&self, scope: Scope, id: AccountId) -> Result<Account, LedgerError> {
        self.accounts
            .get_account(scope, id)
            .await?
            .ok_or(LedgerError::AccountNotFound)
    }
}
