//! PostgreSQL Ledger Store
//!
//! One `BEGIN … COMMIT` per atomic unit. Account rows are locked with
//! `SELECT … FOR UPDATE` in ascending id order; status changes are
//! compare-and-swap `UPDATE … WHERE status = $expected`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::{
    AccountStore, Activity, CommitOutcome, CrowdfundStore, GuardStore, PaymentStore,
    PaymentTransition,
};
use crate::core_types::{
    AccountId, CompanyId, Endpoint, PaymentId, Scope, TransCode, TransactionId, UserId,
};
use crate::error::LedgerError;
use crate::models::{
    Account, AccountTransaction, CrowdfundCompany, FailReason, ForbiddenAction,
    ForbiddenUserAction, NewAccount, NewCompany, NewForbiddenAction, NewPaymentRequest,
    NewTransaction, PaymentRequest, TransactionType,
};
use crate::payment::PaymentStatus;

const ACCOUNT_COLUMNS: &str = "id, owner_id, scope, balance, held, is_default, name, created_at";
const TX_COLUMNS: &str = "id, initiator_id, tx_type, amount, source, destination, success, \
                          fail_reason, scope, created_at";
const PAYMENT_COLUMNS: &str = "id, initiator_id, destination_id, amount, trans_code, hash, data, \
                               pay_url, expires_at, status, payer, scope, created_at";
const COMPANY_COLUMNS: &str = "id, owner_id, scope, title, short_description, goal, \
                               current_amount, end_date, is_over, created_at";
const FORBIDDEN_COLUMNS: &str = "id, user_id, scope, action, forbidden_until, reason";

fn corrupt(what: &str, value: impl std::fmt::Display) -> LedgerError {
    LedgerError::Internal(format!("corrupt {} in database: {}", what, value))
}

fn scope_of(row: &PgRow) -> Result<Scope, LedgerError> {
    let id: i16 = row.try_get("scope")?;
    Scope::from_id(id).ok_or_else(|| corrupt("scope", id))
}

fn endpoint_of(row: &PgRow, column: &str) -> Result<Endpoint, LedgerError> {
    let label: String = row.try_get(column)?;
    label.parse().map_err(|e: String| corrupt("endpoint", e))
}

fn account_from_row(row: &PgRow) -> Result<Account, LedgerError> {
    Account::from_parts(
        AccountId(row.try_get("id")?),
        UserId(row.try_get("owner_id")?),
        scope_of(row)?,
        row.try_get("balance")?,
        row.try_get("held")?,
        row.try_get("is_default")?,
        row.try_get("name")?,
        row.try_get("created_at")?,
    )
}

fn tx_from_row(row: &PgRow) -> Result<AccountTransaction, LedgerError> {
    let tx_type: i16 = row.try_get("tx_type")?;
    let fail_reason: Option<i16> = row.try_get("fail_reason")?;
    Ok(AccountTransaction {
        id: TransactionId(row.try_get("id")?),
        initiator: UserId(row.try_get("initiator_id")?),
        tx_type: TransactionType::from_id(tx_type).ok_or_else(|| corrupt("tx_type", tx_type))?,
        amount: row.try_get("amount")?,
        source: endpoint_of(row, "source")?,
        destination: endpoint_of(row, "destination")?,
        success: row.try_get("success")?,
        fail_reason: fail_reason
            .map(|r| FailReason::from_id(r).ok_or_else(|| corrupt("fail_reason", r)))
            .transpose()?,
        scope: scope_of(row)?,
        created_at: row.try_get("created_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<PaymentRequest, LedgerError> {
    let amount: i64 = row.try_get("amount")?;
    let status: i16 = row.try_get("status")?;
    Ok(PaymentRequest {
        id: PaymentId(row.try_get("id")?),
        initiator: UserId(row.try_get("initiator_id")?),
        destination: AccountId(row.try_get("destination_id")?),
        amount: u32::try_from(amount).map_err(|_| corrupt("payment amount", amount))?,
        trans_code: TransCode(row.try_get("trans_code")?),
        hash: row.try_get("hash")?,
        data: row.try_get("data")?,
        pay_url: row.try_get("pay_url")?,
        expires_at: row.try_get("expires_at")?,
        status: PaymentStatus::from_id(status).ok_or_else(|| corrupt("payment status", status))?,
        payer: row.try_get("payer")?,
        scope: scope_of(row)?,
        created_at: row.try_get("created_at")?,
    })
}

fn company_from_row(row: &PgRow) -> Result<CrowdfundCompany, LedgerError> {
    Ok(CrowdfundCompany {
        id: CompanyId(row.try_get("id")?),
        owner: UserId(row.try_get("owner_id")?),
        scope: scope_of(row)?,
        title: row.try_get("title")?,
        short_description: row.try_get("short_description")?,
        goal: row.try_get("goal")?,
        current_amount: row.try_get("current_amount")?,
        end_date: row.try_get("end_date")?,
        is_over: row.try_get("is_over")?,
        created_at: row.try_get("created_at")?,
    })
}

fn forbidden_from_row(row: &PgRow) -> Result<ForbiddenAction, LedgerError> {
    let action: i16 = row.try_get("action")?;
    Ok(ForbiddenAction {
        id: row.try_get("id")?,
        user: UserId(row.try_get("user_id")?),
        scope: scope_of(row)?,
        action: ForbiddenUserAction::from_id(action).ok_or_else(|| corrupt("action", action))?,
        forbidden_until: row.try_get("forbidden_until")?,
        reason: row.try_get("reason")?,
    })
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock the given accounts (same scope) in ascending id order
    async fn lock_accounts(
        db: &mut Transaction<'_, Postgres>,
        scope: Scope,
        ids: &[AccountId],
    ) -> Result<HashMap<AccountId, Account>, LedgerError> {
        let mut raw: Vec<i64> = ids.iter().map(|id| id.0).collect();
        raw.sort_unstable();
        raw.dedup();
        let rows = sqlx::query(&format!(
            "SELECT {} FROM accounts_tb WHERE id = ANY($1) AND scope = $2 ORDER BY id FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(raw.as_slice())
        .bind(scope.id())
        .fetch_all(&mut **db)
        .await?;

        rows.iter()
            .map(|row| account_from_row(row).map(|a| (a.id, a)))
            .collect()
    }

    async fn write_balance(
        db: &mut Transaction<'_, Postgres>,
        account: &Account,
    ) -> Result<(), LedgerError> {
        sqlx::query("UPDATE accounts_tb SET balance = $1, held = $2 WHERE id = $3")
            .bind(account.balance())
            .bind(account.held())
            .bind(account.id.0)
            .execute(&mut **db)
            .await?;
        Ok(())
    }

    async fn lock_transaction(
        db: &mut Transaction<'_, Postgres>,
        id: TransactionId,
    ) -> Result<AccountTransaction, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM account_transactions_tb WHERE id = $1 FOR UPDATE",
            TX_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&mut **db)
        .await?
        .ok_or_else(|| LedgerError::Internal(format!("transaction {} not found", id)))?;
        tx_from_row(&row)
    }

    /// Lock a withdrawal record and its source account
    async fn lock_withdrawal(
        db: &mut Transaction<'_, Postgres>,
        id: TransactionId,
    ) -> Result<(AccountTransaction, Account), LedgerError> {
        let tx = Self::lock_transaction(db, id).await?;
        let source_id = tx
            .source
            .account()
            .ok_or_else(|| LedgerError::validation("transfer source must be an account"))?;
        let source = Self::lock_accounts(db, tx.scope, &[source_id])
            .await?
            .remove(&source_id)
            .ok_or(LedgerError::AccountNotFound)?;
        Ok((tx, source))
    }

    async fn set_fail_reason(
        db: &mut Transaction<'_, Postgres>,
        id: TransactionId,
        reason: FailReason,
    ) -> Result<(), LedgerError> {
        sqlx::query("UPDATE account_transactions_tb SET fail_reason = $1 WHERE id = $2")
            .bind(reason.id())
            .bind(id.0)
            .execute(&mut **db)
            .await?;
        Ok(())
    }

    async fn payment_status(&self, id: PaymentId) -> Result<PaymentStatus, LedgerError> {
        let status: Option<i16> =
            sqlx::query_scalar("SELECT status FROM payment_requests_tb WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        let status = status.ok_or(LedgerError::PaymentNotFound)?;
        PaymentStatus::from_id(status).ok_or_else(|| corrupt("payment status", status))
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn create_account(&self, new: NewAccount) -> Result<Account, LedgerError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO accounts_tb (owner_id, scope, balance, is_default, name, created_at)
            VALUES ($1, $2, 0, $3, $4, NOW())
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(new.owner.0)
        .bind(new.scope.id())
        .bind(new.is_default)
        .bind(&new.name)
        .fetch_one(&self.pool)
        .await?;
        account_from_row(&row)
    }

    async fn get_account(
        &self,
        scope: Scope,
        id: AccountId,
    ) -> Result<Option<Account>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts_tb WHERE id = $1 AND scope = $2",
            ACCOUNT_COLUMNS
        ))
        .bind(id.0)
        .bind(scope.id())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn default_account(
        &self,
        scope: Scope,
        owner: UserId,
    ) -> Result<Option<Account>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts_tb WHERE owner_id = $1 AND scope = $2 AND is_default",
            ACCOUNT_COLUMNS
        ))
        .bind(owner.0)
        .bind(scope.id())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn accounts_of(&self, owner: UserId) -> Result<Vec<Account>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM accounts_tb WHERE owner_id = $1 ORDER BY id",
            ACCOUNT_COLUMNS
        ))
        .bind(owner.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(account_from_row).collect()
    }

    async fn total_balance(&self, scope: Scope) -> Result<Decimal, LedgerError> {
        let total: Option<Decimal> =
            sqlx::query_scalar("SELECT SUM(balance) FROM accounts_tb WHERE scope = $1")
                .bind(scope.id())
                .fetch_one(&self.pool)
                .await?;
        Ok(total.unwrap_or(Decimal::ZERO))
    }

    async fn record_transaction(
        &self,
        new: NewTransaction,
    ) -> Result<AccountTransaction, LedgerError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO account_transactions_tb
                (initiator_id, tx_type, amount, source, destination, success, fail_reason, scope, created_at)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7, NOW())
            RETURNING {}
            "#,
            TX_COLUMNS
        ))
        .bind(new.initiator.0)
        .bind(new.tx_type.id())
        .bind(new.amount)
        .bind(new.source.to_string())
        .bind(new.destination.to_string())
        .bind(FailReason::Unknown.id())
        .bind(new.scope.id())
        .fetch_one(&self.pool)
        .await?;
        tx_from_row(&row)
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<AccountTransaction>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM account_transactions_tb WHERE id = $1",
            TX_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(tx_from_row).transpose()
    }

    async fn transactions_of(
        &self,
        scope: Scope,
        initiator: UserId,
    ) -> Result<Vec<AccountTransaction>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM account_transactions_tb WHERE scope = $1 AND initiator_id = $2 ORDER BY id",
            TX_COLUMNS
        ))
        .bind(scope.id())
        .bind(initiator.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(tx_from_row).collect()
    }

    async fn fail_transaction(
        &self,
        id: TransactionId,
        reason: FailReason,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE account_transactions_tb SET fail_reason = $1
            WHERE id = $2 AND success = FALSE AND fail_reason IS DISTINCT FROM $3
            "#,
        )
        .bind(reason.id())
        .bind(id.0)
        .bind(FailReason::AwaitingPayout.id())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::InvalidStateTransition(format!(
                "transaction {} missing, already succeeded or holds funds",
                id
            )));
        }
        Ok(())
    }

    async fn commit_transfer(&self, id: TransactionId) -> Result<CommitOutcome, LedgerError> {
        let mut db = self.pool.begin().await?;
        let tx = Self::lock_transaction(&mut db, id).await?;

        if tx.success {
            let _ = db.rollback().await;
            return Ok(CommitOutcome::Committed(tx));
        }
        if tx.fail_reason != Some(FailReason::Unknown) {
            let _ = db.rollback().await;
            return Err(LedgerError::InvalidStateTransition(format!(
                "transaction {} already failed",
                id
            )));
        }

        let source_id = tx
            .source
            .account()
            .ok_or_else(|| LedgerError::validation("transfer source must be an account"))?;
        let dest_id = tx.destination.account();

        let mut ids = vec![source_id];
        ids.extend(dest_id);
        let mut accounts = Self::lock_accounts(&mut db, tx.scope, &ids).await?;

        let mut source = accounts
            .remove(&source_id)
            .ok_or(LedgerError::AccountNotFound)?;
        match source.debit(tx.amount) {
            Ok(()) => {}
            Err(LedgerError::InsufficientFunds) => {
                Self::set_fail_reason(&mut db, id, FailReason::InsufficientFunds).await?;
                db.commit().await?;
                debug!(tx_id = %id, "Commit rejected: insufficient funds");
                return Ok(CommitOutcome::InsufficientFunds(AccountTransaction {
                    fail_reason: Some(FailReason::InsufficientFunds),
                    ..tx
                }));
            }
            Err(e) => return Err(e),
        }

        match dest_id {
            Some(dest_id) if dest_id == source_id => source.credit(tx.amount)?,
            Some(dest_id) => {
                let mut dest = accounts
                    .remove(&dest_id)
                    .ok_or(LedgerError::AccountNotFound)?;
                dest.credit(tx.amount)?;
                Self::write_balance(&mut db, &dest).await?;
            }
            None => {}
        }
        Self::write_balance(&mut db, &source).await?;

        sqlx::query(
            "UPDATE account_transactions_tb SET success = TRUE, fail_reason = NULL WHERE id = $1",
        )
        .bind(id.0)
        .execute(&mut *db)
        .await?;
        db.commit().await?;

        Ok(CommitOutcome::Committed(AccountTransaction {
            success: true,
            fail_reason: None,
            ..tx
        }))
    }

    async fn hold_withdrawal(&self, id: TransactionId) -> Result<bool, LedgerError> {
        let mut db = self.pool.begin().await?;
        let (tx, mut source) = Self::lock_withdrawal(&mut db, id).await?;

        match tx.fail_reason {
            Some(FailReason::AwaitingPayout) => {
                let _ = db.rollback().await;
                return Ok(true);
            }
            Some(FailReason::Unknown) if !tx.success => {}
            _ => {
                let _ = db.rollback().await;
                return Err(LedgerError::InvalidStateTransition(format!(
                    "transaction {} cannot hold funds",
                    id
                )));
            }
        }

        let held = match source.hold(tx.amount) {
            Ok(()) => {
                Self::write_balance(&mut db, &source).await?;
                Self::set_fail_reason(&mut db, id, FailReason::AwaitingPayout).await?;
                true
            }
            Err(LedgerError::InsufficientFunds) => {
                Self::set_fail_reason(&mut db, id, FailReason::InsufficientFunds).await?;
                false
            }
            Err(e) => return Err(e),
        };
        db.commit().await?;
        debug!(tx_id = %id, held, "Withdrawal hold");
        Ok(held)
    }

    async fn settle_withdrawal(
        &self,
        id: TransactionId,
    ) -> Result<AccountTransaction, LedgerError> {
        let mut db = self.pool.begin().await?;
        let (tx, mut source) = Self::lock_withdrawal(&mut db, id).await?;

        if tx.success {
            let _ = db.rollback().await;
            return Ok(tx);
        }
        if tx.fail_reason != Some(FailReason::AwaitingPayout) {
            let _ = db.rollback().await;
            return Err(LedgerError::InvalidStateTransition(format!(
                "transaction {} holds no funds",
                id
            )));
        }

        source.debit_held(tx.amount)?;
        Self::write_balance(&mut db, &source).await?;
        sqlx::query(
            "UPDATE account_transactions_tb SET success = TRUE, fail_reason = NULL WHERE id = $1",
        )
        .bind(id.0)
        .execute(&mut *db)
        .await?;
        db.commit().await?;

        Ok(AccountTransaction {
            success: true,
            fail_reason: None,
            ..tx
        })
    }

    async fn release_withdrawal(
        &self,
        id: TransactionId,
        reason: FailReason,
    ) -> Result<(), LedgerError> {
        let mut db = self.pool.begin().await?;
        let (tx, mut source) = Self::lock_withdrawal(&mut db, id).await?;

        if tx.success || tx.fail_reason != Some(FailReason::AwaitingPayout) {
            let _ = db.rollback().await;
            return Err(LedgerError::InvalidStateTransition(format!(
                "transaction {} holds no funds",
                id
            )));
        }

        source.release(tx.amount)?;
        Self::write_balance(&mut db, &source).await?;
        Self::set_fail_reason(&mut db, id, reason).await?;
        db.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn insert_payment(&self, new: NewPaymentRequest) -> Result<PaymentRequest, LedgerError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO payment_requests_tb
                (id, initiator_id, destination_id, amount, trans_code, data, expires_at, status, scope, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(PaymentId::new().0)
        .bind(new.initiator.0)
        .bind(new.destination.0)
        .bind(i64::from(new.amount))
        .bind(TransCode::new().0)
        .bind(&new.data)
        .bind(new.expires_at)
        .bind(PaymentStatus::Awaiting.id())
        .bind(new.scope.id())
        .fetch_one(&self.pool)
        .await?;
        payment_from_row(&row)
    }

    async fn get_payment(
        &self,
        scope: Scope,
        id: PaymentId,
    ) -> Result<Option<PaymentRequest>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payment_requests_tb WHERE id = $1 AND scope = $2",
            PAYMENT_COLUMNS
        ))
        .bind(id.0)
        .bind(scope.id())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn find_by_trans_code(
        &self,
        scope: Scope,
        code: TransCode,
    ) -> Result<Option<PaymentRequest>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payment_requests_tb WHERE trans_code = $1 AND scope = $2",
            PAYMENT_COLUMNS
        ))
        .bind(code.0)
        .bind(scope.id())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn attach_link(
        &self,
        id: PaymentId,
        pay_url: &str,
        hash: &str,
    ) -> Result<(), LedgerError> {
        let result =
            sqlx::query("UPDATE payment_requests_tb SET pay_url = $1, hash = $2 WHERE id = $3")
                .bind(pay_url)
                .bind(hash)
                .bind(id.0)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::PaymentNotFound);
        }
        Ok(())
    }

    async fn cancel_payment(&self, id: PaymentId) -> Result<PaymentTransition, LedgerError> {
        let row = sqlx::query(&format!(
            "UPDATE payment_requests_tb SET status = $1 WHERE id = $2 AND status = $3 RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(PaymentStatus::Canceled.id())
        .bind(id.0)
        .bind(PaymentStatus::Awaiting.id())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(PaymentTransition::Applied(payment_from_row(&row)?)),
            None => Ok(PaymentTransition::Unchanged(self.payment_status(id).await?)),
        }
    }

    async fn settle_payment(
        &self,
        id: PaymentId,
        amount: Decimal,
        payer: &str,
    ) -> Result<PaymentTransition, LedgerError> {
        let mut db = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM payment_requests_tb WHERE id = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&mut *db)
        .await?
        .ok_or(LedgerError::PaymentNotFound)?;
        let payment = payment_from_row(&row)?;

        if !payment.status.can_transition_to(PaymentStatus::Paid) {
            let _ = db.rollback().await;
            return Ok(PaymentTransition::Unchanged(payment.status));
        }

        let mut accounts =
            Self::lock_accounts(&mut db, payment.scope, &[payment.destination]).await?;
        let mut dest = accounts
            .remove(&payment.destination)
            .ok_or(LedgerError::AccountNotFound)?;
        dest.credit(amount)?;
        Self::write_balance(&mut db, &dest).await?;

        let result = sqlx::query(
            "UPDATE payment_requests_tb SET status = $1, payer = $2 WHERE id = $3 AND status = $4",
        )
        .bind(PaymentStatus::Paid.id())
        .bind(payer)
        .bind(id.0)
        .bind(PaymentStatus::Awaiting.id())
        .execute(&mut *db)
        .await?;

        if result.rows_affected() != 1 {
            // Row is locked, so this means the CAS lost; nothing must be credited
            warn!(payment_id = %id, "Payment CAS lost under row lock");
            let _ = db.rollback().await;
            return Ok(PaymentTransition::Unchanged(self.payment_status(id).await?));
        }
        db.commit().await?;

        Ok(PaymentTransition::Applied(PaymentRequest {
            status: PaymentStatus::Paid,
            payer: payer.to_string(),
            ..payment
        }))
    }
}

#[async_trait]
impl CrowdfundStore for PgStore {
    async fn insert_company(&self, new: NewCompany) -> Result<CrowdfundCompany, LedgerError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO crowdfund_companies_tb
                (owner_id, scope, title, short_description, goal, current_amount, end_date, is_over, created_at)
            VALUES ($1, $2, $3, $4, $5, 0, $6, FALSE, NOW())
            RETURNING {}
            "#,
            COMPANY_COLUMNS
        ))
        .bind(new.owner.0)
        .bind(new.scope.id())
        .bind(&new.title)
        .bind(&new.short_description)
        .bind(new.goal)
        .bind(new.end_date)
        .fetch_one(&self.pool)
        .await?;
        company_from_row(&row)
    }

    async fn get_company(
        &self,
        scope: Scope,
        id: CompanyId,
    ) -> Result<Option<CrowdfundCompany>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM crowdfund_companies_tb WHERE id = $1 AND scope = $2",
            COMPANY_COLUMNS
        ))
        .bind(id.0)
        .bind(scope.id())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(company_from_row).transpose()
    }

    async fn add_pledge(
        &self,
        company: CompanyId,
        tx: TransactionId,
        amount: Decimal,
    ) -> Result<CrowdfundCompany, LedgerError> {
        let mut db = self.pool.begin().await?;

        sqlx::query("INSERT INTO company_pledges_tb (company_id, transaction_id) VALUES ($1, $2)")
            .bind(company.0)
            .bind(tx.0)
            .execute(&mut *db)
            .await?;

        let row = sqlx::query(&format!(
            "UPDATE crowdfund_companies_tb SET current_amount = current_amount + $1 WHERE id = $2 RETURNING {}",
            COMPANY_COLUMNS
        ))
        .bind(amount)
        .bind(company.0)
        .fetch_optional(&mut *db)
        .await?
        .ok_or(LedgerError::CompanyNotFound)?;

        db.commit().await?;
        company_from_row(&row)
    }

    async fn pledges(&self, company: CompanyId) -> Result<Vec<AccountTransaction>, LedgerError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM account_transactions_tb
            WHERE success AND id IN (SELECT transaction_id FROM company_pledges_tb WHERE company_id = $1)
            ORDER BY id
            "#,
            TX_COLUMNS
        ))
        .bind(company.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(tx_from_row).collect()
    }

    async fn settle_pledge(
        &self,
        company: CompanyId,
        tx: TransactionId,
        recipient: AccountId,
    ) -> Result<bool, LedgerError> {
        let mut db = self.pool.begin().await?;
        let pledge = Self::lock_transaction(&mut db, tx).await?;

        if !pledge.success || !pledge.destination.is_escrow_of(company) {
            let _ = db.rollback().await;
            return Ok(false);
        }

        let mut accounts = Self::lock_accounts(&mut db, pledge.scope, &[recipient]).await?;
        let mut account = accounts
            .remove(&recipient)
            .ok_or(LedgerError::AccountNotFound)?;
        account.credit(pledge.amount)?;
        Self::write_balance(&mut db, &account).await?;

        sqlx::query("UPDATE account_transactions_tb SET destination = $1 WHERE id = $2")
            .bind(Endpoint::InternalAccount(recipient).to_string())
            .bind(tx.0)
            .execute(&mut *db)
            .await?;

        db.commit().await?;
        Ok(true)
    }

    async fn mark_over(&self, company: CompanyId) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            "UPDATE crowdfund_companies_tb SET is_over = TRUE WHERE id = $1 AND is_over = FALSE",
        )
        .bind(company.0)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: Option<i64> =
            sqlx::query_scalar("SELECT id FROM crowdfund_companies_tb WHERE id = $1")
                .bind(company.0)
                .fetch_optional(&self.pool)
                .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(LedgerError::CompanyNotFound),
        }
    }

    async fn due_companies(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CrowdfundCompany>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM crowdfund_companies_tb WHERE is_over = FALSE AND end_date <= $1 ORDER BY id",
            COMPANY_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(company_from_row).collect()
    }

    async fn stranded_companies(&self) -> Result<Vec<CrowdfundCompany>, LedgerError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM crowdfund_companies_tb c
            WHERE c.is_over AND EXISTS (
                SELECT 1 FROM company_pledges_tb p
                JOIN account_transactions_tb t ON t.id = p.transaction_id
                WHERE p.company_id = c.id AND t.success AND t.destination = 'escrow:' || c.id
            )
            ORDER BY c.id
            "#,
            COMPANY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(company_from_row).collect()
    }
}

#[async_trait]
impl GuardStore for PgStore {
    async fn insert_forbidden(
        &self,
        new: NewForbiddenAction,
    ) -> Result<ForbiddenAction, LedgerError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO forbidden_actions_tb (user_id, scope, action, forbidden_until, reason)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            FORBIDDEN_COLUMNS
        ))
        .bind(new.user.0)
        .bind(new.scope.id())
        .bind(new.action.id())
        .bind(new.forbidden_until)
        .bind(&new.reason)
        .fetch_one(&self.pool)
        .await?;
        forbidden_from_row(&row)
    }

    async fn active_forbidden(
        &self,
        user: UserId,
        scope: Scope,
        action: ForbiddenUserAction,
        now: DateTime<Utc>,
    ) -> Result<Option<ForbiddenAction>, LedgerError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM forbidden_actions_tb
            WHERE user_id = $1 AND scope = $2 AND action IN ($3, $4) AND forbidden_until > $5
            ORDER BY forbidden_until DESC
            LIMIT 1
            "#,
            FORBIDDEN_COLUMNS
        ))
        .bind(user.0)
        .bind(scope.id())
        .bind(action.id())
        .bind(ForbiddenUserAction::All.id())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(forbidden_from_row).transpose()
    }

    async fn count_recent(
        &self,
        user: UserId,
        activity: Activity,
        since: DateTime<Utc>,
    ) -> Result<u64, LedgerError> {
        let count: i64 = match activity {
            Activity::UnresolvedPayments => {
                sqlx::query_scalar(
                    r#"
                    SELECT COUNT(*) FROM payment_requests_tb
                    WHERE initiator_id = $1 AND status = $2 AND created_at >= $3
                    "#,
                )
                .bind(user.0)
                .bind(PaymentStatus::Awaiting.id())
                .bind(since)
                .fetch_one(&self.pool)
                .await?
            }
            _ => {
                sqlx::query_scalar(
                    r#"
                    SELECT COUNT(*) FROM activity_log_tb
                    WHERE user_id = $1 AND activity = $2 AND created_at >= $3
                    "#,
                )
                .bind(user.0)
                .bind(activity.id())
                .bind(since)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(count.max(0) as u64)
    }

    async fn record_activity(
        &self,
        user: UserId,
        activity: Activity,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        sqlx::query("INSERT INTO activity_log_tb (user_id, activity, created_at) VALUES ($1, $2, $3)")
            .bind(user.0)
            .bind(activity.id())
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
