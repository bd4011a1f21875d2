//! In-memory Ledger Store
//!
//! All state sits behind one mutex, so every operation is serializable by
//! construction. Used by tests and by the binary when no PostgreSQL URL is
//! configured.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

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
    NewTransaction, PaymentRequest,
};
use crate::payment::PaymentStatus;

#[derive(Default)]
struct State {
    accounts: BTreeMap<AccountId, Account>,
    transactions: BTreeMap<TransactionId, AccountTransaction>,
    payments: HashMap<PaymentId, PaymentRequest>,
    companies: BTreeMap<CompanyId, CrowdfundCompany>,
    pledges: HashMap<CompanyId, Vec<TransactionId>>,
    forbidden: Vec<ForbiddenAction>,
    activity: Vec<(UserId, Activity, DateTime<Utc>)>,
    next_account: i64,
    next_tx: i64,
    next_company: i64,
    next_forbidden: i64,
}

impl State {
    fn account_in(&self, scope: Scope, id: AccountId) -> Result<Account, LedgerError> {
        self.accounts
            .get(&id)
            .filter(|a| a.scope == scope)
            .cloned()
            .ok_or(LedgerError::AccountNotFound)
    }

    fn tx_mut(&mut self, id: TransactionId) -> Result<&mut AccountTransaction, LedgerError> {
        self.transactions
            .get_mut(&id)
            .ok_or_else(|| LedgerError::Internal(format!("transaction {} not found", id)))
    }

    fn source_of(&self, tx: &AccountTransaction) -> Result<AccountId, LedgerError> {
        tx.source
            .account()
            .ok_or_else(|| LedgerError::validation("transfer source must be an account"))
    }

    /// A record that is holding funds or already settled
    fn held_tx(&mut self, id: TransactionId) -> Result<AccountTransaction, LedgerError> {
        let tx = self.tx_mut(id)?.clone();
        if tx.success || tx.fail_reason == Some(FailReason::AwaitingPayout) {
            Ok(tx)
        } else {
            Err(LedgerError::InvalidStateTransition(format!(
                "transaction {} holds no funds",
                id
            )))
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Internal("memory store lock poisoned".into()))
    }

    /// Credit an account directly, bypassing the transaction log.
    ///
    /// For fixtures and imports only; live money enters through accepted payments.
    pub fn seed_balance(&self, id: AccountId, amount: Decimal) -> Result<(), LedgerError> {
        let mut st = self.state()?;
        let account = st
            .accounts
            .get_mut(&id)
            .ok_or(LedgerError::AccountNotFound)?;
        account.credit(amount)
    }

    /// Backdate a payment request (fixtures for time-window checks)
    pub fn set_payment_created_at(
        &self,
        id: PaymentId,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut st = self.state()?;
        let payment = st
            .payments
            .get_mut(&id)
            .ok_or(LedgerError::PaymentNotFound)?;
        payment.created_at = at;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_account(&self, new: NewAccount) -> Result<Account, LedgerError> {
        let mut st = self.state()?;
        if new.is_default
            && st
                .accounts
                .values()
                .any(|a| a.owner == new.owner && a.scope == new.scope && a.is_default)
        {
            return Err(LedgerError::validation("default account already exists"));
        }
        st.next_account += 1;
        let account = Account::from_parts(
            AccountId(st.next_account),
            new.owner,
            new.scope,
            Decimal::ZERO,
            Decimal::ZERO,
            new.is_default,
            new.name,
            Utc::now(),
        )?;
        st.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(
        &self,
        scope: Scope,
        id: AccountId,
    ) -> Result<Option<Account>, LedgerError> {
        let st = self.state()?;
        Ok(st.accounts.get(&id).filter(|a| a.scope == scope).cloned())
    }

    async fn default_account(
        &self,
        scope: Scope,
        owner: UserId,
    ) -> Result<Option<Account>, LedgerError> {
        let st = self.state()?;
        Ok(st
            .accounts
            .values()
            .find(|a| a.scope == scope && a.owner == owner && a.is_default)
            .cloned())
    }

    async fn accounts_of(&self, owner: UserId) -> Result<Vec<Account>, LedgerError> {
        let st = self.state()?;
        Ok(st
            .accounts
            .values()
            .filter(|a| a.owner == owner)
            .cloned()
            .collect())
    }

    async fn total_balance(&self, scope: Scope) -> Result<Decimal, LedgerError> {
        let st = self.state()?;
        Ok(st
            .accounts
            .values()
            .filter(|a| a.scope == scope)
            .map(|a| a.balance())
            .sum())
    }

    async fn record_transaction(
        &self,
        new: NewTransaction,
    ) -> Result<AccountTransaction, LedgerError> {
        let mut st = self.state()?;
        st.next_tx += 1;
        let tx = AccountTransaction {
            id: TransactionId(st.next_tx),
            initiator: new.initiator,
            tx_type: new.tx_type,
            amount: new.amount,
            source: new.source,
            destination: new.destination,
            success: false,
            fail_reason: Some(FailReason::Unknown),
            scope: new.scope,
            created_at: Utc::now(),
        };
        st.transactions.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<AccountTransaction>, LedgerError> {
        let st = self.state()?;
        Ok(st.transactions.get(&id).cloned())
    }

    async fn transactions_of(
        &self,
        scope: Scope,
        initiator: UserId,
    ) -> Result<Vec<AccountTransaction>, LedgerError> {
        let st = self.state()?;
        Ok(st
            .transactions
            .values()
            .filter(|t| t.scope == scope && t.initiator == initiator)
            .cloned()
            .collect())
    }

    async fn fail_transaction(
        &self,
        id: TransactionId,
        reason: FailReason,
    ) -> Result<(), LedgerError> {
        let mut st = self.state()?;
        let tx = st.tx_mut(id)?;
        if tx.success || tx.fail_reason == Some(FailReason::AwaitingPayout) {
            return Err(LedgerError::InvalidStateTransition(format!(
                "transaction {} already succeeded or holds funds",
                id
            )));
        }
        tx.fail_reason = Some(reason);
        Ok(())
    }

    async fn commit_transfer(&self, id: TransactionId) -> Result<CommitOutcome, LedgerError> {
        let mut st = self.state()?;
        let tx = st.tx_mut(id)?.clone();
        if tx.success {
            return Ok(CommitOutcome::Committed(tx));
        }
        if tx.fail_reason != Some(FailReason::Unknown) {
            return Err(LedgerError::InvalidStateTransition(format!(
                "transaction {} already failed",
                id
            )));
        }

        let source_id = tx
            .source
            .account()
            .ok_or_else(|| LedgerError::validation("transfer source must be an account"))?;

        // Work on copies; write back only once every leg has passed
        let mut source = st.account_in(tx.scope, source_id)?;
        match source.debit(tx.amount) {
            Ok(()) => {}
            Err(LedgerError::InsufficientFunds) => {
                let record = st.tx_mut(id)?;
                record.fail_reason = Some(FailReason::InsufficientFunds);
                return Ok(CommitOutcome::InsufficientFunds(record.clone()));
            }
            Err(e) => return Err(e),
        }

        match tx.destination.account() {
            Some(dest_id) if dest_id == source_id => source.credit(tx.amount)?,
            Some(dest_id) => {
                let mut dest = st.account_in(tx.scope, dest_id)?;
                dest.credit(tx.amount)?;
                st.accounts.insert(dest_id, dest);
            }
            None => {}
        }
        st.accounts.insert(source_id, source);

        let record = st.tx_mut(id)?;
        record.success = true;
        record.fail_reason = None;
        Ok(CommitOutcome::Committed(record.clone()))
    }

    async fn hold_withdrawal(&self, id: TransactionId) -> Result<bool, LedgerError> {
        let mut st = self.state()?;
        let tx = st.tx_mut(id)?.clone();
        match tx.fail_reason {
            Some(FailReason::AwaitingPayout) => return Ok(true),
            Some(FailReason::Unknown) if !tx.success => {}
            _ => {
                return Err(LedgerError::InvalidStateTransition(format!(
                    "transaction {} cannot hold funds",
                    id
                )));
            }
        }

        let source_id = st.source_of(&tx)?;
        let mut source = st.account_in(tx.scope, source_id)?;
        let reason = match source.hold(tx.amount) {
            Ok(()) => {
                st.accounts.insert(source_id, source);
                FailReason::AwaitingPayout
            }
            Err(LedgerError::InsufficientFunds) => FailReason::InsufficientFunds,
            Err(e) => return Err(e),
        };
        st.tx_mut(id)?.fail_reason = Some(reason);
        Ok(reason == FailReason::AwaitingPayout)
    }

    async fn settle_withdrawal(
        &self,
        id: TransactionId,
    ) -> Result<AccountTransaction, LedgerError> {
        let mut st = self.state()?;
        let tx = st.held_tx(id)?;
        if tx.success {
            return Ok(tx);
        }

        let source_id = st.source_of(&tx)?;
        let mut source = st.account_in(tx.scope, source_id)?;
        source.debit_held(tx.amount)?;
        st.accounts.insert(source_id, source);

        let record = st.tx_mut(id)?;
        record.success = true;
        record.fail_reason = None;
        Ok(record.clone())
    }

    async fn release_withdrawal(
        &self,
        id: TransactionId,
        reason: FailReason,
    ) -> Result<(), LedgerError> {
        let mut st = self.state()?;
        let tx = st.held_tx(id)?;
        if tx.success {
            return Err(LedgerError::InvalidStateTransition(format!(
                "transaction {} already succeeded",
                id
            )));
        }

        let source_id = st.source_of(&tx)?;
        let mut source = st.account_in(tx.scope, source_id)?;
        source.release(tx.amount)?;
        st.accounts.insert(source_id, source);
        st.tx_mut(id)?.fail_reason = Some(reason);
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_payment(&self, new: NewPaymentRequest) -> Result<PaymentRequest, LedgerError> {
        let mut st = self.state()?;
        let payment = PaymentRequest {
            id: PaymentId::new(),
            initiator: new.initiator,
            destination: new.destination,
            amount: new.amount,
            trans_code: TransCode::new(),
            hash: String::new(),
            data: new.data,
            pay_url: String::new(),
            expires_at: new.expires_at,
            status: PaymentStatus::Awaiting,
            payer: String::new(),
            scope: new.scope,
            created_at: Utc::now(),
        };
        st.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get_payment(
        &self,
        scope: Scope,
        id: PaymentId,
    ) -> Result<Option<PaymentRequest>, LedgerError> {
        let st = self.state()?;
        Ok(st.payments.get(&id).filter(|p| p.scope == scope).cloned())
    }

    async fn find_by_trans_code(
        &self,
        scope: Scope,
        code: TransCode,
    ) -> Result<Option<PaymentRequest>, LedgerError> {
        let st = self.state()?;
        Ok(st
            .payments
            .values()
            .find(|p| p.scope == scope && p.trans_code == code)
            .cloned())
    }

    async fn attach_link(
        &self,
        id: PaymentId,
        pay_url: &str,
        hash: &str,
    ) -> Result<(), LedgerError> {
        let mut st = self.state()?;
        let payment = st
            .payments
            .get_mut(&id)
            .ok_or(LedgerError::PaymentNotFound)?;
        payment.pay_url = pay_url.to_string();
        payment.hash = hash.to_string();
        Ok(())
    }

    async fn cancel_payment(&self, id: PaymentId) -> Result<PaymentTransition, LedgerError> {
        let mut st = self.state()?;
        let payment = st
            .payments
            .get_mut(&id)
            .ok_or(LedgerError::PaymentNotFound)?;
        if !payment.status.can_transition_to(PaymentStatus::Canceled) {
            return Ok(PaymentTransition::Unchanged(payment.status));
        }
        payment.status = PaymentStatus::Canceled;
        Ok(PaymentTransition::Applied(payment.clone()))
    }

    async fn settle_payment(
        &self,
        id: PaymentId,
        amount: Decimal,
        payer: &str,
    ) -> Result<PaymentTransition, LedgerError> {
        let mut st = self.state()?;
        let payment = st
            .payments
            .get(&id)
            .cloned()
            .ok_or(LedgerError::PaymentNotFound)?;
        if !payment.status.can_transition_to(PaymentStatus::Paid) {
            return Ok(PaymentTransition::Unchanged(payment.status));
        }

        let mut dest = st.account_in(payment.scope, payment.destination)?;
        dest.credit(amount)?;
        st.accounts.insert(dest.id, dest);

        let payment = st
            .payments
            .get_mut(&id)
            .ok_or(LedgerError::PaymentNotFound)?;
        payment.status = PaymentStatus::Paid;
        payment.payer = payer.to_string();
        Ok(PaymentTransition::Applied(payment.clone()))
    }
}

#[async_trait]
impl CrowdfundStore for MemoryStore {
    async fn insert_company(&self, new: NewCompany) -> Result<CrowdfundCompany, LedgerError> {
        let mut st = self.state()?;
        st.next_company += 1;
        let company = CrowdfundCompany {
            id: CompanyId(st.next_company),
            owner: new.owner,
            scope: new.scope,
            title: new.title,
            short_description: new.short_description,
            goal: new.goal,
            current_amount: Decimal::ZERO,
            end_date: new.end_date,
            is_over: false,
            created_at: Utc::now(),
        };
        st.companies.insert(company.id, company.clone());
        Ok(company)
    }

    async fn get_company(
        &self,
        scope: Scope,
        id: CompanyId,
    ) -> Result<Option<CrowdfundCompany>, LedgerError> {
        let st = self.state()?;
        Ok(st.companies.get(&id).filter(|c| c.scope == scope).cloned())
    }

    async fn add_pledge(
        &self,
        company: CompanyId,
        tx: TransactionId,
        amount: Decimal,
    ) -> Result<CrowdfundCompany, LedgerError> {
        let mut st = self.state()?;
        let entry = st
            .companies
            .get_mut(&company)
            .ok_or(LedgerError::CompanyNotFound)?;
        entry.current_amount += amount;
        let updated = entry.clone();
        st.pledges.entry(company).or_default().push(tx);
        Ok(updated)
    }

    async fn pledges(&self, company: CompanyId) -> Result<Vec<AccountTransaction>, LedgerError> {
        let st = self.state()?;
        let ids = st.pledges.get(&company).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| st.transactions.get(id))
            .filter(|t| t.success)
            .cloned()
            .collect())
    }

    async fn settle_pledge(
        &self,
        company: CompanyId,
        tx: TransactionId,
        recipient: AccountId,
    ) -> Result<bool, LedgerError> {
        let mut st = self.state()?;
        let pledge = st.tx_mut(tx)?.clone();
        if !pledge.success || !pledge.destination.is_escrow_of(company) {
            return Ok(false);
        }

        let mut account = st.account_in(pledge.scope, recipient)?;
        account.credit(pledge.amount)?;
        st.accounts.insert(recipient, account);
        st.tx_mut(tx)?.destination = Endpoint::InternalAccount(recipient);
        Ok(true)
    }

    async fn mark_over(&self, company: CompanyId) -> Result<bool, LedgerError> {
        let mut st = self.state()?;
        let entry = st
            .companies
            .get_mut(&company)
            .ok_or(LedgerError::CompanyNotFound)?;
        if entry.is_over {
            return Ok(false);
        }
        entry.is_over = true;
        Ok(true)
    }

    async fn due_companies(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CrowdfundCompany>, LedgerError> {
        let st = self.state()?;
        Ok(st
            .companies
            .values()
            .filter(|c| c.is_due(now))
            .cloned()
            .collect())
    }

    async fn stranded_companies(&self) -> Result<Vec<CrowdfundCompany>, LedgerError> {
        let st = self.state()?;
        Ok(st
            .companies
            .values()
            .filter(|c| c.is_over)
            .filter(|c| {
                st.pledges.get(&c.id).is_some_and(|ids| {
                    ids.iter()
                        .filter_map(|id| st.transactions.get(id))
                        .any(|t| t.success && t.destination.is_escrow_of(c.id))
                })
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GuardStore for MemoryStore {
    async fn insert_forbidden(
        &self,
        new: NewForbiddenAction,
    ) -> Result<ForbiddenAction, LedgerError> {
        let mut st = self.state()?;
        st.next_forbidden += 1;
        let record = ForbiddenAction {
            id: st.next_forbidden,
            user: new.user,
            scope: new.scope,
            action: new.action,
            forbidden_until: new.forbidden_until,
            reason: new.reason,
        };
        st.forbidden.push(record.clone());
        Ok(record)
    }

    async fn active_forbidden(
        &self,
        user: UserId,
        scope: Scope,
        action: ForbiddenUserAction,
        now: DateTime<Utc>,
    ) -> Result<Option<ForbiddenAction>, LedgerError> {
        let st = self.state()?;
        Ok(st
            .forbidden
            .iter()
            .find(|f| {
                f.user == user && f.scope == scope && f.action.covers(action) && now < f.forbidden_until
            })
            .cloned())
    }

    async fn count_recent(
        &self,
        user: UserId,
        activity: Activity,
        since: DateTime<Utc>,
    ) -> Result<u64, LedgerError> {
        let st = self.state()?;
        let count = match activity {
            Activity::UnresolvedPayments => st
                .payments
                .values()
                .filter(|p| {
                    p.initiator == user
                        && p.status == PaymentStatus::Awaiting
                        && p.created_at >= since
                })
                .count(),
            _ => st
                .activity
                .iter()
                .filter(|(u, a, at)| *u == user && *a == activity && *at >= since)
                .count(),
        };
        Ok(count as u64)
    }

    async fn record_activity(
        &self,
        user: UserId,
        activity: Activity,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut st = self.state()?;
        st.activity.push((user, activity, at));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionType;

    async fn funded_pair(store: &MemoryStore, balance: i64) -> (Account, Account) {
        let a = store
            .create_account(NewAccount {
                owner: UserId(1),
                scope: Scope::Sp,
                is_default: true,
                name: "main".into(),
            })
            .await
            .unwrap();
        let b = store
            .create_account(NewAccount {
                owner: UserId(2),
                scope: Scope::Sp,
                is_default: true,
                name: "main".into(),
            })
            .await
            .unwrap();
        store.seed_balance(a.id, Decimal::from(balance)).unwrap();
        (a, b)
    }

    fn transfer(from: AccountId, to: Endpoint, amount: i64) -> NewTransaction {
        NewTransaction {
            initiator: UserId(1),
            tx_type: TransactionType::Internal,
            amount: Decimal::from(amount),
            source: Endpoint::InternalAccount(from),
            destination: to,
            scope: Scope::Sp,
        }
    }

    #[tokio::test]
    async fn test_commit_moves_both_legs() {
        let store = MemoryStore::new();
        let (a, b) = funded_pair(&store, 10).await;

        let tx = store
            .record_transaction(transfer(a.id, Endpoint::InternalAccount(b.id), 4))
            .await
            .unwrap();
        assert!(!tx.success);
        assert_eq!(tx.fail_reason, Some(FailReason::Unknown));

        let outcome = store.commit_transfer(tx.id).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed(ref t) if t.success));

        let a = store.get_account(Scope::Sp, a.id).await.unwrap().unwrap();
        let b = store.get_account(Scope::Sp, b.id).await.unwrap().unwrap();
        assert_eq!(a.balance(), Decimal::from(6));
        assert_eq!(b.balance(), Decimal::from(4));

        // Re-commit is a no-op
        store.commit_transfer(tx.id).await.unwrap();
        let a = store.get_account(Scope::Sp, a.id).await.unwrap().unwrap();
        assert_eq!(a.balance(), Decimal::from(6));
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_balances() {
        let store = MemoryStore::new();
        let (a, b) = funded_pair(&store, 3).await;

        let tx = store
            .record_transaction(transfer(a.id, Endpoint::InternalAccount(b.id), 4))
            .await
            .unwrap();
        let outcome = store.commit_transfer(tx.id).await.unwrap();
        match outcome {
            CommitOutcome::InsufficientFunds(t) => {
                assert!(!t.success);
                assert_eq!(t.fail_reason, Some(FailReason::InsufficientFunds));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(store.total_balance(Scope::Sp).await.unwrap(), Decimal::from(3));

        // A failed record cannot be committed later
        assert!(store.commit_transfer(tx.id).await.is_err());
    }

    #[tokio::test]
    async fn test_sink_destination_has_no_credit_leg() {
        let store = MemoryStore::new();
        let (a, _) = funded_pair(&store, 10).await;

        let tx = store
            .record_transaction(transfer(
                a.id,
                Endpoint::SystemSink(Endpoint::STARTER_SINK.into()),
                4,
            ))
            .await
            .unwrap();
        store.commit_transfer(tx.id).await.unwrap();
        assert_eq!(store.total_balance(Scope::Sp).await.unwrap(), Decimal::from(6));
    }

    #[tokio::test]
    async fn test_cross_scope_account_is_invisible() {
        let store = MemoryStore::new();
        let (a, _) = funded_pair(&store, 10).await;
        assert!(store.get_account(Scope::Spm, a.id).await.unwrap().is_none());
        assert!(store.default_account(Scope::Spm, UserId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settle_pledge_only_once() {
        let store = MemoryStore::new();
        let (a, b) = funded_pair(&store, 10).await;
        let company = store
            .insert_company(NewCompany {
                owner: UserId(2),
                scope: Scope::Sp,
                title: "t".into(),
                short_description: String::new(),
                goal: Decimal::from(8),
                end_date: Utc::now(),
            })
            .await
            .unwrap();

        let tx = store
            .record_transaction(transfer(a.id, Endpoint::Escrow(company.id), 5))
            .await
            .unwrap();
        store.commit_transfer(tx.id).await.unwrap();
        store
            .add_pledge(company.id, tx.id, Decimal::from(5))
            .await
            .unwrap();

        assert!(store.settle_pledge(company.id, tx.id, b.id).await.unwrap());
        assert!(!store.settle_pledge(company.id, tx.id, b.id).await.unwrap());

        let b = store.get_account(Scope::Sp, b.id).await.unwrap().unwrap();
        assert_eq!(b.balance(), Decimal::from(5));
        let tx = store.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(tx.destination, Endpoint::InternalAccount(b.id));
    }

    fn withdrawal(from: AccountId, amount: i64) -> NewTransaction {
        NewTransaction {
            tx_type: TransactionType::Output,
            ..transfer(from, Endpoint::ExternalCard("00042".into()), amount)
        }
    }

    #[tokio::test]
    async fn test_held_funds_block_other_spends() {
        let store = MemoryStore::new();
        let (a, b) = funded_pair(&store, 10).await;

        let first = store.record_transaction(withdrawal(a.id, 10)).await.unwrap();
        let second = store.record_transaction(withdrawal(a.id, 10)).await.unwrap();
        assert!(store.hold_withdrawal(first.id).await.unwrap());
        assert!(!store.hold_withdrawal(second.id).await.unwrap());
        let second = store.get_transaction(second.id).await.unwrap().unwrap();
        assert_eq!(second.fail_reason, Some(FailReason::InsufficientFunds));

        // Internal spends see only the available part
        let tx = store
            .record_transaction(transfer(a.id, Endpoint::InternalAccount(b.id), 1))
            .await
            .unwrap();
        assert!(matches!(
            store.commit_transfer(tx.id).await.unwrap(),
            CommitOutcome::InsufficientFunds(_)
        ));

        // A held record cannot be failed behind the hold's back
        assert!(store
            .fail_transaction(first.id, FailReason::GatewayError)
            .await
            .is_err());

        let settled = store.settle_withdrawal(first.id).await.unwrap();
        assert!(settled.success);
        assert_eq!(settled.fail_reason, None);
        store.settle_withdrawal(first.id).await.unwrap();

        let a = store.get_account(Scope::Sp, a.id).await.unwrap().unwrap();
        assert_eq!(a.balance(), Decimal::ZERO);
        assert_eq!(a.held(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_released_hold_restores_available() {
        let store = MemoryStore::new();
        let (a, _) = funded_pair(&store, 10).await;

        let tx = store.record_transaction(withdrawal(a.id, 6)).await.unwrap();
        assert!(store.hold_withdrawal(tx.id).await.unwrap());
        assert!(store.hold_withdrawal(tx.id).await.unwrap());
        let held = store.get_account(Scope::Sp, a.id).await.unwrap().unwrap();
        assert_eq!(held.held(), Decimal::from(6));

        store
            .release_withdrawal(tx.id, FailReason::GatewayError)
            .await
            .unwrap();
        let a = store.get_account(Scope::Sp, a.id).await.unwrap().unwrap();
        assert_eq!(a.balance(), Decimal::from(10));
        assert_eq!(a.available(), Decimal::from(10));

        let tx = store.get_transaction(tx.id).await.unwrap().unwrap();
        assert!(!tx.success);
        assert_eq!(tx.fail_reason, Some(FailReason::GatewayError));
        assert!(store.settle_withdrawal(tx.id).await.is_err());
        assert!(store
            .release_withdrawal(tx.id, FailReason::GatewayError)
            .await
            .is_err());
    }
}
