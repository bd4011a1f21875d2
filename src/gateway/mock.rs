//! Scriptable in-process gateway for tests and local runs

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::error::GatewayError;
use super::types::{GatewayBalance, GatewayUser, PaymentLink, PaymentOrder, WithdrawalOrder};
use super::PaymentGateway;
use crate::core_types::Scope;

/// Poisoning only happens if a test already panicked
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MockGateway {
    /// Accepted withdrawals, in call order
    withdrawals: Mutex<Vec<(Scope, WithdrawalOrder)>>,
    payment_orders: Mutex<Vec<(Scope, PaymentOrder)>>,
    issued_links: Mutex<Vec<PaymentLink>>,
    balances: Mutex<HashMap<Scope, i64>>,
    /// Count of calls per method
    withdrawal_calls: AtomicUsize,
    payment_calls: AtomicUsize,
    balance_calls: AtomicUsize,
    /// Configured behavior
    fail_withdrawals: Mutex<bool>,
    fail_payments: Mutex<bool>,
    empty_links: Mutex<bool>,
    fail_balance: Mutex<bool>,
    withdrawal_delay: Mutex<Option<Duration>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_withdrawals(&self, fail: bool) {
        *lock(&self.fail_withdrawals) = fail;
    }

    pub fn set_fail_payments(&self, fail: bool) {
        *lock(&self.fail_payments) = fail;
    }

    /// Answer payment requests with an empty link
    pub fn set_empty_links(&self, empty: bool) {
        *lock(&self.empty_links) = empty;
    }

    pub fn set_fail_balance(&self, fail: bool) {
        *lock(&self.fail_balance) = fail;
    }

    /// Hold each withdrawal call this long (lets concurrent callers interleave)
    pub fn set_withdrawal_delay(&self, delay: Duration) {
        *lock(&self.withdrawal_delay) = Some(delay);
    }

    pub fn set_balance(&self, scope: Scope, balance: i64) {
        lock(&self.balances).insert(scope, balance);
    }

    pub fn withdrawals(&self) -> Vec<(Scope, WithdrawalOrder)> {
        lock(&self.withdrawals).clone()
    }

    pub fn payment_orders(&self) -> Vec<(Scope, PaymentOrder)> {
        lock(&self.payment_orders).clone()
    }

    pub fn issued_links(&self) -> Vec<PaymentLink> {
        lock(&self.issued_links).clone()
    }

    pub fn withdrawal_calls(&self) -> usize {
        self.withdrawal_calls.load(Ordering::SeqCst)
    }

    pub fn payment_calls(&self) -> usize {
        self.payment_calls.load(Ordering::SeqCst)
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn get_user(&self, external_id: &str, _scope: Scope) -> Result<GatewayUser, GatewayError> {
        Ok(GatewayUser {
            username: format!("player_{}", external_id),
            uuid: None,
        })
    }

    async fn get_balance(&self, scope: Scope) -> Result<GatewayBalance, GatewayError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        if *lock(&self.fail_balance) {
            return Err(GatewayError::Network("mock balance failure".into()));
        }
        let balance = lock(&self.balances).get(&scope).copied().unwrap_or(0);
        Ok(GatewayBalance {
            balance,
            webhook: None,
        })
    }

    async fn send_withdrawal(
        &self,
        order: &WithdrawalOrder,
        scope: Scope,
    ) -> Result<(), GatewayError> {
        self.withdrawal_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.withdrawal_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *lock(&self.fail_withdrawals) {
            return Err(GatewayError::Network("mock withdrawal failure".into()));
        }
        lock(&self.withdrawals).push((scope, order.clone()));
        Ok(())
    }

    async fn request_payment(
        &self,
        order: &PaymentOrder,
        scope: Scope,
    ) -> Result<PaymentLink, GatewayError> {
        let n = self.payment_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if *lock(&self.fail_payments) {
            return Err(GatewayError::Status(503));
        }
        if *lock(&self.empty_links) {
            return Err(GatewayError::EmptyResponse("payment"));
        }
        lock(&self.payment_orders).push((scope, order.clone()));
        let link = PaymentLink {
            url: format!("https://spworlds.ru/pay/mock-{}", n),
            hash: format!("mock-hash-{}", n),
        };
        lock(&self.issued_links).push(link.clone());
        Ok(link)
    }
}
