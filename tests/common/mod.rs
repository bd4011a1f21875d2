//! Shared harness: every service wired to one in-memory store and a
//! scriptable provider mock.

#![allow(dead_code)]

use rust_decimal::Decimal;
use std::sync::Arc;

use spledger::account::AccountService;
use spledger::config::PaymentConfig;
use spledger::core_types::{AccountId, Scope, UserId};
use spledger::escrow::EscrowEngine;
use spledger::gateway::MockGateway;
use spledger::guard::AbuseGuard;
use spledger::payment::PaymentService;
use spledger::store::{AccountStore, MemoryStore};
use spledger::transfer::TransferService;

pub const APP_URL: &str = "https://spapp.test";

pub struct Ledger {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<MockGateway>,
    pub guard: Arc<AbuseGuard>,
    pub accounts: AccountService,
    pub transfers: Arc<TransferService>,
    pub payments: PaymentService,
    pub escrow: EscrowEngine,
}

impl Ledger {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let guard = Arc::new(AbuseGuard::new(store.clone()));
        let transfers = Arc::new(TransferService::new(
            store.clone(),
            guard.clone(),
            gateway.clone(),
        ));
        let payments = PaymentService::new(
            store.clone(),
            store.clone(),
            guard.clone(),
            gateway.clone(),
            APP_URL,
            PaymentConfig::default(),
        )
        .unwrap();
        let escrow = EscrowEngine::new(
            store.clone(),
            store.clone(),
            guard.clone(),
            transfers.clone(),
        );
        Self {
            accounts: AccountService::new(store.clone()),
            store,
            gateway,
            guard,
            transfers,
            payments,
            escrow,
        }
    }

    /// Open the user's default accounts and fund the `sp` one
    pub async fn user(&self, id: i64, balance: i64) -> AccountId {
        let opened = self.accounts.open_default_accounts(UserId(id)).await.unwrap();
        let sp = opened
            .into_iter()
            .find(|a| a.scope == Scope::Sp)
            .unwrap();
        if balance > 0 {
            self.store.seed_balance(sp.id, Decimal::from(balance)).unwrap();
        }
        sp.id
    }

    pub async fn balance(&self, id: AccountId) -> Decimal {
        self.store
            .get_account(Scope::Sp, id)
            .await
            .unwrap()
            .unwrap()
            .balance()
    }

    pub async fn total(&self) -> Decimal {
        self.store.total_balance(Scope::Sp).await.unwrap()
    }
}
