//! Account opening and lookup

use std::sync::Arc;
use tracing::{debug, info};

use crate::core_types::{Scope, UserId};
use crate::error::LedgerError;
use crate::models::{Account, NewAccount};
use crate::store::AccountStore;

pub struct AccountService {
    accounts: Arc<dyn AccountStore>,
}

impl AccountService {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }

    /// Ensure `owner` has a default account in every scope.
    ///
    /// Called at user creation; scopes that already have one are left alone,
    /// so calling it again is harmless.
    pub async fn open_default_accounts(&self, owner: UserId) -> Result<Vec<Account>, LedgerError> {
        let mut opened = Vec::with_capacity(Scope::ALL.len());

        for scope in Scope::ALL {
            if let Some(existing) = self.accounts.default_account(scope, owner).await? {
                debug!(user_id = %owner, scope = %scope, account_id = %existing.id, "Default account exists");
                opened.push(existing);
                continue;
            }

            let created = self
                .accounts
                .create_account(NewAccount {
                    owner,
                    scope,
                    is_default: true,
                    name: Account::DEFAULT_NAME.to_string(),
                })
                .await;

            let account = match created {
                Ok(account) => {
                    info!(user_id = %owner, scope = %scope, account_id = %account.id, "Default account opened");
                    account
                }
                // A concurrent opener won the unique default slot
                Err(e) => self
                    .accounts
                    .default_account(scope, owner)
                    .await?
                    .ok_or(e)?,
            };
            opened.push(account);
        }

        Ok(opened)
    }

    pub async fn default_account(&self, owner: UserId, scope: Scope) -> Result<Account, LedgerError> {
        self.accounts
            .default_account(scope, owner)
            .await?
            .ok_or(LedgerError::AccountNotFound)
    }

    /// All accounts of `owner`, across scopes
    pub async fn accounts(&self, owner: UserId) -> Result<Vec<Account>, LedgerError> {
        let mut accounts = self.accounts.accounts_of(owner).await?;
        accounts.sort_by_key(|a| (a.scope, a.id));
        Ok(accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_open_one_default_per_scope() {
        let service = AccountService::new(Arc::new(MemoryStore::new()));

        let opened = service.open_default_accounts(UserId(1)).await.unwrap();
        assert_eq!(opened.len(), 2);
        assert_eq!(opened[0].scope, Scope::Sp);
        assert_eq!(opened[1].scope, Scope::Spm);
        for account in &opened {
            assert!(account.is_default);
            assert_eq!(account.name, "main");
            assert_eq!(account.balance(), Decimal::ZERO);
        }
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let service = AccountService::new(Arc::new(MemoryStore::new()));

        let first = service.open_default_accounts(UserId(1)).await.unwrap();
        let second = service.open_default_accounts(UserId(1)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(service.accounts(UserId(1)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_default_account_lookup() {
        let service = AccountService::new(Arc::new(MemoryStore::new()));
        service.open_default_accounts(UserId(1)).await.unwrap();

        let acc = service.default_account(UserId(1), Scope::Spm).await.unwrap();
        assert_eq!(acc.owner, UserId(1));
        assert_eq!(acc.scope, Scope::Spm);

        let err = service.default_account(UserId(2), Scope::Sp).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound));
        assert!(service.accounts(UserId(2)).await.unwrap().is_empty());
    }
}
