//! Per-account async locks
//!
//! Serializes withdrawal sequences on one account inside this process. The
//! store's hold is what keeps workers in other processes apart; this lock
//! only keeps local requests from racing for the same hold.
//!
//! Entries live only while someone holds or waits for them, so the table is
//! bounded by in-flight requests rather than by accounts ever touched.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core_types::AccountId;

#[derive(Default)]
pub struct AccountLocks {
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

/// Exclusive use of one account; evicts the table entry on drop when idle
pub struct AccountLockGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a DashMap<AccountId, Arc<Mutex<()>>>,
    account: AccountId,
}

impl Drop for AccountLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the slot, which keeps it in the table
        self.locks
            .remove_if(&self.account, |_, slot| Arc::strong_count(slot) == 1);
    }
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `account`
    pub async fn lock(&self, account: AccountId) -> AccountLockGuard<'_> {
        // Clone the Arc out so the map shard is not held across the await
        let slot = self.locks.entry(account).or_default().clone();
        let guard = slot.lock_owned().await;
        AccountLockGuard {
            guard: Some(guard),
            locks: &self.locks,
            account,
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_account_is_exclusive() {
        let locks = Arc::new(AccountLocks::new());
        let guard = locks.lock(AccountId(1)).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(AccountId(1)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // The waiter keeps the entry alive past the holder's release
        drop(guard);
        assert_eq!(locks.len(), 1);
        contender.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_accounts_do_not_block() {
        let locks = AccountLocks::new();
        let a = locks.lock(AccountId(1)).await;
        let b = locks.lock(AccountId(2)).await;
        assert_eq!(locks.len(), 2);

        drop(a);
        assert_eq!(locks.len(), 1);
        drop(b);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_table_stays_bounded() {
        let locks = AccountLocks::new();
        for id in 0..1_000 {
            let _g = locks.lock(AccountId(id)).await;
        }
        assert!(locks.is_empty());
    }
}
