//! Abuse Guard
//!
//! Admission checks run before any state mutation: active bans and
//! sliding-window rate limits. Checks are pure reads; only [`AbuseGuard::forbid`]
//! writes.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::core_types::{Scope, UserId};
use crate::error::LedgerError;
use crate::models::{ForbiddenAction, ForbiddenInfo, ForbiddenUserAction, NewForbiddenAction};
use crate::store::{Activity, GuardStore};

/// At most `max` events of `activity` inside a trailing `window`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitRule {
    pub activity: Activity,
    pub window: Duration,
    pub max: u64,
}

impl RateLimitRule {
    pub const FILE_UPLOADS: RateLimitRule = RateLimitRule {
        activity: Activity::FileUploads,
        window: Duration::minutes(5),
        max: 5,
    };

    pub const UNRESOLVED_PAYMENTS: RateLimitRule = RateLimitRule {
        activity: Activity::UnresolvedPayments,
        window: Duration::minutes(20),
        max: 5,
    };

    pub const COMMENTS: RateLimitRule = RateLimitRule {
        activity: Activity::Comments,
        window: Duration::minutes(20),
        max: 25,
    };
}

pub struct AbuseGuard {
    store: Arc<dyn GuardStore>,
}

impl AbuseGuard {
    pub fn new(store: Arc<dyn GuardStore>) -> Self {
        Self { store }
    }

    /// Active restriction covering `action` (or ALL) in `scope`, if any
    pub async fn check_forbidden(
        &self,
        user: UserId,
        action: ForbiddenUserAction,
        scope: Scope,
    ) -> Result<Option<ForbiddenInfo>, LedgerError> {
        let ban = self
            .store
            .active_forbidden(user, scope, action, Utc::now())
            .await?;
        Ok(ban.map(|b| b.info()))
    }

    /// `check_forbidden` as an error
    pub async fn ensure_allowed(
        &self,
        user: UserId,
        action: ForbiddenUserAction,
        scope: Scope,
    ) -> Result<(), LedgerError> {
        match self.check_forbidden(user, action, scope).await? {
            Some(info) => {
                warn!(
                    user_id = %user,
                    scope = %scope,
                    action = %action,
                    until = %info.forbidden_until,
                    "Action denied: user is restricted"
                );
                Err(LedgerError::ForbiddenAction(info))
            }
            None => Ok(()),
        }
    }

    /// `true` when one more event is allowed under `rule`
    pub async fn check_rate_limit(
        &self,
        user: UserId,
        rule: RateLimitRule,
    ) -> Result<bool, LedgerError> {
        self.check_rate_limit_at(user, rule, Utc::now()).await
    }

    pub async fn check_rate_limit_at(
        &self,
        user: UserId,
        rule: RateLimitRule,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let count = self
            .store
            .count_recent(user, rule.activity, now - rule.window)
            .await?;
        if count >= rule.max {
            warn!(
                user_id = %user,
                activity = ?rule.activity,
                count,
                max = rule.max,
                "Rate limit reached"
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Persist a restriction
    pub async fn forbid(
        &self,
        user: UserId,
        action: ForbiddenUserAction,
        scope: Scope,
        until: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Result<ForbiddenAction, LedgerError> {
        let record = self
            .store
            .insert_forbidden(NewForbiddenAction {
                user,
                scope,
                action,
                forbidden_until: until,
                reason: reason.into(),
            })
            .await?;
        info!(user_id = %user, scope = %scope, action = %action, until = %until, "Restriction added");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn guard() -> (Arc<MemoryStore>, AbuseGuard) {
        let store = Arc::new(MemoryStore::new());
        let guard = AbuseGuard::new(store.clone());
        (store, guard)
    }

    #[tokio::test]
    async fn test_no_ban_means_allowed() {
        let (_, guard) = guard();
        assert!(
            guard
                .check_forbidden(UserId(1), ForbiddenUserAction::CreatePayments, Scope::Sp)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_wildcard_ban_blocks_specific_action() {
        let (_, guard) = guard();
        guard
            .forbid(
                UserId(1),
                ForbiddenUserAction::All,
                Scope::Sp,
                Utc::now() + Duration::hours(1),
                "spam",
            )
            .await
            .unwrap();

        let err = guard
            .ensure_allowed(UserId(1), ForbiddenUserAction::CreateTransactions, Scope::Sp)
            .await
            .unwrap_err();
        match err {
            LedgerError::ForbiddenAction(info) => {
                assert_eq!(info.action, ForbiddenUserAction::All);
                assert_eq!(info.reason, "spam");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // Other scope is unaffected
        guard
            .ensure_allowed(UserId(1), ForbiddenUserAction::CreateTransactions, Scope::Spm)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expired_ban_is_ignored() {
        let (_, guard) = guard();
        guard
            .forbid(
                UserId(1),
                ForbiddenUserAction::UploadFiles,
                Scope::Sp,
                Utc::now() - Duration::seconds(1),
                "old",
            )
            .await
            .unwrap();
        guard
            .ensure_allowed(UserId(1), ForbiddenUserAction::UploadFiles, Scope::Sp)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rate_limit_denies_at_max() {
        let (store, guard) = guard();
        let now = Utc::now();
        for i in 0..4 {
            store
                .record_activity(UserId(1), Activity::FileUploads, now - Duration::seconds(i))
                .await
                .unwrap();
        }
        assert!(
            guard
                .check_rate_limit_at(UserId(1), RateLimitRule::FILE_UPLOADS, now)
                .await
                .unwrap()
        );

        store
            .record_activity(UserId(1), Activity::FileUploads, now)
            .await
            .unwrap();
        assert!(
            !guard
                .check_rate_limit_at(UserId(1), RateLimitRule::FILE_UPLOADS, now)
                .await
                .unwrap()
        );

        // Another user has their own window
        assert!(
            guard
                .check_rate_limit_at(UserId(2), RateLimitRule::FILE_UPLOADS, now)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_rate_limit_window_slides() {
        let (store, guard) = guard();
        let now = Utc::now();
        for _ in 0..25 {
            store
                .record_activity(UserId(1), Activity::Comments, now - Duration::minutes(21))
                .await
                .unwrap();
        }
        assert!(
            guard
                .check_rate_limit_at(UserId(1), RateLimitRule::COMMENTS, now)
                .await
                .unwrap()
        );
    }
}
