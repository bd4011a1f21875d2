//! Payment requests: hosted top-up pages settled by provider webhook

use chrono::{Duration, Utc};
use reqwest::Url;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::state::PaymentStatus;
use crate::config::PaymentConfig;
use crate::core_types::{AccountId, PaymentId, Scope, TransCode, UserId};
use crate::error::LedgerError;
use crate::gateway::{PaymentGateway, PaymentOrder};
use crate::guard::{AbuseGuard, RateLimitRule};
use crate::logging::LEDGER_TRACE_TARGET;
use crate::models::{ForbiddenUserAction, NewPaymentRequest, PaymentRequest};
use crate::store::{AccountStore, Activity, PaymentStore, PaymentTransition};

/// Payer label recorded for webhook settlements
pub const GATEWAY_PAYER: &str = "gateway";

/// Placeholder in redirect templates replaced with the payment id
pub const REDIRECT_ID_PLACEHOLDER: &str = "[ID]";

#[derive(Debug, Clone, PartialEq)]
pub enum AcceptOutcome {
    /// Destination credited, request now Paid
    Credited(PaymentRequest),
    /// Replay of an already settled request; nothing changed
    AlreadyPaid,
}

pub struct PaymentService {
    payments: Arc<dyn PaymentStore>,
    accounts: Arc<dyn AccountStore>,
    guard: Arc<AbuseGuard>,
    gateway: Arc<dyn PaymentGateway>,
    app_url: Url,
    config: PaymentConfig,
}

impl PaymentService {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        accounts: Arc<dyn AccountStore>,
        guard: Arc<AbuseGuard>,
        gateway: Arc<dyn PaymentGateway>,
        app_url: &str,
        config: PaymentConfig,
    ) -> Result<Self, LedgerError> {
        let app_url = Url::parse(app_url)
            .map_err(|e| LedgerError::Internal(format!("invalid app_url {}: {}", app_url, e)))?;
        Ok(Self {
            payments,
            accounts,
            guard,
            gateway,
            app_url,
            config,
        })
    }

    fn unresolved_rule(&self) -> RateLimitRule {
        RateLimitRule {
            activity: Activity::UnresolvedPayments,
            window: Duration::minutes(self.config.unresolved_window_minutes),
            max: self.config.max_unresolved,
        }
    }

    /// `{app_url}/payments/accept/{trans_code}`
    pub fn webhook_url(&self, code: TransCode) -> Result<Url, LedgerError> {
        self.app_url
            .join(&format!("/payments/accept/{}", code))
            .map_err(|e| LedgerError::Internal(format!("webhook url: {}", e)))
    }

    /// Open a hosted pay page crediting `account_id` once paid.
    ///
    /// The request is persisted as Awaiting before the provider is called; any
    /// provider failure cancels it.
    pub async fn create_payment(
        &self,
        user: UserId,
        account_id: AccountId,
        amount: u32,
        redirect_template: &str,
        scope: Scope,
    ) -> Result<PaymentRequest, LedgerError> {
        if amount < 1 {
            return Err(LedgerError::validation("amount must be at least 1"));
        }

        self.guard
            .ensure_allowed(user, ForbiddenUserAction::CreatePayments, scope)
            .await?;
        if !self.guard.check_rate_limit(user, self.unresolved_rule()).await? {
            return Err(LedgerError::TooManyRequests);
        }

        self.accounts
            .get_account(scope, account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound)?;

        let payment = self
            .payments
            .insert_payment(NewPaymentRequest {
                initiator: user,
                destination: account_id,
                amount,
                data: String::new(),
                expires_at: Utc::now() + Duration::minutes(self.config.expiry_minutes),
                scope,
            })
            .await?;
        debug!(target: LEDGER_TRACE_TARGET, payment_id = %payment.id, "payment persisted");

        let order = PaymentOrder {
            amount,
            redirect_url: redirect_template.replace(REDIRECT_ID_PLACEHOLDER, &payment.id.to_string()),
            webhook_url: self.webhook_url(payment.trans_code)?.to_string(),
            data: payment.data.clone(),
        };

        let link = match self.gateway.request_payment(&order, scope).await {
            Ok(link) if !link.is_empty() => link,
            Ok(_) => {
                error!(payment_id = %payment.id, "Gateway returned an empty pay link");
                self.payments.cancel_payment(payment.id).await?;
                return Err(LedgerError::Gateway("empty payment response".into()));
            }
            Err(e) => {
                error!(payment_id = %payment.id, error = %e, "Gateway payment request failed");
                self.payments.cancel_payment(payment.id).await?;
                return Err(e.into());
            }
        };

        self.payments
            .attach_link(payment.id, &link.url, &link.hash)
            .await?;
        info!(
            payment_id = %payment.id,
            user_id = %user,
            account_id = %account_id,
            amount = amount,
            scope = %scope,
            "Payment request opened"
        );

        Ok(PaymentRequest {
            pay_url: link.url,
            hash: link.hash,
            ..payment
        })
    }

    /// Provider webhook. Credits the destination once; replays are no-ops.
    pub async fn accept_payment(
        &self,
        trans_code: &str,
        amount_claimed: Decimal,
        supplied_hash: &str,
        scope: Scope,
    ) -> Result<AcceptOutcome, LedgerError> {
        let code: TransCode = trans_code
            .parse()
            .map_err(|_| LedgerError::PaymentNotFound)?;
        let payment = self
            .payments
            .find_by_trans_code(scope, code)
            .await?
            .ok_or(LedgerError::PaymentNotFound)?;

        if payment.hash.is_empty() || payment.hash != supplied_hash {
            warn!(payment_id = %payment.id, scope = %scope, "Webhook hash mismatch");
            return Err(LedgerError::WrongPaymentHash);
        }
        if amount_claimed <= Decimal::ZERO {
            return Err(LedgerError::validation("settled amount must be positive"));
        }
        if amount_claimed != Decimal::from(payment.amount) {
            warn!(
                payment_id = %payment.id,
                requested = payment.amount,
                claimed = %amount_claimed,
                "Settled amount differs from requested amount"
            );
        }

        self.settle(payment.id, amount_claimed, GATEWAY_PAYER).await
    }

    /// Admin override: settle an Awaiting request for its requested amount
    pub async fn mark_paid_by_admin(
        &self,
        payment_id: PaymentId,
        admin: UserId,
        scope: Scope,
    ) -> Result<AcceptOutcome, LedgerError> {
        let payment = self.get_payment(payment_id, scope).await?;
        let payer = format!("SPApp/Admin/{}", admin);
        self.settle(payment.id, Decimal::from(payment.amount), &payer)
            .await
    }

    pub async fn get_payment(
        &self,
        id: PaymentId,
        scope: Scope,
    ) -> Result<PaymentRequest, LedgerError> {
        self.payments
            .get_payment(scope, id)
            .await?
            .ok_or(LedgerError::PaymentNotFound)
    }

    async fn settle(
        &self,
        id: PaymentId,
        amount: Decimal,
        payer: &str,
    ) -> Result<AcceptOutcome, LedgerError> {
        match self.payments.settle_payment(id, amount, payer).await? {
            PaymentTransition::Applied(payment) => {
                info!(
                    payment_id = %payment.id,
                    account_id = %payment.destination,
                    amount = %amount,
                    payer = payer,
                    scope = %payment.scope,
                    "Payment settled"
                );
                Ok(AcceptOutcome::Credited(payment))
            }
            PaymentTransition::Unchanged(PaymentStatus::Paid) => {
                info!(payment_id = %id, "Payment already settled; replay ignored");
                Ok(AcceptOutcome::AlreadyPaid)
            }
            PaymentTransition::Unchanged(status) => {
                warn!(payment_id = %id, status = %status, "Settlement for a closed payment request");
                Err(LedgerError::InvalidStateTransition(format!(
                    "payment {} is {}",
                    id, status
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use crate::models::{Account, NewAccount};
    use crate::store::{GuardStore, MemoryStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        gateway: Arc<MockGateway>,
        service: PaymentService,
        account: Account,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let guard = Arc::new(AbuseGuard::new(store.clone()));
        let service = PaymentService::new(
            store.clone(),
            store.clone(),
            guard,
            gateway.clone(),
            "https://app.example.net/api/",
            PaymentConfig::default(),
        )
        .unwrap();
        let account = store
            .create_account(NewAccount {
                owner: UserId(1),
                scope: Scope::Sp,
                is_default: true,
                name: Account::DEFAULT_NAME.into(),
            })
            .await
            .unwrap();
        Fixture {
            store,
            gateway,
            service,
            account,
        }
    }

    async fn balance(f: &Fixture) -> Decimal {
        f.store
            .get_account(Scope::Sp, f.account.id)
            .await
            .unwrap()
            .unwrap()
            .balance()
    }

    #[tokio::test]
    async fn test_create_sends_redirect_and_webhook() {
        let f = fixture().await;
        let payment = f
            .service
            .create_payment(UserId(1), f.account.id, 12, "https://app/p/[ID]", Scope::Sp)
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Awaiting);
        assert!(!payment.pay_url.is_empty());

        let orders = f.gateway.payment_orders();
        assert_eq!(orders.len(), 1);
        let order = &orders[0].1;
        assert_eq!(order.redirect_url, format!("https://app/p/{}", payment.id));
        assert_eq!(
            order.webhook_url,
            format!("https://app.example.net/payments/accept/{}", payment.trans_code)
        );
        assert!(payment.expires_at > Utc::now() + Duration::minutes(9));
    }

    #[tokio::test]
    async fn test_gateway_failure_cancels_request() {
        let f = fixture().await;
        f.gateway.set_fail_payments(true);

        let err = f
            .service
            .create_payment(UserId(1), f.account.id, 12, "", Scope::Sp)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "GATEWAY_ERROR");

        // Canceled requests do not count as unresolved
        let count = f
            .store
            .count_recent(UserId(1), Activity::UnresolvedPayments, Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_empty_link_cancels_request() {
        let f = fixture().await;
        f.gateway.set_empty_links(true);
        let err = f
            .service
            .create_payment(UserId(1), f.account.id, 12, "", Scope::Sp)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_webhook_credits_once() {
        let f = fixture().await;
        let payment = f
            .service
            .create_payment(UserId(1), f.account.id, 12, "", Scope::Sp)
            .await
            .unwrap();
        let code = payment.trans_code.to_string().to_uppercase();

        let first = f
            .service
            .accept_payment(&code, Decimal::from(12), &payment.hash, Scope::Sp)
            .await
            .unwrap();
        assert!(matches!(first, AcceptOutcome::Credited(ref p) if p.status == PaymentStatus::Paid));

        let second = f
            .service
            .accept_payment(&code, Decimal::from(12), &payment.hash, Scope::Sp)
            .await
            .unwrap();
        assert_eq!(second, AcceptOutcome::AlreadyPaid);
        assert_eq!(balance(&f).await, Decimal::from(12));
    }

    #[tokio::test]
    async fn test_webhook_rejects_wrong_hash_and_scope() {
        let f = fixture().await;
        let payment = f
            .service
            .create_payment(UserId(1), f.account.id, 12, "", Scope::Sp)
            .await
            .unwrap();
        let code = payment.trans_code.to_string();

        let err = f
            .service
            .accept_payment(&code, Decimal::from(12), &payment.hash.to_uppercase(), Scope::Sp)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::WrongPaymentHash));

        let err = f
            .service
            .accept_payment(&code, Decimal::from(12), &payment.hash, Scope::Spm)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PaymentNotFound));

        let err = f
            .service
            .accept_payment("not-a-code", Decimal::from(12), &payment.hash, Scope::Sp)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PaymentNotFound));
        assert_eq!(balance(&f).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_admin_settlement_uses_requested_amount() {
        let f = fixture().await;
        let payment = f
            .service
            .create_payment(UserId(1), f.account.id, 9, "", Scope::Sp)
            .await
            .unwrap();

        let outcome = f
            .service
            .mark_paid_by_admin(payment.id, UserId(100), Scope::Sp)
            .await
            .unwrap();
        match outcome {
            AcceptOutcome::Credited(p) => assert_eq!(p.payer, "SPApp/Admin/100"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(balance(&f).await, Decimal::from(9));

        // Provider webhook arriving afterwards is a replay
        let replay = f
            .service
            .accept_payment(&payment.trans_code.to_string(), Decimal::from(9), &payment.hash, Scope::Sp)
            .await
            .unwrap();
        assert_eq!(replay, AcceptOutcome::AlreadyPaid);
        assert_eq!(balance(&f).await, Decimal::from(9));
    }

    #[tokio::test]
    async fn test_zero_amount_rejected_without_side_effects() {
        let f = fixture().await;
        let err = f
            .service
            .create_payment(UserId(1), f.account.id, 0, "", Scope::Sp)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
        assert_eq!(f.gateway.payment_calls(), 0);
    }
}
