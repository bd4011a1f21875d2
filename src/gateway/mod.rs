//! Payment Gateway Client
//!
//! Outbound calls to the external payment provider. Single-shot: no retries,
//! every failure surfaces as a [`GatewayError`] for the caller to record.

pub mod client;
pub mod error;
#[cfg(any(test, feature = "mock-api"))]
pub mod mock;
pub mod pacer;
pub mod types;

pub use client::SpWorldsClient;
pub use error::GatewayError;
#[cfg(any(test, feature = "mock-api"))]
pub use mock::MockGateway;
pub use pacer::RequestPacer;
pub use types::{GatewayBalance, GatewayUser, PaymentLink, PaymentOrder, WithdrawalOrder};

use async_trait::async_trait;

use crate::core_types::Scope;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn get_user(&self, external_id: &str, scope: Scope) -> Result<GatewayUser, GatewayError>;

    /// Merchant card balance of the scope
    async fn get_balance(&self, scope: Scope) -> Result<GatewayBalance, GatewayError>;

    /// Move real money off-platform to a provider card
    async fn send_withdrawal(&self, order: &WithdrawalOrder, scope: Scope)
    -> Result<(), GatewayError>;

    /// Open a hosted pay page. An empty url or hash is an error.
    async fn request_payment(
        &self,
        order: &PaymentOrder,
        scope: Scope,
    ) -> Result<PaymentLink, GatewayError>;
}
