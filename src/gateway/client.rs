//! SPWorlds public API client
//!
//! One `reqwest::Client` per scope, each carrying that scope's bearer
//! credential `base64(merchant_id:merchant_token)`. Every call goes through
//! the shared [`RequestPacer`].

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::GatewayError;
use super::pacer::RequestPacer;
use super::types::{GatewayBalance, GatewayUser, PaymentLink, PaymentOrder, WithdrawalOrder};
use super::PaymentGateway;
use crate::config::{GatewayConfig, MerchantCredentials};
use crate::core_types::Scope;

pub struct SpWorldsClient {
    base_url: Url,
    clients: HashMap<Scope, Client>,
    pacer: RequestPacer,
}

/// `Bearer base64(id:token)`
pub fn bearer_token(creds: &MerchantCredentials) -> String {
    let raw = format!("{}:{}", creds.merchant_id, creds.merchant_token);
    format!("Bearer {}", STANDARD.encode(raw))
}

impl SpWorldsClient {
    /// Build clients for every scope that has credentials configured
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| GatewayError::InvalidConfig(format!("base_url: {}", e)))?;

        let mut clients = HashMap::new();
        for scope in Scope::ALL {
            let Some(creds) = config.credentials(scope) else {
                warn!(scope = %scope, "No merchant credentials; gateway calls for this scope will fail");
                continue;
            };

            let mut auth = HeaderValue::from_str(&bearer_token(creds))
                .map_err(|e| GatewayError::InvalidConfig(format!("credentials: {}", e)))?;
            auth.set_sensitive(true);
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, auth);

            let client = Client::builder()
                .default_headers(headers)
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .build()
                .map_err(|e| {
                    GatewayError::InvalidConfig(format!("Failed to create HTTP client: {}", e))
                })?;
            clients.insert(scope, client);
        }

        info!(
            base_url = %base_url,
            scopes = clients.len(),
            min_interval_ms = config.min_interval_ms,
            "Gateway client initialized"
        );

        Ok(Self {
            base_url,
            clients,
            pacer: RequestPacer::new(config.min_interval()),
        })
    }

    fn client(&self, scope: Scope) -> Result<&Client, GatewayError> {
        self.clients
            .get(&scope)
            .ok_or(GatewayError::MissingCredentials(scope))
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::InvalidConfig(format!("bad path {}: {}", path, e)))
    }

    fn check_status(response: Response) -> Result<Response, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }
        Ok(response)
    }

    async fn get_json<R: DeserializeOwned>(
        &self,
        scope: Scope,
        path: &str,
    ) -> Result<R, GatewayError> {
        let client = self.client(scope)?;
        let url = self.endpoint(path)?;
        debug!(scope = %scope, %url, "Gateway GET");

        self.pacer
            .run(async {
                let response = Self::check_status(client.get(url).send().await?)?;
                Ok::<R, GatewayError>(response.json::<R>().await?)
            })
            .await
    }

    async fn post_json<B: serde::Serialize + Sync>(
        &self,
        scope: Scope,
        path: &str,
        body: &B,
    ) -> Result<Response, GatewayError> {
        let client = self.client(scope)?;
        let url = self.endpoint(path)?;
        debug!(scope = %scope, %url, "Gateway POST");

        self.pacer
            .run(async { Self::check_status(client.post(url).json(body).send().await?) })
            .await
    }
}

#[async_trait]
impl PaymentGateway for SpWorldsClient {
    async fn get_user(&self, external_id: &str, scope: Scope) -> Result<GatewayUser, GatewayError> {
        self.get_json(scope, &format!("users/{}", external_id)).await
    }

    async fn get_balance(&self, scope: Scope) -> Result<GatewayBalance, GatewayError> {
        self.get_json(scope, "card").await
    }

    async fn send_withdrawal(
        &self,
        order: &WithdrawalOrder,
        scope: Scope,
    ) -> Result<(), GatewayError> {
        self.post_json(scope, "transactions", order).await?;
        Ok(())
    }

    async fn request_payment(
        &self,
        order: &PaymentOrder,
        scope: Scope,
    ) -> Result<PaymentLink, GatewayError> {
        let response = self.post_json(scope, "payment", order).await?;
        let link: PaymentLink = response.json().await?;
        if link.is_empty() {
            return Err(GatewayError::EmptyResponse("payment"));
        }
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GatewayConfig {
        GatewayConfig {
            sp: Some(MerchantCredentials {
                merchant_id: "id".into(),
                merchant_token: "token".into(),
            }),
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn test_bearer_token_encoding() {
        let creds = MerchantCredentials {
            merchant_id: "id".into(),
            merchant_token: "token".into(),
        };
        // base64("id:token")
        assert_eq!(bearer_token(&creds), "Bearer aWQ6dG9rZW4=");
    }

    #[test]
    fn test_endpoints_join_base_url() {
        let client = SpWorldsClient::new(&config()).unwrap();
        assert_eq!(
            client.endpoint("users/42").unwrap().as_str(),
            "https://spworlds.ru/api/public/users/42"
        );
        assert_eq!(
            client.endpoint("card").unwrap().as_str(),
            "https://spworlds.ru/api/public/card"
        );
    }

    #[tokio::test]
    async fn test_scope_without_credentials_fails_fast() {
        let client = SpWorldsClient::new(&config()).unwrap();
        let err = client.get_balance(Scope::Spm).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingCredentials(Scope::Spm)));
    }

    #[test]
    fn test_invalid_base_url() {
        let cfg = GatewayConfig {
            base_url: "not a url".into(),
            ..config()
        };
        assert!(matches!(
            SpWorldsClient::new(&cfg),
            Err(GatewayError::InvalidConfig(_))
        ));
    }
}
