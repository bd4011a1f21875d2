//! Provider wire types (JSON, camelCase)

use serde::{Deserialize, Serialize};

/// `GET users/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayUser {
    pub username: String,
    #[serde(default)]
    pub uuid: Option<String>,
}

/// `GET card`: the merchant card of one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayBalance {
    pub balance: i64,
    #[serde(default)]
    pub webhook: Option<String>,
}

/// `POST transactions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalOrder {
    /// Destination card number
    pub receiver: String,
    pub amount: u32,
    pub comment: String,
}

/// `POST payment`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOrder {
    pub amount: u32,
    pub redirect_url: String,
    pub webhook_url: String,
    pub data: String,
}

/// Hosted pay page plus the secret the provider will echo in the webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub url: String,
    #[serde(default)]
    pub hash: String,
}

impl PaymentLink {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.url.is_empty() || self.hash.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_order_is_camel_case() {
        let order = PaymentOrder {
            amount: 12,
            redirect_url: "https://app/p/1".into(),
            webhook_url: "https://app/payments/accept/x".into(),
            data: String::new(),
        };
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["redirectUrl"], "https://app/p/1");
        assert_eq!(json["webhookUrl"], "https://app/payments/accept/x");
    }

    #[test]
    fn test_link_without_hash_is_empty() {
        let link: PaymentLink = serde_json::from_str(r#"{"url":"https://spworlds.ru/pay/1"}"#).unwrap();
        assert!(link.is_empty());
    }
}
