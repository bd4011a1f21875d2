use thiserror::Error;

use crate::core_types::Scope;

/// Failure talking to the payment provider.
///
/// Never retried by the client; callers turn it into a failed transaction or
/// a canceled payment.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Network(String),

    #[error("Provider returned HTTP {0}")]
    Status(u16),

    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    #[error("Provider returned an empty {0} response")]
    EmptyResponse(&'static str),

    #[error("No merchant credentials configured for scope {0}")]
    MissingCredentials(Scope),

    #[error("Invalid gateway configuration: {0}")]
    InvalidConfig(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            GatewayError::Status(status.as_u16())
        } else {
            GatewayError::Network(e.to_string())
        }
    }
}
