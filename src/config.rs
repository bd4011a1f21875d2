use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::core_types::Scope;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    /// Public base URL of this service; webhook URLs are built from it
    pub app_url: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub payments: PaymentConfig,
    #[serde(default)]
    pub escrow: EscrowConfig,
    /// PostgreSQL connection settings; the in-memory store is used when absent
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "spledger.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            enable_tracing: false,
            app_url: "http://localhost:8080".to_string(),
            gateway: GatewayConfig::default(),
            payments: PaymentConfig::default(),
            escrow: EscrowConfig::default(),
            postgres: None,
        }
    }
}

/// Merchant credentials for one scope's provider card
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MerchantCredentials {
    pub merchant_id: String,
    pub merchant_token: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Minimum spacing between consecutive provider calls
    pub min_interval_ms: u64,
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub sp: Option<MerchantCredentials>,
    #[serde(default)]
    pub spm: Option<MerchantCredentials>,
}

impl GatewayConfig {
    pub fn credentials(&self, scope: Scope) -> Option<&MerchantCredentials> {
        match scope {
            Scope::Sp => self.sp.as_ref(),
            Scope::Spm => self.spm.as_ref(),
        }
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://spworlds.ru/api/public/".to_string(),
            min_interval_ms: 1100,
            request_timeout_secs: 10,
            sp: None,
            spm: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaymentConfig {
    pub expiry_minutes: i64,
    pub max_unresolved: u64,
    pub unresolved_window_minutes: i64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            expiry_minutes: 10,
            max_unresolved: 5,
            unresolved_window_minutes: 20,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EscrowConfig {
    pub sweep_interval_secs: u64,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    50
}

fn default_acquire_timeout() -> u64 {
    5
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }
}
