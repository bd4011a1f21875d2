//! Core types used throughout the ledger
//!
//! Identifiers are newtypes so that an account id can never be passed where a
//! user id is expected. Database columns store the inner value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Server scope - an isolated economy.
///
/// Accounts, transactions, payments and campaigns are partitioned by scope and
/// never interact across scopes. Stored as SMALLINT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum Scope {
    Sp = 1,
    Spm = 2,
}

impl Scope {
    /// Every scope, in storage order
    pub const ALL: [Scope; 2] = [Scope::Sp, Scope::Spm];

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Scope::Sp),
            2 => Some(Scope::Spm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Sp => "sp",
            Scope::Spm => "spm",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sp" | "1" => Ok(Scope::Sp),
            "spm" | "2" => Ok(Scope::Spm),
            _ => Err(format!("Invalid scope: {}", s)),
        }
    }
}

macro_rules! int_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

int_id!(
    /// Platform user (resolved by the excluded identity layer)
    UserId
);
int_id!(
    /// Ledger account
    AccountId
);
int_id!(
    /// Ledger transaction record
    TransactionId
);
int_id!(
    /// Crowdfunding campaign
    CompanyId
);

/// Payment request id - random, unguessable, shown to the payer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub Uuid);

impl PaymentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation id shared with the payment provider.
///
/// Parsing is case-insensitive: the provider may echo it back upper-cased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransCode(pub Uuid);

impl TransCode {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransCode {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransCode {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// Source or destination of a ledger transaction.
///
/// Persisted as a prefixed text label (`account:42`, `card:00012`,
/// `sink:SPApp/Starter`, `escrow:7`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Endpoint {
    /// A ledger account in the same scope
    InternalAccount(AccountId),
    /// A card at the payment provider (money leaves the platform)
    ExternalCard(String),
    /// Platform-owned sink such as a fee collector; no credit leg
    SystemSink(String),
    /// Held against a crowdfunding campaign until it closes
    Escrow(CompanyId),
}

impl Endpoint {
    /// Fee collector for campaign creation
    pub const STARTER_SINK: &'static str = "SPApp/Starter";

    pub fn account(&self) -> Option<AccountId> {
        match self {
            Endpoint::InternalAccount(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_escrow_of(&self, company: CompanyId) -> bool {
        matches!(self, Endpoint::Escrow(id) if *id == company)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::InternalAccount(id) => write!(f, "account:{}", id),
            Endpoint::ExternalCard(card) => write!(f, "card:{}", card),
            Endpoint::SystemSink(name) => write!(f, "sink:{}", name),
            Endpoint::Escrow(id) => write!(f, "escrow:{}", id),
        }
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s
            .split_once(':')
            .ok_or_else(|| format!("Invalid endpoint label: {}", s))?;
        let bad_id = |_| format!("Invalid id in endpoint label: {}", s);
        match kind {
            "account" => Ok(Endpoint::InternalAccount(value.parse().map_err(bad_id)?)),
            "card" => Ok(Endpoint::ExternalCard(value.to_string())),
            "sink" => Ok(Endpoint::SystemSink(value.to_string())),
            "escrow" => Ok(Endpoint::Escrow(value.parse().map_err(bad_id)?)),
            _ => Err(format!("Unknown endpoint kind: {}", kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parse() {
        assert_eq!("SPM".parse::<Scope>().unwrap(), Scope::Spm);
        assert_eq!("1".parse::<Scope>().unwrap(), Scope::Sp);
        assert!("mars".parse::<Scope>().is_err());
        assert_eq!(Scope::from_id(2), Some(Scope::Spm));
        assert_eq!(Scope::from_id(9), None);
    }

    #[test]
    fn test_trans_code_is_case_insensitive() {
        let code = TransCode::new();
        let upper = code.to_string().to_uppercase();
        assert_eq!(upper.parse::<TransCode>().unwrap(), code);
    }

    #[test]
    fn test_endpoint_labels() {
        let sink: Endpoint = "sink:SPApp/Starter".parse().unwrap();
        assert_eq!(sink, Endpoint::SystemSink(Endpoint::STARTER_SINK.to_string()));

        // card tokens may themselves contain ':'
        let card: Endpoint = "card:ab:cd".parse().unwrap();
        assert_eq!(card, Endpoint::ExternalCard("ab:cd".to_string()));

        assert!("account:x".parse::<Endpoint>().is_err());
        assert!("SPApp/Starter/c/1".parse::<Endpoint>().is_err());
        assert_eq!(Endpoint::Escrow(CompanyId(7)).to_string(), "escrow:7");
        assert!(Endpoint::Escrow(CompanyId(7)).is_escrow_of(CompanyId(7)));
        assert!(!Endpoint::InternalAccount(AccountId(7)).is_escrow_of(CompanyId(7)));
    }
}
