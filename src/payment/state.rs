//! Payment Request State Definitions
//!
//! ```text
//! AWAITING ──▶ PAID
//!     │
//!     └──────▶ CANCELED
//! ```
//!
//! PAID and CANCELED are terminal. State IDs are stored as SMALLINT.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum PaymentStatus {
    /// Pay page issued, waiting for the provider callback
    Awaiting = 0,
    /// Terminal: destination account credited
    Paid = 1,
    /// Terminal: provider call failed or request withdrawn
    Canceled = 2,
}

impl PaymentStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Canceled)
    }

    /// Only Awaiting may move, and only to a terminal state
    #[inline]
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        *self == PaymentStatus::Awaiting && next.is_terminal()
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(PaymentStatus::Awaiting),
            1 => Some(PaymentStatus::Paid),
            2 => Some(PaymentStatus::Canceled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Awaiting => "AWAITING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for PaymentStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        PaymentStatus::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(PaymentStatus::Paid.is_terminal());
        assert!(PaymentStatus::Canceled.is_terminal());
        assert!(!PaymentStatus::Awaiting.is_terminal());
    }

    #[test]
    fn test_transitions() {
        assert!(PaymentStatus::Awaiting.can_transition_to(PaymentStatus::Paid));
        assert!(PaymentStatus::Awaiting.can_transition_to(PaymentStatus::Canceled));
        assert!(!PaymentStatus::Awaiting.can_transition_to(PaymentStatus::Awaiting));
        assert!(!PaymentStatus::Paid.can_transition_to(PaymentStatus::Canceled));
        assert!(!PaymentStatus::Canceled.can_transition_to(PaymentStatus::Paid));
    }

    #[test]
    fn test_invalid_state_id() {
        assert!(PaymentStatus::from_id(3).is_none());
        assert_eq!(PaymentStatus::try_from(1), Ok(PaymentStatus::Paid));
    }

    #[test]
    fn test_display() {
        assert_eq!(PaymentStatus::Awaiting.to_string(), "AWAITING");
        assert_eq!(PaymentStatus::Canceled.to_string(), "CANCELED");
    }
}
