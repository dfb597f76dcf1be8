//! Commission Status State Machine
//!
//! Status IDs are stored in PostgreSQL as SMALLINT.

use std::fmt;
use std::str::FromStr;

/// Commission ledger entry status
///
/// ```text
/// PENDING ──▶ APPROVED ──▶ PAID
///    │            │          │
///    └────────────┴──────────┴──▶ REJECTED
/// ```
///
/// PAID → REJECTED never mutates the paid row: it is recorded as a new
/// negative-amount reversal entry. REJECTED is the only terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum CommissionStatus {
    /// Commission generated, awaiting the review window
    Pending = 0,
    /// Approved, ready for payout
    Approved = 10,
    /// Disbursed to the beneficiary
    Paid = 20,
    /// Rejected (refund, chargeback, fraud review)
    Rejected = -10,
}

impl CommissionStatus {
    /// Whether the state machine allows `self -> next`
    pub fn can_transition_to(&self, next: CommissionStatus) -> bool {
        use CommissionStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Paid)
                | (Approved, Rejected)
                | (Paid, Rejected)
        )
    }

    /// Transitions that are recorded as a new reversal entry instead of an update
    #[inline]
    pub fn requires_reversal(&self, next: CommissionStatus) -> bool {
        *self == CommissionStatus::Paid && next == CommissionStatus::Rejected
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommissionStatus::Rejected)
    }

    /// Get the numeric status ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL status ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(CommissionStatus::Pending),
            10 => Some(CommissionStatus::Approved),
            20 => Some(CommissionStatus::Paid),
            -10 => Some(CommissionStatus::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::Pending => "pending",
            CommissionStatus::Approved => "approved",
            CommissionStatus::Paid => "paid",
            CommissionStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CommissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(CommissionStatus::Pending),
            "approved" => Ok(CommissionStatus::Approved),
            "paid" => Ok(CommissionStatus::Paid),
            "rejected" => Ok(CommissionStatus::Rejected),
            other => Err(format!("unknown commission status: {}", other)),
        }
    }
}

impl TryFrom<i16> for CommissionStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        CommissionStatus::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CommissionStatus; 4] = [
        CommissionStatus::Pending,
        CommissionStatus::Approved,
        CommissionStatus::Paid,
        CommissionStatus::Rejected,
    ];

    #[test]
    fn test_allowed_transitions() {
        use CommissionStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Paid));
        assert!(Approved.can_transition_to(Rejected));
        assert!(Paid.can_transition_to(Rejected));
    }

    #[test]
    fn test_forbidden_transitions() {
        use CommissionStatus::*;
        // Skipping approval
        assert!(!Pending.can_transition_to(Paid));
        // No way back
        assert!(!Approved.can_transition_to(Pending));
        assert!(!Paid.can_transition_to(Approved));
        assert!(!Paid.can_transition_to(Pending));
        // Rejected is terminal
        for next in ALL {
            assert!(!Rejected.can_transition_to(next));
        }
        // Self transitions are not transitions
        for s in ALL {
            assert!(!s.can_transition_to(s));
        }
    }

    #[test]
    fn test_requires_reversal_only_for_paid_rejection() {
        for from in ALL {
            for to in ALL {
                let expected = from == CommissionStatus::Paid && to == CommissionStatus::Rejected;
                assert_eq!(from.requires_reversal(to), expected, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(CommissionStatus::Rejected.is_terminal());
        assert!(!CommissionStatus::Pending.is_terminal());
        assert!(!CommissionStatus::Approved.is_terminal());
        assert!(!CommissionStatus::Paid.is_terminal());
    }

    #[test]
    fn test_status_id_roundtrip() {
        for status in ALL {
            assert_eq!(CommissionStatus::from_id(status.id()), Some(status));
        }
        assert!(CommissionStatus::from_id(999).is_none());
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("PAID".parse::<CommissionStatus>(), Ok(CommissionStatus::Paid));
        assert_eq!(" pending ".parse::<CommissionStatus>(), Ok(CommissionStatus::Pending));
        assert!("settled".parse::<CommissionStatus>().is_err());
        assert_eq!(CommissionStatus::Approved.to_string(), "approved");
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&CommissionStatus::Rejected).unwrap();
        assert_eq!(json, "\"rejected\"");
        let back: CommissionStatus = serde_json::from_str("\"approved\"").unwrap();
        assert_eq!(back, CommissionStatus::Approved);
    }
}
