//! Referral Ledger Error Types

use thiserror::Error;

use super::state::CommissionStatus;
use crate::money::MoneyError;

/// Referral ledger errors
///
/// `process_payment` never leaves partial ledger rows behind, whatever the
/// variant: all checks run before the single atomic write.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReferralError {
    // === Fatal: surfaced to operators, never auto-repaired ===
    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    // === Fatal for the payment, retryable after a config fix ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    // === Replay of a transaction id with a different payload ===
    #[error("Idempotency conflict for transaction {transaction_id}: {reason}")]
    IdempotencyConflict {
        transaction_id: String,
        reason: String,
    },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: CommissionStatus,
        to: CommissionStatus,
    },

    // === Lookup / validation ===
    #[error("User not found: {0}")]
    UserNotFound(u64),

    #[error("User already exists: {0}")]
    UserAlreadyExists(u64),

    #[error("Referrer not found: {0}")]
    ReferrerNotFound(String),

    #[error("Referral code already taken: {0}")]
    DuplicateReferralCode(String),

    #[error("Commission entry not found: {0}")]
    CommissionNotFound(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Payment {transaction_id} is not succeeded (status: {status})")]
    PaymentNotSucceeded {
        transaction_id: String,
        status: String,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid currency: {0:?}")]
    InvalidCurrency(String),

    // === System ===
    #[error("Database error: {0}")]
    Database(String),
}

impl ReferralError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ReferralError::DataIntegrity(_) => "DATA_INTEGRITY",
            ReferralError::Configuration(_) => "CONFIGURATION",
            ReferralError::IdempotencyConflict { .. } => "IDEMPOTENCY_CONFLICT",
            ReferralError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            ReferralError::UserNotFound(_) => "USER_NOT_FOUND",
            ReferralError::UserAlreadyExists(_) => "USER_ALREADY_EXISTS",
            ReferralError::ReferrerNotFound(_) => "REFERRER_NOT_FOUND",
            ReferralError::DuplicateReferralCode(_) => "DUPLICATE_REFERRAL_CODE",
            ReferralError::CommissionNotFound(_) => "COMMISSION_NOT_FOUND",
            ReferralError::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            ReferralError::PaymentNotSucceeded { .. } => "PAYMENT_NOT_SUCCEEDED",
            ReferralError::InvalidAmount(_) => "INVALID_AMOUNT",
            ReferralError::InvalidCurrency(_) => "INVALID_CURRENCY",
            ReferralError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Whether the same call may succeed later without operator intervention
    /// on the ledger data itself
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReferralError::Configuration(_) | ReferralError::Database(_)
        )
    }

    pub(crate) fn idempotency_conflict(transaction_id: &str, reason: impl Into<String>) -> Self {
        ReferralError::IdempotencyConflict {
            transaction_id: transaction_id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for ReferralError {
    fn from(e: sqlx::Error) -> Self {
        ReferralError::Database(e.to_string())
    }
}

impl From<MoneyError> for ReferralError {
    fn from(e: MoneyError) -> Self {
        match e {
            MoneyError::InvalidCurrency(code) => ReferralError::InvalidCurrency(code),
            other => ReferralError::InvalidAmount(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ReferralError::DataIntegrity("cycle".into()).code(),
            "DATA_INTEGRITY"
        );
        assert_eq!(
            ReferralError::idempotency_conflict("txn_1", "amount differs").code(),
            "IDEMPOTENCY_CONFLICT"
        );
        assert_eq!(
            ReferralError::InvalidStateTransition {
                from: CommissionStatus::Pending,
                to: CommissionStatus::Paid,
            }
            .code(),
            "INVALID_STATE_TRANSITION"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(ReferralError::Configuration("no rate for level 3".into()).is_retryable());
        assert!(ReferralError::Database("timeout".into()).is_retryable());
        assert!(!ReferralError::DataIntegrity("cycle".into()).is_retryable());
        assert!(!ReferralError::idempotency_conflict("txn_1", "x").is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ReferralError::InvalidStateTransition {
            from: CommissionStatus::Pending,
            to: CommissionStatus::Paid,
        };
        assert_eq!(err.to_string(), "Invalid state transition: pending -> paid");

        let err = ReferralError::idempotency_conflict("ch_123", "amount 10.00 != 12.00");
        assert_eq!(
            err.to_string(),
            "Idempotency conflict for transaction ch_123: amount 10.00 != 12.00"
        );
    }

    #[test]
    fn test_money_error_maps_to_invalid_amount() {
        let err: ReferralError = MoneyError::InvalidAmount.into();
        assert_eq!(err.code(), "INVALID_AMOUNT");
        let err: ReferralError = MoneyError::Overflow.into();
        assert_eq!(err.code(), "INVALID_AMOUNT");
        let err: ReferralError = MoneyError::InvalidCurrency(String::new()).into();
        assert_eq!(err, ReferralError::InvalidCurrency(String::new()));
        assert_eq!(err.code(), "INVALID_CURRENCY");
    }
}
