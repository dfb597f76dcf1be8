//! Referral Ledger Core Types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::state::CommissionStatus;
use crate::money::{self, MoneyError};

/// Platform user id (`users_tb.user_id`)
pub type UserId = u64;

/// Deepest ancestor that can earn a commission
pub const MAX_REFERRAL_LEVEL: u8 = 3;

pub const DEFAULT_CURRENCY: &str = "USD";

/// Commission ledger entry id (ULID: sortable, no coordination needed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommissionId(ulid::Ulid);

impl CommissionId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for CommissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CommissionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

impl Serialize for CommissionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CommissionId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Users
// ============================================================================

/// A user node of the referral forest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: UserId,
    /// Direct referrer (level-1 upline); set once at signup
    pub referred_by: Option<UserId>,
    /// This user's own shareable referral code
    pub referral_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// How a signing-up user names their referrer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferrerRef {
    UserId(UserId),
    Code(String),
}

/// Signup request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub user_id: UserId,
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub referrer: Option<ReferrerRef>,
}

impl NewUser {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            referral_code: None,
            referrer: None,
        }
    }

    pub fn referred_by(mut self, referrer: UserId) -> Self {
        self.referrer = Some(ReferrerRef::UserId(referrer));
        self
    }

    pub fn referred_by_code(mut self, code: impl Into<String>) -> Self {
        self.referrer = Some(ReferrerRef::Code(code.into()));
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.referral_code = Some(code.into());
        self
    }
}

// ============================================================================
// Payments
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum PaymentStatus {
    Pending = 0,
    Succeeded = 10,
    Failed = -10,
    /// Set by chargeback reversal
    Refunded = -20,
}

impl PaymentStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(PaymentStatus::Pending),
            10 => Some(PaymentStatus::Succeeded),
            -10 => Some(PaymentStatus::Failed),
            -20 => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_payment_status() -> PaymentStatus {
    PaymentStatus::Succeeded
}

/// Payment-succeeded event as delivered by the payment-gateway webhook handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Gateway transaction id; the idempotency key
    pub transaction_id: String,
    pub user_id: UserId,
    pub amount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_payment_status")]
    pub status: PaymentStatus,
}

impl PaymentEvent {
    pub fn succeeded(transaction_id: impl Into<String>, user_id: UserId, amount: Decimal) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            user_id,
            amount,
            currency: default_currency(),
            status: PaymentStatus::Succeeded,
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Copy with the amount pinned to 2 decimals and the currency code in
    /// canonical form. Every stored field and idempotency comparison uses
    /// this form.
    pub fn normalized(&self) -> Result<PaymentEvent, MoneyError> {
        Ok(PaymentEvent {
            transaction_id: self.transaction_id.clone(),
            user_id: self.user_id,
            amount: money::validate_amount(self.amount)?,
            currency: money::normalize_currency(&self.currency)?,
            status: self.status,
        })
    }
}

/// Processed payment as stored in `payments_tb`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub transaction_id: String,
    pub user_id: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub processed_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Describe how a [`PaymentEvent::normalized`] event differs from this
    /// record, if it does.
    /// Status is not part of the payload: a refunded payment may still be
    /// replayed by the gateway as succeeded.
    pub fn payload_mismatch(&self, event: &PaymentEvent) -> Option<String> {
        if self.user_id != event.user_id {
            return Some(format!("user_id {} != {}", event.user_id, self.user_id));
        }
        if self.amount != event.amount {
            return Some(format!("amount {} != {}", event.amount, self.amount));
        }
        if self.currency != event.currency {
            return Some(format!("currency {} != {}", event.currency, self.currency));
        }
        None
    }
}

// ============================================================================
// Referral links & commission ledger
// ============================================================================

/// Referral relationship row, unique per (referrer, referred_user)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralLink {
    pub referrer_id: UserId,
    pub referred_user_id: UserId,
    /// Hop distance from `referred_user_id` up to `referrer_id`, 1..=3
    pub level: u8,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum CommissionKind {
    /// Credit generated by a payment
    Commission = 1,
    /// Negative offset of a paid commission
    Reversal = 2,
}

impl CommissionKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(CommissionKind::Commission),
            2 => Some(CommissionKind::Reversal),
            _ => None,
        }
    }
}

/// One row of the commission ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionEntry {
    pub id: CommissionId,
    /// Ancestor earning (or losing, for reversals) the commission
    pub beneficiary_id: UserId,
    /// User whose payment generated it
    pub referred_user_id: UserId,
    /// Originating payment
    pub transaction_id: String,
    pub level: u8,
    pub kind: CommissionKind,
    /// Negative for reversals
    pub amount: Decimal,
    pub rate: Decimal,
    pub currency: String,
    pub status: CommissionStatus,
    /// Paid entry offset by this reversal
    pub reverses: Option<CommissionId>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommissionEntry {
    /// New pending commission for one ancestor level
    pub fn pending(
        payment: &PaymentRecord,
        beneficiary_id: UserId,
        level: u8,
        rate: Decimal,
        amount: Decimal,
    ) -> Self {
        Self {
            id: CommissionId::new(),
            beneficiary_id,
            referred_user_id: payment.user_id,
            transaction_id: payment.transaction_id.clone(),
            level,
            kind: CommissionKind::Commission,
            amount,
            rate,
            currency: payment.currency.clone(),
            status: CommissionStatus::Pending,
            reverses: None,
            notes: None,
            created_at: payment.processed_at,
            updated_at: payment.processed_at,
        }
    }

    /// Offsetting entry for a paid commission. Born rejected so it can never
    /// be paid out or transitioned again.
    pub fn reversal_of(paid: &CommissionEntry, notes: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: CommissionId::new(),
            beneficiary_id: paid.beneficiary_id,
            referred_user_id: paid.referred_user_id,
            transaction_id: paid.transaction_id.clone(),
            level: paid.level,
            kind: CommissionKind::Reversal,
            amount: -paid.amount,
            rate: paid.rate,
            currency: paid.currency.clone(),
            status: CommissionStatus::Rejected,
            reverses: Some(paid.id),
            notes,
            created_at: now,
            updated_at: now,
        }
    }

    #[inline]
    pub fn is_reversal(&self) -> bool {
        self.kind == CommissionKind::Reversal
    }
}

impl fmt::Display for CommissionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Commission[{}] L{} {} -> {} amount={} {} status={}",
            self.id,
            self.level,
            self.referred_user_id,
            self.beneficiary_id,
            self.amount,
            self.currency,
            self.status
        )
    }
}

/// Ledger query; `None` fields do not filter. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommissionFilter {
    pub beneficiary_id: Option<UserId>,
    pub referred_user_id: Option<UserId>,
    pub transaction_id: Option<String>,
    pub status: Option<CommissionStatus>,
    pub kind: Option<CommissionKind>,
    /// Only entries created strictly before this instant
    pub created_before: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl CommissionFilter {
    pub fn for_beneficiary(user_id: UserId) -> Self {
        Self {
            beneficiary_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn for_transaction(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: Some(transaction_id.into()),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: CommissionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn kind(mut self, kind: CommissionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// In-process evaluation of everything but pagination
    pub fn matches(&self, entry: &CommissionEntry) -> bool {
        self.beneficiary_id.is_none_or(|id| entry.beneficiary_id == id)
            && self
                .referred_user_id
                .is_none_or(|id| entry.referred_user_id == id)
            && self
                .transaction_id
                .as_deref()
                .is_none_or(|txn| entry.transaction_id == txn)
            && self.status.is_none_or(|s| entry.status == s)
            && self.kind.is_none_or(|k| entry.kind == k)
            && self.created_before.is_none_or(|t| entry.created_at < t)
    }
}

// ============================================================================
// Engine results
// ============================================================================

/// Result of `process_payment`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessOutcome {
    pub transaction_id: String,
    /// Commission entries of this transaction, level ascending
    pub entries: Vec<CommissionEntry>,
    /// True when the transaction had already been processed
    pub replayed: bool,
}

/// Result of `transition_commission`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TransitionOutcome {
    /// Status updated in place
    Updated(CommissionEntry),
    /// Paid entry left untouched, offsetting entry recorded
    Reversed {
        original: CommissionEntry,
        reversal: CommissionEntry,
    },
}

/// Result of `reverse_for_chargeback`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChargebackOutcome {
    /// Entries moved to rejected in place
    pub rejected: Vec<CommissionEntry>,
    /// New negative entries offsetting paid commissions
    pub reversals: Vec<CommissionEntry>,
    /// Entries already rejected or already reversed
    pub skipped: usize,
}

impl ChargebackOutcome {
    pub fn is_noop(&self) -> bool {
        self.rejected.is_empty() && self.reversals.is_empty()
    }
}

/// Per-user referral report
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReferralStats {
    /// Downline size per level: index 0 is level 1
    pub downline_counts: [usize; MAX_REFERRAL_LEVEL as usize],
    pub pending_total: Decimal,
    pub approved_total: Decimal,
    pub paid_total: Decimal,
    /// Sum of reversal entries (zero or negative)
    pub reversed_total: Decimal,
    /// pending + approved + paid
    pub lifetime_total: Decimal,
    /// paid + reversed
    pub net_paid_total: Decimal,
}

/// One level of a user's downline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownlineLevel {
    pub level: u8,
    pub users: Vec<UserId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PaymentRecord {
        PaymentRecord {
            transaction_id: "ch_1".to_string(),
            user_id: 7,
            amount: Decimal::new(10000, 2),
            currency: "USD".to_string(),
            status: PaymentStatus::Succeeded,
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn test_commission_id_roundtrip() {
        let id = CommissionId::new();
        let parsed: CommissionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-ulid".parse::<CommissionId>().is_err());

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn test_payment_event_defaults() {
        let event: PaymentEvent =
            serde_json::from_str(r#"{"transaction_id":"ch_1","user_id":7,"amount":"29.99"}"#)
                .unwrap();
        assert_eq!(event.currency, "USD");
        assert_eq!(event.status, PaymentStatus::Succeeded);
        assert_eq!(event.amount, Decimal::new(2999, 2));
    }

    #[test]
    fn test_normalized_event() {
        let event = PaymentEvent::succeeded("ch_1", 7, Decimal::new(105, 1)).with_currency(" eur");
        let normalized = event.normalized().unwrap();
        assert_eq!(normalized.currency, "EUR");
        assert_eq!(normalized.amount.to_string(), "10.50");
        assert_eq!(normalized.transaction_id, "ch_1");

        let blank = event.clone().with_currency("  ");
        assert!(matches!(blank.normalized(), Err(MoneyError::InvalidCurrency(_))));

        let huge = PaymentEvent::succeeded("ch_2", 7, Decimal::new(1_000_000_000_000, 2));
        assert_eq!(huge.normalized(), Err(MoneyError::Overflow));
    }

    #[test]
    fn test_payload_mismatch() {
        let rec = record();
        let same = PaymentEvent::succeeded("ch_1", 7, Decimal::new(100, 0));
        assert_eq!(rec.payload_mismatch(&same), None);

        let padded = same.clone().with_currency(" usd ").normalized().unwrap();
        assert_eq!(rec.payload_mismatch(&padded), None);

        let other_amount = PaymentEvent::succeeded("ch_1", 7, Decimal::new(12000, 2));
        assert!(rec.payload_mismatch(&other_amount).unwrap().contains("amount"));

        let other_user = PaymentEvent::succeeded("ch_1", 8, Decimal::new(100, 0));
        assert!(rec.payload_mismatch(&other_user).unwrap().contains("user_id"));

        let other_currency = same.with_currency("EUR");
        assert!(rec.payload_mismatch(&other_currency).unwrap().contains("currency"));
    }

    #[test]
    fn test_reversal_of_paid_entry() {
        let rec = record();
        let mut paid = CommissionEntry::pending(&rec, 3, 1, Decimal::new(10, 2), Decimal::new(1000, 2));
        paid.status = CommissionStatus::Paid;

        let reversal = CommissionEntry::reversal_of(&paid, Some("chargeback".into()), Utc::now());
        assert_eq!(reversal.amount, Decimal::new(-1000, 2));
        assert_eq!(reversal.reverses, Some(paid.id));
        assert_eq!(reversal.status, CommissionStatus::Rejected);
        assert!(reversal.is_reversal());
        assert_ne!(reversal.id, paid.id);
        assert_eq!(reversal.beneficiary_id, 3);
    }

    #[test]
    fn test_filter_matches() {
        let rec = record();
        let entry = CommissionEntry::pending(&rec, 3, 1, Decimal::new(10, 2), Decimal::new(1000, 2));

        assert!(CommissionFilter::default().matches(&entry));
        assert!(CommissionFilter::for_beneficiary(3).matches(&entry));
        assert!(!CommissionFilter::for_beneficiary(4).matches(&entry));
        assert!(CommissionFilter::for_transaction("ch_1")
            .status(CommissionStatus::Pending)
            .matches(&entry));
        assert!(!CommissionFilter::for_transaction("ch_1")
            .kind(CommissionKind::Reversal)
            .matches(&entry));

        let cutoff = CommissionFilter {
            created_before: Some(entry.created_at),
            ..Default::default()
        };
        assert!(!cutoff.matches(&entry));
    }
}
