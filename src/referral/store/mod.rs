//! Ledger Storage
//!
//! The engine talks to persistence only through [`ReferralStore`]. Two
//! implementations ship with the crate:
//! - [`MemoryReferralStore`]: single-process, mutex-guarded
//! - [`PgReferralStore`]: PostgreSQL via sqlx
//!
//! # Atomicity contract
//! `record_payment` is the only multi-row write. It MUST check the
//! transaction id and insert the payment, referral links and commission
//! entries as one unit: concurrent calls for the same transaction id produce
//! exactly one set of rows, and every loser gets
//! [`RecordOutcome::AlreadyRecorded`] with the winner's rows.

pub mod memory;
pub mod postgres;

pub use memory::MemoryReferralStore;
pub use postgres::PgReferralStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::ReferralError;
use super::state::CommissionStatus;
use super::types::{
    CommissionEntry, CommissionFilter, CommissionId, PaymentRecord, PaymentStatus, ReferralLink,
    UserId, UserRecord,
};

/// Outcome of the atomic payment write
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Rows written by this call
    Inserted,
    /// Transaction id already present; nothing written
    AlreadyRecorded {
        payment: PaymentRecord,
        entries: Vec<CommissionEntry>,
    },
}

#[async_trait]
pub trait ReferralStore: Send + Sync {
    /// Store name for logging
    fn name(&self) -> &'static str;

    // === Users ===

    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>, ReferralError>;

    async fn find_user_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<UserRecord>, ReferralError>;

    /// Fails with `UserAlreadyExists` / `DuplicateReferralCode` on conflicts
    async fn insert_user(&self, user: &UserRecord) -> Result<(), ReferralError>;

    /// Users whose direct referrer is `user_id`, ascending
    async fn direct_referrals(&self, user_id: UserId) -> Result<Vec<UserId>, ReferralError>;

    // === Payments ===

    async fn get_payment(&self, transaction_id: &str)
    -> Result<Option<PaymentRecord>, ReferralError>;

    /// Atomically record a payment with its referral links and commission
    /// entries (see module docs). A link that already exists with a
    /// different level fails the whole write with `DataIntegrity`.
    async fn record_payment(
        &self,
        payment: &PaymentRecord,
        links: &[ReferralLink],
        entries: &[CommissionEntry],
    ) -> Result<RecordOutcome, ReferralError>;

    /// Returns false if the payment does not exist
    async fn set_payment_status(
        &self,
        transaction_id: &str,
        status: PaymentStatus,
    ) -> Result<bool, ReferralError>;

    // === Referral links ===

    /// Links where `referrer_id` is the referrer, level then user ascending
    async fn referrals_for(&self, referrer_id: UserId) -> Result<Vec<ReferralLink>, ReferralError>;

    // === Commission ledger ===

    async fn get_commission(
        &self,
        id: CommissionId,
    ) -> Result<Option<CommissionEntry>, ReferralError>;

    /// Newest first, then by id
    async fn list_commissions(
        &self,
        filter: &CommissionFilter,
    ) -> Result<Vec<CommissionEntry>, ReferralError>;

    /// Atomic CAS: update only if the current status is `expected`.
    ///
    /// Returns true if updated, false if another writer got there first.
    /// `notes = None` keeps existing notes.
    async fn update_status_if(
        &self,
        id: CommissionId,
        expected: CommissionStatus,
        new_status: CommissionStatus,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, ReferralError>;

    /// Insert a reversal entry for the paid entry it `reverses`.
    ///
    /// Returns false (and writes nothing) if that entry is no longer paid or
    /// already has a reversal.
    async fn insert_reversal(&self, reversal: &CommissionEntry) -> Result<bool, ReferralError>;

    /// Reversal entry offsetting `paid_id`, if any
    async fn find_reversal(
        &self,
        paid_id: CommissionId,
    ) -> Result<Option<CommissionEntry>, ReferralError>;
}

/// Sort order shared by every store: newest first, ties by id
pub(crate) fn sort_newest_first(entries: &mut [CommissionEntry]) {
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
}
