//! In-memory ledger store
//!
//! Every operation holds one mutex for its whole duration, which makes the
//! payment check-and-insert atomic without any per-key locking.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use super::{RecordOutcome, ReferralStore, sort_newest_first};
use crate::referral::error::ReferralError;
use crate::referral::state::CommissionStatus;
use crate::referral::types::{
    CommissionEntry, CommissionFilter, CommissionId, CommissionKind, PaymentRecord, PaymentStatus,
    ReferralLink, UserId, UserRecord,
};

#[derive(Default)]
struct Inner {
    users: FxHashMap<UserId, UserRecord>,
    codes: FxHashMap<String, UserId>,
    payments: FxHashMap<String, PaymentRecord>,
    /// (referrer, referred_user) -> link
    links: FxHashMap<(UserId, UserId), ReferralLink>,
    commissions: FxHashMap<CommissionId, CommissionEntry>,
    /// transaction id -> commission ids (both kinds)
    by_transaction: FxHashMap<String, Vec<CommissionId>>,
    /// paid entry id -> reversal id
    reversals: FxHashMap<CommissionId, CommissionId>,
}

impl Inner {
    fn transaction_entries(&self, transaction_id: &str) -> Vec<CommissionEntry> {
        self.by_transaction
            .get(transaction_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.commissions.get(id))
                    .filter(|e| e.kind == CommissionKind::Commission)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn insert_entry(&mut self, entry: &CommissionEntry) {
        self.by_transaction
            .entry(entry.transaction_id.clone())
            .or_default()
            .push(entry.id);
        self.commissions.insert(entry.id, entry.clone());
    }
}

#[derive(Default)]
pub struct MemoryReferralStore {
    inner: Mutex<Inner>,
}

impl MemoryReferralStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a user as-is, bypassing signup validation.
    ///
    /// Meant for fixtures and bulk imports of an existing user table; it can
    /// store the corrupted graphs (cycles, dangling referrers) that
    /// `register_user` refuses.
    pub fn seed_user(&self, user_id: UserId, referred_by: Option<UserId>) {
        let mut inner = self.lock();
        inner.users.insert(
            user_id,
            UserRecord {
                user_id,
                referred_by,
                referral_code: None,
                created_at: Utc::now(),
            },
        );
    }

    pub fn commission_count(&self) -> usize {
        self.lock().commissions.len()
    }

    pub fn payment_count(&self) -> usize {
        self.lock().payments.len()
    }

    pub fn link_count(&self) -> usize {
        self.lock().links.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave a half-applied write:
        // every mutation validates first and mutates last.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ReferralStore for MemoryReferralStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>, ReferralError> {
        Ok(self.lock().users.get(&user_id).cloned())
    }

    async fn find_user_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<UserRecord>, ReferralError> {
        let inner = self.lock();
        Ok(inner
            .codes
            .get(code)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn insert_user(&self, user: &UserRecord) -> Result<(), ReferralError> {
        let mut inner = self.lock();
        if inner.users.contains_key(&user.user_id) {
            return Err(ReferralError::UserAlreadyExists(user.user_id));
        }
        if let Some(code) = &user.referral_code {
            if inner.codes.contains_key(code) {
                return Err(ReferralError::DuplicateReferralCode(code.clone()));
            }
            inner.codes.insert(code.clone(), user.user_id);
        }
        inner.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn direct_referrals(&self, user_id: UserId) -> Result<Vec<UserId>, ReferralError> {
        let inner = self.lock();
        let mut ids: Vec<UserId> = inner
            .users
            .values()
            .filter(|u| u.referred_by == Some(user_id))
            .map(|u| u.user_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn get_payment(
        &self,
        transaction_id: &str,
    ) -> Result<Option<PaymentRecord>, ReferralError> {
        Ok(self.lock().payments.get(transaction_id).cloned())
    }

    async fn record_payment(
        &self,
        payment: &PaymentRecord,
        links: &[ReferralLink],
        entries: &[CommissionEntry],
    ) -> Result<RecordOutcome, ReferralError> {
        let mut inner = self.lock();

        if let Some(existing) = inner.payments.get(&payment.transaction_id) {
            return Ok(RecordOutcome::AlreadyRecorded {
                payment: existing.clone(),
                entries: inner.transaction_entries(&payment.transaction_id),
            });
        }

        // Validate everything before the first mutation
        for link in links {
            if let Some(existing) = inner.links.get(&(link.referrer_id, link.referred_user_id))
                && existing.level != link.level
            {
                return Err(ReferralError::DataIntegrity(format!(
                    "referral {} -> {} already recorded at level {}, chain now says {}",
                    link.referred_user_id, link.referrer_id, existing.level, link.level
                )));
            }
        }

        inner
            .payments
            .insert(payment.transaction_id.clone(), payment.clone());
        for link in links {
            inner
                .links
                .entry((link.referrer_id, link.referred_user_id))
                .or_insert_with(|| link.clone());
        }
        for entry in entries {
            inner.insert_entry(entry);
        }

        Ok(RecordOutcome::Inserted)
    }

    async fn set_payment_status(
        &self,
        transaction_id: &str,
        status: PaymentStatus,
    ) -> Result<bool, ReferralError> {
        let mut inner = self.lock();
        match inner.payments.get_mut(transaction_id) {
            Some(p) => {
                p.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn referrals_for(&self, referrer_id: UserId) -> Result<Vec<ReferralLink>, ReferralError> {
        let inner = self.lock();
        let mut links: Vec<ReferralLink> = inner
            .links
            .values()
            .filter(|l| l.referrer_id == referrer_id)
            .cloned()
            .collect();
        links.sort_by_key(|l| (l.level, l.referred_user_id));
        Ok(links)
    }

    async fn get_commission(
        &self,
        id: CommissionId,
    ) -> Result<Option<CommissionEntry>, ReferralError> {
        Ok(self.lock().commissions.get(&id).cloned())
    }

    async fn list_commissions(
        &self,
        filter: &CommissionFilter,
    ) -> Result<Vec<CommissionEntry>, ReferralError> {
        let inner = self.lock();
        let mut entries: Vec<CommissionEntry> = match &filter.transaction_id {
            Some(txn) => inner
                .by_transaction
                .get(txn)
                .map(|ids| ids.iter().filter_map(|id| inner.commissions.get(id)).cloned().collect())
                .unwrap_or_default(),
            None => inner.commissions.values().cloned().collect(),
        };
        drop(inner);

        entries.retain(|e| filter.matches(e));
        sort_newest_first(&mut entries);

        let page = entries
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(page)
    }

    async fn update_status_if(
        &self,
        id: CommissionId,
        expected: CommissionStatus,
        new_status: CommissionStatus,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, ReferralError> {
        let mut inner = self.lock();
        match inner.commissions.get_mut(&id) {
            Some(entry) if entry.status == expected => {
                entry.status = new_status;
                if let Some(n) = notes {
                    entry.notes = Some(n.to_string());
                }
                entry.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_reversal(&self, reversal: &CommissionEntry) -> Result<bool, ReferralError> {
        let paid_id = reversal.reverses.ok_or_else(|| {
            ReferralError::DataIntegrity(format!("reversal {} has no original entry", reversal.id))
        })?;

        let mut inner = self.lock();
        let still_paid = inner
            .commissions
            .get(&paid_id)
            .is_some_and(|e| e.status == CommissionStatus::Paid);
        if !still_paid || inner.reversals.contains_key(&paid_id) {
            return Ok(false);
        }

        inner.reversals.insert(paid_id, reversal.id);
        inner.insert_entry(reversal);
        Ok(true)
    }

    async fn find_reversal(
        &self,
        paid_id: CommissionId,
    ) -> Result<Option<CommissionEntry>, ReferralError> {
        let inner = self.lock();
        Ok(inner
            .reversals
            .get(&paid_id)
            .and_then(|id| inner.commissions.get(id))
            .cloned())
    }
}
