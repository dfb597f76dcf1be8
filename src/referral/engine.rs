//! Referral Ledger Engine
//!
//! Turns payment-succeeded events into multi-level commission entries and
//! drives every later status change. All persistence goes through the
//! injected [`ReferralStore`]; the rate table is an explicit value.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashSet;
use tracing::{debug, error, info, warn};

use super::chain;
use super::error::ReferralError;
use super::rates::CommissionRates;
use super::state::CommissionStatus;
use super::store::{RecordOutcome, ReferralStore};
use super::types::{
    ChargebackOutcome, CommissionEntry, CommissionFilter, CommissionId, CommissionKind,
    DownlineLevel, MAX_REFERRAL_LEVEL, NewUser, PaymentEvent, PaymentRecord, PaymentStatus,
    ProcessOutcome, ReferralLink, ReferralStats, ReferrerRef, TransitionOutcome, UserId,
    UserRecord,
};
use crate::money;

/// Pending commissions younger than this are left for manual review
pub const DEFAULT_REVIEW_WINDOW_DAYS: i64 = 14;

/// Referral ledger engine, shared across tasks via `Arc`
pub struct ReferralLedger {
    store: Arc<dyn ReferralStore>,
    rates: CommissionRates,
    review_window: Duration,
}

impl ReferralLedger {
    pub fn new(store: Arc<dyn ReferralStore>, rates: CommissionRates) -> Self {
        Self::with_review_window(store, rates, Duration::days(DEFAULT_REVIEW_WINDOW_DAYS))
    }

    pub fn with_review_window(
        store: Arc<dyn ReferralStore>,
        rates: CommissionRates,
        review_window: Duration,
    ) -> Self {
        Self {
            store,
            rates,
            review_window,
        }
    }

    pub fn rates(&self) -> &CommissionRates {
        &self.rates
    }

    pub fn store(&self) -> &Arc<dyn ReferralStore> {
        &self.store
    }

    pub fn review_window(&self) -> Duration {
        self.review_window
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Register a user, optionally under a referrer given by id or code.
    ///
    /// `referred_by` is fixed here for good: there is no way to change it
    /// afterwards.
    pub async fn register_user(&self, new_user: NewUser) -> Result<UserRecord, ReferralError> {
        let user_id = new_user.user_id;

        if self.store.get_user(user_id).await?.is_some() {
            return Err(ReferralError::UserAlreadyExists(user_id));
        }

        let referral_code = new_user
            .referral_code
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if let Some(ref code) = referral_code
            && self.store.find_user_by_referral_code(code).await?.is_some()
        {
            return Err(ReferralError::DuplicateReferralCode(code.clone()));
        }

        let referred_by = match new_user.referrer {
            None => None,
            Some(ReferrerRef::UserId(referrer_id)) => {
                if referrer_id == user_id {
                    return Err(ReferralError::DataIntegrity(format!(
                        "user {} cannot refer itself",
                        user_id
                    )));
                }
                self.store
                    .get_user(referrer_id)
                    .await?
                    .ok_or_else(|| ReferralError::ReferrerNotFound(referrer_id.to_string()))?;
                Some(referrer_id)
            }
            Some(ReferrerRef::Code(code)) => Some(self.resolve_referral_code(&code).await?.user_id),
        };

        if let Some(referrer_id) = referred_by
            && chain::would_create_cycle(self.store.as_ref(), user_id, referrer_id).await?
        {
            error!(user_id, referrer_id, "Referral would close a cycle");
            return Err(ReferralError::DataIntegrity(format!(
                "linking user {} under {} would create a referral cycle",
                user_id, referrer_id
            )));
        }

        let record = UserRecord {
            user_id,
            referred_by,
            referral_code,
            created_at: Utc::now(),
        };
        self.store.insert_user(&record).await?;

        info!(
            user_id,
            referred_by = ?record.referred_by,
            referral_code = ?record.referral_code,
            "User registered"
        );
        Ok(record)
    }

    /// Look up the owner of a referral code (case-sensitive, trimmed)
    pub async fn resolve_referral_code(&self, code: &str) -> Result<UserRecord, ReferralError> {
        let code = code.trim();
        self.store
            .find_user_by_referral_code(code)
            .await?
            .ok_or_else(|| ReferralError::ReferrerNotFound(code.to_string()))
    }

    // ========================================================================
    // Payments
    // ========================================================================

    /// Record commissions for a succeeded payment, at most once per
    /// transaction id.
    ///
    /// Every check and amount is computed before the single atomic store
    /// write, so any error leaves no ledger rows behind. Replaying the same
    /// event returns the stored entries with `replayed = true`.
    pub async fn process_payment(
        &self,
        event: &PaymentEvent,
    ) -> Result<ProcessOutcome, ReferralError> {
        let transaction_id = event.transaction_id.as_str();

        if event.status != PaymentStatus::Succeeded {
            return Err(ReferralError::PaymentNotSucceeded {
                transaction_id: transaction_id.to_string(),
                status: event.status.to_string(),
            });
        }
        if transaction_id.trim().is_empty() {
            return Err(ReferralError::DataIntegrity(
                "payment event without transaction id".to_string(),
            ));
        }
        let event = &event.normalized()?;
        let amount = event.amount;

        // Fast path for webhook retries; the store re-checks atomically below
        if let Some(existing) = self.store.get_payment(transaction_id).await? {
            let entries = self.stored_entries(transaction_id).await?;
            return self.replayed(event, existing, entries);
        }

        let ancestors = chain::referrer_chain(
            self.store.as_ref(),
            event.user_id,
            self.rates.max_levels() as usize,
        )
        .await?;

        let payment = PaymentRecord {
            transaction_id: transaction_id.to_string(),
            user_id: event.user_id,
            amount,
            currency: event.currency.clone(),
            status: PaymentStatus::Succeeded,
            processed_at: Utc::now(),
        };

        let mut links = Vec::with_capacity(ancestors.len());
        let mut entries = Vec::with_capacity(ancestors.len());
        for (idx, beneficiary_id) in ancestors.iter().copied().enumerate() {
            let level = idx as u8 + 1;
            let rate = self.rates.rate_for(level).inspect_err(|e| {
                error!(transaction_id, level, error = %e, "Missing commission rate");
            })?;
            let commission = money::commission_amount(amount, rate);

            links.push(ReferralLink {
                referrer_id: beneficiary_id,
                referred_user_id: payment.user_id,
                level,
                created_at: payment.processed_at,
            });
            entries.push(CommissionEntry::pending(
                &payment,
                beneficiary_id,
                level,
                rate,
                commission,
            ));
        }

        match self.store.record_payment(&payment, &links, &entries).await? {
            RecordOutcome::Inserted => {
                for entry in &entries {
                    debug!(
                        transaction_id,
                        commission_id = %entry.id,
                        beneficiary_id = entry.beneficiary_id,
                        level = entry.level,
                        amount = %entry.amount,
                        "Commission recorded"
                    );
                }
                info!(
                    transaction_id,
                    user_id = payment.user_id,
                    amount = %payment.amount,
                    levels = entries.len(),
                    store = self.store.name(),
                    "Payment processed"
                );
                Ok(ProcessOutcome {
                    transaction_id: payment.transaction_id,
                    entries,
                    replayed: false,
                })
            }
            RecordOutcome::AlreadyRecorded { payment, entries } => {
                debug!(transaction_id, "Lost race to a concurrent delivery");
                self.replayed(event, payment, entries)
            }
        }
    }

    async fn stored_entries(
        &self,
        transaction_id: &str,
    ) -> Result<Vec<CommissionEntry>, ReferralError> {
        self.store
            .list_commissions(
                &CommissionFilter::for_transaction(transaction_id).kind(CommissionKind::Commission),
            )
            .await
    }

    fn replayed(
        &self,
        event: &PaymentEvent,
        existing: PaymentRecord,
        mut entries: Vec<CommissionEntry>,
    ) -> Result<ProcessOutcome, ReferralError> {
        if let Some(reason) = existing.payload_mismatch(event) {
            warn!(
                transaction_id = %event.transaction_id,
                reason = %reason,
                "Idempotency conflict"
            );
            return Err(ReferralError::idempotency_conflict(
                &event.transaction_id,
                reason,
            ));
        }

        entries.sort_by_key(|e| e.level);
        debug!(
            transaction_id = %existing.transaction_id,
            entries = entries.len(),
            "Duplicate payment event, returning stored entries"
        );
        Ok(ProcessOutcome {
            transaction_id: existing.transaction_id,
            entries,
            replayed: true,
        })
    }

    // ========================================================================
    // Status transitions
    // ========================================================================

    /// Move one commission entry along the state machine.
    ///
    /// `paid -> rejected` leaves the paid row untouched and records a
    /// negative reversal entry instead; a paid entry is reversed at most
    /// once. `notes = None` keeps existing notes.
    pub async fn transition_commission(
        &self,
        id: CommissionId,
        new_status: CommissionStatus,
        notes: Option<String>,
    ) -> Result<TransitionOutcome, ReferralError> {
        let entry = self
            .store
            .get_commission(id)
            .await?
            .ok_or_else(|| ReferralError::CommissionNotFound(id.to_string()))?;

        if !entry.status.can_transition_to(new_status) {
            return Err(ReferralError::InvalidStateTransition {
                from: entry.status,
                to: new_status,
            });
        }

        let now = Utc::now();
        if entry.status.requires_reversal(new_status) {
            return match self.reverse_paid(&entry, notes, now).await? {
                Some(reversal) => Ok(TransitionOutcome::Reversed {
                    original: entry,
                    reversal,
                }),
                None => Err(ReferralError::InvalidStateTransition {
                    from: entry.status,
                    to: new_status,
                }),
            };
        }

        if !self
            .store
            .update_status_if(id, entry.status, new_status, notes.as_deref(), now)
            .await?
        {
            // Another writer moved it first; report what it is now
            let current = self
                .store
                .get_commission(id)
                .await?
                .ok_or_else(|| ReferralError::CommissionNotFound(id.to_string()))?;
            warn!(
                commission_id = %id,
                expected = %entry.status,
                actual = %current.status,
                "Concurrent status change"
            );
            return Err(ReferralError::InvalidStateTransition {
                from: current.status,
                to: new_status,
            });
        }

        info!(
            commission_id = %id,
            transaction_id = %entry.transaction_id,
            "Commission {} -> {}", entry.status, new_status
        );

        let mut updated = entry;
        updated.status = new_status;
        if notes.is_some() {
            updated.notes = notes;
        }
        updated.updated_at = now;
        Ok(TransitionOutcome::Updated(updated))
    }

    /// Record the offsetting entry for a paid commission.
    /// `None` when it is already reversed (or no longer paid).
    async fn reverse_paid(
        &self,
        paid: &CommissionEntry,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<CommissionEntry>, ReferralError> {
        let reversal = CommissionEntry::reversal_of(paid, notes, now);
        if !self.store.insert_reversal(&reversal).await? {
            debug!(commission_id = %paid.id, "Paid commission already reversed");
            return Ok(None);
        }

        warn!(
            commission_id = %paid.id,
            reversal_id = %reversal.id,
            beneficiary_id = paid.beneficiary_id,
            amount = %reversal.amount,
            "Paid commission reversed"
        );
        Ok(Some(reversal))
    }

    /// Reject every commission derived from a charged-back payment.
    ///
    /// Pending and approved entries are rejected in place, paid entries get
    /// a reversal. Calling it again is a no-op. The payment is marked
    /// refunded.
    pub async fn reverse_for_chargeback(
        &self,
        transaction_id: &str,
    ) -> Result<ChargebackOutcome, ReferralError> {
        let payment = self
            .store
            .get_payment(transaction_id)
            .await?
            .ok_or_else(|| ReferralError::PaymentNotFound(transaction_id.to_string()))?;

        let mut entries = self.stored_entries(transaction_id).await?;
        entries.sort_by_key(|e| e.level);

        let note = format!("chargeback of {}", transaction_id);
        let now = Utc::now();
        let mut outcome = ChargebackOutcome::default();
        for entry in entries {
            self.charge_back_entry(entry, &note, now, &mut outcome).await?;
        }

        if payment.status != PaymentStatus::Refunded {
            self.store
                .set_payment_status(transaction_id, PaymentStatus::Refunded)
                .await?;
        }

        info!(
            transaction_id,
            rejected = outcome.rejected.len(),
            reversals = outcome.reversals.len(),
            skipped = outcome.skipped,
            "Chargeback applied"
        );
        Ok(outcome)
    }

    async fn charge_back_entry(
        &self,
        mut entry: CommissionEntry,
        note: &str,
        now: DateTime<Utc>,
        outcome: &mut ChargebackOutcome,
    ) -> Result<(), ReferralError> {
        loop {
            if entry.status.is_terminal() {
                outcome.skipped += 1;
                return Ok(());
            }
            match entry.status {
                CommissionStatus::Paid => {
                    match self.reverse_paid(&entry, Some(note.to_string()), now).await? {
                        Some(reversal) => outcome.reversals.push(reversal),
                        None => outcome.skipped += 1,
                    }
                    return Ok(());
                }
                _ => {
                    if self
                        .store
                        .update_status_if(
                            entry.id,
                            entry.status,
                            CommissionStatus::Rejected,
                            Some(note),
                            now,
                        )
                        .await?
                    {
                        entry.status = CommissionStatus::Rejected;
                        entry.notes = Some(note.to_string());
                        entry.updated_at = now;
                        outcome.rejected.push(entry);
                        return Ok(());
                    }

                    // Lost a race with a concurrent transition: retry on fresh state
                    let id = entry.id;
                    entry = self
                        .store
                        .get_commission(id)
                        .await?
                        .ok_or_else(|| ReferralError::CommissionNotFound(id.to_string()))?;
                }
            }
        }
    }

    /// Approve every pending commission older than the review window.
    ///
    /// Returns the entries this call approved; entries moved concurrently by
    /// someone else are left alone.
    pub async fn approve_matured(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CommissionEntry>, ReferralError> {
        let cutoff = now - self.review_window;
        let filter = CommissionFilter {
            status: Some(CommissionStatus::Pending),
            kind: Some(CommissionKind::Commission),
            created_before: Some(cutoff),
            ..Default::default()
        };

        let mut approved = Vec::new();
        for mut entry in self.store.list_commissions(&filter).await? {
            if self
                .store
                .update_status_if(
                    entry.id,
                    CommissionStatus::Pending,
                    CommissionStatus::Approved,
                    None,
                    now,
                )
                .await?
            {
                entry.status = CommissionStatus::Approved;
                entry.updated_at = now;
                approved.push(entry);
            }
        }

        info!(cutoff = %cutoff, approved = approved.len(), "Matured commissions approved");
        Ok(approved)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Ancestors of `user_id`, nearest first
    pub async fn referrer_chain(
        &self,
        user_id: UserId,
        max_depth: usize,
    ) -> Result<Vec<UserId>, ReferralError> {
        chain::referrer_chain(self.store.as_ref(), user_id, max_depth).await
    }

    /// Ledger rows credited to `user_id`, newest first
    pub async fn list_commissions(
        &self,
        user_id: UserId,
        status: Option<CommissionStatus>,
    ) -> Result<Vec<CommissionEntry>, ReferralError> {
        let mut filter = CommissionFilter::for_beneficiary(user_id);
        filter.status = status;
        self.store.list_commissions(&filter).await
    }

    pub async fn query_commissions(
        &self,
        filter: &CommissionFilter,
    ) -> Result<Vec<CommissionEntry>, ReferralError> {
        self.store.list_commissions(filter).await
    }

    pub async fn referrals_for(
        &self,
        referrer_id: UserId,
    ) -> Result<Vec<ReferralLink>, ReferralError> {
        self.store.referrals_for(referrer_id).await
    }

    /// Users below `user_id`, one group per level, breadth-first.
    /// Empty levels end the walk.
    pub async fn downline(
        &self,
        user_id: UserId,
        max_levels: u8,
    ) -> Result<Vec<DownlineLevel>, ReferralError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or(ReferralError::UserNotFound(user_id))?;

        let mut levels = Vec::new();
        let mut visited = FxHashSet::default();
        visited.insert(user_id);
        let mut frontier = vec![user_id];

        for level in 1..=max_levels {
            let mut next = Vec::new();
            for parent in &frontier {
                for child in self.store.direct_referrals(*parent).await? {
                    if visited.insert(child) {
                        next.push(child);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            next.sort_unstable();
            levels.push(DownlineLevel {
                level,
                users: next.clone(),
            });
            frontier = next;
        }

        Ok(levels)
    }

    /// Downline sizes and commission totals for one user
    pub async fn referral_stats(&self, user_id: UserId) -> Result<ReferralStats, ReferralError> {
        let mut stats = ReferralStats::default();

        for group in self.downline(user_id, MAX_REFERRAL_LEVEL).await? {
            stats.downline_counts[group.level as usize - 1] = group.users.len();
        }

        for entry in self.list_commissions(user_id, None).await? {
            let total = if entry.is_reversal() {
                &mut stats.reversed_total
            } else {
                match entry.status {
                    CommissionStatus::Pending => &mut stats.pending_total,
                    CommissionStatus::Approved => &mut stats.approved_total,
                    CommissionStatus::Paid => &mut stats.paid_total,
                    CommissionStatus::Rejected => continue,
                }
            };
            *total = money::checked_sum([*total, entry.amount])
                .map_err(|_| totals_overflow(user_id))?;
        }

        stats.lifetime_total =
            money::checked_sum([stats.pending_total, stats.approved_total, stats.paid_total])
                .map_err(|_| totals_overflow(user_id))?;
        stats.net_paid_total = money::checked_sum([stats.paid_total, stats.reversed_total])
            .map_err(|_| totals_overflow(user_id))?;
        Ok(stats)
    }
}

fn totals_overflow(user_id: UserId) -> ReferralError {
    error!(user_id, "Commission totals overflow");
    ReferralError::DataIntegrity(format!("commission totals for user {} overflow", user_id))
}
