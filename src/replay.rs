//! Event Replay - feed a JSON-lines event file through the ledger
//!
//! One event per line, tagged by `event`:
//!
//! ```text
//! {"event":"user_registered","user_id":1,"referral_code":"ALICE"}
//! {"event":"user_registered","user_id":2,"referrer_code":"ALICE"}
//! {"event":"payment_succeeded","transaction_id":"pi_1","user_id":2,"amount":"100.00"}
//! {"event":"transition","transaction_id":"pi_1","level":1,"status":"approved"}
//! {"event":"chargeback","transaction_id":"pi_1"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. A failing event is
//! logged and counted; replay carries on with the next one.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::referral::engine::ReferralLedger;
use crate::referral::error::ReferralError;
use crate::referral::state::CommissionStatus;
use crate::referral::types::{CommissionFilter, CommissionKind, NewUser, PaymentEvent, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    UserRegistered {
        user_id: UserId,
        /// The user's own code, handed out to invitees
        #[serde(default)]
        referral_code: Option<String>,
        #[serde(default)]
        referred_by: Option<UserId>,
        /// Code entered at sign-up; ignored when `referred_by` is set
        #[serde(default)]
        referrer_code: Option<String>,
    },
    PaymentSucceeded {
        transaction_id: String,
        user_id: UserId,
        amount: Decimal,
        #[serde(default)]
        currency: Option<String>,
    },
    Chargeback {
        transaction_id: String,
    },
    /// Status change of the commission at `level` of a payment
    Transition {
        transaction_id: String,
        level: u8,
        status: CommissionStatus,
        #[serde(default)]
        notes: Option<String>,
    },
}

/// Counters reported after a replay run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub applied: usize,
    /// Payment events whose transaction id was already processed
    pub duplicates: usize,
    pub failed: usize,
    pub commissions_created: usize,
}

/// Parse an events file into `(line_number, event)` pairs
pub fn load_events(path: impl AsRef<Path>) -> Result<Vec<(usize, LedgerEvent)>> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    parse_events(BufReader::new(file))
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn parse_events(reader: impl BufRead) -> Result<Vec<(usize, LedgerEvent)>> {
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event: LedgerEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("Invalid event at line {}", idx + 1))?;
        events.push((idx + 1, event));
    }
    Ok(events)
}

/// Apply events in order. `default_currency` fills payments without one.
pub async fn replay(
    ledger: &ReferralLedger,
    events: &[(usize, LedgerEvent)],
    default_currency: &str,
) -> ReplaySummary {
    let mut summary = ReplaySummary::default();

    for (line, event) in events {
        match apply_event(ledger, event, default_currency).await {
            Ok(created) => {
                summary.applied += 1;
                match created {
                    Some(n) => summary.commissions_created += n,
                    None => summary.duplicates += 1,
                }
            }
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(line, code = e.code(), error = %e, "Event failed");
            }
        }
    }

    tracing::info!(
        applied = summary.applied,
        duplicates = summary.duplicates,
        failed = summary.failed,
        commissions = summary.commissions_created,
        "Replay finished"
    );
    summary
}

/// Returns the number of commission rows created, or `None` for a
/// duplicate payment delivery
async fn apply_event(
    ledger: &ReferralLedger,
    event: &LedgerEvent,
    default_currency: &str,
) -> Result<Option<usize>, ReferralError> {
    match event {
        LedgerEvent::UserRegistered {
            user_id,
            referral_code,
            referred_by,
            referrer_code,
        } => {
            let mut new_user = NewUser::new(*user_id);
            if let Some(code) = referral_code {
                new_user = new_user.with_code(code.clone());
            }
            if let Some(referrer) = referred_by {
                new_user = new_user.referred_by(*referrer);
            } else if let Some(code) = referrer_code {
                new_user = new_user.referred_by_code(code.clone());
            }
            ledger.register_user(new_user).await?;
            Ok(Some(0))
        }
        LedgerEvent::PaymentSucceeded {
            transaction_id,
            user_id,
            amount,
            currency,
        } => {
            let payment = PaymentEvent::succeeded(transaction_id.clone(), *user_id, *amount)
                .with_currency(currency.as_deref().unwrap_or(default_currency));
            let outcome = ledger.process_payment(&payment).await?;
            Ok((!outcome.replayed).then_some(outcome.entries.len()))
        }
        LedgerEvent::Chargeback { transaction_id } => {
            let outcome = ledger.reverse_for_chargeback(transaction_id).await?;
            Ok(Some(outcome.reversals.len()))
        }
        LedgerEvent::Transition {
            transaction_id,
            level,
            status,
            notes,
        } => {
            let entry = ledger
                .query_commissions(
                    &CommissionFilter::for_transaction(transaction_id.clone())
                        .kind(CommissionKind::Commission),
                )
                .await?
                .into_iter()
                .find(|e| e.level == *level)
                .ok_or_else(|| {
                    ReferralError::CommissionNotFound(format!("{}/L{}", transaction_id, level))
                })?;
            ledger
                .transition_commission(entry.id, *status, notes.clone())
                .await?;
            Ok(Some(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::referral::rates::CommissionRates;
    use crate::referral::store::MemoryReferralStore;
    use std::sync::Arc;

    const EVENTS: &str = r#"
# two-level chain
{"event":"user_registered","user_id":1,"referral_code":"ROOT"}
{"event":"user_registered","user_id":2,"referrer_code":"ROOT"}
{"event":"user_registered","user_id":3,"referred_by":2}
{"event":"payment_succeeded","transaction_id":"pi_1","user_id":3,"amount":"100.00"}
{"event":"payment_succeeded","transaction_id":"pi_1","user_id":3,"amount":"100.00"}
{"event":"transition","transaction_id":"pi_1","level":1,"status":"approved"}
{"event":"transition","transaction_id":"pi_1","level":1,"status":"paid","notes":"batch 7"}
{"event":"transition","transaction_id":"pi_1","level":2,"status":"paid"}
{"event":"chargeback","transaction_id":"pi_1"}
{"event":"chargeback","transaction_id":"pi_missing"}
"#;

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let events = parse_events(EVENTS.as_bytes()).unwrap();
        assert_eq!(events.len(), 10);
        assert_eq!(events[0].0, 3);
        assert_eq!(
            events[0].1,
            LedgerEvent::UserRegistered {
                user_id: 1,
                referral_code: Some("ROOT".into()),
                referred_by: None,
                referrer_code: None,
            }
        );
    }

    #[test]
    fn test_parse_reports_line() {
        let err = parse_events("{\"event\":\"chargeback\"}\n".as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("line 1"));
    }

    #[tokio::test]
    async fn test_replay_counts() {
        let store = Arc::new(MemoryReferralStore::new());
        let ledger = ReferralLedger::new(store.clone(), CommissionRates::standard());
        let events = parse_events(EVENTS.as_bytes()).unwrap();

        let summary = replay(&ledger, &events, "USD").await;

        // pending -> paid at level 2 and the unknown chargeback fail
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.applied, 8);
        // 2 commissions + 1 reversal of the paid level-1 entry
        assert_eq!(summary.commissions_created, 3);
        assert_eq!(store.commission_count(), 3);
    }
}
