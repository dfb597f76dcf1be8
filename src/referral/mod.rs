//! Multi-level Referral Commission Ledger
//!
//! When a referred user pays, each ancestor in their referral chain (up to
//! three levels) earns a percentage of the payment as a commission entry.
//! Entries then move through an approval/payout lifecycle, and chargebacks
//! unwind them.
//!
//! # State Machine
//!
//! ```text
//! PENDING → APPROVED → PAID
//!    ↓          ↓        ↓
//!    └──────→ REJECTED ←─┘ (paid: via a new negative REVERSAL entry)
//! ```
//!
//! # Ledger Invariants
//!
//! 1. **At-most-once**: one set of commission rows per payment transaction id
//! 2. **All-or-nothing**: a payment's links and entries are written as one unit
//! 3. **Append-only payouts**: a paid row is never edited, only offset once
//! 4. **Acyclic chains**: a cycle in stored referral data fails fast

pub mod chain;
pub mod engine;
pub mod error;
pub mod rates;
pub mod state;
pub mod store;
pub mod types;


// Re-exports for convenience
pub use engine::ReferralLedger;
pub use error::ReferralError;
pub use rates::CommissionRates;
pub use state::CommissionStatus;
pub use store::{MemoryReferralStore, PgReferralStore, RecordOutcome, ReferralStore};
pub use types::{
    ChargebackOutcome, CommissionEntry, CommissionFilter, CommissionId, CommissionKind,
    DownlineLevel, NewUser, PaymentEvent, PaymentRecord, PaymentStatus, ProcessOutcome,
    ReferralLink, ReferralStats, ReferrerRef, TransitionOutcome, UserId, UserRecord,
};
