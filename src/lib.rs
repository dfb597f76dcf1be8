//! Referral Ledger - Multi-level Referral Commission Engine
//!
//! Records commissions for up to three levels of referrers whenever a
//! referred user pays, at most once per payment, and unwinds them on
//! chargeback without ever editing a paid row.
//!
//! # Modules
//!
//! - [`referral`] - Engine, state machine, rate table and ledger stores
//! - [`money`] - Amount validation and half-up commission rounding
//! - [`db`] - PostgreSQL pool and schema
//! - [`config`] - YAML configuration with env rate overrides
//! - [`logging`] - tracing subscriber setup
//! - [`replay`] - JSON-lines event replay

pub mod config;
pub mod db;
pub mod logging;
pub mod money;
pub mod referral;
pub mod replay;

// Convenient re-exports at crate root
pub use referral::{
    CommissionEntry, CommissionRates, CommissionStatus, MemoryReferralStore, PaymentEvent,
    PgReferralStore, ReferralError, ReferralLedger, ReferralStore,
};
