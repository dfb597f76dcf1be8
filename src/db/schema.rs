//! Ledger schema (PostgreSQL)
//!
//! Constraint names are relied on by `PgReferralStore` to map unique
//! violations to domain errors; keep them in sync.

use anyhow::{Context, Result};
use sqlx::PgPool;

const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users_tb (
    user_id        BIGINT PRIMARY KEY,
    referred_by    BIGINT REFERENCES users_tb (user_id),
    referral_code  TEXT,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT users_tb_referral_code_key UNIQUE (referral_code),
    CONSTRAINT users_tb_no_self_referral CHECK (referred_by IS NULL OR referred_by <> user_id)
)
"#;

const CREATE_USERS_REFERRED_BY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_users_referred_by ON users_tb (referred_by)";

const CREATE_PAYMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS payments_tb (
    transaction_id  TEXT PRIMARY KEY,
    user_id         BIGINT NOT NULL REFERENCES users_tb (user_id),
    amount          NUMERIC(12, 2) NOT NULL CHECK (amount > 0),
    currency        VARCHAR(10) NOT NULL,
    status          SMALLINT NOT NULL,
    processed_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_REFERRALS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS referrals_tb (
    referrer_id       BIGINT NOT NULL REFERENCES users_tb (user_id),
    referred_user_id  BIGINT NOT NULL REFERENCES users_tb (user_id),
    level             SMALLINT NOT NULL CHECK (level BETWEEN 1 AND 3),
    created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (referrer_id, referred_user_id)
)
"#;

const CREATE_COMMISSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS commissions_tb (
    commission_id     TEXT PRIMARY KEY,
    beneficiary_id    BIGINT NOT NULL REFERENCES users_tb (user_id),
    referred_user_id  BIGINT NOT NULL REFERENCES users_tb (user_id),
    transaction_id    TEXT NOT NULL REFERENCES payments_tb (transaction_id),
    level             SMALLINT NOT NULL CHECK (level BETWEEN 1 AND 3),
    kind              SMALLINT NOT NULL,
    amount            NUMERIC(12, 2) NOT NULL,
    rate              NUMERIC(5, 4) NOT NULL,
    currency          VARCHAR(10) NOT NULL,
    status            SMALLINT NOT NULL,
    reverses_id       TEXT REFERENCES commissions_tb (commission_id),
    notes             TEXT,
    created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT commissions_tb_reverses_id_key UNIQUE (reverses_id),
    CONSTRAINT commissions_tb_sign CHECK ((kind = 1 AND amount >= 0) OR (kind = 2 AND amount <= 0))
)
"#;

/// One credit per (payment, level); reversals are excluded
const CREATE_COMMISSIONS_TXN_LEVEL_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS uq_commissions_txn_level
    ON commissions_tb (transaction_id, level) WHERE kind = 1
"#;

const CREATE_COMMISSIONS_BENEFICIARY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_commissions_beneficiary
    ON commissions_tb (beneficiary_id, status, created_at DESC)
"#;

const CREATE_COMMISSIONS_PENDING_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_commissions_pending
    ON commissions_tb (created_at) WHERE status = 0
"#;

const STATEMENTS: &[(&str, &str)] = &[
    ("users_tb", CREATE_USERS_TABLE),
    ("idx_users_referred_by", CREATE_USERS_REFERRED_BY_INDEX),
    ("payments_tb", CREATE_PAYMENTS_TABLE),
    ("referrals_tb", CREATE_REFERRALS_TABLE),
    ("commissions_tb", CREATE_COMMISSIONS_TABLE),
    ("uq_commissions_txn_level", CREATE_COMMISSIONS_TXN_LEVEL_INDEX),
    ("idx_commissions_beneficiary", CREATE_COMMISSIONS_BENEFICIARY_INDEX),
    ("idx_commissions_pending", CREATE_COMMISSIONS_PENDING_INDEX),
];

/// Create ledger tables and indexes (idempotent)
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    tracing::info!("Initializing ledger schema...");

    for (name, sql) in STATEMENTS {
        sqlx::query(sql)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create {}", name))?;
    }

    tracing::info!("Ledger schema ready");
    Ok(())
}

/// Drop and recreate every ledger table. Test databases only.
pub async fn reset_schema(pool: &PgPool) -> Result<()> {
    sqlx::query("DROP TABLE IF EXISTS commissions_tb, referrals_tb, payments_tb, users_tb CASCADE")
        .execute(pool)
        .await
        .context("Failed to drop ledger tables")?;
    init_schema(pool).await
}
