//! Referral Ledger - operator binary
//!
//! ```text
//! referral_ledger [--env dev] [--init-schema] [--replay <events.jsonl>]
//!                 [--chargeback <txn>] [--approve-matured] [--stats <user_id>]
//! ```
//!
//! Actions run in the order listed above, so one invocation can load a
//! fixture and then report on it.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use referral_ledger::config::AppConfig;
use referral_ledger::db::{Database, schema};
use referral_ledger::referral::{
    CommissionStatus, MemoryReferralStore, PgReferralStore, ReferralLedger, ReferralStore,
};
use referral_ledger::{logging, replay};

fn get_env() -> String {
    get_arg_value(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn get_arg_value(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn has_flag(name: &str) -> bool {
    std::env::args().any(|a| a == name)
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn ReferralStore>> {
    let Some(url) = config.postgres_url.as_deref() else {
        tracing::warn!("postgres_url not set, using in-memory ledger (nothing is persisted)");
        return Ok(Arc::new(MemoryReferralStore::new()));
    };

    let db = Database::connect(url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    db.health_check().await.context("PostgreSQL health check failed")?;

    if has_flag("--init-schema") {
        schema::init_schema(db.pool()).await?;
    }

    for (status_id, rows) in db.commission_counts().await? {
        let status = CommissionStatus::from_id(status_id)
            .map(|s| s.as_str())
            .unwrap_or("unknown");
        tracing::info!(status, rows, "Existing commissions");
    }

    Ok(Arc::new(PgReferralStore::new(db.pool().clone())))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = logging::init_logging(&app_config);

    tracing::info!("Starting referral ledger in {} mode", env);

    let rates = app_config.commission.rates()?;
    let review_window = app_config.commission.review_window()?;
    for (level, rate) in rates.iter() {
        tracing::info!(level, %rate, "Commission rate");
    }

    let store = open_store(&app_config).await?;
    tracing::info!(store = store.name(), "Ledger store ready");
    let ledger = ReferralLedger::with_review_window(store, rates, review_window);

    if let Some(path) = get_arg_value(&["--replay"]) {
        let events = replay::load_events(&path)?;
        tracing::info!("Replaying {} events from {}", events.len(), path);
        let summary =
            replay::replay(&ledger, &events, &app_config.commission.default_currency).await;
        print_json(&summary)?;
    }

    if let Some(txn) = get_arg_value(&["--chargeback"]) {
        let outcome = ledger.reverse_for_chargeback(&txn).await?;
        print_json(&outcome)?;
    }

    if has_flag("--approve-matured") {
        let approved = ledger.approve_matured(Utc::now()).await?;
        println!("Approved {} matured commissions", approved.len());
    }

    if let Some(user) = get_arg_value(&["--stats"]) {
        let user_id: u64 = user
            .parse()
            .with_context(|| format!("Invalid user id for --stats: {}", user))?;
        let stats = ledger.referral_stats(user_id).await?;
        print_json(&stats)?;
    }

    Ok(())
}
