use anyhow::{Context, Result};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::str::FromStr;

use crate::referral::rates::CommissionRates;
use crate::referral::types::{DEFAULT_CURRENCY, MAX_REFERRAL_LEVEL};

/// Environment variables overriding the per-level rates
pub const RATE_ENV_VARS: [(u8, &str); 3] = [
    (1, "COMMISSION_RATE_L1"),
    (2, "COMMISSION_RATE_L2"),
    (3, "COMMISSION_RATE_L3"),
];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub enable_tracing: bool,
    /// PostgreSQL ledger storage; in-memory store when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub commission: CommissionConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CommissionConfig {
    /// level -> rate, e.g. `1: "0.10"`
    #[serde(default = "default_rates")]
    pub rates: BTreeMap<u8, Decimal>,
    #[serde(default = "default_max_levels")]
    pub max_levels: u8,
    /// Pending commissions younger than this are not auto-approved
    #[serde(default = "default_review_window_days")]
    pub review_window_days: i64,
    #[serde(default = "default_currency")]
    pub default_currency: String,
}

fn default_rates() -> BTreeMap<u8, Decimal> {
    CommissionRates::standard().iter().collect()
}

fn default_max_levels() -> u8 {
    MAX_REFERRAL_LEVEL
}

fn default_review_window_days() -> i64 {
    crate::referral::engine::DEFAULT_REVIEW_WINDOW_DAYS
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            rates: default_rates(),
            max_levels: default_max_levels(),
            review_window_days: default_review_window_days(),
            default_currency: default_currency(),
        }
    }
}

impl CommissionConfig {
    /// Validated rate table
    pub fn rates(&self) -> Result<CommissionRates> {
        CommissionRates::new(self.rates.iter().map(|(l, r)| (*l, *r)), self.max_levels)
            .context("Invalid commission configuration")
    }

    pub fn review_window(&self) -> Result<Duration> {
        if self.review_window_days < 0 {
            anyhow::bail!(
                "review_window_days must not be negative, got {}",
                self.review_window_days
            );
        }
        Ok(Duration::days(self.review_window_days))
    }

    /// Apply `COMMISSION_RATE_L*` overrides from `lookup`
    pub fn apply_rate_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        for (level, var) in RATE_ENV_VARS {
            let Some(raw) = lookup(var) else {
                continue;
            };
            let rate = Decimal::from_str(raw.trim())
                .with_context(|| format!("{} is not a decimal: {:?}", var, raw))?;
            tracing::debug!(level, %rate, "Commission rate overridden by {}", var);
            self.rates.insert(level, rate);
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load `config/{env}.yaml`, then apply environment overrides
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path))?;
        config
            .commission
            .apply_rate_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
log_level: info
log_dir: ./logs
log_file: referral.log
use_json: false
rotation: daily
"#;

    #[test]
    fn test_defaults_when_section_missing() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();
        assert!(config.postgres_url.is_none());
        assert!(!config.enable_tracing);
        assert_eq!(config.commission.rates().unwrap(), CommissionRates::standard());
        assert_eq!(config.commission.review_window().unwrap(), Duration::days(14));
        assert_eq!(config.commission.default_currency, "USD");
    }

    #[test]
    fn test_commission_section() {
        let yaml = format!(
            "{}{}",
            MINIMAL,
            r#"
postgres_url: postgresql://localhost/referral
commission:
  rates:
    1: "0.20"
    2: "0.05"
  max_levels: 2
  review_window_days: 30
"#
        );
        let config = AppConfig::from_yaml(&yaml).unwrap();
        let rates = config.commission.rates().unwrap();
        assert_eq!(rates.rate_for(1).unwrap(), Decimal::new(20, 2));
        assert_eq!(rates.max_levels(), 2);
        assert!(rates.rate_for(3).is_err());
        assert_eq!(config.commission.review_window().unwrap(), Duration::days(30));
        assert_eq!(
            config.postgres_url.as_deref(),
            Some("postgresql://localhost/referral")
        );
    }

    #[test]
    fn test_env_overrides() {
        let mut commission = CommissionConfig::default();
        commission
            .apply_rate_overrides(|var| match var {
                "COMMISSION_RATE_L1" => Some("0.12".to_string()),
                "COMMISSION_RATE_L3" => Some(" 0 ".to_string()),
                _ => None,
            })
            .unwrap();

        let rates = commission.rates().unwrap();
        assert_eq!(rates.rate_for(1).unwrap(), Decimal::new(12, 2));
        assert_eq!(rates.rate_for(2).unwrap(), Decimal::new(5, 2));
        assert_eq!(rates.rate_for(3).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut commission = CommissionConfig::default();
        assert!(
            commission
                .apply_rate_overrides(|_| Some("ten percent".to_string()))
                .is_err()
        );

        let mut commission = CommissionConfig::default();
        commission.rates.insert(1, Decimal::new(15, 1));
        assert!(commission.rates().is_err());

        let commission = CommissionConfig {
            review_window_days: -1,
            ..Default::default()
        };
        assert!(commission.review_window().is_err());
    }
}
