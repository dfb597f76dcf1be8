//! Per-level commission rate table

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use super::error::ReferralError;
use super::types::MAX_REFERRAL_LEVEL;

/// Validated level → rate mapping, injected into the engine.
///
/// A level may be absent: that only fails payments whose chain actually
/// reaches it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommissionRates {
    rates: BTreeMap<u8, Decimal>,
    max_levels: u8,
}

impl CommissionRates {
    /// Build from `(level, rate)` pairs, walking at most `max_levels` hops
    pub fn new(
        rates: impl IntoIterator<Item = (u8, Decimal)>,
        max_levels: u8,
    ) -> Result<Self, ReferralError> {
        if max_levels == 0 || max_levels > MAX_REFERRAL_LEVEL {
            return Err(ReferralError::Configuration(format!(
                "max_levels must be within 1..={}, got {}",
                MAX_REFERRAL_LEVEL, max_levels
            )));
        }

        let mut table = BTreeMap::new();
        for (level, rate) in rates {
            if level == 0 || level > MAX_REFERRAL_LEVEL {
                return Err(ReferralError::Configuration(format!(
                    "commission level must be within 1..={}, got {}",
                    MAX_REFERRAL_LEVEL, level
                )));
            }
            if rate.is_sign_negative() || rate > Decimal::ONE {
                return Err(ReferralError::Configuration(format!(
                    "commission rate for level {} must be within [0, 1], got {}",
                    level, rate
                )));
            }
            if table.insert(level, rate).is_some() {
                return Err(ReferralError::Configuration(format!(
                    "duplicate commission rate for level {}",
                    level
                )));
            }
        }

        let total: Decimal = table.values().copied().sum();
        if total > Decimal::ONE {
            return Err(ReferralError::Configuration(format!(
                "commission rates sum to {}, more than the whole payment",
                total
            )));
        }

        Ok(Self {
            rates: table,
            max_levels,
        })
    }

    /// Standard MLM plan: 10% / 5% / 2%
    pub fn standard() -> Self {
        Self {
            rates: BTreeMap::from([
                (1, Decimal::new(10, 2)),
                (2, Decimal::new(5, 2)),
                (3, Decimal::new(2, 2)),
            ]),
            max_levels: MAX_REFERRAL_LEVEL,
        }
    }

    /// Rate for a 1-indexed level
    pub fn rate_for(&self, level: u8) -> Result<Decimal, ReferralError> {
        self.rates.get(&level).copied().ok_or_else(|| {
            ReferralError::Configuration(format!("no commission rate configured for level {}", level))
        })
    }

    /// How many ancestors the chain walk visits
    #[inline]
    pub fn max_levels(&self) -> u8 {
        self.max_levels
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, Decimal)> + '_ {
        self.rates.iter().map(|(l, r)| (*l, *r))
    }

    pub fn total_rate(&self) -> Decimal {
        self.rates.values().copied().sum()
    }
}

impl Default for CommissionRates {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_rates() {
        let rates = CommissionRates::standard();
        assert_eq!(rates.rate_for(1).unwrap(), Decimal::new(10, 2));
        assert_eq!(rates.rate_for(2).unwrap(), Decimal::new(5, 2));
        assert_eq!(rates.rate_for(3).unwrap(), Decimal::new(2, 2));
        assert_eq!(rates.total_rate(), Decimal::new(17, 2));
        assert_eq!(rates.max_levels(), 3);
    }

    #[test]
    fn test_missing_level_is_configuration_error() {
        let rates = CommissionRates::new([(1, Decimal::new(10, 2))], 3).unwrap();
        let err = rates.rate_for(2).unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_rejects_invalid_tables() {
        assert!(CommissionRates::new([(0, Decimal::new(1, 1))], 3).is_err());
        assert!(CommissionRates::new([(4, Decimal::new(1, 1))], 3).is_err());
        assert!(CommissionRates::new([(1, Decimal::new(-1, 1))], 3).is_err());
        assert!(CommissionRates::new([(1, Decimal::new(11, 1))], 3).is_err());
        assert!(CommissionRates::new([(1, Decimal::new(6, 1)), (2, Decimal::new(5, 1))], 3).is_err());
        assert!(CommissionRates::new([(1, Decimal::new(1, 1)), (1, Decimal::new(2, 1))], 3).is_err());
        assert!(CommissionRates::new([(1, Decimal::new(1, 1))], 0).is_err());
        assert!(CommissionRates::new([(1, Decimal::new(1, 1))], 4).is_err());
    }

    #[test]
    fn test_iter_is_level_ordered() {
        let rates = CommissionRates::new(
            [(3, Decimal::new(2, 2)), (1, Decimal::new(10, 2))],
            3,
        )
        .unwrap();
        let levels: Vec<u8> = rates.iter().map(|(l, _)| l).collect();
        assert_eq!(levels, vec![1, 3]);
    }
}
