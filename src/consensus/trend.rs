//! Trend Analyzer - Recent vs older window price direction

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::EngineConfig;
use crate::consensus::weighting::age_in_days;
use crate::consensus::{round_scaled, ConsensusError, PERCENT_SCALE};
use crate::types::{PriceObservation, PriceTrend};

/// Trend of one grade group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendReading {
    pub trend: PriceTrend,
    pub percentage: Decimal,
    /// Observations in the recent window
    pub recent_count: usize,
    /// Observations in the older window
    pub older_count: usize,
}

impl TrendReading {
    fn stable(recent_count: usize, older_count: usize) -> Self {
        Self {
            trend: PriceTrend::Stable,
            percentage: Decimal::ZERO,
            recent_count,
            older_count,
        }
    }
}

/// Compares the simple mean price of a recent window against an older one
#[derive(Debug, Clone, Copy)]
pub struct TrendAnalyzer {
    recent_days: Decimal,
    older_days: Decimal,
    threshold_pct: Decimal,
}

impl TrendAnalyzer {
    pub fn new(recent_days: i64, older_days: i64, threshold_pct: Decimal) -> Self {
        Self {
            recent_days: Decimal::from(recent_days),
            older_days: Decimal::from(older_days),
            threshold_pct,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.recent_window_days,
            config.older_window_days,
            config.trend_threshold_pct,
        )
    }

    /// Classify the group's direction.
    ///
    /// Undated observations fall in neither window. An empty window, or an
    /// older window averaging zero, reads as stable with a 0% change. The
    /// threshold is applied to the unrounded change.
    pub fn analyze(
        &self,
        group: &[&PriceObservation],
        as_of: DateTime<Utc>,
    ) -> Result<TrendReading, ConsensusError> {
        let mut recent = (Decimal::ZERO, 0usize);
        let mut older = (Decimal::ZERO, 0usize);

        for observation in group {
            let Some(age) = age_in_days(observation.sale_date, as_of) else {
                continue;
            };
            let window = if age <= self.recent_days {
                &mut recent
            } else if age <= self.older_days {
                &mut older
            } else {
                continue;
            };
            window.0 = window
                .0
                .checked_add(observation.price)
                .ok_or(ConsensusError::Overflow("trend window sum"))?;
            window.1 += 1;
        }

        if recent.1 == 0 || older.1 == 0 {
            return Ok(TrendReading::stable(recent.1, older.1));
        }

        let recent_avg = recent.0 / Decimal::from(recent.1);
        let older_avg = older.0 / Decimal::from(older.1);
        if older_avg.is_zero() {
            return Ok(TrendReading::stable(recent.1, older.1));
        }

        let change = recent_avg
            .checked_sub(older_avg)
            .and_then(|delta| delta.checked_div(older_avg))
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .ok_or(ConsensusError::Overflow("trend percentage"))?;

        Ok(TrendReading {
            trend: PriceTrend::classify(change, self.threshold_pct),
            percentage: round_scaled(change, PERCENT_SCALE),
            recent_count: recent.1,
            older_count: older.1,
        })
    }
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Grade;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn as_of() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn make_obs(price: Decimal, age_days: Option<i64>) -> PriceObservation {
        PriceObservation {
            item_id: "1893-s-morgan".to_string(),
            source_name: "pcgs".to_string(),
            grade: Grade::Graded("VF-20".to_string()),
            price,
            sale_date: age_days.map(|d| as_of() - Duration::days(d)),
            source_reliability: dec!(1),
            observation_confidence: dec!(1),
        }
    }

    fn analyze(group: &[PriceObservation]) -> TrendReading {
        let refs: Vec<&PriceObservation> = group.iter().collect();
        TrendAnalyzer::default().analyze(&refs, as_of()).unwrap()
    }

    #[test]
    fn test_recent_only_is_stable() {
        let reading = analyze(&[make_obs(dec!(10), Some(1)), make_obs(dec!(99999), Some(29))]);
        assert_eq!(reading.trend, PriceTrend::Stable);
        assert_eq!(reading.percentage, Decimal::ZERO);
        assert_eq!(reading.recent_count, 2);
        assert_eq!(reading.older_count, 0);
    }

    #[test]
    fn test_older_only_is_stable() {
        let reading = analyze(&[make_obs(dec!(10), Some(45))]);
        assert_eq!(reading.trend, PriceTrend::Stable);
        assert_eq!(reading.percentage, Decimal::ZERO);
    }

    #[test]
    fn test_window_edges() {
        // 30 days is recent, 90 days is older, 91 days and undated are ignored
        let reading = analyze(&[
            make_obs(dec!(110), Some(30)),
            make_obs(dec!(100), Some(90)),
            make_obs(dec!(1), Some(91)),
            make_obs(dec!(1), None),
        ]);
        assert_eq!(reading.recent_count, 1);
        assert_eq!(reading.older_count, 1);
        assert_eq!(reading.percentage, dec!(10));
        assert_eq!(reading.trend, PriceTrend::Rising);
    }

    #[test]
    fn test_threshold_boundaries() {
        let exactly_up = analyze(&[make_obs(dec!(105), Some(5)), make_obs(dec!(100), Some(60))]);
        assert_eq!(exactly_up.percentage, dec!(5));
        assert_eq!(exactly_up.trend, PriceTrend::Stable);

        let just_up = analyze(&[make_obs(dec!(105.01), Some(5)), make_obs(dec!(100), Some(60))]);
        assert_eq!(just_up.percentage, dec!(5.01));
        assert_eq!(just_up.trend, PriceTrend::Rising);

        let exactly_down = analyze(&[make_obs(dec!(95), Some(5)), make_obs(dec!(100), Some(60))]);
        assert_eq!(exactly_down.percentage, dec!(-5));
        assert_eq!(exactly_down.trend, PriceTrend::Stable);

        let just_down = analyze(&[make_obs(dec!(94.99), Some(5)), make_obs(dec!(100), Some(60))]);
        assert_eq!(just_down.percentage, dec!(-5.01));
        assert_eq!(just_down.trend, PriceTrend::Falling);
    }

    #[test]
    fn test_uses_unweighted_means() {
        let reading = analyze(&[
            make_obs(dec!(100), Some(2)),
            make_obs(dec!(140), Some(20)),
            make_obs(dec!(100), Some(40)),
            make_obs(dec!(100), Some(80)),
        ]);
        assert_eq!(reading.percentage, dec!(20));
        assert_eq!(reading.trend, PriceTrend::Rising);
    }

    #[test]
    fn test_zero_older_average_is_stable() {
        let reading = analyze(&[make_obs(dec!(50), Some(2)), make_obs(dec!(0), Some(60))]);
        assert_eq!(reading.trend, PriceTrend::Stable);
        assert_eq!(reading.percentage, Decimal::ZERO);
    }

    #[test]
    fn test_threshold_applies_before_rounding() {
        let reading = analyze(&[make_obs(dec!(105.00004), Some(5)), make_obs(dec!(100), Some(60))]);
        assert_eq!(reading.percentage, dec!(5));
        assert_eq!(reading.trend, PriceTrend::Rising);

        let reading = analyze(&[make_obs(dec!(94.99996), Some(5)), make_obs(dec!(100), Some(60))]);
        assert_eq!(reading.percentage, dec!(-5));
        assert_eq!(reading.trend, PriceTrend::Falling);
    }

    #[test]
    fn test_overflowing_window_sum_is_an_error() {
        let huge = dec!(50000000000000000000000000000);
        let group = [make_obs(huge, Some(1)), make_obs(huge, Some(2))];
        let refs: Vec<&PriceObservation> = group.iter().collect();

        let result = TrendAnalyzer::default().analyze(&refs, as_of());
        assert_eq!(result, Err(ConsensusError::Overflow("trend window sum")));
    }
}
