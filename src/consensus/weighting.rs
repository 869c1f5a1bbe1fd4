//! Weighted Aggregator - Reliability/recency/confidence weighted mean price
//!
//! Each observation is weighted by `source_reliability × recency_weight ×
//! observation_confidence`, where recency decays linearly with age down to a
//! floor. The group price is the weighted mean of its observations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::EngineConfig;
use crate::consensus::{round_scaled, ConsensusError, PRICE_SCALE};
use crate::types::PriceObservation;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Age of a sale in fractional days, relative to `as_of`.
///
/// Returns `None` for undated observations. Sales dated after `as_of` count as age 0.
pub fn age_in_days(sale_date: Option<DateTime<Utc>>, as_of: DateTime<Utc>) -> Option<Decimal> {
    let sale_date = sale_date?;
    let millis = (as_of - sale_date).num_milliseconds().max(0);
    Some(Decimal::from(millis) / Decimal::from(MILLIS_PER_DAY))
}

/// Weighted mean of one grade group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedPrice {
    /// Weighted mean price, 0 when the group carries no weight
    pub avg_price: Decimal,
    pub total_weight: Decimal,
    /// Mean per-observation weight
    pub avg_weight: Decimal,
}

/// Computes observation weights and weighted group prices
#[derive(Debug, Clone, Copy)]
pub struct WeightedAggregator {
    horizon_days: Decimal,
    floor: Decimal,
}

impl WeightedAggregator {
    pub fn new(horizon_days: i64, floor: Decimal) -> Self {
        Self {
            horizon_days: Decimal::from(horizon_days),
            floor,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.recency_horizon_days, config.recency_floor)
    }

    /// Age used for weighting; undated observations are treated as fully decayed
    pub fn weighting_age(&self, sale_date: Option<DateTime<Utc>>, as_of: DateTime<Utc>) -> Decimal {
        age_in_days(sale_date, as_of).unwrap_or(self.horizon_days)
    }

    /// `max(floor, 1 - age/horizon)`
    pub fn recency_weight(&self, age_days: Decimal) -> Decimal {
        let linear = Decimal::ONE - age_days / self.horizon_days;
        linear.max(self.floor).min(Decimal::ONE)
    }

    pub fn weight(
        &self,
        observation: &PriceObservation,
        as_of: DateTime<Utc>,
    ) -> Result<Decimal, ConsensusError> {
        let age = self.weighting_age(observation.sale_date, as_of);
        observation
            .source_reliability
            .checked_mul(self.recency_weight(age))
            .and_then(|w| w.checked_mul(observation.observation_confidence))
            .ok_or(ConsensusError::Overflow("observation weight"))
    }

    /// Weighted mean price of a group.
    ///
    /// A group whose weights sum to zero prices at 0. The mean is rounded to
    /// [`PRICE_SCALE`] and kept inside the group's observed price range.
    pub fn aggregate(
        &self,
        group: &[&PriceObservation],
        as_of: DateTime<Utc>,
    ) -> Result<WeightedPrice, ConsensusError> {
        if group.is_empty() {
            return Ok(WeightedPrice {
                avg_price: Decimal::ZERO,
                total_weight: Decimal::ZERO,
                avg_weight: Decimal::ZERO,
            });
        }

        let mut weighted_sum = Decimal::ZERO;
        let mut total_weight = Decimal::ZERO;
        let mut min_price = group[0].price;
        let mut max_price = group[0].price;

        for observation in group {
            let weight = self.weight(observation, as_of)?;
            weighted_sum = observation
                .price
                .checked_mul(weight)
                .and_then(|term| weighted_sum.checked_add(term))
                .ok_or(ConsensusError::Overflow("weighted price sum"))?;
            total_weight = total_weight
                .checked_add(weight)
                .ok_or(ConsensusError::Overflow("total weight"))?;
            min_price = min_price.min(observation.price);
            max_price = max_price.max(observation.price);
        }

        let avg_price = if total_weight.is_zero() {
            Decimal::ZERO
        } else {
            let mean = weighted_sum
                .checked_div(total_weight)
                .ok_or(ConsensusError::Overflow("weighted mean"))?;
            round_scaled(mean, PRICE_SCALE).clamp(min_price, max_price)
        };

        Ok(WeightedPrice {
            avg_price,
            total_weight,
            avg_weight: total_weight / Decimal::from(group.len()),
        })
    }
}

impl Default for WeightedAggregator {
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

    fn make_obs(price: Decimal, reliability: Decimal, age_days: Option<i64>, conf: Decimal) -> PriceObservation {
        PriceObservation {
            item_id: "1881-cc-morgan".to_string(),
            source_name: "ebay".to_string(),
            grade: Grade::Graded("MS-65".to_string()),
            price,
            sale_date: age_days.map(|d| as_of() - Duration::days(d)),
            source_reliability: reliability,
            observation_confidence: conf,
        }
    }

    #[test]
    fn test_recency_weight_bounds_and_monotonic() {
        let aggregator = WeightedAggregator::default();
        let mut previous = Decimal::ONE;
        for age in [0, 1, 10, 30, 90, 180, 300, 328, 329, 365, 400, 10_000] {
            let w = aggregator.recency_weight(Decimal::from(age));
            assert!(w >= dec!(0.1) && w <= Decimal::ONE, "age {} gave {}", age, w);
            assert!(w <= previous, "weight increased at age {}", age);
            previous = w;
        }
        assert_eq!(aggregator.recency_weight(Decimal::ZERO), Decimal::ONE);
        assert_eq!(aggregator.recency_weight(dec!(365)), dec!(0.1));
    }

    #[test]
    fn test_missing_sale_date_is_fully_decayed() {
        let aggregator = WeightedAggregator::default();
        let obs = make_obs(dec!(100), Decimal::ONE, None, Decimal::ONE);
        assert_eq!(aggregator.weight(&obs, as_of()).unwrap(), dec!(0.1));
    }

    #[test]
    fn test_future_sale_counts_as_fresh() {
        let age = age_in_days(Some(as_of() + Duration::days(3)), as_of());
        assert_eq!(age, Some(Decimal::ZERO));
    }

    #[test]
    fn test_worked_example_ms65() {
        let aggregator = WeightedAggregator::default();
        let a = make_obs(dec!(100), dec!(0.9), Some(10), dec!(0.8));
        let b = make_obs(dec!(120), dec!(0.5), Some(200), dec!(0.6));

        let w1 = aggregator.weight(&a, as_of()).unwrap();
        let w2 = aggregator.weight(&b, as_of()).unwrap();
        assert!((w1 - dec!(0.700)).abs() < dec!(0.001), "w1 = {}", w1);
        assert!((w2 - dec!(0.136)).abs() < dec!(0.001), "w2 = {}", w2);

        let result = aggregator.aggregate(&[&a, &b], as_of()).unwrap();
        assert!((result.avg_price - dec!(103.24)).abs() < dec!(0.01), "avg = {}", result.avg_price);
    }

    #[test]
    fn test_zero_weight_group_prices_at_zero() {
        let aggregator = WeightedAggregator::default();
        let a = make_obs(dec!(100), Decimal::ZERO, Some(1), dec!(0.8));
        let b = make_obs(dec!(300), dec!(0.7), Some(1), Decimal::ZERO);

        let result = aggregator.aggregate(&[&a, &b], as_of()).unwrap();
        assert_eq!(result.avg_price, Decimal::ZERO);
        assert_eq!(result.total_weight, Decimal::ZERO);
        assert_eq!(result.avg_weight, Decimal::ZERO);
    }

    #[test]
    fn test_average_stays_within_price_range() {
        let aggregator = WeightedAggregator::default();
        let group = vec![
            make_obs(dec!(45.10), dec!(0.2), Some(400), dec!(0.3)),
            make_obs(dec!(52.75), dec!(1.0), Some(0), dec!(1.0)),
            make_obs(dec!(49.99), dec!(0.6), None, dec!(0.9)),
            make_obs(dec!(61.00), dec!(0.05), Some(45), dec!(0.5)),
        ];
        let refs: Vec<&PriceObservation> = group.iter().collect();

        let result = aggregator.aggregate(&refs, as_of()).unwrap();
        assert!(result.avg_price >= dec!(45.10));
        assert!(result.avg_price <= dec!(61.00));
    }

    #[test]
    fn test_identical_prices_average_exactly() {
        let aggregator = WeightedAggregator::default();
        let group = vec![
            make_obs(dec!(100), dec!(0.9), Some(10), dec!(0.8)),
            make_obs(dec!(100), dec!(0.33), Some(123), dec!(0.7)),
            make_obs(dec!(100), dec!(0.5), Some(200), dec!(0.6)),
        ];
        let refs: Vec<&PriceObservation> = group.iter().collect();

        assert_eq!(aggregator.aggregate(&refs, as_of()).unwrap().avg_price, dec!(100));
    }

    #[test]
    fn test_overflowing_sum_is_an_error() {
        let aggregator = WeightedAggregator::default();
        let huge = dec!(50000000000000000000000000000);
        let a = make_obs(huge, Decimal::ONE, Some(0), Decimal::ONE);
        let b = make_obs(huge, Decimal::ONE, Some(0), Decimal::ONE);

        let result = aggregator.aggregate(&[&a, &b], as_of());
        assert_eq!(result, Err(ConsensusError::Overflow("weighted price sum")));
    }
}
