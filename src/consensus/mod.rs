//! Consensus module - Per-grade price consensus for one item
//!
//! Groups an item's observations by grade and produces one
//! confidence-scored, trend-classified aggregate per grade.

mod confidence;
mod grouper;
mod trend;
mod weighting;

pub use confidence::ConfidenceScorer;
pub use grouper::{group_by_grade, GradeGroup};
pub use trend::{TrendAnalyzer, TrendReading};
pub use weighting::{age_in_days, WeightedAggregator, WeightedPrice};

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::types::{AggregatedPrice, Grade, PriceObservation};

/// Decimal places kept on published prices
pub const PRICE_SCALE: u32 = 4;
/// Decimal places kept on trend percentages
pub const PERCENT_SCALE: u32 = 4;
/// Decimal places kept on confidence levels
pub const CONFIDENCE_SCALE: u32 = 4;

/// Failure while folding a grade group
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("decimal overflow while computing {0}")]
    Overflow(&'static str),
}

pub(crate) fn round_scaled(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

/// Runs grouping, weighting, trend and confidence for an item
#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    weighting: WeightedAggregator,
    trend: TrendAnalyzer,
    confidence: ConfidenceScorer,
}

impl ConsensusEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            weighting: WeightedAggregator::from_config(config),
            trend: TrendAnalyzer::from_config(config),
            confidence: ConfidenceScorer::from_config(config),
        }
    }

    /// Aggregate a single grade group as of the given instant
    pub fn aggregate_grade(
        &self,
        item_id: &str,
        grade: &Grade,
        group: &[&PriceObservation],
        as_of: DateTime<Utc>,
    ) -> Result<AggregatedPrice, ConsensusError> {
        let weighted = self.weighting.aggregate(group, as_of)?;
        let trend = self.trend.analyze(group, as_of)?;

        let price_sources: BTreeSet<String> =
            group.iter().map(|o| o.source_name.clone()).collect();

        let confidence_level =
            self.confidence
                .score(group.len(), price_sources.len(), weighted.avg_weight);

        Ok(AggregatedPrice {
            item_id: item_id.to_string(),
            grade: grade.clone(),
            current_avg_price: weighted.avg_price,
            price_trend: trend.trend,
            trend_percentage: trend.percentage,
            sample_size: group.len(),
            confidence_level,
            price_sources,
            last_updated: as_of,
        })
    }

    /// Aggregate every grade of an item, in grade order.
    ///
    /// Stops at the first grade that cannot be computed.
    pub fn aggregate_item(
        &self,
        item_id: &str,
        observations: &[PriceObservation],
        as_of: DateTime<Utc>,
    ) -> Result<Vec<AggregatedPrice>, ConsensusError> {
        group_by_grade(observations)
            .iter()
            .map(|(grade, group)| self.aggregate_grade(item_id, grade, group, as_of))
            .collect()
    }
}

impl Default for ConsensusEngine {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}
