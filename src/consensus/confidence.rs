//! Confidence Scorer - Sample size, source diversity and weight quality

use rust_decimal::Decimal;

use crate::config::EngineConfig;
use crate::consensus::{round_scaled, CONFIDENCE_SCALE};

#[derive(Debug, Clone, Copy)]
pub struct ConfidenceScorer {
    sample_saturation: Decimal,
    source_saturation: Decimal,
    sample_weight: Decimal,
    source_weight: Decimal,
    avg_weight_weight: Decimal,
}

impl ConfidenceScorer {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            sample_saturation: Decimal::from(config.confidence_sample_saturation),
            source_saturation: Decimal::from(config.confidence_source_saturation),
            sample_weight: config.confidence_sample_weight,
            source_weight: config.confidence_source_weight,
            avg_weight_weight: config.confidence_avg_weight_weight,
        }
    }

    /// Combined confidence, clamped to [0,1]
    pub fn score(&self, sample_size: usize, distinct_sources: usize, avg_weight: Decimal) -> Decimal {
        let sample_factor = (Decimal::from(sample_size) / self.sample_saturation).min(Decimal::ONE);
        let source_factor =
            (Decimal::from(distinct_sources) / self.source_saturation).min(Decimal::ONE);

        let confidence = sample_factor * self.sample_weight
            + source_factor * self.source_weight
            + avg_weight * self.avg_weight_weight;

        round_scaled(confidence.clamp(Decimal::ZERO, Decimal::ONE), CONFIDENCE_SCALE)
    }
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
