//! Core types used throughout CoinPrice
//!
//! Defines price observations, grades, trends and the aggregated price record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Grade bucket an observation is compared within.
///
/// Missing grades are an explicit variant rather than a sentinel label, so
/// grouping can never mistake "no grade" for a real grade.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    Graded(String),
    Unknown,
}

impl Grade {
    /// Key used when persisting an unknown grade
    pub const UNKNOWN_KEY: &'static str = "Unknown";

    /// Normalize an optional raw label.
    ///
    /// Absent, blank and literal "unknown" labels (any case) all collapse to
    /// [`Grade::Unknown`]; anything else is trimmed and kept verbatim.
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            None | Some("") => Grade::Unknown,
            Some(l) if l.eq_ignore_ascii_case(Self::UNKNOWN_KEY) => Grade::Unknown,
            Some(l) => Grade::Graded(l.to_string()),
        }
    }

    /// Storage key for this grade
    pub fn key(&self) -> &str {
        match self {
            Grade::Graded(label) => label,
            Grade::Unknown => Self::UNKNOWN_KEY,
        }
    }

    /// Re-apply label normalization to an already constructed grade
    pub fn normalized(&self) -> Self {
        match self {
            Grade::Graded(label) => Grade::from_label(Some(label)),
            Grade::Unknown => Grade::Unknown,
        }
    }
}

impl Default for Grade {
    fn default() -> Self {
        Grade::Unknown
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Price direction over the trend windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceTrend {
    Rising,
    Falling,
    Stable,
}

impl Default for PriceTrend {
    fn default() -> Self {
        PriceTrend::Stable
    }
}

impl PriceTrend {
    /// Classify a percentage change against a symmetric threshold.
    /// Values exactly on the threshold are stable.
    pub fn classify(trend_percentage: Decimal, threshold_pct: Decimal) -> Self {
        if trend_percentage > threshold_pct {
            PriceTrend::Rising
        } else if trend_percentage < -threshold_pct {
            PriceTrend::Falling
        } else {
            PriceTrend::Stable
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rising" => Some(PriceTrend::Rising),
            "falling" => Some(PriceTrend::Falling),
            "stable" => Some(PriceTrend::Stable),
            _ => None,
        }
    }
}

impl fmt::Display for PriceTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceTrend::Rising => write!(f, "rising"),
            PriceTrend::Falling => write!(f, "falling"),
            PriceTrend::Stable => write!(f, "stable"),
        }
    }
}

/// A single observed sale or listing price, as delivered by ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    /// Collectible being priced
    pub item_id: String,
    /// Where the price came from
    pub source_name: String,
    pub grade: Grade,
    /// Observed price, non-negative
    pub price: Decimal,
    /// Sale timestamp; `None` when the age is unknown
    pub sale_date: Option<DateTime<Utc>>,
    /// Trust in the source, in [0,1]
    pub source_reliability: Decimal,
    /// Trust in this particular observation, in [0,1]
    pub observation_confidence: Decimal,
}

/// Consensus price for one `(item_id, grade)` key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedPrice {
    pub item_id: String,
    pub grade: Grade,
    /// Weighted mean of the group's prices
    pub current_avg_price: Decimal,
    pub price_trend: PriceTrend,
    /// Percent change of the recent window against the older window
    pub trend_percentage: Decimal,
    /// Observations contributing to this grade
    pub sample_size: usize,
    /// Trust in this aggregate, in [0,1]
    pub confidence_level: Decimal,
    /// Distinct contributing sources, ordered
    pub price_sources: BTreeSet<String>,
    /// Instant the aggregate was computed for
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_grade_normalization() {
        assert_eq!(Grade::from_label(None), Grade::Unknown);
        assert_eq!(Grade::from_label(Some("   ")), Grade::Unknown);
        assert_eq!(Grade::from_label(Some("unknown")), Grade::Unknown);
        assert_eq!(
            Grade::from_label(Some(" MS-65 ")),
            Grade::Graded("MS-65".to_string())
        );
        assert_eq!(Grade::Unknown.key(), "Unknown");
    }

    #[test]
    fn test_trend_classification_boundaries() {
        let threshold = dec!(5);
        assert_eq!(PriceTrend::classify(dec!(5.0), threshold), PriceTrend::Stable);
        assert_eq!(PriceTrend::classify(dec!(5.01), threshold), PriceTrend::Rising);
        assert_eq!(PriceTrend::classify(dec!(-5.0), threshold), PriceTrend::Stable);
        assert_eq!(PriceTrend::classify(dec!(-5.01), threshold), PriceTrend::Falling);
    }

    #[test]
    fn test_trend_serializes_lowercase() {
        let json = serde_json::to_string(&PriceTrend::Rising).unwrap();
        assert_eq!(json, "\"rising\"");
        assert_eq!(PriceTrend::from_str("FALLING"), Some(PriceTrend::Falling));
    }
}
