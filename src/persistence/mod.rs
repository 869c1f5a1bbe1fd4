//! CSV Persistence Module
//!
//! File-backed observation history and aggregate table

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::sources::{AggregateSink, ObservationSource};
use crate::types::{AggregatedPrice, Grade, PriceObservation, PriceTrend};

/// A CSV row that could not be turned into a domain value
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("invalid decimal in column {column}: {value:?}")]
    InvalidDecimal { column: &'static str, value: String },

    #[error("{column} must be within [0, 1], got {value}")]
    OutOfRange { column: &'static str, value: Decimal },

    #[error("price must not be negative, got {0}")]
    NegativePrice(Decimal),

    #[error("invalid timestamp {0:?}, expected RFC 3339 or YYYY-MM-DD")]
    InvalidTimestamp(String),

    #[error("invalid price trend {0:?}")]
    InvalidTrend(String),

    #[error("invalid price source list {0:?}")]
    InvalidSources(String),
}

fn parse_decimal(column: &'static str, value: &str) -> Result<Decimal, RecordError> {
    Decimal::from_str(value.trim()).map_err(|_| RecordError::InvalidDecimal {
        column,
        value: value.to_string(),
    })
}

fn parse_unit_interval(column: &'static str, value: &str) -> Result<Decimal, RecordError> {
    let parsed = parse_decimal(column, value)?;
    if parsed < Decimal::ZERO || parsed > Decimal::ONE {
        return Err(RecordError::OutOfRange {
            column,
            value: parsed,
        });
    }
    Ok(parsed)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RecordError> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| RecordError::InvalidTimestamp(value.to_string()))
}

/// Observation row as exported by the ingestion pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub item_id: String,
    pub source_name: String,
    pub source_reliability: String,
    #[serde(default)]
    pub grade: Option<String>,
    pub price: String,
    #[serde(default)]
    pub sale_date: Option<String>,
    pub observation_confidence: String,
}

impl TryFrom<ObservationRecord> for PriceObservation {
    type Error = RecordError;

    fn try_from(record: ObservationRecord) -> Result<Self, Self::Error> {
        let price = parse_decimal("price", &record.price)?;
        if price < Decimal::ZERO {
            return Err(RecordError::NegativePrice(price));
        }

        let sale_date = match record.sale_date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_timestamp(raw)?),
        };

        Ok(PriceObservation {
            item_id: record.item_id,
            source_name: record.source_name,
            grade: Grade::from_label(record.grade.as_deref()),
            price,
            sale_date,
            source_reliability: parse_unit_interval(
                "source_reliability",
                &record.source_reliability,
            )?,
            observation_confidence: parse_unit_interval(
                "observation_confidence",
                &record.observation_confidence,
            )?,
        })
    }
}

/// Aggregate row in the published table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub item_id: String,
    pub grade: String,
    pub current_avg_price: String,
    pub price_trend: String,
    pub trend_percentage: String,
    pub sample_size: usize,
    pub confidence_level: String,
    /// JSON array of source names
    pub price_sources: String,
    pub last_updated: String,
}

impl From<&AggregatedPrice> for AggregateRecord {
    fn from(aggregate: &AggregatedPrice) -> Self {
        Self {
            item_id: aggregate.item_id.clone(),
            grade: aggregate.grade.key().to_string(),
            current_avg_price: aggregate.current_avg_price.to_string(),
            price_trend: aggregate.price_trend.to_string(),
            trend_percentage: aggregate.trend_percentage.to_string(),
            sample_size: aggregate.sample_size,
            confidence_level: aggregate.confidence_level.to_string(),
            price_sources: serde_json::to_string(&aggregate.price_sources)
                .unwrap_or_else(|_| "[]".to_string()),
            last_updated: aggregate
                .last_updated
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }
}

impl TryFrom<AggregateRecord> for AggregatedPrice {
    type Error = RecordError;

    fn try_from(record: AggregateRecord) -> Result<Self, Self::Error> {
        let price_sources: BTreeSet<String> = serde_json::from_str(&record.price_sources)
            .map_err(|_| RecordError::InvalidSources(record.price_sources.clone()))?;

        Ok(AggregatedPrice {
            grade: Grade::from_label(Some(&record.grade)),
            current_avg_price: parse_decimal("current_avg_price", &record.current_avg_price)?,
            price_trend: PriceTrend::from_str(&record.price_trend)
                .ok_or_else(|| RecordError::InvalidTrend(record.price_trend.clone()))?,
            trend_percentage: parse_decimal("trend_percentage", &record.trend_percentage)?,
            sample_size: record.sample_size,
            confidence_level: parse_decimal("confidence_level", &record.confidence_level)?,
            price_sources,
            last_updated: parse_timestamp(&record.last_updated)?,
            item_id: record.item_id,
        })
    }
}

/// Reads observation history from a CSV export
#[derive(Debug, Clone)]
pub struct CsvObservationSource {
    path: PathBuf,
}

impl CsvObservationSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_records(&self) -> Result<Vec<ObservationRecord>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "Observation file missing, treating as empty");
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let mut records = Vec::new();
        for (index, result) in reader.deserialize().enumerate() {
            let record: ObservationRecord = result
                .with_context(|| format!("Failed to deserialize observation row {}", index + 1))?;
            records.push(record);
        }
        Ok(records)
    }

    /// Distinct item ids present in the file, sorted
    pub fn item_ids(&self) -> Result<Vec<String>> {
        let ids: BTreeSet<String> = self
            .read_records()?
            .into_iter()
            .map(|r| r.item_id)
            .collect();
        Ok(ids.into_iter().collect())
    }
}

#[async_trait]
impl ObservationSource for CsvObservationSource {
    async fn fetch_price_history(&self, item_id: &str) -> Result<Vec<PriceObservation>> {
        let mut observations = Vec::new();

        for record in self.read_records()? {
            if record.item_id != item_id {
                continue;
            }
            let observation = PriceObservation::try_from(record)
                .with_context(|| format!("Invalid observation for item {}", item_id))?;
            observations.push(observation);
        }

        debug!(item_id, count = observations.len(), "Loaded price history");
        Ok(observations)
    }
}

/// Aggregate table stored as one CSV file, one row per `(item_id, grade)`.
///
/// Rows are kept sorted by key and the file is replaced atomically, so the
/// same set of aggregates always produces the same bytes.
#[derive(Debug)]
pub struct CsvAggregateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvAggregateStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("Failed to create data directory")?;
            }
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Result<BTreeMap<(String, String), AggregateRecord>> {
        let mut table = BTreeMap::new();
        if !self.path.exists() {
            return Ok(table);
        }

        let file = fs::File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

        for result in reader.deserialize() {
            let record: AggregateRecord =
                result.context("Failed to deserialize aggregate record")?;
            table.insert((record.item_id.clone(), record.grade.clone()), record);
        }
        Ok(table)
    }

    fn write_table(&self, table: &BTreeMap<(String, String), AggregateRecord>) -> Result<()> {
        let tmp_path = self.path.with_extension("csv.tmp");
        {
            let file = fs::File::create(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
            for record in table.values() {
                writer
                    .serialize(record)
                    .context("Failed to write aggregate record")?;
            }
            writer.flush().context("Failed to flush aggregate writer")?;
        }
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    /// Every stored aggregate, in key order
    pub fn load_all(&self) -> Result<Vec<AggregatedPrice>> {
        self.read_table()?
            .into_values()
            .map(|r| AggregatedPrice::try_from(r).map_err(anyhow::Error::from))
            .collect()
    }

    pub fn get(&self, item_id: &str, grade: &Grade) -> Result<Option<AggregatedPrice>> {
        let key = (item_id.to_string(), grade.key().to_string());
        match self.read_table()?.remove(&key) {
            Some(record) => Ok(Some(AggregatedPrice::try_from(record)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AggregateSink for CsvAggregateStore {
    async fn upsert_aggregate(
        &self,
        item_id: &str,
        grade: &Grade,
        aggregate: &AggregatedPrice,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut table = self.read_table()?;
        let key = (item_id.to_string(), grade.key().to_string());
        let mut record = AggregateRecord::from(aggregate);
        record.item_id = key.0.clone();
        record.grade = key.1.clone();

        let replaced = table.insert(key, record).is_some();
        self.write_table(&table)?;

        info!(item_id, grade = %grade, replaced, "Aggregate upserted");
        Ok(())
    }
}
