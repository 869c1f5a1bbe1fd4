//! In-memory observation source and aggregate store

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{AggregateSink, ObservationSource};
use crate::types::{AggregatedPrice, Grade, PriceObservation};

/// Keeps observations and aggregates in process memory.
///
/// Grades can be marked as failing so publish errors can be exercised.
#[derive(Debug, Default)]
pub struct MemoryStore {
    observations: RwLock<Vec<PriceObservation>>,
    aggregates: RwLock<BTreeMap<(String, String), AggregatedPrice>>,
    failing_grades: RwLock<HashSet<String>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observations(observations: Vec<PriceObservation>) -> Self {
        Self {
            observations: RwLock::new(observations),
            ..Self::default()
        }
    }

    pub async fn add_observation(&self, observation: PriceObservation) {
        self.observations.write().await.push(observation);
    }

    /// Make every upsert for this grade key fail
    pub async fn fail_grade(&self, grade_key: &str) {
        self.failing_grades.write().await.insert(grade_key.to_string());
    }

    pub async fn get(&self, item_id: &str, grade: &Grade) -> Option<AggregatedPrice> {
        self.aggregates
            .read()
            .await
            .get(&(item_id.to_string(), grade.key().to_string()))
            .cloned()
    }

    /// All aggregates stored for an item, in grade key order
    pub async fn aggregates_for(&self, item_id: &str) -> Vec<AggregatedPrice> {
        self.aggregates
            .read()
            .await
            .iter()
            .filter(|((id, _), _)| id == item_id)
            .map(|(_, aggregate)| aggregate.clone())
            .collect()
    }

    /// Successful upserts so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObservationSource for MemoryStore {
    async fn fetch_price_history(&self, item_id: &str) -> Result<Vec<PriceObservation>> {
        Ok(self
            .observations
            .read()
            .await
            .iter()
            .filter(|o| o.item_id == item_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AggregateSink for MemoryStore {
    async fn upsert_aggregate(
        &self,
        item_id: &str,
        grade: &Grade,
        aggregate: &AggregatedPrice,
    ) -> Result<()> {
        if self.failing_grades.read().await.contains(grade.key()) {
            bail!("store rejected write for {}/{}", item_id, grade);
        }

        self.aggregates
            .write()
            .await
            .insert((item_id.to_string(), grade.key().to_string()), aggregate.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::BTreeSet;

    fn make_aggregate(price: rust_decimal::Decimal) -> AggregatedPrice {
        AggregatedPrice {
            item_id: "1804-dollar".to_string(),
            grade: Grade::Graded("PR-62".to_string()),
            current_avg_price: price,
            price_trend: Default::default(),
            trend_percentage: dec!(0),
            sample_size: 1,
            confidence_level: dec!(0.5),
            price_sources: BTreeSet::from(["heritage".to_string()]),
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_key() {
        let store = MemoryStore::new();
        let grade = Grade::Graded("PR-62".to_string());

        store.upsert_aggregate("1804-dollar", &grade, &make_aggregate(dec!(1))).await.unwrap();
        store.upsert_aggregate("1804-dollar", &grade, &make_aggregate(dec!(2))).await.unwrap();

        let stored = store.aggregates_for("1804-dollar").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].current_avg_price, dec!(2));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_grade_rejects_write() {
        let store = MemoryStore::new();
        store.fail_grade("PR-62").await;
        let grade = Grade::Graded("PR-62".to_string());

        let result = store.upsert_aggregate("1804-dollar", &grade, &make_aggregate(dec!(1))).await;
        assert!(result.is_err());
        assert!(store.get("1804-dollar", &grade).await.is_none());
        assert_eq!(store.write_count(), 0);
    }
}
