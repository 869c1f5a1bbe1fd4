//! Collaborator ports: observation history in, aggregates out

mod memory;

pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{AggregatedPrice, Grade, PriceObservation};

/// Trait for observation history providers
#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Full observation history for one item; empty when the item is unknown
    async fn fetch_price_history(&self, item_id: &str) -> Result<Vec<PriceObservation>>;
}

/// Trait for aggregate stores
#[async_trait]
pub trait AggregateSink: Send + Sync {
    /// Insert or overwrite the aggregate stored under `(item_id, grade)`
    async fn upsert_aggregate(
        &self,
        item_id: &str,
        grade: &Grade,
        aggregate: &AggregatedPrice,
    ) -> Result<()>;
}
