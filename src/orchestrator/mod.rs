//! Aggregation Orchestrator - Fetch, aggregate per grade, publish
//!
//! A run for one item fetches its full observation history, computes one
//! aggregate per grade and upserts each. Fetch problems fail the whole run
//! before anything is written. A grade that cannot be computed or published
//! fails alone. Rows the source returns for other items are ignored.

mod locks;
mod status;

pub use locks::KeyedLocks;
pub use status::{RunRegistry, RunState, RunStatus, RunTicket};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::consensus::{group_by_grade, ConsensusEngine};
use crate::sources::{AggregateSink, ObservationSource};
use crate::types::{AggregatedPrice, Grade};

/// Source of the instant a run treats as "now"
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Terminal failures of a run; nothing was published
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("no price observations found for item {0}")]
    NotFound(String),

    #[error("failed to fetch price history for item {item_id}")]
    Fetch { item_id: String, details: String },
}

impl AggregationError {
    pub fn item_id(&self) -> &str {
        match self {
            AggregationError::NotFound(item_id) => item_id,
            AggregationError::Fetch { item_id, .. } => item_id,
        }
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            AggregationError::NotFound(_) => None,
            AggregationError::Fetch { details, .. } => Some(details),
        }
    }
}

/// A grade whose aggregate could not be computed or published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeFailure {
    pub grade: Grade,
    pub reason: String,
}

#[derive(Debug, Clone)]
enum GradeOutcome {
    Published(AggregatedPrice),
    Failed(GradeFailure),
}

/// Result of a run that got past the fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationReport {
    pub item_id: String,
    /// Grades successfully published
    pub grades_processed: usize,
    /// Fetched observations belonging to the item
    pub total_observations: usize,
    pub published: Vec<AggregatedPrice>,
    pub failed_grades: Vec<GradeFailure>,
}

impl AggregationReport {
    fn from_outcomes(item_id: &str, total_observations: usize, outcomes: Vec<GradeOutcome>) -> Self {
        let mut report = Self {
            item_id: item_id.to_string(),
            grades_processed: 0,
            total_observations,
            published: Vec::new(),
            failed_grades: Vec::new(),
        };

        for outcome in outcomes {
            match outcome {
                GradeOutcome::Published(aggregate) => {
                    report.grades_processed += 1;
                    report.published.push(aggregate);
                }
                GradeOutcome::Failed(failure) => report.failed_grades.push(failure),
            }
        }

        report
    }

    /// Grade groups found in the history
    pub fn grades_found(&self) -> usize {
        self.grades_processed + self.failed_grades.len()
    }

    /// Some grades published, some failed
    pub fn is_partial(&self) -> bool {
        !self.failed_grades.is_empty()
    }
}

/// Inbound invocation
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationRequest {
    pub item_id: String,
}

/// Wire shape returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grades_processed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_observations: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_grades: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AggregationResponse {
    pub fn from_result(result: &Result<AggregationReport, AggregationError>) -> Self {
        match result {
            Ok(report) => Self {
                success: true,
                grades_processed: Some(report.grades_processed),
                total_observations: Some(report.total_observations),
                failed_grades: report
                    .failed_grades
                    .iter()
                    .map(|f| f.grade.key().to_string())
                    .collect(),
                error: None,
                details: None,
            },
            Err(err) => Self::error(err.to_string(), err.details().map(str::to_string)),
        }
    }

    pub fn error(msg: impl Into<String>, details: Option<String>) -> Self {
        Self {
            success: false,
            grades_processed: None,
            total_observations: None,
            failed_grades: Vec::new(),
            error: Some(msg.into()),
            details,
        }
    }
}

/// Drives fetch, consensus and publish for items
pub struct AggregationOrchestrator {
    source: Arc<dyn ObservationSource>,
    sink: Arc<dyn AggregateSink>,
    engine: ConsensusEngine,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
    runs: RunRegistry,
}

impl AggregationOrchestrator {
    pub fn new(
        source: Arc<dyn ObservationSource>,
        sink: Arc<dyn AggregateSink>,
        config: &EngineConfig,
    ) -> Self {
        Self::with_clock(source, sink, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        source: Arc<dyn ObservationSource>,
        sink: Arc<dyn AggregateSink>,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            sink,
            engine: ConsensusEngine::new(config),
            clock,
            locks: KeyedLocks::new(),
            runs: RunRegistry::new(),
        }
    }

    /// Current state for an item, if it has been run recently
    pub fn status(&self, item_id: &str) -> Option<RunState> {
        self.run_status(item_id).and_then(|s| s.state())
    }

    /// Active, queued and last-finished runs for an item
    pub fn run_status(&self, item_id: &str) -> Option<RunStatus> {
        self.runs.status(item_id)
    }

    /// Aggregate one item as of the clock's current instant
    pub async fn run(&self, item_id: &str) -> Result<AggregationReport, AggregationError> {
        self.run_with(item_id, None).await
    }

    /// Aggregate one item as of a fixed instant
    pub async fn run_at(
        &self,
        item_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<AggregationReport, AggregationError> {
        self.run_with(item_id, Some(as_of)).await
    }

    /// Aggregate several items concurrently; results keep input order
    pub async fn run_many(
        &self,
        item_ids: &[String],
    ) -> Vec<(String, Result<AggregationReport, AggregationError>)> {
        let runs = item_ids.iter().map(|item_id| async move {
            let result = self.run(item_id).await;
            (item_id.clone(), result)
        });
        join_all(runs).await
    }

    async fn run_with(
        &self,
        item_id: &str,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<AggregationReport, AggregationError> {
        let span = info_span!("aggregation", item_id = %item_id, run_id = %Uuid::new_v4());

        async {
            let mut ticket = self.runs.enqueue(item_id);
            let guard = self.locks.lock(item_id).await;
            ticket.start();

            let as_of = as_of.unwrap_or_else(|| self.clock.now());
            let result = self.execute(item_id, as_of).await;

            let state = if result.is_ok() {
                RunState::Completed
            } else {
                RunState::Failed
            };
            ticket.finish(state);

            drop(guard);
            self.locks.prune().await;
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        item_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<AggregationReport, AggregationError> {
        let observations = self
            .source
            .fetch_price_history(item_id)
            .await
            .map_err(|e| {
                warn!(error = %format!("{:#}", e), "Price history fetch failed");
                AggregationError::Fetch {
                    item_id: item_id.to_string(),
                    details: format!("{:#}", e),
                }
            })?;

        let fetched = observations.len();
        let observations: Vec<_> = observations
            .into_iter()
            .filter(|o| o.item_id == item_id)
            .collect();
        if observations.len() < fetched {
            warn!(
                dropped = fetched - observations.len(),
                "Ignoring observations that belong to other items"
            );
        }

        if observations.is_empty() {
            info!("No price observations found");
            return Err(AggregationError::NotFound(item_id.to_string()));
        }

        let groups = group_by_grade(&observations);
        debug!(observations = observations.len(), grades = groups.len(), "Grouped observations");

        let mut outcomes = Vec::with_capacity(groups.len());
        for (grade, group) in &groups {
            let outcome = match self.engine.aggregate_grade(item_id, grade, group, as_of) {
                Ok(aggregate) => self.publish(item_id, grade, aggregate).await,
                Err(e) => {
                    warn!(grade = %grade, error = %e, "Failed to compute aggregate, skipping grade");
                    GradeOutcome::Failed(GradeFailure {
                        grade: grade.clone(),
                        reason: e.to_string(),
                    })
                }
            };
            outcomes.push(outcome);
        }

        let report = AggregationReport::from_outcomes(item_id, observations.len(), outcomes);
        info!(
            grades_processed = report.grades_processed,
            grades_failed = report.failed_grades.len(),
            total_observations = report.total_observations,
            "Aggregation finished"
        );
        Ok(report)
    }

    async fn publish(&self, item_id: &str, grade: &Grade, aggregate: AggregatedPrice) -> GradeOutcome {
        match self.sink.upsert_aggregate(item_id, grade, &aggregate).await {
            Ok(()) => {
                debug!(
                    grade = %grade,
                    price = %aggregate.current_avg_price,
                    trend = %aggregate.price_trend,
                    confidence = %aggregate.confidence_level,
                    "Published aggregate"
                );
                GradeOutcome::Published(aggregate)
            }
            Err(e) => {
                warn!(grade = %grade, error = %format!("{:#}", e), "Failed to publish aggregate, skipping grade");
                GradeOutcome::Failed(GradeFailure {
                    grade: grade.clone(),
                    reason: format!("{:#}", e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_response_shape() {
        let result: Result<AggregationReport, AggregationError> =
            Err(AggregationError::NotFound("1799-eagle".to_string()));
        let json = serde_json::to_value(AggregationResponse::from_result(&result)).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "no price observations found for item 1799-eagle");
        assert!(json.get("details").is_none());
        assert!(json.get("grades_processed").is_none());
    }

    #[test]
    fn test_fetch_error_carries_details() {
        let result: Result<AggregationReport, AggregationError> = Err(AggregationError::Fetch {
            item_id: "1799-eagle".to_string(),
            details: "connection refused".to_string(),
        });
        let response = AggregationResponse::from_result(&result);

        assert!(!response.success);
        assert_eq!(response.details.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_partial_report_lists_failed_grades() {
        let report = AggregationReport::from_outcomes(
            "1799-eagle",
            4,
            vec![GradeOutcome::Failed(GradeFailure {
                grade: Grade::Unknown,
                reason: "disk full".to_string(),
            })],
        );
        assert!(report.is_partial());
        assert_eq!(report.grades_found(), 1);

        let response = AggregationResponse::from_result(&Ok(report));
        assert!(response.success);
        assert_eq!(response.grades_processed, Some(0));
        assert_eq!(response.total_observations, Some(4));
        assert_eq!(response.failed_grades, vec!["Unknown".to_string()]);
    }
}
