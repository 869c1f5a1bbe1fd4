//! CoinPrice entry point
//!
//! Usage:
//!   coinprice [ITEM_ID...]   aggregate the given items (all items when none given)
//!   coinprice --serve        serve the aggregation API (requires the `api` feature)

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use coinprice::config::{AppConfig, LoggingConfig};
use coinprice::orchestrator::{AggregationOrchestrator, AggregationResponse};
use coinprice::persistence::{CsvAggregateStore, CsvObservationSource};

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // Logs go to stderr so stdout stays clean JSON responses
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging);
    info!(config = %config, "CoinPrice starting");

    let data_dir = PathBuf::from(&config.persistence.data_dir);
    let source = Arc::new(CsvObservationSource::new(
        data_dir.join(&config.persistence.observations_file),
    ));
    let store = Arc::new(
        CsvAggregateStore::new(data_dir.join(&config.persistence.aggregates_file))
            .context("Failed to open aggregate store")?,
    );
    info!(
        observations = %source.path().display(),
        aggregates = %store.path().display(),
        "Using CSV data files"
    );
    let orchestrator = Arc::new(AggregationOrchestrator::new(
        source.clone(),
        store,
        &config.engine,
    ));

    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--serve") {
        return serve(orchestrator, config.api.port).await;
    }

    let item_ids = if args.is_empty() {
        source.item_ids()?
    } else {
        args
    };
    info!(items = item_ids.len(), "Aggregating items");

    let mut failures = 0usize;
    for (item_id, result) in orchestrator.run_many(&item_ids).await {
        if let Err(e) = &result {
            error!(item_id = %item_id, error = %e, "Aggregation failed");
            failures += 1;
        }
        let response = AggregationResponse::from_result(&result);
        println!("{}", serde_json::to_string(&response)?);
    }

    info!(
        items = item_ids.len(),
        failures, "Aggregation pass complete"
    );
    Ok(())
}

#[cfg(feature = "api")]
async fn serve(orchestrator: Arc<AggregationOrchestrator>, port: u16) -> Result<()> {
    coinprice::api::start_server(orchestrator, port).await
}

#[cfg(not(feature = "api"))]
async fn serve(_orchestrator: Arc<AggregationOrchestrator>, _port: u16) -> Result<()> {
    anyhow::bail!("--serve requires building with the `api` feature")
}
