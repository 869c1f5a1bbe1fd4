//! Configuration management for CoinPrice
//!
//! Loads from optional config files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
    pub api: ApiConfig,
}

/// Weighting model parameters for the consensus engine
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Age in days at which recency decay saturates; also the assumed age of undated observations
    pub recency_horizon_days: i64,
    /// Lower bound of the recency weight
    pub recency_floor: Decimal,
    /// Recent trend window upper bound (inclusive), days
    pub recent_window_days: i64,
    /// Older trend window upper bound (inclusive), days
    pub older_window_days: i64,
    /// Percent change beyond which a trend is rising/falling
    pub trend_threshold_pct: Decimal,
    /// Sample count at which the sample term saturates
    pub confidence_sample_saturation: u32,
    /// Distinct source count at which the diversity term saturates
    pub confidence_source_saturation: u32,
    pub confidence_sample_weight: Decimal,
    pub confidence_source_weight: Decimal,
    pub confidence_avg_weight_weight: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recency_horizon_days: 365,
            recency_floor: dec!(0.1),
            recent_window_days: 30,
            older_window_days: 90,
            trend_threshold_pct: dec!(5),
            confidence_sample_saturation: 10,
            confidence_source_saturation: 3,
            confidence_sample_weight: dec!(0.4),
            confidence_source_weight: dec!(0.3),
            confidence_avg_weight_weight: dec!(0.3),
        }
    }
}

impl EngineConfig {
    /// Reject parameter sets that would break the weighting model's bounds
    pub fn validate(&self) -> Result<()> {
        if self.recency_horizon_days <= 0 {
            bail!("engine.recency_horizon_days must be positive");
        }
        if self.recency_floor <= Decimal::ZERO || self.recency_floor > Decimal::ONE {
            bail!("engine.recency_floor must be in (0, 1]");
        }
        if self.recent_window_days < 0 || self.older_window_days <= self.recent_window_days {
            bail!(
                "engine trend windows out of order: recent={} older={}",
                self.recent_window_days,
                self.older_window_days
            );
        }
        if self.trend_threshold_pct < Decimal::ZERO {
            bail!("engine.trend_threshold_pct must not be negative");
        }
        if self.confidence_sample_saturation == 0 || self.confidence_source_saturation == 0 {
            bail!("engine confidence saturations must be at least 1");
        }
        let terms = [
            self.confidence_sample_weight,
            self.confidence_source_weight,
            self.confidence_avg_weight_weight,
        ];
        if terms.iter().any(|w| *w < Decimal::ZERO) {
            bail!("engine confidence term weights must not be negative");
        }
        let total: Decimal = terms.iter().sum();
        if total != Decimal::ONE {
            bail!("engine confidence term weights sum to {}, expected 1", total);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Observation history CSV, relative to data_dir
    pub observations_file: String,
    /// Aggregate table CSV, relative to data_dir
    pub aggregates_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// HTTP port for the aggregation endpoint
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let builder = Self::defaults()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (COINPRICE__*)
            .add_source(Environment::with_prefix("COINPRICE").separator("__"));

        Self::from_builder(builder)
    }

    /// Builder holding only the built-in defaults
    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            // Engine defaults
            .set_default("engine.recency_horizon_days", 365)?
            .set_default("engine.recency_floor", "0.1")?
            .set_default("engine.recent_window_days", 30)?
            .set_default("engine.older_window_days", 90)?
            .set_default("engine.trend_threshold_pct", "5")?
            .set_default("engine.confidence_sample_saturation", 10)?
            .set_default("engine.confidence_source_saturation", 3)?
            .set_default("engine.confidence_sample_weight", "0.4")?
            .set_default("engine.confidence_source_weight", "0.3")?
            .set_default("engine.confidence_avg_weight_weight", "0.3")?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.observations_file", "observations.csv")?
            .set_default("persistence.aggregates_file", "aggregates.csv")?
            // Logging defaults
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // API defaults
            .set_default("api.port", 8080)?;
        Ok(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config = builder.build().context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.engine.validate()?;

        Ok(app_config)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "data_dir={} horizon={}d floor={} windows={}d/{}d threshold={}%",
            self.persistence.data_dir,
            self.engine.recency_horizon_days,
            self.engine.recency_floor,
            self.engine.recent_window_days,
            self.engine.older_window_days,
            self.engine.trend_threshold_pct
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
