//! CoinPrice Library
//!
//! Price-consensus engine for graded collectibles: turns noisy multi-source
//! price observations into one trusted, trend-classified, confidence-scored
//! price per grade.

pub mod config;
pub mod consensus;
pub mod orchestrator;
pub mod persistence;
pub mod sources;
pub mod types;

#[cfg(feature = "api")]
pub mod api;
