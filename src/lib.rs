//! Retail Medallion Pipeline
//!
//! Batch ETL over the Online Retail transaction dataset: a CSV is loaded into
//! a MongoDB `raw_data` collection, filtered into `clean_data`, aggregated
//! into three gold collections and rendered as charts.
//!
//! # Architecture
//!
//! - **Plan**: typed aggregation stages, evaluated in memory or pushed down
//!   to MongoDB
//! - **Store**: the five collection operations the stages need
//! - **I/O**: source decoding and the output artifact sink (local or S3)
//! - **Pipeline**: the stage runner and run metrics
//! - **Report**: SVG charts for the gold collections
//!
//! # Usage
//!
//! ```no_run
//! use retail_medallion::{build_runtime, run_pipeline, Config};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let runtime = build_runtime()?;
//!     runtime.block_on(run_pipeline(config, "mongodb://localhost:27017"))?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod plan;
pub mod record;
pub mod report;
pub mod store;

pub use config::{Config, DatePolicy};
pub use error::{EtlError, EtlResult};
pub use pipeline::{EtlRunner, Metrics, MetricsSnapshot, RunSummary};
pub use store::{DocumentStore, MemoryStore, MongoStore};

use anyhow::{Context, Result};
use io::ArtifactSink;
use pipeline::IngestSummary;

/// Environment variable holding the MongoDB connection string.
pub const MONGO_URI_ENV: &str = "MONGO_URI";

/// Pick the connection string: explicit value, then config, then `MONGO_URI`.
pub fn resolve_mongo_uri(explicit: Option<String>, config: &Config) -> Result<String> {
    explicit
        .or_else(|| config.store.uri.clone())
        .or_else(|| std::env::var(MONGO_URI_ENV).ok())
        .with_context(|| format!("No MongoDB connection string: set {} or store.uri", MONGO_URI_ENV))
}

/// Run stats, cleaning, aggregation and reporting against MongoDB.
pub async fn run_pipeline(config: Config, mongo_uri: &str) -> Result<RunSummary> {
    config.validate()?;

    tracing::info!("Starting retail medallion pipeline");
    let store = MongoStore::connect(mongo_uri, &config.store.database).await?;
    let sink = ArtifactSink::from_config(&config)?;
    tracing::info!("Writing artifacts to: {}", config.output.path_display());

    let metrics = Metrics::new();
    let runner = EtlRunner::new(&store, &config, &sink, metrics.clone());
    let summary = runner.run().await?;

    let snapshot = metrics.snapshot();
    tracing::info!("Pipeline complete: {}", snapshot);
    if let Some(path) = &config.output.metrics_output_path {
        if let Err(e) = snapshot.save_to_file(path) {
            tracing::warn!("Failed to save metrics to {}: {}", path, e);
        }
    }

    Ok(summary)
}

/// Load the source file into the raw collection (one-time step).
pub async fn run_ingest(config: Config, mongo_uri: &str) -> Result<IngestSummary> {
    config.validate()?;

    tracing::info!("Ingesting {}", config.source.csv_path);
    let store = MongoStore::connect(mongo_uri, &config.store.database).await?;
    let sink = ArtifactSink::from_config(&config)?;

    let runner = EtlRunner::new(&store, &config, &sink, Metrics::new());
    runner.ingest().await
}

/// Print raw collection stats only.
pub async fn run_stats(config: Config, mongo_uri: &str) -> Result<pipeline::RawStats> {
    let store = MongoStore::connect(mongo_uri, &config.store.database).await?;
    let sink = ArtifactSink::from_config(&config)?;
    EtlRunner::new(&store, &config, &sink, Metrics::new()).stats().await
}

/// Single-threaded runtime: stages run strictly one after another.
pub fn build_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread().enable_all().build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_mongo_uri_prefers_explicit() {
        let mut config = Config::default();
        config.store.uri = Some("mongodb://config:27017".to_string());

        let uri = resolve_mongo_uri(Some("mongodb://cli:27017".to_string()), &config).unwrap();
        assert_eq!(uri, "mongodb://cli:27017");

        let uri = resolve_mongo_uri(None, &config).unwrap();
        assert_eq!(uri, "mongodb://config:27017");
    }

    #[test]
    fn test_build_runtime() {
        let runtime = build_runtime().unwrap();
        assert_eq!(runtime.block_on(async { 1 + 1 }), 2);
    }
}
