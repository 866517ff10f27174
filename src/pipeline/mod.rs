//! Pipeline orchestration for the medallion stages.

mod metrics;
mod stages;


pub use metrics::{Metrics, MetricsSnapshot};
pub use stages::{AggregateSummary, EtlRunner, IngestSummary, RawStats, RunSummary};
