//! Run counters and per-stage timings.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for one pipeline run.
#[derive(Debug)]
pub struct Metrics {
    /// Records parsed from the source file
    pub records_ingested: AtomicU64,

    /// Records in the raw collection at stats time
    pub raw_records: AtomicU64,

    /// Records surviving the cleaning filter
    pub clean_records: AtomicU64,

    /// Groups written across all gold collections
    pub groups_written: AtomicU64,

    /// Charts exported
    pub charts_rendered: AtomicU64,

    start_time: Instant,

    /// Time spent ingesting (microseconds)
    pub ingest_us: AtomicU64,

    /// Time spent cleaning (microseconds)
    pub clean_us: AtomicU64,

    /// Time spent in the three aggregations (microseconds)
    pub aggregate_us: AtomicU64,

    /// Time spent rendering and writing charts (microseconds)
    pub report_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records_ingested: AtomicU64::new(0),
            raw_records: AtomicU64::new(0),
            clean_records: AtomicU64::new(0),
            groups_written: AtomicU64::new(0),
            charts_rendered: AtomicU64::new(0),
            start_time: Instant::now(),
            ingest_us: AtomicU64::new(0),
            clean_us: AtomicU64::new(0),
            aggregate_us: AtomicU64::new(0),
            report_us: AtomicU64::new(0),
        })
    }

    pub fn set_records_ingested(&self, count: u64) {
        self.records_ingested.store(count, Ordering::Relaxed);
    }

    pub fn set_raw_records(&self, count: u64) {
        self.raw_records.store(count, Ordering::Relaxed);
    }

    pub fn set_clean_records(&self, count: u64) {
        self.clean_records.store(count, Ordering::Relaxed);
    }

    pub fn add_groups_written(&self, count: u64) {
        self.groups_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_chart_rendered(&self) {
        self.charts_rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_ingest_time(&self, duration: Duration) {
        self.ingest_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_clean_time(&self, duration: Duration) {
        self.clean_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_aggregate_time(&self, duration: Duration) {
        self.aggregate_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_report_time(&self, duration: Duration) {
        self.report_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Fraction of raw records dropped by cleaning.
    pub fn drop_ratio(&self) -> f64 {
        let raw = self.raw_records.load(Ordering::Relaxed);
        let clean = self.clean_records.load(Ordering::Relaxed);
        if raw > 0 {
            raw.saturating_sub(clean) as f64 / raw as f64
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let secs = |us: &AtomicU64| us.load(Ordering::Relaxed) as f64 / 1_000_000.0;

        MetricsSnapshot {
            records_ingested: self.records_ingested.load(Ordering::Relaxed),
            raw_records: self.raw_records.load(Ordering::Relaxed),
            clean_records: self.clean_records.load(Ordering::Relaxed),
            drop_ratio: self.drop_ratio(),
            groups_written: self.groups_written.load(Ordering::Relaxed),
            charts_rendered: self.charts_rendered.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            ingest_secs: secs(&self.ingest_us),
            clean_secs: secs(&self.clean_us),
            aggregate_secs: secs(&self.aggregate_us),
            report_secs: secs(&self.report_us),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub records_ingested: u64,
    pub raw_records: u64,
    pub clean_records: u64,
    pub drop_ratio: f64,
    pub groups_written: u64,
    pub charts_rendered: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub ingest_secs: f64,
    pub clean_secs: f64,
    pub aggregate_secs: f64,
    pub report_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "raw: {}, clean: {} ({:.1}% dropped), groups: {}, charts: {}, elapsed: {:.2}s \
             [ingest {:.2}s, clean {:.2}s, aggregate {:.2}s, report {:.2}s]",
            self.raw_records,
            self.clean_records,
            self.drop_ratio * 100.0,
            self.groups_written,
            self.charts_rendered,
            self.elapsed.as_secs_f64(),
            self.ingest_secs,
            self.clean_secs,
            self.aggregate_secs,
            self.report_secs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_ratio() {
        let metrics = Metrics::new();
        assert_eq!(metrics.drop_ratio(), 0.0);

        metrics.set_raw_records(200);
        metrics.set_clean_records(150);
        assert!((metrics.drop_ratio() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = Metrics::new();
        metrics.add_groups_written(3);
        metrics.add_groups_written(10);
        metrics.add_chart_rendered();
        metrics.add_clean_time(Duration::from_millis(1500));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.groups_written, 13);
        assert_eq!(snapshot.clean_secs, 1.5);

        let json: serde_json::Value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["charts_rendered"], 1);
        assert!(json["elapsed"].is_f64());
    }

    #[test]
    fn test_save_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        Metrics::new().snapshot().save_to_file(path.to_str().unwrap()).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("records_ingested"));
    }
}
