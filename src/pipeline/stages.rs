//! Medallion stages and the runner that sequences them.
//!
//! ```text
//! CSV ──ingest──▶ raw ──clean──▶ clean ──┬─▶ gold_top_countries  ──▶ chart
//!                  │                     ├─▶ gold_top_products   ──▶ chart
//!                stats                   └─▶ gold_sales_by_month ──▶ chart
//! ```
//!
//! Every stage blocks until its store operation completes. Ingestion is not
//! part of [`EtlRunner::run`]; it is a separate, explicit step.

use crate::config::Config;
use crate::error::EtlError;
use crate::io::{parse_source, read_source, to_audit_json, ArtifactSink};
use crate::pipeline::Metrics;
use crate::plan::{self, AggregationPlan, SortKey};
use crate::record::ID_FIELD;
use crate::report::{render_svg, ChartSpec};
use crate::store::DocumentStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;

/// Outcome of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub records: u64,
    pub fields: usize,
}

/// Size of the raw collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawStats {
    pub records: u64,
    /// Keys of a representative record, excluding the store's `_id`
    pub fields: usize,
}

/// Group counts written by the three aggregations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateSummary {
    pub top_countries: u64,
    pub top_products: u64,
    pub sales_by_month: u64,
}

/// Result of a full run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub raw: RawStats,
    pub clean_records: u64,
    pub aggregates: AggregateSummary,
    /// Where each chart was written
    pub charts: Vec<String>,
}

/// Runs the stages against one store handle.
pub struct EtlRunner<'a> {
    store: &'a dyn DocumentStore,
    config: &'a Config,
    sink: &'a ArtifactSink,
    metrics: Arc<Metrics>,
}

impl<'a> EtlRunner<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        config: &'a Config,
        sink: &'a ArtifactSink,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            config,
            sink,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Load the source file into the raw collection, replacing its contents.
    ///
    /// The file is fully parsed and the audit copy written before the store
    /// is touched, so a parse failure leaves the raw collection as it was.
    pub async fn ingest(&self) -> Result<IngestSummary> {
        let start = Instant::now();
        let source = &self.config.source;

        let bytes = read_source(&source.csv_path).await.map_err(|e| EtlError::Parse {
            path: source.csv_path.clone(),
            reason: format!("{:#}", e),
        })?;
        let parsed = parse_source(&bytes, &source.encoding, source.delimiter, &source.csv_path)?;
        tracing::info!(
            "Loaded CSV with {} rows and {} columns",
            parsed.records.len(),
            parsed.columns.len()
        );
        self.metrics.set_records_ingested(parsed.records.len() as u64);

        let audit = to_audit_json(&parsed.records)?;
        let location = self.sink.put(&self.config.output.audit_file, audit).await?;
        tracing::info!("Saved {} for reference", location);

        let raw = &self.config.store.collections.raw;
        self.store.replace_collection(raw, parsed.records).await?;
        let inserted = self.store.count(raw).await?;
        tracing::info!("Inserted {} documents into {}", inserted, raw);

        self.metrics.add_ingest_time(start.elapsed());
        Ok(IngestSummary {
            records: inserted,
            fields: parsed.columns.len(),
        })
    }

    /// Record and field counts of the raw collection.
    pub async fn stats(&self) -> Result<RawStats> {
        let raw = &self.config.store.collections.raw;
        let records = self.store.count(raw).await?;
        let sample = self
            .store
            .find_one(raw)
            .await?
            .ok_or_else(|| EtlError::EmptyStore(raw.clone()))?;
        let fields = sample.keys().filter(|k| k.as_str() != ID_FIELD).count();

        tracing::info!("Rows: {}", records);
        tracing::info!("Columns: {}", fields);
        self.metrics.set_raw_records(records);
        Ok(RawStats { records, fields })
    }

    /// Materialize the clean collection from raw.
    pub async fn clean(&self) -> Result<u64> {
        let start = Instant::now();
        let names = &self.config.store.collections;

        let plan = plan::clean_plan(&self.config.fields);
        self.store.aggregate(&names.raw, &plan, &names.clean).await?;
        let kept = self.store.count(&names.clean).await?;
        tracing::info!("Clean data saved to {} ({} records)", names.clean, kept);

        self.metrics.set_clean_records(kept);
        self.metrics.add_clean_time(start.elapsed());
        Ok(kept)
    }

    async fn aggregate(&self, plan: AggregationPlan, out: &str) -> Result<u64> {
        let start = Instant::now();
        let clean = &self.config.store.collections.clean;

        self.store
            .aggregate(clean, &plan, out)
            .await
            .with_context(|| format!("Aggregation {} failed", plan.name))?;
        let groups = self.store.count(out).await?;
        tracing::info!("Aggregated data saved to {} ({} groups)", out, groups);

        self.metrics.add_groups_written(groups);
        self.metrics.add_aggregate_time(start.elapsed());
        Ok(groups)
    }

    pub async fn aggregate_top_countries(&self) -> Result<u64> {
        let plan = plan::top_countries_plan(&self.config.fields, self.config.aggregation.top_n);
        self.aggregate(plan, &self.config.store.collections.top_countries).await
    }

    pub async fn aggregate_top_products(&self) -> Result<u64> {
        let plan = plan::top_products_plan(&self.config.fields, self.config.aggregation.top_n);
        self.aggregate(plan, &self.config.store.collections.top_products).await
    }

    pub async fn aggregate_sales_by_month(&self) -> Result<u64> {
        let plan = plan::sales_by_month_plan(&self.config.fields, self.config.aggregation.date_policy);
        self.aggregate(plan, &self.config.store.collections.sales_by_month).await
    }

    /// Render one gold collection, read in `order`, and write the chart,
    /// returning its location.
    async fn report(&self, spec: ChartSpec, collection: &str, order: &[SortKey]) -> Result<String> {
        let start = Instant::now();
        let records = self.store.find_sorted(collection, order).await?;
        if records.is_empty() {
            tracing::warn!("{} is empty, rendering an empty chart", collection);
        }

        let size = (self.config.output.chart_width, self.config.output.chart_height);
        let svg = render_svg(&spec, &records, size)?;
        let location = self.sink.put(spec.file_name, svg.into_bytes()).await?;
        tracing::info!("Chart '{}' written to {}", spec.title, location);

        self.metrics.add_chart_rendered();
        self.metrics.add_report_time(start.elapsed());
        Ok(location)
    }

    pub async fn report_top_countries(&self) -> Result<String> {
        let top_n = self.config.aggregation.top_n;
        let plan = plan::top_countries_plan(&self.config.fields, top_n);
        let spec = ChartSpec::top_countries(top_n);
        self.report(spec, &self.config.store.collections.top_countries, plan.output_order())
            .await
    }

    pub async fn report_top_products(&self) -> Result<String> {
        let top_n = self.config.aggregation.top_n;
        let plan = plan::top_products_plan(&self.config.fields, top_n);
        let spec = ChartSpec::top_products(top_n);
        self.report(spec, &self.config.store.collections.top_products, plan.output_order())
            .await
    }

    pub async fn report_sales_by_month(&self) -> Result<String> {
        let fields = &self.config.fields;
        let plan = plan::sales_by_month_plan(fields, self.config.aggregation.date_policy);
        self.report(
            ChartSpec::sales_by_month(),
            &self.config.store.collections.sales_by_month,
            plan.output_order(),
        )
        .await
    }

    /// Stats, clean, the three aggregations, then the three charts.
    pub async fn run(&self) -> Result<RunSummary> {
        let raw = self.stats().await?;
        let clean_records = self.clean().await?;

        let aggregates = AggregateSummary {
            top_countries: self.aggregate_top_countries().await?,
            top_products: self.aggregate_top_products().await?,
            sales_by_month: self.aggregate_sales_by_month().await?,
        };

        let charts = vec![
            self.report_top_countries().await?,
            self.report_top_products().await?,
            self.report_sales_by_month().await?,
        ];

        Ok(RunSummary {
            raw,
            clean_records,
            aggregates,
            charts,
        })
    }
}
