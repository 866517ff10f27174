//! Configuration for the retail medallion pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Source CSV configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Document store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Column names of the transaction dataset
    #[serde(default)]
    pub fields: FieldConfig,

    /// Aggregation policies
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Output artifacts (audit file, charts, metrics)
    #[serde(default)]
    pub output: OutputConfig,
}

/// Source dataset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to the delimited source file
    #[serde(default = "default_csv_path")]
    pub csv_path: String,

    /// Text encoding label of the source file (WHATWG label, e.g. "ISO-8859-1")
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Field delimiter
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            csv_path: default_csv_path(),
            encoding: default_encoding(),
            delimiter: default_delimiter(),
        }
    }
}

/// Document store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// MongoDB connection string. Usually supplied through `MONGO_URI` instead.
    #[serde(default)]
    pub uri: Option<String>,

    /// Database name
    #[serde(default = "default_database")]
    pub database: String,

    /// Collection names for each medallion layer
    #[serde(default)]
    pub collections: CollectionNames,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: None,
            database: default_database(),
            collections: CollectionNames::default(),
        }
    }
}

/// Names of the collections written by each stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionNames {
    #[serde(default = "default_raw")]
    pub raw: String,

    #[serde(default = "default_clean")]
    pub clean: String,

    #[serde(default = "default_top_countries")]
    pub top_countries: String,

    #[serde(default = "default_top_products")]
    pub top_products: String,

    #[serde(default = "default_sales_by_month")]
    pub sales_by_month: String,
}

impl CollectionNames {
    fn all(&self) -> [&str; 5] {
        [
            self.raw.as_str(),
            self.clean.as_str(),
            self.top_countries.as_str(),
            self.top_products.as_str(),
            self.sales_by_month.as_str(),
        ]
    }
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            raw: default_raw(),
            clean: default_clean(),
            top_countries: default_top_countries(),
            top_products: default_top_products(),
            sales_by_month: default_sales_by_month(),
        }
    }
}

/// Column names in the transaction dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    #[serde(default = "default_description_field")]
    pub description: String,

    #[serde(default = "default_country_field")]
    pub country: String,

    #[serde(default = "default_unit_price_field")]
    pub unit_price: String,

    #[serde(default = "default_quantity_field")]
    pub quantity: String,

    #[serde(default = "default_invoice_date_field")]
    pub invoice_date: String,

    /// strftime-style format of the invoice date column
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            description: default_description_field(),
            country: default_country_field(),
            unit_price: default_unit_price_field(),
            quantity: default_quantity_field(),
            invoice_date: default_invoice_date_field(),
            date_format: default_date_format(),
        }
    }
}

/// What to do with an invoice date that does not match `date_format`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePolicy {
    /// Leave the record out of the monthly trend
    #[default]
    Skip,
    /// Abort the aggregation
    Fail,
}

/// Aggregation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Number of groups kept by the top-countries and top-products reports
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Handling of unparseable invoice dates
    #[serde(default)]
    pub date_policy: DatePolicy,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            date_policy: DatePolicy::default(),
        }
    }
}

/// Output artifact configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Local directory for the audit file and charts.
    /// Mutually exclusive with bucket/prefix.
    #[serde(default)]
    pub local_path: Option<String>,

    /// Output S3 bucket (required if local_path is not set)
    #[serde(default)]
    pub bucket: Option<String>,

    /// Output S3 path prefix (required if local_path is not set)
    #[serde(default)]
    pub prefix: Option<String>,

    /// Name of the JSON audit copy of the raw records
    #[serde(default = "default_audit_file")]
    pub audit_file: String,

    /// Chart width in pixels
    #[serde(default = "default_chart_width")]
    pub chart_width: u32,

    /// Chart height in pixels
    #[serde(default = "default_chart_height")]
    pub chart_height: u32,

    /// Optional path to save metrics JSON after the run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            local_path: Some(default_local_path()),
            bucket: None,
            prefix: None,
            audit_file: default_audit_file(),
            chart_width: default_chart_width(),
            chart_height: default_chart_height(),
            metrics_output_path: None,
        }
    }
}

impl OutputConfig {
    /// Check if output is to local filesystem.
    pub fn is_local(&self) -> bool {
        self.local_path.is_some()
    }

    /// Get the output location as a display string (local path or s3:// URI).
    pub fn path_display(&self) -> String {
        if let Some(path) = &self.local_path {
            path.clone()
        } else {
            format!(
                "s3://{}/{}",
                self.bucket.as_deref().unwrap_or(""),
                self.prefix.as_deref().unwrap_or("")
            )
        }
    }

    /// Get the S3 prefix if this is an S3 output.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn from_file_or_default(path: &PathBuf) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        match (&self.output.local_path, &self.output.bucket, &self.output.prefix) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                anyhow::bail!("Cannot specify both local_path and bucket/prefix");
            }
            (None, None, _) | (None, _, None) => {
                anyhow::bail!("Must specify either local_path or both bucket and prefix");
            }
            _ => {}
        }

        if encoding_rs::Encoding::for_label(self.source.encoding.as_bytes()).is_none() {
            anyhow::bail!("Unknown source encoding '{}'", self.source.encoding);
        }
        if self.aggregation.top_n == 0 {
            anyhow::bail!("top_n must be > 0");
        }
        if self.output.chart_width == 0 || self.output.chart_height == 0 {
            anyhow::bail!("Chart dimensions must be > 0");
        }
        if self.store.database.is_empty() {
            anyhow::bail!("Database name must not be empty");
        }

        let names = self.store.collections.all();
        if names.iter().any(|n| n.is_empty()) {
            anyhow::bail!("Collection names must not be empty");
        }
        let unique: HashSet<&str> = names.iter().copied().collect();
        if unique.len() != names.len() {
            anyhow::bail!("Collection names must be distinct");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_csv_path() -> String { "data/Online Retail.csv".to_string() }
fn default_encoding() -> String { "ISO-8859-1".to_string() }
fn default_delimiter() -> char { ',' }
fn default_database() -> String { "bigdata_project".to_string() }
fn default_raw() -> String { "raw_data".to_string() }
fn default_clean() -> String { "clean_data".to_string() }
fn default_top_countries() -> String { "gold_top_countries".to_string() }
fn default_top_products() -> String { "gold_top_products".to_string() }
fn default_sales_by_month() -> String { "gold_sales_by_month".to_string() }
fn default_description_field() -> String { "Description".to_string() }
fn default_country_field() -> String { "Country".to_string() }
fn default_unit_price_field() -> String { "UnitPrice".to_string() }
fn default_quantity_field() -> String { "Quantity".to_string() }
fn default_invoice_date_field() -> String { "InvoiceDate".to_string() }
fn default_date_format() -> String { "%m/%d/%Y %H:%M".to_string() }
fn default_top_n() -> usize { 10 }
fn default_local_path() -> String { "data".to_string() }
fn default_audit_file() -> String { "raw_data.json".to_string() }
fn default_chart_width() -> u32 { 1000 }
fn default_chart_height() -> u32 { 600 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.database, "bigdata_project");
        assert_eq!(config.store.collections.raw, "raw_data");
        assert_eq!(config.aggregation.top_n, 10);
        assert_eq!(config.aggregation.date_policy, DatePolicy::Skip);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config = Config::from_yaml(
            r#"
source:
  csv_path: "other.csv"
aggregation:
  date_policy: fail
output:
  local_path: "/tmp/out"
"#,
        )
        .unwrap();

        assert_eq!(config.source.csv_path, "other.csv");
        assert_eq!(config.source.encoding, "ISO-8859-1");
        assert_eq!(config.aggregation.date_policy, DatePolicy::Fail);
        assert_eq!(config.fields.unit_price, "UnitPrice");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_s3() {
        let mut config = Config::default();
        config.output.local_path = None;
        config.output.bucket = Some("reports".to_string());
        config.output.prefix = Some("retail/".to_string());
        assert!(config.validate().is_ok());
        assert_eq!(config.output.path_display(), "s3://reports/retail/");
    }

    #[test]
    fn test_config_validation_invalid() {
        // Both local_path and bucket set
        let mut config = Config::default();
        config.output.bucket = Some("bucket".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.aggregation.top_n = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.source.encoding = "klingon".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.store.collections.clean = "raw_data".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let yaml = Config::default().to_yaml().unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.fields.date_format, "%m/%d/%Y %H:%M");
        assert_eq!(parsed.output.audit_file, "raw_data.json");
    }
}
