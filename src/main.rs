//! Retail Medallion CLI
//!
//! Loads the Online Retail dataset into MongoDB and produces gold reports.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use retail_medallion::{build_runtime, resolve_mongo_uri, run_ingest, run_pipeline, run_stats, Config};

#[derive(Parser)]
#[command(name = "retail-medallion")]
#[command(about = "Medallion ETL and reports for the Online Retail dataset", long_about = None)]
struct Cli {
    /// Path to configuration file (defaults apply if it does not exist)
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// MongoDB connection string
    #[arg(long, env = "MONGO_URI", global = true, hide_env_values = true)]
    mongo_uri: Option<String>,

    /// Override the database name
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stats, clean, aggregate and chart (default if no command specified)
    Run,

    /// Load the source CSV into the raw collection (run once)
    Ingest,

    /// Show raw collection stats
    Stats,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // .env must be loaded before clap reads MONGO_URI
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            let (config, uri) = load(&cli.config, cli.mongo_uri, cli.database)?;
            let summary = build_runtime()?.block_on(run_pipeline(config, &uri))?;
            for chart in &summary.charts {
                println!("{}", chart);
            }
        }

        Some(Commands::Ingest) => {
            let (config, uri) = load(&cli.config, cli.mongo_uri, cli.database)?;
            let summary = build_runtime()?.block_on(run_ingest(config, &uri))?;
            println!("Ingested {} records with {} fields", summary.records, summary.fields);
        }

        Some(Commands::Stats) => {
            let (config, uri) = load(&cli.config, cli.mongo_uri, cli.database)?;
            let stats = build_runtime()?.block_on(run_stats(config, &uri))?;
            println!("Rows: {}", stats.records);
            println!("Columns: {}", stats.fields);
        }

        Some(Commands::Validate) => {
            let config = Config::from_file(&cli.config)?;
            config.validate()?;
            println!("Configuration is valid");
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn load(path: &PathBuf, mongo_uri: Option<String>, database: Option<String>) -> Result<(Config, String)> {
    let mut config = Config::from_file_or_default(path)?;
    if let Some(db) = database {
        config.store.database = db;
    }
    config.validate()?;
    let uri = resolve_mongo_uri(mongo_uri, &config)?;
    Ok((config, uri))
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    let yaml = r#"# Retail Medallion Pipeline Configuration

# === SOURCE: the transaction CSV ===
source:
  # Local path or s3://bucket/key
  csv_path: "data/Online Retail.csv"

  # Text encoding of the file (WHATWG label)
  encoding: "ISO-8859-1"

  delimiter: ","

# === STORE: MongoDB ===
store:
  # Prefer the MONGO_URI environment variable (or .env) over putting
  # credentials here
  # uri: "mongodb://localhost:27017"

  database: "bigdata_project"

  collections:
    raw: "raw_data"
    clean: "clean_data"
    top_countries: "gold_top_countries"
    top_products: "gold_top_products"
    sales_by_month: "gold_sales_by_month"

# === FIELDS: column names in the CSV ===
fields:
  description: "Description"
  country: "Country"
  unit_price: "UnitPrice"
  quantity: "Quantity"
  invoice_date: "InvoiceDate"

  # strftime format of invoice_date
  date_format: "%m/%d/%Y %H:%M"

# === AGGREGATION ===
aggregation:
  # Groups kept in the top-countries and top-products reports
  top_n: 10

  # Unparseable invoice dates: "skip" the record or "fail" the run
  date_policy: skip

# === OUTPUT: audit file, charts and metrics ===
# Choose ONE of: local_path OR bucket+prefix (S3)
output:
  local_path: "data"

  # bucket: "reports-bucket"
  # prefix: "retail"

  audit_file: "raw_data.json"

  chart_width: 1000
  chart_height: 600

  # metrics_output_path: "metrics.json"
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
