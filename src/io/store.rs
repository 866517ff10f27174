//! Object store for output artifacts (audit file, charts) on local disk or S3.

use anyhow::{Context, Result};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore, PutPayload};
use std::sync::Arc;
use std::time::Duration;

/// Parse an S3 URI into bucket and key components.
///
/// Accepts URIs in the format `s3://bucket/key/path`.
pub fn parse_s3_uri(uri: &str) -> Result<(&str, &str)> {
    let without_scheme = uri
        .strip_prefix("s3://")
        .with_context(|| format!("Invalid S3 URI: expected 's3://' prefix in '{}'", uri))?;

    without_scheme
        .split_once('/')
        .with_context(|| format!("Invalid S3 URI: expected 's3://bucket/key' format in '{}'", uri))
}

fn create_client_options() -> ClientOptions {
    ClientOptions::new()
        .with_connect_timeout(Duration::from_secs(5))
        .with_timeout(Duration::from_secs(30))
}

/// Create an authenticated S3 client for writing.
///
/// Credentials and region come from the environment (AWS_ACCESS_KEY_ID,
/// AWS_SECRET_ACCESS_KEY, AWS_REGION) or the instance profile.
fn create_authenticated_store(bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    tracing::info!("Creating authenticated S3 client for bucket: {}", bucket);

    let builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_client_options(create_client_options());

    Ok(Arc::new(builder.build()?))
}

/// Read a whole source file from local disk or an `s3://` URI.
pub async fn read_source(location: &str) -> Result<Vec<u8>> {
    if location.starts_with("s3://") {
        let (bucket, key) = parse_s3_uri(location)?;
        let store = create_authenticated_store(bucket)?;
        let bytes = store
            .get(&ObjectPath::from(key))
            .await
            .with_context(|| format!("Failed to fetch {}", location))?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    } else {
        tokio::fs::read(location)
            .await
            .with_context(|| format!("Failed to open source file {}", location))
    }
}

/// Create the store artifacts are written to.
/// Uses LocalFileSystem if local_path is set, otherwise S3 with credentials.
pub fn create_output_store(config: &crate::config::Config) -> Result<Arc<dyn ObjectStore>> {
    match (&config.output.local_path, &config.output.bucket) {
        (Some(local_path), _) => {
            let path = std::path::Path::new(local_path);
            if !path.exists() {
                std::fs::create_dir_all(path)
                    .with_context(|| format!("Failed to create output directory {}", path.display()))?;
            }
            tracing::info!("Creating LocalFileSystem store at: {}", path.display());
            Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
        }
        (_, Some(bucket)) => create_authenticated_store(bucket),
        _ => anyhow::bail!("Invalid config: no output destination"),
    }
}

/// Named file writer over an object store.
#[derive(Clone)]
pub struct ArtifactSink {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    display_root: String,
}

impl ArtifactSink {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str, display_root: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.trim_matches('/').to_string(),
            display_root: display_root.into(),
        }
    }

    /// Build the sink described by the output configuration.
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        let store = create_output_store(config)?;
        // LocalFileSystem already has the directory as prefix
        let prefix = if config.output.is_local() {
            ""
        } else {
            config.output.prefix().unwrap_or("")
        };
        Ok(Self::new(store, prefix, config.output.path_display()))
    }

    fn object_path(&self, name: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(name)
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, name))
        }
    }

    /// Overwrite `name` with `bytes`, returning a display location.
    pub async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<String> {
        let path = self.object_path(name);
        self.store
            .put(&path, PutPayload::from(bytes))
            .await
            .with_context(|| format!("Failed to write artifact {}", path))?;
        Ok(format!("{}/{}", self.display_root.trim_end_matches('/'), name))
    }

    /// Read an artifact back.
    pub async fn get(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.object_path(name);
        let bytes = self
            .store
            .get(&path)
            .await
            .with_context(|| format!("Failed to read artifact {}", path))?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[test]
    fn test_parse_s3_uri() {
        let (bucket, key) = parse_s3_uri("s3://my-bucket/reports/raw_data.json").unwrap();
        assert_eq!(bucket, "my-bucket");
        assert_eq!(key, "reports/raw_data.json");
    }

    #[test]
    fn test_parse_s3_uri_invalid() {
        assert!(parse_s3_uri("bucket/key").is_err());
        assert!(parse_s3_uri("http://bucket/key").is_err());
        assert!(parse_s3_uri("s3://bucket").is_err());
    }

    #[tokio::test]
    async fn test_sink_applies_prefix() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let sink = ArtifactSink::new(store.clone(), "/retail/", "s3://bucket/retail");

        let location = sink.put("chart.svg", b"<svg/>".to_vec()).await.unwrap();
        assert_eq!(location, "s3://bucket/retail/chart.svg");

        let raw = store
            .get(&ObjectPath::from("retail/chart.svg"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(raw.as_ref(), b"<svg/>");
        assert_eq!(sink.get("chart.svg").await.unwrap(), b"<svg/>".to_vec());
    }

    #[tokio::test]
    async fn test_local_output_store_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::Config::default();
        config.output.local_path = Some(dir.path().join("out").to_string_lossy().into_owned());

        let sink = ArtifactSink::from_config(&config).unwrap();
        sink.put("raw_data.json", b"[1]".to_vec()).await.unwrap();
        sink.put("raw_data.json", b"[2]".to_vec()).await.unwrap();

        let written = std::fs::read(dir.path().join("out").join("raw_data.json")).unwrap();
        assert_eq!(written, b"[2]");
    }

    #[tokio::test]
    async fn test_read_source_local() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retail.csv");
        std::fs::write(&path, b"Country\nFrance\n").unwrap();

        let bytes = read_source(&path.to_string_lossy()).await.unwrap();
        assert_eq!(bytes, b"Country\nFrance\n".to_vec());

        let missing = dir.path().join("missing.csv");
        assert!(read_source(&missing.to_string_lossy()).await.is_err());
    }
}
