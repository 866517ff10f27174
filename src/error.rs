//! Error type shared by the store backends, the query plan and the stages.

use thiserror::Error;

/// Failures surfaced by the ETL stages.
///
/// Every variant is fatal to the stage that raised it; nothing is retried.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("document store unreachable: {0}")]
    Connection(String),

    #[error("failed to parse source '{path}': {reason}")]
    Parse { path: String, reason: String },

    #[error("collection '{0}' is empty")]
    EmptyStore(String),

    #[error("unparseable invoice date '{value}' (expected format '{format}')")]
    DateParse { value: String, format: String },

    #[error("document store operation on '{collection}' failed: {reason}")]
    Store { collection: String, reason: String },

    #[error("cannot evaluate {expr}: {reason}")]
    Evaluation { expr: String, reason: String },

    #[error("failed to render chart '{chart}': {reason}")]
    Render { chart: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EtlError {
    pub(crate) fn store(collection: &str, reason: impl ToString) -> Self {
        Self::Store {
            collection: collection.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type EtlResult<T> = std::result::Result<T, EtlError>;
