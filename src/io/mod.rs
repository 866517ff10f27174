//! Source file parsing and output artifact I/O.

mod csv_source;
mod store;

pub use csv_source::{parse_source, to_audit_json, ParsedSource};
pub use store::{create_output_store, parse_s3_uri, read_source, ArtifactSink};
