//! Decoding and parsing of the delimited transaction source.

use crate::error::{EtlError, EtlResult};
use crate::record::{infer_value, Record};
use encoding_rs::Encoding;
use std::collections::HashSet;

/// Parsed source file: column names in header order plus typed records.
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    pub columns: Vec<String>,
    pub records: Vec<Record>,
}

/// Decode `bytes` from `encoding_label` and parse them as delimited text.
///
/// The header row gives field names; a repeated name gets a numeric suffix
/// (`Country`, `Country.1`). A row with a different number of cells than the
/// header is a parse error.
pub fn parse_source(bytes: &[u8], encoding_label: &str, delimiter: char, origin: &str) -> EtlResult<ParsedSource> {
    let parse_error = |reason: String| EtlError::Parse {
        path: origin.to_string(),
        reason,
    };

    let encoding = Encoding::for_label(encoding_label.as_bytes())
        .ok_or_else(|| parse_error(format!("unknown encoding '{}'", encoding_label)))?;
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::warn!("{}: some bytes are not valid {}", origin, encoding.name());
    }

    let delimiter = u8::try_from(delimiter)
        .map_err(|_| parse_error(format!("delimiter '{}' is not a single byte", delimiter)))?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let names: Vec<String> = reader
        .headers()
        .map_err(|e| parse_error(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if names.iter().all(|c| c.is_empty()) {
        return Err(parse_error("missing header row".to_string()));
    }
    let columns = dedupe_columns(names);

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| parse_error(e.to_string()))?;
        let record: Record = columns
            .iter()
            .zip(row.iter())
            .map(|(name, cell)| (name.clone(), infer_value(cell)))
            .collect();
        records.push(record);
    }

    Ok(ParsedSource { columns, records })
}

/// Rename repeated header names `name.1`, `name.2`, ... so no column is
/// shadowed when rows become maps.
fn dedupe_columns(names: Vec<String>) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::with_capacity(names.len());
    let mut columns = Vec::with_capacity(names.len());

    for name in names {
        let mut candidate = name.clone();
        let mut suffix = 0;
        while taken.contains(&candidate) {
            suffix += 1;
            candidate = format!("{}.{}", name, suffix);
        }
        if suffix > 0 {
            tracing::warn!("Duplicate column '{}' renamed to '{}'", name, candidate);
        }
        taken.insert(candidate.clone());
        columns.push(candidate);
    }
    columns
}

/// Pretty JSON array with 4-space indentation.
pub fn to_audit_json(records: &[Record]) -> EtlResult<Vec<u8>> {
    use serde::Serialize;

    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    records
        .serialize(&mut serializer)
        .map_err(|e| EtlError::Io(e.into()))?;
    Ok(out)
}
