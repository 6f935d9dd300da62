//! Capture records: the unit carried in queue batches

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One crawled page's index entry.
///
/// Serialized as `{surt_url, timestamp, metadata}`; a batch on the queue is a
/// JSON array of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub surt_url: String,
    pub timestamp: String,
    pub metadata: Map<String, Value>,
}

/// Where a capture's WARC record lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLocation {
    pub filename: String,
    pub offset: u64,
    pub length: u64,
}

/// Metadata is missing a field needed to locate the capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationError {
    pub field: &'static str,
    pub surt_url: String,
}

impl std::fmt::Display for LocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "record {}: missing or invalid metadata field '{}'",
            self.surt_url, self.field
        )
    }
}

impl std::error::Error for LocationError {}

impl CaptureRecord {
    /// WARC location from `filename`/`offset`/`length`.
    ///
    /// Common Crawl encodes offset and length as JSON strings; integers are
    /// accepted as well.
    pub fn location(&self) -> Result<RecordLocation, LocationError> {
        let missing = |field| LocationError {
            field,
            surt_url: self.surt_url.clone(),
        };
        let filename = self
            .metadata
            .get("filename")
            .and_then(Value::as_str)
            .ok_or_else(|| missing("filename"))?
            .to_string();
        let offset = self.number("offset").ok_or_else(|| missing("offset"))?;
        let length = self.number("length").ok_or_else(|| missing("length"))?;
        Ok(RecordLocation {
            filename,
            offset,
            length,
        })
    }

    fn number(&self, key: &str) -> Option<u64> {
        match self.metadata.get(key)? {
            Value::String(s) => s.trim().parse().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }
}

/// Serialize a batch for publishing.
pub fn encode_batch(records: &[CaptureRecord]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(records)
}

/// Parse a batch received from the queue.
pub fn decode_batch(body: &[u8]) -> serde_json::Result<Vec<CaptureRecord>> {
    serde_json::from_slice(body)
}
