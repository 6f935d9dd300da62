//! Index line parsing and the English/200 acceptance filter

use ccshard_core::CaptureRecord;
use serde_json::{Map, Value};

/// Longest prefix of an offending line kept in error messages
const SNIPPET_LEN: usize = 200;

/// Why an index line could not be turned into a record
#[derive(Debug)]
pub enum RecordErrorKind {
    /// Fewer than three space-separated tokens
    TooFewTokens(usize),
    /// Rejoined metadata is not valid JSON
    Json(serde_json::Error),
    /// Metadata parsed, but not as a JSON object
    NotAnObject,
}

/// Malformed index line
#[derive(Debug)]
pub struct RecordError {
    pub kind: RecordErrorKind,
    pub line: String,
}

impl RecordError {
    fn new(kind: RecordErrorKind, line: &str) -> Self {
        let line = match line.char_indices().nth(SNIPPET_LEN) {
            Some((idx, _)) => format!("{}...", &line[..idx]),
            None => line.to_string(),
        };
        Self { kind, line }
    }
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            RecordErrorKind::TooFewTokens(n) => {
                write!(f, "index line has {n} tokens, need at least 3: {:?}", self.line)
            }
            RecordErrorKind::Json(e) => write!(f, "index line metadata: {e}: {:?}", self.line),
            RecordErrorKind::NotAnObject => {
                write!(f, "index line metadata is not an object: {:?}", self.line)
            }
        }
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            RecordErrorKind::Json(e) => Some(e),
            _ => None,
        }
    }
}

/// Parse one CDX line: `<surt> <timestamp> <json...>`.
///
/// Tokens after the timestamp are concatenated with no separator before JSON
/// parsing. Whitespace inside metadata values is therefore dropped; this is
/// the established behaviour of the pipeline and is kept as-is.
pub fn parse_index_line(line: &str) -> Result<CaptureRecord, RecordError> {
    let tokens: Vec<&str> = line.split(' ').collect();
    if tokens.len() < 3 {
        return Err(RecordError::new(RecordErrorKind::TooFewTokens(tokens.len()), line));
    }
    let joined: String = tokens[2..].concat();
    let metadata = match serde_json::from_str::<Value>(&joined) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err(RecordError::new(RecordErrorKind::NotAnObject, line)),
        Err(e) => return Err(RecordError::new(RecordErrorKind::Json(e), line)),
    };
    Ok(CaptureRecord {
        surt_url: tokens[0].to_string(),
        timestamp: tokens[1].to_string(),
        metadata,
    })
}

/// Filter condition a record can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    Language,
    Status,
}

impl FilterReason {
    /// Metric label value
    pub fn label(self) -> &'static str {
        match self {
            Self::Language => "language",
            Self::Status => "status",
        }
    }
}

/// Outcome of the acceptance filter; each condition is judged on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub language_ok: bool,
    pub status_ok: bool,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        self.language_ok && self.status_ok
    }

    /// Failing conditions, language first.
    pub fn reasons(&self) -> impl Iterator<Item = FilterReason> {
        let language = (!self.language_ok).then_some(FilterReason::Language);
        let status = (!self.status_ok).then_some(FilterReason::Status);
        language.into_iter().chain(status)
    }
}

/// Judge a record: `languages` contains `eng` and `status` is `"200"`.
pub fn check(record: &CaptureRecord) -> Verdict {
    Verdict {
        language_ok: has_english(&record.metadata),
        status_ok: record.metadata.get("status").and_then(Value::as_str) == Some("200"),
    }
}

/// `languages` is a comma-separated string in Common Crawl CDX output;
/// an array of codes is accepted too.
fn has_english(metadata: &Map<String, Value>) -> bool {
    match metadata.get("languages") {
        Some(Value::String(s)) => s.split(',').any(|code| code.trim() == "eng"),
        Some(Value::Array(codes)) => codes.iter().any(|c| c.as_str() == Some("eng")),
        _ => false,
    }
}
