//! Minimal WARC/1.x record reader over an in-memory range
//!
//! A range fetched from a Common Crawl WARC file holds one gzip member which
//! decompresses to one or more records:
//!
//! ```text
//! WARC/1.0\r\n
//! WARC-Type: response\r\n
//! Content-Length: 1234\r\n
//! \r\n
//! <1234 bytes of block>\r\n\r\n
//! ```

/// Structural problem in WARC data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarcError {
    /// Byte offset within the decompressed range
    pub offset: usize,
    pub message: String,
}

impl WarcError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for WarcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed WARC at byte {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for WarcError {}

/// One record, borrowing its block from the range buffer.
#[derive(Debug)]
pub struct WarcRecord<'a> {
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub block: &'a [u8],
}

impl<'a> WarcRecord<'a> {
    /// Header value, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn warc_type(&self) -> Option<&str> {
        self.header("WARC-Type")
    }

    pub fn is_response(&self) -> bool {
        self.warc_type()
            .is_some_and(|t| t.eq_ignore_ascii_case("response"))
    }

    /// Block with the HTTP status line and headers removed.
    ///
    /// Blocks that do not start with an HTTP status line are returned as-is.
    pub fn http_body(&self) -> &'a [u8] {
        if !self.block.starts_with(b"HTTP/") {
            return self.block;
        }
        match find_header_end(self.block) {
            Some((_, body_start)) => &self.block[body_start..],
            None => &[],
        }
    }
}

/// Iterator over the records of a decompressed range.
pub struct WarcReader<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> WarcReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            failed: false,
        }
    }

    fn read_record(&mut self) -> Result<WarcRecord<'a>, WarcError> {
        let start = self.pos;
        let rest = &self.data[start..];
        let (head_len, block_start) = find_header_end(rest)
            .ok_or_else(|| WarcError::new(start, "unterminated header block"))?;
        let head = std::str::from_utf8(&rest[..head_len])
            .map_err(|_| WarcError::new(start, "header block is not UTF-8"))?;

        let mut lines = head.split('\n').map(|l| l.trim_end_matches('\r'));
        let version = lines.next().unwrap_or_default();
        if !version.starts_with("WARC/") {
            return Err(WarcError::new(start, format!("bad version line {version:?}")));
        }
        let mut headers = Vec::new();
        for line in lines.filter(|l| !l.is_empty()) {
            let Some((name, value)) = line.split_once(':') else {
                return Err(WarcError::new(start, format!("bad header line {line:?}")));
            };
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        let record = WarcRecord {
            version: version.to_string(),
            headers,
            block: &[],
        };
        let length: usize = record
            .header("Content-Length")
            .ok_or_else(|| WarcError::new(start, "missing Content-Length"))?
            .parse()
            .map_err(|_| WarcError::new(start, "invalid Content-Length"))?;

        let block_from = start + block_start;
        let block_to = block_from
            .checked_add(length)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                WarcError::new(
                    start,
                    format!(
                        "block of {length} bytes overruns range of {} bytes",
                        self.data.len()
                    ),
                )
            })?;
        self.pos = block_to;
        Ok(WarcRecord {
            block: &self.data[block_from..block_to],
            ..record
        })
    }

    fn skip_separators(&mut self) {
        while self
            .data
            .get(self.pos)
            .is_some_and(|b| matches!(b, b'\r' | b'\n'))
        {
            self.pos += 1;
        }
    }
}

impl<'a> Iterator for WarcReader<'a> {
    type Item = Result<WarcRecord<'a>, WarcError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        self.skip_separators();
        if self.pos >= self.data.len() {
            return None;
        }
        let result = self.read_record();
        self.failed = result.is_err();
        Some(result)
    }
}

/// First `response` record of a range; ranges usually hold exactly one.
pub fn first_response(data: &[u8]) -> Result<Option<WarcRecord<'_>>, WarcError> {
    for record in WarcReader::new(data) {
        let record = record?;
        if record.is_response() {
            return Ok(Some(record));
        }
    }
    Ok(None)
}

/// Length of the header block and start of the body.
///
/// Accepts `\r\n\r\n` and bare `\n\n` terminators.
fn find_header_end(data: &[u8]) -> Option<(usize, usize)> {
    let crlf = data.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = data.windows(2).position(|w| w == b"\n\n");
    match (crlf, lf) {
        (Some(c), Some(l)) if l < c => Some((l, l + 2)),
        (Some(c), _) => Some((c, c + 4)),
        (None, Some(l)) => Some((l, l + 2)),
        (None, None) => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a WARC record with a correct Content-Length.
    pub(crate) fn warc_record(warc_type: &str, block: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "WARC/1.0\r\nWARC-Type: {warc_type}\r\nWARC-Target-URI: https://example.com/\r\nContent-Length: {}\r\n\r\n",
            block.len()
        )
        .into_bytes();
        out.extend_from_slice(block);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }

    pub(crate) fn http_response(body: &str) -> Vec<u8> {
        format!("HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n{body}").into_bytes()
    }

    #[test]
    fn reads_single_response() {
        let data = warc_record("response", &http_response("<p>hi</p>"));
        let record = first_response(&data).unwrap().unwrap();
        assert_eq!(record.version, "WARC/1.0");
        assert_eq!(record.header("warc-target-uri"), Some("https://example.com/"));
        assert_eq!(record.http_body(), b"<p>hi</p>");
    }

    #[test]
    fn skips_request_and_metadata_records() {
        let mut data = warc_record("request", b"GET / HTTP/1.1\r\n\r\n");
        data.extend(warc_record("response", &http_response("body")));
        data.extend(warc_record("metadata", b"fetchTimeMs: 12\r\n"));

        let types: Vec<String> = WarcReader::new(&data)
            .map(|r| r.unwrap().warc_type().unwrap().to_string())
            .collect();
        assert_eq!(types, vec!["request", "response", "metadata"]);
        assert_eq!(first_response(&data).unwrap().unwrap().http_body(), b"body");
    }

    #[test]
    fn no_response_record() {
        let data = warc_record("metadata", b"x");
        assert!(first_response(&data).unwrap().is_none());
        assert!(first_response(b"").unwrap().is_none());
    }

    #[test]
    fn block_may_contain_blank_lines() {
        let body = "line one\r\n\r\nline two";
        let data = warc_record("response", &http_response(body));
        let record = first_response(&data).unwrap().unwrap();
        assert_eq!(record.http_body(), body.as_bytes());
    }

    #[test]
    fn non_http_block_returned_whole() {
        let data = warc_record("response", b"<html></html>");
        let record = first_response(&data).unwrap().unwrap();
        assert_eq!(record.http_body(), b"<html></html>");
    }

    #[test]
    fn overrunning_length_is_an_error() {
        let data = b"WARC/1.0\r\nWARC-Type: response\r\nContent-Length: 999\r\n\r\nshort";
        let err = first_response(data).unwrap_err();
        assert!(err.message.contains("overruns"));
    }

    #[test]
    fn garbage_is_an_error() {
        let err = first_response(b"not a warc\r\n\r\n").unwrap_err();
        assert_eq!(err.offset, 0);
        let err = first_response(b"WARC/1.0\r\nWARC-Type: response\r\n\r\n").unwrap_err();
        assert!(err.message.contains("Content-Length"));
    }
}
