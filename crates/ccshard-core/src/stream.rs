//! HTTP byte-range download with gzip decompression.
//!
//! Uses async reqwest internally with tokio::time::timeout for stall detection,
//! but presents a sync interface so the pipelines stay single-threaded.

use std::io::{self, Read};
use std::sync::{LazyLock, OnceLock};
use std::time::Duration;

use flate2::read::MultiGzDecoder;

use crate::retry::{Retryable, retry_with_backoff};

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Process-wide HTTP settings, set once at startup by the CLI.
#[derive(Debug, Clone, Copy)]
pub struct HttpConfig {
    /// Maximum time to wait for a range body before giving up
    pub read_timeout: Duration,
    /// Retry attempts for transient download failures
    pub max_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

static HTTP_CONFIG: OnceLock<HttpConfig> = OnceLock::new();

/// Install the global HTTP config. Later calls are ignored.
pub fn set_http_config(config: HttpConfig) {
    if HTTP_CONFIG.set(config).is_err() {
        log::debug!("HTTP config already set, ignoring override");
    }
}

/// Current HTTP config (defaults if never set).
pub fn http_config() -> HttpConfig {
    HTTP_CONFIG.get().copied().unwrap_or_default()
}

/// Error types for stream operations
#[derive(Debug)]
pub enum StreamError {
    /// HTTP error with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// I/O error (timeouts, gzip decode failures)
    Io(std::io::Error),
    /// Zero-length range, or one ending past `u64::MAX`
    InvalidRange {
        filename: String,
        offset: u64,
        length: u64,
    },
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::InvalidRange {
                filename,
                offset,
                length,
            } => write!(f, "invalid byte range {filename}@{offset}+{length}"),
        }
    }
}

impl std::error::Error for StreamError {}

impl StreamError {
    /// Create HTTP error from reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

impl Retryable for StreamError {
    fn is_retryable(&self) -> bool {
        match self {
            // Client errors won't change on retry, except throttling
            Self::Http {
                status: Some(s), ..
            } => !(400..500).contains(s) || *s == 429,
            Self::Http { status: None, .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            Self::InvalidRange { .. } => false,
        }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Fetches a byte range of a remote gzip file and returns the decompressed bytes.
///
/// Common Crawl stores both CDX chunks and WARC records as independent gzip
/// members, so any aligned range decompresses on its own.
pub trait RangeDownloader {
    fn download_and_unzip(
        &self,
        filename: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, StreamError>;
}

impl<D: RangeDownloader + ?Sized> RangeDownloader for &D {
    fn download_and_unzip(
        &self,
        filename: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, StreamError> {
        (**self).download_and_unzip(filename, offset, length)
    }
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(8)
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP, object store and metrics server.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// [`RangeDownloader`] over plain HTTP `Range` requests.
#[derive(Debug, Clone)]
pub struct HttpRangeDownloader {
    base_url: String,
}

impl HttpRangeDownloader {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, filename: &str) -> String {
        format!("{}/{}", self.base_url, filename.trim_start_matches('/'))
    }

    /// GET the inclusive byte range `first..=last`.
    fn fetch_range(&self, url: &str, first: u64, last: u64) -> Result<Vec<u8>, StreamError> {
        let range = format!("bytes={first}-{last}");
        let read_timeout = http_config().read_timeout;

        SHARED_RUNTIME.handle().block_on(async {
            let response = SHARED_CLIENT
                .get(url)
                .header(reqwest::header::RANGE, range)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| StreamError::from_reqwest(&e))?;

            match tokio::time::timeout(read_timeout, response.bytes()).await {
                Ok(body) => body
                    .map(|b| b.to_vec())
                    .map_err(|e| StreamError::from_reqwest(&e)),
                Err(_) => Err(StreamError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("read timeout ({}s)", read_timeout.as_secs()),
                ))),
            }
        })
    }
}

impl RangeDownloader for HttpRangeDownloader {
    fn download_and_unzip(
        &self,
        filename: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, StreamError> {
        let last = length
            .checked_sub(1)
            .and_then(|n| offset.checked_add(n))
            .ok_or_else(|| StreamError::InvalidRange {
                filename: filename.to_string(),
                offset,
                length,
            })?;
        let url = self.url_for(filename);
        let label = format!("{filename}@{offset}+{length}");
        let compressed = retry_with_backoff(&label, http_config().max_retries, || {
            self.fetch_range(&url, offset, last)
        })?;
        Ok(gunzip(&compressed)?)
    }
}

/// Decompress a (possibly multi-member) gzip buffer.
pub fn gunzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4);
    MultiGzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn http_err(status: u16) -> StreamError {
        StreamError::Http {
            status: Some(status),
            message: "test".to_string(),
        }
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::fast());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn http_404_not_retryable() {
        assert!(!http_err(404).is_retryable());
    }

    #[test]
    fn http_416_not_retryable() {
        assert!(!http_err(416).is_retryable());
    }

    #[test]
    fn http_429_retryable() {
        assert!(http_err(429).is_retryable());
    }

    #[test]
    fn http_503_retryable() {
        assert!(http_err(503).is_retryable());
    }

    #[test]
    fn http_none_status_retryable() {
        let err = StreamError::Http {
            status: None,
            message: "connection refused".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn io_timeout_retryable() {
        let err = StreamError::Io(io::Error::new(io::ErrorKind::TimedOut, "timeout"));
        assert!(err.is_retryable());
    }

    #[test]
    fn io_invalid_data_not_retryable() {
        let err = StreamError::Io(io::Error::new(io::ErrorKind::InvalidData, "bad gzip"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn display_http_with_status() {
        assert_eq!(format!("{}", http_err(404)), "HTTP 404: test");
    }

    #[test]
    fn gunzip_single_member() {
        let data = gzip(b"hello world");
        assert_eq!(gunzip(&data).unwrap(), b"hello world");
    }

    #[test]
    fn gunzip_concatenated_members() {
        let mut data = gzip(b"first\n");
        data.extend(gzip(b"second\n"));
        assert_eq!(gunzip(&data).unwrap(), b"first\nsecond\n");
    }

    #[test]
    fn gunzip_rejects_garbage() {
        assert!(gunzip(b"definitely not gzip").is_err());
    }

    #[test]
    fn url_for_joins_without_double_slash() {
        let d = HttpRangeDownloader::new("https://data.commoncrawl.org/");
        assert_eq!(
            d.url_for("crawl-data/x.warc.gz"),
            "https://data.commoncrawl.org/crawl-data/x.warc.gz"
        );
        assert_eq!(d.url_for("/a.gz"), "https://data.commoncrawl.org/a.gz");
    }

    #[test]
    fn zero_length_range_rejected() {
        let d = HttpRangeDownloader::new("http://127.0.0.1:9");
        let err = d.download_and_unzip("a.gz", 10, 0).unwrap_err();
        assert!(matches!(
            err,
            StreamError::InvalidRange {
                offset: 10,
                length: 0,
                ..
            }
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn range_past_u64_max_rejected() {
        let d = HttpRangeDownloader::new("http://127.0.0.1:9");
        let err = d.download_and_unzip("x.gz", u64::MAX, 2).unwrap_err();
        assert!(matches!(
            err,
            StreamError::InvalidRange {
                offset: u64::MAX,
                length: 2,
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            format!("invalid byte range x.gz@{}+2", u64::MAX)
        );
    }

}
