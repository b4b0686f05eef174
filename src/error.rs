use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Why a single image could not be materialized locally.
///
/// None of these escape the image pool; they end up inside a
/// [`FetchStatus::Failed`](crate::downloader::FetchStatus::Failed) outcome.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("timed out after {}s", .after.as_secs())]
    Timeout { after: Duration },

    #[error("response status code {status} invalid")]
    HttpStatus { status: u16 },

    #[error("expected {expected} bytes but downloaded {written}")]
    SizeMismatch { expected: u64, written: u64 },

    #[error("empty response body")]
    EmptyBody,

    #[error("cannot write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fetch task aborted: {0}")]
    TaskAborted(String),
}

impl FetchError {
    pub fn network(url: &str, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Network {
            url: url.to_string(),
            source: Box::new(source),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_reason() {
        let err = FetchError::HttpStatus { status: 404 };
        assert_eq!(err.to_string(), "response status code 404 invalid");

        let err = FetchError::SizeMismatch { expected: 100, written: 40 };
        assert_eq!(err.to_string(), "expected 100 bytes but downloaded 40");

        let err = FetchError::Timeout { after: Duration::from_secs(120) };
        assert_eq!(err.to_string(), "timed out after 120s");
    }

    #[test]
    fn test_io_error_mentions_path() {
        let err = FetchError::io(
            "images/abc.jpg",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("images/abc.jpg"));
    }
}
