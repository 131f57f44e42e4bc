use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("network unreachable: {host}: {message}")]
    NetworkUnreachable { host: String, message: String },

    #[error("no entry matches `{pattern}` in {location}")]
    NotFound { pattern: String, location: String },

    #[error("remote directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("invalid pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

impl FetchError {
    /// Whether another mirror may succeed where this one failed.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, FetchError::NetworkUnreachable { .. })
    }

    pub(crate) fn from_http(host: &str, err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            return FetchError::NetworkUnreachable {
                host: host.to_string(),
                message: err.to_string(),
            };
        }

        FetchError::Transfer(err.to_string())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("archive not found: {0}")]
    Missing(PathBuf),

    #[error("unsupported archive format: {0}")]
    Unsupported(PathBuf),

    #[error("failed to unpack {path}: {message}")]
    Unpack { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure of one component's fetch and extract pass.
#[derive(thiserror::Error, Debug)]
pub enum AcquireError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("source tree missing for {0}")]
    MissingSource(String),

    #[error("{stage} failed, see {}", .log.display())]
    StepFailed { stage: String, log: PathBuf },

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_is_retryable() {
        let err = FetchError::NetworkUnreachable {
            host: "ftp.example.org".to_string(),
            message: "connection refused".to_string(),
        };

        assert!(err.is_unreachable());

        let err = FetchError::NotFound {
            pattern: "gcc-([0-9.]+)".to_string(),
            location: "/pub/gcc/releases/".to_string(),
        };

        assert!(!err.is_unreachable());
    }

    #[tokio::test]
    async fn refused_http_connection_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = reqwest::get(format!("http://127.0.0.1:{}/", port))
            .await
            .unwrap_err();

        assert!(FetchError::from_http("127.0.0.1", err).is_unreachable());
    }

    #[tokio::test]
    async fn http_timeout_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // accepted but never answered
        let held = tokio::spawn(async move {
            let accepted = listener.accept().await;
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            drop(accepted);
        });

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(300))
            .build()
            .unwrap();

        let err = client
            .get(format!("http://127.0.0.1:{}/", port))
            .send()
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(FetchError::from_http("127.0.0.1", err).is_unreachable());

        held.abort();
    }

    #[test]
    fn step_failed_names_log() {
        let err = BuildError::StepFailed {
            stage: "configure binutils i686".to_string(),
            log: PathBuf::from("/tmp/build/binutils/x86/config_error.log"),
        };

        assert_eq!(
            err.to_string(),
            "configure binutils i686 failed, see /tmp/build/binutils/x86/config_error.log"
        );
    }
}
