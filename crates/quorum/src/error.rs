use std::time::Duration;

use thiserror::Error;

/// Why a single peer probe did not report the peer as healthy.
#[derive(Debug, Error)]
pub enum Error {
    /// The probe task was cancelled before it could run.
    #[error("probe cancelled")]
    Cancelled,

    /// TCP connection to the peer failed.
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    /// The HTTP request to the peer failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The peer answered with a non-healthy status.
    #[error("unhealthy status: {0}")]
    Status(u16),

    /// The probe did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}
