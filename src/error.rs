use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CellfetchError>;

/// Fatal errors. Anything surfaced through this type stops the run.
///
/// Per-item problems (bad identifiers, remote error codes, throttling, network
/// hiccups) are [`FetchFailure`] values instead and never abort the pipeline.
#[derive(Debug, Error)]
pub enum CellfetchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cursor file {path} is locked by another process: {reason}")]
    Lock { path: PathBuf, reason: String },

    #[error("cursor file {path} is corrupt: {reason}")]
    CheckpointCorrupt { path: PathBuf, reason: String },

    #[error("output header mismatch in {path}: expected `{expected}`, found `{found}`")]
    SinkHeaderMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("invalid cell key `{key}`: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("http client setup failed: {reason}")]
    HttpClient { reason: String },

    #[error(
        "drain barrier failed: {admitted} admissions vs {completed} completions \
         ({unfinished} identifiers never completed)"
    )]
    DrainMismatch {
        admitted: u64,
        completed: u64,
        unfinished: usize,
    },

    #[error("fetch worker {worker} panicked")]
    WorkerPanicked { worker: usize },

    #[error("config file error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

/// Per-item fetch failure. Each variant maps to a different recovery action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    /// Identifier or response body could not be interpreted. Dropped.
    #[error("format error: {reason}")]
    Format { reason: String },

    /// The service answered with a recognised error code. Dropped.
    #[error("remote error {code}: {message}")]
    Domain { code: i64, message: String },

    /// Quota exceeded. Retried through the fallback URL, then requeued.
    #[error("rate limited")]
    RateLimited,

    /// DNS, connect, timeout or an unexpected HTTP status. Dropped.
    #[error("transport error: {reason}")]
    Transport { reason: String },
}

/// Why an HTTP exchange produced no response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("failed to reach server: {0}")]
    Connect(String),

    #[error("failed to read body: {0}")]
    Body(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl From<TransportError> for FetchFailure {
    fn from(err: TransportError) -> Self {
        Self::Transport {
            reason: err.to_string(),
        }
    }
}

impl FetchFailure {
    /// Short label for log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Format { .. } => "format",
            Self::Domain { .. } => "domain",
            Self::RateLimited => "rate_limited",
            Self::Transport { .. } => "transport",
        }
    }
}
