//! Centralized error types for the tick fetcher
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::Epoch;

/// Failures of the request/response channel itself
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Connection closed by remote")]
    Closed,

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure to obtain an authenticated session. Fatal to the current cycle.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Credential is missing or empty: {0}")]
    MissingCredential(String),

    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("Authentication failed: {code} - {message}")]
    AuthenticationFailed { code: String, message: String },

    #[error("Unexpected authentication response: {0}")]
    UnexpectedResponse(String),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Per-instrument remote-call failure
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("API error: {code} - {message}")]
    Api { code: String, message: String },

    #[error("Response has no history field")]
    MissingHistory,

    #[error("Mismatched history lengths: {times} times vs {prices} prices")]
    MismatchedLengths { times: usize, prices: usize },

    #[error("Batch of {len} ticks exceeds requested maximum {max}")]
    Oversized { len: usize, max: usize },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl FetchError {
    /// Whether another attempt on the same session may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Session(SessionError::Timeout(_)) => true,
            FetchError::Api { code, .. } => code == "RateLimit",
            _ => false,
        }
    }
}

/// Per-instrument persistence failure
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Partition I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV encoding error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Batch contains no ticks")]
    EmptyBatch,

    #[error("Batch for {found} handed to writer for {expected}")]
    InstrumentMismatch { expected: String, found: String },

    #[error("Tick {index} goes backwards: epoch {epoch} after {previous}")]
    OutOfOrder {
        index: usize,
        previous: Epoch,
        epoch: Epoch,
    },

    #[error("Epoch {0} cannot be mapped to a calendar date")]
    EpochOutOfRange(Epoch),
}

/// Data-quality problem found while deriving a cursor. Logged, never propagated.
#[derive(Error, Debug)]
pub enum ResolutionAnomaly {
    #[error("Partition {0} has no data rows")]
    EmptyPartition(PathBuf),

    #[error("Last record of {path} is unparsable: {line:?}")]
    UnparsableRecord { path: PathBuf, line: String },

    #[error("Cannot read partition {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum TickError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TickError>;

impl TickError {
    /// Fatal errors end the cycle; everything else is scoped to one instrument
    pub fn is_fatal(&self) -> bool {
        matches!(self, TickError::Connection(_) | TickError::Internal(_))
    }

    /// Get error code for logging/monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            TickError::Connection(e) => match e {
                ConnectionError::MissingCredential(_) => "CONN_001",
                ConnectionError::Timeout(_) => "CONN_002",
                ConnectionError::AuthenticationFailed { .. } => "CONN_003",
                ConnectionError::UnexpectedResponse(_) => "CONN_004",
                ConnectionError::Session(_) => "CONN_005",
            },
            TickError::Fetch(e) => match e {
                FetchError::Api { .. } => "FETCH_001",
                FetchError::MissingHistory => "FETCH_002",
                FetchError::MismatchedLengths { .. } => "FETCH_003",
                FetchError::Oversized { .. } => "FETCH_004",
                FetchError::Session(SessionError::Timeout(_)) => "FETCH_005",
                FetchError::Session(_) => "FETCH_006",
            },
            TickError::Write(e) => match e {
                WriteError::Io(_) => "WRITE_001",
                WriteError::Csv(_) => "WRITE_002",
                WriteError::EmptyBatch => "WRITE_003",
                WriteError::InstrumentMismatch { .. } => "WRITE_004",
                WriteError::OutOfOrder { .. } => "WRITE_005",
                WriteError::EpochOutOfRange(_) => "WRITE_006",
            },
            TickError::Config(_) => "CFG_001",
            TickError::Io(_) => "SYS_001",
            TickError::Internal(_) => "SYS_002",
            TickError::Serialization(_) => "SYS_003",
        }
    }
}
