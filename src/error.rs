//! Error types for every layer of the sync client

use thiserror::Error;

/// Durable store errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Storage could not be opened, was closed, or a SQLite call failed
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A stored row could not be decoded
    #[error("Corrupt record in {table}: {message}")]
    Corrupt { table: &'static str, message: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::StorageUnavailable(e.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Server request errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// No response at all
    #[error("Network request failed: {0}")]
    Network(String),

    /// Non-2xx response
    #[error("{message}")]
    Http { status: u16, message: String },

    /// 2xx response whose body did not match the expected shape
    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Network failures, 408, 429 and 5xx are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Http { status, .. } => is_retryable_status(*status),
            ApiError::Decode(_) => false,
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Push channel errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PushError {
    /// Transport-level failure (open, read or write)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Reconnect attempts exceeded
    #[error("Gave up reconnecting after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// Outbound message could not be encoded
    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type PushResult<T> = std::result::Result<T, PushError>;

/// Top-level error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Push(#[from] PushError),

    #[error("Device is offline")]
    Offline,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
