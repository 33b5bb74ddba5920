use thiserror::Error;
use super::types::{UploadId, UploadStatus};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("HTTP Request error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Chunk request timed out")]
    Timeout,

    #[error("Server error: status code {status_code}, message: {message}")]
    ServerError {
        status_code: u16,
        message: String,
    },

    #[error("Server rejected chunk: {reason}")]
    Rejected {
        reason: String,
    },

    #[error("Malformed server response: {0}")]
    MalformedResponse(String),

    #[error("Invalid upload record: {0}")]
    InvalidRecord(String),

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("Upload {0} not found")]
    NotFound(UploadId),

    #[error("Upload {identifier} cannot move from {from} to {to}")]
    InvalidTransition {
        identifier: UploadId,
        from: UploadStatus,
        to: UploadStatus,
    },

    #[error("Param error: {0}")]
    ParamError(String),

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Config error: {0}")]
    ConfigError(#[from] toml::de::Error),

    #[error("Manager shut down")]
    ManagerShutdown,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl UploadError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status_code,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Whether the retry policy may send the same chunk again.
    ///
    /// Malformed responses, bad records and local file errors are fatal for the item.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::HttpError(err) => !err.is_decode() && !err.is_builder(),
            UploadError::Timeout | UploadError::Rejected { .. } => true,
            UploadError::ServerError { status_code, .. } => {
                *status_code >= 500 || *status_code == 429
            }
            _ => false,
        }
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
