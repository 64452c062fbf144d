use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("NOT_AUTHORIZED: {0}")]
    NotAuthorized(String),
    #[error("NETWORK: {0}")]
    TransientNetwork(String),
    #[error("CORRUPTED_INDEX: {0}")]
    CorruptedIndex(String),
    #[error("CORRUPTED_CONTAINER: {0}")]
    CorruptedContainer(String),
    #[error("MISSING_IDENTIFIER: {0}")]
    MissingIdentifier(String),
    #[error("INVALID_ENCODING: {0}")]
    InvalidEncoding(String),
    #[error("VERSION_CONFLICT: {0}")]
    VersionConflict(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("REMOTE: {0}")]
    Remote(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("CONFIG: {0}")]
    Config(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl SyncError {
    /// True for failures the caller may retry without re-authenticating.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<zip::result::ZipError> for SyncError {
    fn from(value: zip::result::ZipError) -> Self {
        Self::CorruptedContainer(value.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_connect() || value.is_timeout() || value.is_request() {
            return Self::TransientNetwork(value.to_string());
        }
        if let Some(status) = value.status() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Self::NotAuthorized(value.to_string());
            }
        }
        Self::Remote(value.to_string())
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
