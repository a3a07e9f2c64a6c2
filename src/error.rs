use std::io;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Configuration parsing error: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Service unavailable during {operation}: {message}")]
    ServiceUnavailable { operation: String, message: String },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Permission denied during {operation}: {message}")]
    PermissionDenied { operation: String, message: String },

    #[error("Precondition failed during {operation}: {code}: {message}")]
    PreconditionFailed {
        operation: String,
        code: String,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bulk delete left {remaining} key(s) in {container}")]
    PartialBatchFailure { container: String, remaining: usize },

    #[error("S3 config error: {0}")]
    S3Config(String),

    #[error("Local storage error: {0}")]
    Local(#[from] LocalError),
}

impl StorageError {
    /// Transient errors are worth retrying; everything else is a final answer
    /// from the service.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ServiceUnavailable { .. } | Self::Timeout(_) => true,
            Self::Local(LocalError::Io(e)) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    pub fn service_unavailable(operation: &str, message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LocalError {
    #[error("Storage root does not exist: {0}")]
    MissingRoot(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Filesystem error: {0}")]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StorageError::service_unavailable("list_objects", "503").is_transient());
        assert!(StorageError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!StorageError::PermissionDenied {
            operation: "delete_container".into(),
            message: "AccessDenied".into(),
        }
        .is_transient());
        assert!(!StorageError::PreconditionFailed {
            operation: "delete_container".into(),
            code: "BucketNotEmpty".into(),
            message: "not empty".into(),
        }
        .is_transient());
        assert!(!StorageError::NotFound("gone".into()).is_transient());
    }

    #[test]
    fn local_io_errors_follow_kind() {
        let interrupted = StorageError::from(LocalError::Io(io::Error::from(
            io::ErrorKind::Interrupted,
        )));
        assert!(interrupted.is_transient());

        let denied = StorageError::from(LocalError::Io(io::Error::from(
            io::ErrorKind::PermissionDenied,
        )));
        assert!(!denied.is_transient());
    }
}
