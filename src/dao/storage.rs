use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
///
/// Backends fold their driver-specific failures into this single shape, so
/// the service layer treats every storage fault as a (possibly transient)
/// availability problem rather than inspecting driver error codes.
#[derive(Debug, Error)]
#[error("storage unavailable: {message}")]
pub struct StorageError {
    message: String,
    #[source]
    source: Box<dyn Error + Send + Sync>,
}

impl StorageError {
    /// Wrap a backend failure with a human-readable description.
    pub fn unavailable(
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_the_message_and_keeps_the_source() {
        let err = StorageError::unavailable(
            "ping failed",
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert_eq!(err.to_string(), "storage unavailable: ping failed");
        assert!(err.source().is_some());
    }
}
