//! Error types
//!
//! None of these errors ever reach the HTTP response path. They surface from
//! setup calls (configuration, directory snapshots) and from the background
//! persistence tasks, where they are logged and swallowed.

use thiserror::Error;

/// Errors produced by the audit subsystem
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// User directory snapshot could not be loaded
    #[error("User directory error: {0}")]
    Directory(String),

    /// Audit pipeline error (queue closed, worker gone)
    #[error("Audit error: {0}")]
    Audit(String),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

/// Result type alias using the crate error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.to_string(), "I/O error: gone");
    }

    #[test]
    fn test_serialization_error_converts() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = parse.into();
        assert!(err.to_string().starts_with("Serialization error:"));
    }

    #[test]
    fn test_directory_error_display() {
        let err = Error::Directory("snapshot missing".to_string());
        assert_eq!(err.to_string(), "User directory error: snapshot missing");
    }
}
