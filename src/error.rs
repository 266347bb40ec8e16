//! Quorumcast Error Types

use thiserror::Error;

/// Result type alias for Quorumcast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Quorumcast error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Transport errors
    #[error("Transport setup failed ({operation}): {source}")]
    TransportSetup {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an I/O error raised while preparing a socket
    pub fn setup(operation: &'static str, source: std::io::Error) -> Self {
        Error::TransportSetup { operation, source }
    }

    /// Check if this error looks like a missing raw-socket privilege
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Error::TransportSetup { source, .. } | Error::Io(source) => {
                source.kind() == std::io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_setup_error_classification() {
        let err = Error::setup("open raw socket", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(err.is_permission_denied());
        assert!(err.to_string().contains("open raw socket"));

        let err = Error::Transport("send failed".into());
        assert!(!err.is_permission_denied());
    }
}
