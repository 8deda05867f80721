use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid ignored metric pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Send timed out after {0:?}")]
    Timeout(Duration),

    #[error("Bundler overflow: {limit} records already buffered")]
    Overflow { limit: usize },

    #[error("Bundler is closed")]
    Closed,
}

impl From<tonic::transport::Error> for ExporterError {
    fn from(err: tonic::transport::Error) -> Self {
        ExporterError::Transport(err.to_string())
    }
}

impl From<tonic::Status> for ExporterError {
    fn from(status: tonic::Status) -> Self {
        ExporterError::Transport(format!("{:?}: {}", status.code(), status.message()))
    }
}

pub type Result<T> = std::result::Result<T, ExporterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_maps_to_transport() {
        let err: ExporterError = tonic::Status::unauthenticated("bad key").into();
        match err {
            ExporterError::Transport(msg) => {
                assert!(msg.contains("Unauthenticated"));
                assert!(msg.contains("bad key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_overflow_message() {
        let err = ExporterError::Overflow { limit: 10 };
        assert_eq!(err.to_string(), "Bundler overflow: 10 records already buffered");
    }
}
