//! Error types for the core engine.
//!
//! Only resource and source-level failures are errors here. Malformed
//! component metadata is sanitized rather than rejected, and compiler
//! failures travel inside `BuildResult::error`.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while turning a component's source into dependency edges.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("cannot read component source {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported component source: {}", .0.display())]
    UnsupportedSource(PathBuf),

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

/// Build pipeline lifecycle and backpressure errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The task queue is saturated; the caller must retry or drop the build itself.
    #[error("build queue is full ({capacity} tasks pending)")]
    QueueFull { capacity: usize },

    #[error("build pipeline is already started")]
    AlreadyStarted,

    #[error("build pipeline is stopped")]
    Stopped,

    #[error("build worker failed to join: {0}")]
    Join(String),
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan root not found: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_full_message() {
        let err = PipelineError::QueueFull { capacity: 8 };
        assert_eq!(err.to_string(), "build queue is full (8 tasks pending)");
    }

    #[test]
    fn test_parse_error_mentions_path() {
        let err = AnalyzerError::Parse {
            path: PathBuf::from("src/Card.tsx"),
            message: "Unexpected token".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("src/Card.tsx"));
        assert!(msg.contains("Unexpected token"));
    }

    #[test]
    fn test_scan_error_from_analyzer() {
        let err: ScanError = AnalyzerError::UnsupportedSource(PathBuf::from("a.vue")).into();
        assert!(matches!(err, ScanError::Analyzer(_)));
    }
}
