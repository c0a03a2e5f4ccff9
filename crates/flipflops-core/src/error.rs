//! Domain error taxonomy.
//!
//! Each variant maps to a recovery policy:
//!
//! | Variant | Scope | Policy |
//! |---------|-------|--------|
//! | `DocumentUnreadable` | one document | skip and continue ingestion |
//! | `DimensionMismatch` | index instance | full rebuild required |
//! | `UnknownCommand`, `InvalidArgument` | one command | report to caller |
//! | `ExamNotFound`, `InvalidAnswer` | one command | report, nothing mutated |
//! | `ModelUnavailable`, `RateLimited` | one turn | retried with backoff, then surfaced |
//! | `InvalidResponseShape` | one turn | one corrective retry, then surfaced |

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FlipflopsError {
    #[error("document unreadable: {path}: {reason}")]
    DocumentUnreadable { path: String, reason: String },

    #[error("embedding dimension mismatch: index uses {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("unknown command: '{0}' (type 'ajuda' for the list of commands)")]
    UnknownCommand(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("exam {0} not found in this session")]
    ExamNotFound(usize),

    #[error("invalid answer: {0}")]
    InvalidAnswer(String),

    #[error("language model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("language model rate limited: {0}")]
    RateLimited(String),

    #[error("language model returned an invalid response shape: {0}")]
    InvalidResponseShape(String),
}

impl FlipflopsError {
    /// Whether the error comes from a transient failure of the model endpoint.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlipflopsError::ModelUnavailable(_) | FlipflopsError::RateLimited(_)
        )
    }

    /// Whether the error invalidates the index instance it came from.
    pub fn requires_rebuild(&self) -> bool {
        matches!(self, FlipflopsError::DimensionMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, FlipflopsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(FlipflopsError::ModelUnavailable("down".into()).is_retryable());
        assert!(FlipflopsError::RateLimited("429".into()).is_retryable());
        assert!(!FlipflopsError::InvalidResponseShape("x".into()).is_retryable());
        assert!(!FlipflopsError::UnknownCommand("foo".into()).is_retryable());
    }

    #[test]
    fn dimension_mismatch_requires_rebuild() {
        let err = FlipflopsError::DimensionMismatch {
            expected: 256,
            actual: 384,
        };
        assert!(err.requires_rebuild());
        assert_eq!(
            err.to_string(),
            "embedding dimension mismatch: index uses 256, got 384"
        );
    }
}
