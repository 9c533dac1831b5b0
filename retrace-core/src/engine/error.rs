use thiserror::Error;

use crate::run::BrowserEngine;

/// Prefix carried by every error that signals a cooperative abort.
pub const CANCELLATION_MARKER: &str = "CANCELLED:";

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("CANCELLED: {0}")]
    Cancelled(String),
    #[error("{message}")]
    Action {
        action_id: Option<String>,
        message: String,
        stack: Option<String>,
    },
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("browser engine {0} is not supported by this executor")]
    Unsupported(BrowserEngine),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Execution timed out after {0} ms")]
    Timeout(u64),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn cancelled() -> Self {
        EngineError::Cancelled("Run was cancelled by user".to_string())
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, EngineError::Cancelled(_))
            || self.to_string().starts_with(CANCELLATION_MARKER)
    }

    pub fn action_id(&self) -> Option<&str> {
        match self {
            EngineError::Action { action_id, .. } => action_id.as_deref(),
            _ => None,
        }
    }

    pub fn stack(&self) -> Option<&str> {
        match self {
            EngineError::Action { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_detected_by_variant_and_marker() {
        assert!(EngineError::cancelled().is_cancellation());
        assert!(EngineError::Other("CANCELLED: Run was cancelled by user".into()).is_cancellation());
        assert!(!EngineError::Other("Element not found".into()).is_cancellation());
        assert!(!EngineError::Timeout(100).is_cancellation());
    }

    #[test]
    fn action_errors_expose_their_origin() {
        let err = EngineError::Action {
            action_id: Some("act_003".into()),
            message: "Element not found".into(),
            stack: Some("at click".into()),
        };
        assert_eq!(err.to_string(), "Element not found");
        assert_eq!(err.action_id(), Some("act_003"));
        assert_eq!(err.stack(), Some("at click"));
    }
}
