use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("no such entity: {0}")]
    NotFound(String),
    #[error("runtime call timed out after {0:?}")]
    Timeout(Duration),
    #[error("event stream error: {0}")]
    Stream(String),
    #[error("runtime error: {0}")]
    Backend(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}
