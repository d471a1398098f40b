//! Task failure type

use serde::{Deserialize, Serialize};

use crate::error::panic_message;

/// Why a task's operation did not produce a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The operation returned an error
    Error,
    /// The operation panicked
    Panic,
    /// The operation stopped at a cancellation checkpoint
    Cancelled,
}

/// Error type for task failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskError {
    /// Error message
    pub message: String,

    /// Failure classification
    pub kind: FailureKind,

    /// Additional error details (for debugging)
    pub details: Option<serde_json::Value>,
}

impl TaskError {
    /// Create a new error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Error,
            details: None,
        }
    }

    /// The error an operation returns when it observes cancellation
    pub fn cancelled() -> Self {
        Self {
            message: "cancelled".to_string(),
            kind: FailureKind::Cancelled,
            details: None,
        }
    }

    /// Create an error describing a panic
    pub fn panicked(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Panic,
            details: None,
        }
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Whether this error reports an observed cancellation
    pub fn is_cancellation(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Self::panicked(panic_message(&*payload))
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            FailureKind::Panic => write!(f, "panicked: {}", self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for TaskError {}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}
