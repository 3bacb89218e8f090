//! Error types for the FleetView environment abstraction.

use thiserror::Error;

/// Errors that can occur while talking to the environment.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EnvError {
    /// The underlying map SDK rejected or failed a call
    #[error("Map widget call `{call}` failed: {reason}")]
    MapCallFailed { call: &'static str, reason: String },

    /// A marker/overlay/listener handle the widget does not know about
    #[error("Unknown handle: {0}")]
    UnknownHandle(String),

    /// The widget cannot deliver this event type
    #[error("Unsupported map event: {0}")]
    UnsupportedEvent(String),

    /// Context operation failed
    #[error("Context error: {0}")]
    ContextError(String),
}

impl EnvError {
    /// Creates a map call failure.
    pub fn map_call(call: &'static str, reason: impl Into<String>) -> Self {
        Self::MapCallFailed {
            call,
            reason: reason.into(),
        }
    }

    /// Creates an unknown-handle error.
    pub fn unknown(handle: impl std::fmt::Display) -> Self {
        Self::UnknownHandle(handle.to_string())
    }
}
