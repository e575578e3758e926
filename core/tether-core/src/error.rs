//! Error types for tether-core operations.

use std::path::PathBuf;

use tether_protocol::ErrorInfo;

/// All errors that can occur in tether-core operations.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Durable store I/O failed: {context}: {source}")]
    StoreIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Durable store path has no parent directory: {0}")]
    StorePath(PathBuf),

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Not connected to the session channel")]
    NotConnected,

    #[error("Channel transport failed: {0}")]
    Transport(String),

    #[error("Channel protocol error: {0}")]
    Protocol(ErrorInfo),

    // ─────────────────────────────────────────────────────────────────────
    // Backend Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Backend request failed: {endpoint}: {details}")]
    Api { endpoint: String, details: String },

    #[error("Rollback rejected by server: {0}")]
    RollbackRejected(String),

    #[error("Message index {index} is below the rollback baseline {baseline}")]
    RollbackBelowBaseline { index: u64, baseline: u64 },

    // ─────────────────────────────────────────────────────────────────────
    // State Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Agent is busy ({phase}); wait for the current turn or stop it")]
    Busy { phase: &'static str },

    #[error("Message content is empty")]
    EmptyMessage,

    #[error("Session title is empty")]
    EmptyTitle,

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Home directory not found")]
    HomeDirNotFound,
}

impl TetherError {
    pub fn api(endpoint: impl Into<String>, details: impl Into<String>) -> Self {
        TetherError::Api {
            endpoint: endpoint.into(),
            details: details.into(),
        }
    }
}

impl From<ErrorInfo> for TetherError {
    fn from(info: ErrorInfo) -> Self {
        TetherError::Protocol(info)
    }
}

/// Convenience type alias for Results using TetherError.
pub type Result<T> = std::result::Result<T, TetherError>;

// Conversion for string error compatibility
impl From<TetherError> for String {
    fn from(err: TetherError) -> String {
        err.to_string()
    }
}
