//! Error types for the voxline domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use std::time::Duration;

use thiserror::Error;

/// The top-level error type for all voxline operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Records errors ---
    #[error("Records error: {0}")]
    Records(#[from] RecordsError),

    // --- Transport errors ---
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // --- Turn errors ---
    #[error("Turn error: {0}")]
    Turn(#[from] TurnError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Call records failure: {0}")]
    Records(#[from] RecordsError),

    #[error("Scheduling backend failed: {0}")]
    Scheduling(String),
}

#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("Call not found: {0}")]
    CallNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Frame serialization failed: {0}")]
    Serialization(String),
}

/// Turn-level failures surfaced to the session layer.
///
/// Every variant is produced after the turn's terminal frame has been
/// attempted, so the transport peer always sees a turn boundary.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Generation stream failed: {0}")]
    Stream(#[from] ProviderError),

    #[error("Arguments for tool '{tool}' are not valid JSON: {reason}")]
    ArgumentParse { tool: String, reason: String },

    #[error("Tool '{tool}' failed for session {session_id}: {source}")]
    Dispatch {
        session_id: String,
        tool: String,
        #[source]
        source: ToolError,
    },

    #[error("Transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Turn exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}

impl TurnError {
    /// Deadline expiry is recoverable at the session level; everything else
    /// ends the session.
    pub fn is_deadline(&self) -> bool {
        matches!(self, Self::DeadlineExceeded(_))
    }
}
