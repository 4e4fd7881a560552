use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum VpnError {
    #[error("Capability denied: {0}")]
    CapabilityDenied(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error (status {status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Command failed: {command} (exit code: {exit_code})\nStderr: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Database error: {message}")]
    DatabaseError { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VpnError {
    /// Whether repeating the same user action may succeed. Nothing in the
    /// crate retries on its own; this only drives the UI hint.
    pub fn is_retryable(&self) -> bool {
        match self {
            VpnError::NetworkError(_) => true,
            VpnError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Get a suggestion for recovering from this error
    pub fn recovery_suggestion(&self) -> &str {
        match self {
            VpnError::CapabilityDenied(_) => "This operation is not available to the interface",
            VpnError::NetworkError(_) => "Check your internet connection and try again",
            VpnError::ApiError { status, .. } if *status == 401 || *status == 403 => {
                "Your session has expired, log in again"
            }
            VpnError::ApiError { .. } => "The VPN service rejected the request, try again later",
            VpnError::CommandFailed { .. } => {
                "Check that the tunnel client is installed and you have administrator rights"
            }
            VpnError::NotAuthenticated(_) => "Log in to your account first",
            VpnError::ServerNotFound(_) => "Pick a server from the list",
            VpnError::InvalidArgument(_) => "Review the values you entered",
            VpnError::InvalidOperation { .. } => "Disconnect before changing this",
            VpnError::ParseError(_) => "The VPN service sent an unexpected response",
            VpnError::DatabaseError { .. } => "Try restarting the application",
            VpnError::Internal(_) => "Restart the application and try again",
        }
    }
}

impl From<rusqlite::Error> for VpnError {
    fn from(e: rusqlite::Error) -> Self {
        VpnError::DatabaseError {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for VpnError {
    fn from(e: serde_json::Error) -> Self {
        VpnError::ParseError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VpnError>;
