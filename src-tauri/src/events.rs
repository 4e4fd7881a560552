use tauri::{AppHandle, Emitter};

use crate::models::connection::ConnectionStatus;
use crate::models::error::VpnError;
use crate::orchestrator::StatusSink;

/// Event name for connection state changes
pub const STATUS_EVENT: &str = "vpn:status";

/// Event name for background teardown failures
pub const TEARDOWN_FAILED_EVENT: &str = "vpn:teardown-failed";

/// Forwards orchestrator notifications to the webview
pub struct TauriStatusSink {
    app: AppHandle,
}

impl TauriStatusSink {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl StatusSink for TauriStatusSink {
    fn status_changed(&self, status: &ConnectionStatus) {
        if let Err(e) = self.app.emit(STATUS_EVENT, status) {
            tracing::warn!("Failed to emit {} event: {}", STATUS_EVENT, e);
        }
    }

    fn teardown_failed(&self, error: &VpnError) {
        if let Err(e) = self.app.emit(TEARDOWN_FAILED_EVENT, error) {
            tracing::warn!("Failed to emit {} event: {}", TEARDOWN_FAILED_EVENT, e);
        }
    }
}
