use tauri::State;

use crate::bridge::{BridgeResponse, RunCommandRequest};
use crate::models::error::VpnError;
use crate::relay::{ApiRequest, ApiResponse};
use crate::state::AppState;

#[tauri::command]
pub async fn run_command(state: State<'_, AppState>, command_line: String) -> Result<String, VpnError> {
    state.bridge.run_command(&RunCommandRequest { command_line }).await
}

#[tauri::command]
pub async fn call_api(state: State<'_, AppState>, request: ApiRequest) -> Result<ApiResponse, VpnError> {
    state.bridge.call_api(&request).await
}

/// Single entry point taking the capability name, for callers that address channels by string
#[tauri::command]
pub async fn bridge_invoke(
    state: State<'_, AppState>,
    channel: String,
    payload: serde_json::Value,
) -> Result<BridgeResponse, VpnError> {
    state.bridge.dispatch(&channel, payload).await
}
