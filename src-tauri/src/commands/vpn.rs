use tauri::State;

use crate::models::connection::ConnectionStatus;
use crate::models::error::VpnError;
use crate::models::server::{ServerDescriptor, ServerId};
use crate::state::AppState;

#[tauri::command]
pub async fn vpn_connect(state: State<'_, AppState>) -> Result<ConnectionStatus, VpnError> {
    state.orchestrator.connect().await
}

// Async so the teardown task is spawned on the runtime
#[tauri::command]
pub async fn vpn_disconnect(state: State<'_, AppState>) -> Result<ConnectionStatus, VpnError> {
    Ok(state.orchestrator.disconnect())
}

#[tauri::command]
pub fn vpn_status(state: State<'_, AppState>) -> ConnectionStatus {
    state.orchestrator.status()
}

#[tauri::command]
pub async fn vpn_probe(state: State<'_, AppState>) -> Result<ConnectionStatus, VpnError> {
    Ok(state.orchestrator.probe().await)
}

#[tauri::command]
pub fn vpn_select_server(state: State<'_, AppState>, server_id: String) -> Result<ConnectionStatus, VpnError> {
    state.orchestrator.select_server(&ServerId(server_id))
}

#[tauri::command]
pub fn list_servers(state: State<'_, AppState>, query: Option<String>) -> Vec<ServerDescriptor> {
    state.orchestrator.servers(query.as_deref().unwrap_or(""))
}
