use tauri::State;

use crate::models::account::{InventoryReport, SessionInfo};
use crate::models::error::VpnError;
use crate::state::AppState;

#[tauri::command]
pub async fn login(state: State<'_, AppState>, email: String, password: String) -> Result<SessionInfo, VpnError> {
    state.account.login(&email, &password).await
}

#[tauri::command]
pub async fn logout(state: State<'_, AppState>) -> Result<(), VpnError> {
    state.account.logout()
}

#[tauri::command]
pub async fn register(
    state: State<'_, AppState>,
    email: String,
    password: String,
    username: String,
) -> Result<(), VpnError> {
    state.account.register(&email, &password, &username).await
}

#[tauri::command]
pub async fn validate_account(state: State<'_, AppState>, email: String, code: String) -> Result<(), VpnError> {
    state.account.validate(&email, &code).await
}

#[tauri::command]
pub async fn resend_activation_code(
    state: State<'_, AppState>,
    email: String,
    password: String,
    username: String,
) -> Result<(), VpnError> {
    state.account.resend_code(&email, &password, &username).await
}

#[tauri::command]
pub fn get_session(state: State<'_, AppState>) -> Result<Option<SessionInfo>, VpnError> {
    state.account.current_session()
}

#[tauri::command]
pub async fn list_node_inventory(state: State<'_, AppState>) -> Result<InventoryReport, VpnError> {
    state.account.list_node_inventory().await
}
