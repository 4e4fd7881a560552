use tauri::State;

use crate::config::AppSettings;
use crate::models::error::VpnError;
use crate::state::AppState;

#[tauri::command]
pub fn get_app_settings(state: State<'_, AppState>) -> AppSettings {
    state.settings()
}

/// Update app settings; refused while connected
#[tauri::command]
pub fn update_app_settings(state: State<'_, AppState>, settings: AppSettings) -> Result<AppSettings, VpnError> {
    tracing::info!("Updating app settings");
    state.update_settings(settings)
}
