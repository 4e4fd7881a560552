pub mod account;
pub mod bridge;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod database;
pub mod events;
pub mod executor;
pub mod models;
pub mod orchestrator;
pub mod relay;
pub mod state;

#[cfg(test)]
mod test_support;

// Re-export AppState for commands
pub use state::AppState;

use std::sync::Arc;
use tauri::Manager;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "myvpn=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting MyVPN");

    tauri::Builder::default()
        .setup(|app| {
            let app_data_dir = app.path().app_data_dir()
                .expect("Failed to get app data directory");
            let db_path = app_data_dir.join("myvpn.db");

            tracing::info!("Database path: {:?}", db_path);

            let sink = Arc::new(events::TauriStatusSink::new(app.handle().clone()));
            let app_state = state::AppState::new(db_path, sink)?;

            // The tunnel may have survived a previous run of the app
            let orchestrator = app_state.orchestrator.clone();
            tauri::async_runtime::spawn(async move {
                let status = orchestrator.probe().await;
                tracing::info!("Initial tunnel state: {}", status.state);
            });

            app.manage(app_state);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Bridge capabilities
            commands::run_command,
            commands::call_api,
            commands::bridge_invoke,
            // Connection
            commands::vpn_connect,
            commands::vpn_disconnect,
            commands::vpn_status,
            commands::vpn_probe,
            commands::vpn_select_server,
            commands::list_servers,
            // Account
            commands::login,
            commands::logout,
            commands::register,
            commands::validate_account,
            commands::resend_activation_code,
            commands::get_session,
            commands::list_node_inventory,
            // Settings
            commands::get_app_settings,
            commands::update_app_settings,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
