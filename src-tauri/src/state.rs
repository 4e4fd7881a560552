use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use parking_lot::RwLock;
use rusqlite::Connection;

use crate::account::AccountService;
use crate::bridge::Bridge;
use crate::config::AppSettings;
use crate::credentials::{CredentialCache, KeyValueStore, SessionStore, SqliteKvStore};
use crate::database;
use crate::executor::local::LocalExecutor;
use crate::executor::CommandExecutor;
use crate::models::error::VpnError;
use crate::orchestrator::commands::url_host;
use crate::orchestrator::{Orchestrator, StatusSink};
use crate::relay::{HttpRelay, SwitchableRelay};

fn relay_for(settings: &AppSettings) -> Result<HttpRelay, VpnError> {
    Ok(HttpRelay::new(&url_host(&settings.api_host)?, settings.api_port))
}

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    settings: RwLock<AppSettings>,
    relay: Arc<SwitchableRelay>,
    pub bridge: Bridge,
    pub orchestrator: Arc<Orchestrator>,
    pub account: AccountService,
}

impl AppState {
    /// Open the database and wire the services to it
    pub fn new(db_path: PathBuf, sink: Arc<dyn StatusSink>) -> Result<Self, VpnError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                VpnError::Internal(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = database::init_database(&db_path)?;
        let mut settings = database::get_app_settings(&conn)?;
        if let Err(e) = settings.validate().and_then(|_| relay_for(&settings).map(|_| ())) {
            tracing::error!("Stored settings are unusable, using defaults: {}", e);
            settings = AppSettings::default();
        }
        tracing::info!(
            "Loaded settings: API {}:{}, {} servers",
            settings.api_host,
            settings.api_port,
            settings.servers.len()
        );

        let db = Arc::new(Mutex::new(conn));
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteKvStore::new(db.clone()));
        let sessions = SessionStore::new(store.clone());
        let credentials = CredentialCache::new(store);

        let executor: Arc<dyn CommandExecutor> = Arc::new(LocalExecutor::new());
        let relay = Arc::new(SwitchableRelay::new(Arc::new(relay_for(&settings)?)));

        let orchestrator = Arc::new(Orchestrator::new(
            executor.clone(),
            relay.clone(),
            sessions.clone(),
            credentials,
            sink,
            &settings,
        )?);
        let bridge = Bridge::new(executor, relay.clone());
        let account = AccountService::new(relay.clone(), sessions, orchestrator.clone());

        Ok(Self {
            db,
            settings: RwLock::new(settings),
            relay,
            bridge,
            orchestrator,
            account,
        })
    }

    pub fn settings(&self) -> AppSettings {
        self.settings.read().clone()
    }

    /// Validate, apply and persist new settings.
    ///
    /// Refused while a connection is up or being set up.
    pub fn update_settings(&self, settings: AppSettings) -> Result<AppSettings, VpnError> {
        settings.validate()?;
        let relay = relay_for(&settings)?;

        self.orchestrator.apply_settings(&settings)?;
        {
            let conn = self.db.lock().map_err(|_| VpnError::DatabaseError {
                message: "Failed to acquire database lock".to_string(),
            })?;
            database::upsert_app_settings(&conn, &settings)?;
        }
        self.relay.replace(Arc::new(relay));
        tracing::info!("Settings updated, API at {}:{}", settings.api_host, settings.api_port);

        *self.settings.write() = settings.clone();
        Ok(settings)
    }
}
