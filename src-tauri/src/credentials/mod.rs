//! Durable session and tunnel credential storage.
//!
//! Everything lives in one key-value store so logout can clear it together.
//! The tunnel auth key is stored alongside the id of the server it was issued
//! for; a key is only handed out for that server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::debug;

use crate::database;
use crate::models::account::Session;
use crate::models::error::VpnError;
use crate::models::server::ServerId;

pub mod keys {
    pub const SESSION_TOKEN: &str = "sessionToken";
    pub const USERNAME: &str = "username";
    pub const USER_EMAIL: &str = "userEmail";
    pub const USER_ROLE: &str = "userRole";
    pub const AUTH_KEY: &str = "authKey";
    pub const AUTH_KEY_SERVER_ID: &str = "authKeyServerId";

    pub const ALL: [&str; 6] = [
        SESSION_TOKEN,
        USERNAME,
        USER_EMAIL,
        USER_ROLE,
        AUTH_KEY,
        AUTH_KEY_SERVER_ID,
    ];
}

/// Durable string key-value storage scoped to this application
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, VpnError>;
    fn set(&self, key: &str, value: &str) -> Result<(), VpnError>;
    fn remove(&self, key: &str) -> Result<(), VpnError>;
}

/// Key-value store backed by the application database
pub struct SqliteKvStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKvStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, VpnError> {
        let conn = self.conn.lock().map_err(|_| VpnError::DatabaseError {
            message: "Failed to acquire database lock".to_string(),
        })?;
        Ok(f(&conn)?)
    }
}

impl KeyValueStore for SqliteKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, VpnError> {
        self.with_conn(|c| database::kv_get(c, key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), VpnError> {
        self.with_conn(|c| database::kv_set(c, key, value))
    }

    fn remove(&self, key: &str) -> Result<(), VpnError> {
        self.with_conn(|c| database::kv_delete(c, key)).map(|_| ())
    }
}

/// Process-local store, used when no database is wanted
#[derive(Default)]
pub struct MemoryKvStore {
    entries: parking_lot::Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, VpnError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), VpnError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), VpnError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Reads a value, treating blanks and the JS-era literal "undefined" as absent
fn read_present(store: &dyn KeyValueStore, key: &str) -> Result<Option<String>, VpnError> {
    Ok(store
        .get(key)?
        .filter(|v| !v.trim().is_empty() && v != "undefined"))
}

/// Holder of the single short-lived tunnel auth key
#[derive(Clone)]
pub struct CredentialCache {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The cached key, only if it was issued for `server`
    pub fn get(&self, server: &ServerId) -> Result<Option<String>, VpnError> {
        let Some(key) = read_present(self.store.as_ref(), keys::AUTH_KEY)? else {
            return Ok(None);
        };
        match read_present(self.store.as_ref(), keys::AUTH_KEY_SERVER_ID)? {
            Some(issued_for) if issued_for == server.0 => Ok(Some(key)),
            issued_for => {
                debug!(
                    "Cached auth key belongs to {:?}, not {}; ignoring it",
                    issued_for, server
                );
                Ok(None)
            }
        }
    }

    pub fn set(&self, server: &ServerId, auth_key: &str) -> Result<(), VpnError> {
        // Drop the owner first so a partial write can never pair a new key with an old server
        self.store.remove(keys::AUTH_KEY_SERVER_ID)?;
        self.store.set(keys::AUTH_KEY, auth_key)?;
        self.store.set(keys::AUTH_KEY_SERVER_ID, &server.0)
    }

    pub fn clear(&self) -> Result<(), VpnError> {
        self.store.remove(keys::AUTH_KEY)?;
        self.store.remove(keys::AUTH_KEY_SERVER_ID)
    }

    /// Server the cached key was issued for, if any
    pub fn issued_for(&self) -> Result<Option<ServerId>, VpnError> {
        if read_present(self.store.as_ref(), keys::AUTH_KEY)?.is_none() {
            return Ok(None);
        }
        Ok(read_present(self.store.as_ref(), keys::AUTH_KEY_SERVER_ID)?.map(ServerId))
    }
}

/// Login session persistence
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn save(&self, session: &Session) -> Result<(), VpnError> {
        self.store.set(keys::SESSION_TOKEN, &session.session_token)?;
        self.store.set(keys::USERNAME, &session.username)?;
        self.store.set(keys::USER_EMAIL, &session.email)?;
        self.store.set(keys::USER_ROLE, &session.role)
    }

    pub fn load(&self) -> Result<Option<Session>, VpnError> {
        let Some(session_token) = read_present(self.store.as_ref(), keys::SESSION_TOKEN)? else {
            return Ok(None);
        };
        Ok(Some(Session {
            session_token,
            username: self.store.get(keys::USERNAME)?.unwrap_or_default(),
            email: self.store.get(keys::USER_EMAIL)?.unwrap_or_default(),
            role: self.store.get(keys::USER_ROLE)?.unwrap_or_default(),
        }))
    }

    pub fn token(&self) -> Result<Option<String>, VpnError> {
        read_present(self.store.as_ref(), keys::SESSION_TOKEN)
    }

    /// Remove the session and the tunnel credential together
    pub fn clear_all(&self) -> Result<(), VpnError> {
        for key in keys::ALL {
            self.store.remove(key)?;
        }
        Ok(())
    }
}
