//! Scripted stand-ins for the executor, relay and status sink.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::AppSettings;
use crate::credentials::{CredentialCache, KeyValueStore, MemoryKvStore, SessionStore};
use crate::executor::{CommandExecutor, CommandRequest, CommandResult};
use crate::models::account::Session;
use crate::models::connection::ConnectionStatus;
use crate::models::error::VpnError;
use crate::orchestrator::{Orchestrator, StatusSink};
use crate::relay::{ApiRelay, ApiRequest, ApiResponse};

/// Executor answering by the first rule whose pattern appears in the command line.
/// Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<(String, Result<String, VpnError>)>>,
    calls: Mutex<Vec<CommandRequest>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, result: Result<String, VpnError>) {
        self.rules.lock().push((pattern.to_string(), result));
    }

    pub fn fail(&self, pattern: &str) {
        self.respond(
            pattern,
            Err(VpnError::CommandFailed {
                command: pattern.to_string(),
                exit_code: 1,
                stderr: format!("{} failed", pattern),
            }),
        );
    }

    pub fn calls(&self) -> Vec<CommandRequest> {
        self.calls.lock().clone()
    }

    pub fn calls_matching(&self, pattern: &str) -> Vec<CommandRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.display().contains(pattern))
            .collect()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, request: &CommandRequest) -> Result<CommandResult, VpnError> {
        Ok(CommandResult {
            stdout: self.execute(request).await?,
            stderr: String::new(),
            exit_code: 0,
            execution_time_ms: 0,
        })
    }

    async fn execute(&self, request: &CommandRequest) -> Result<String, VpnError> {
        self.calls.lock().push(request.clone());
        tokio::task::yield_now().await;

        let line = request.display();
        let rules = self.rules.lock();
        rules
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| Ok(String::new()))
    }
}

/// Relay answering by request path. Unscripted paths get a 404.
#[derive(Default)]
pub struct ScriptedRelay {
    rules: Mutex<Vec<(String, Result<(u16, String), VpnError>)>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, path: &str, result: Result<(u16, String), VpnError>) {
        self.rules.lock().push((path.to_string(), result));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ApiRelay for ScriptedRelay {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, VpnError> {
        self.requests.lock().push(request.clone());
        tokio::task::yield_now().await;

        let rules = self.rules.lock();
        let (status_code, data) = rules
            .iter()
            .find(|(path, _)| path == &request.path)
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| Ok((404, "not found".to_string())))?;
        Ok(ApiResponse { status_code, data })
    }
}

#[derive(Default)]
pub struct RecordingSink {
    statuses: Mutex<Vec<ConnectionStatus>>,
    teardown_failures: Mutex<Vec<VpnError>>,
}

impl RecordingSink {
    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.statuses.lock().clone()
    }

    pub fn teardown_failures(&self) -> Vec<VpnError> {
        self.teardown_failures.lock().clone()
    }
}

impl StatusSink for RecordingSink {
    fn status_changed(&self, status: &ConnectionStatus) {
        self.statuses.lock().push(status.clone());
    }

    fn teardown_failed(&self, error: &VpnError) {
        self.teardown_failures.lock().push(error.clone());
    }
}

pub fn test_session() -> Session {
    Session {
        session_token: "session-tok".to_string(),
        username: "ada".to_string(),
        email: "ada@example.com".to_string(),
        role: "user".to_string(),
    }
}

/// An orchestrator wired to scripted collaborators and an in-memory store
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub executor: Arc<ScriptedExecutor>,
    pub relay: Arc<ScriptedRelay>,
    pub sink: Arc<RecordingSink>,
    pub store: Arc<dyn KeyValueStore>,
    pub sessions: SessionStore,
    pub credentials: CredentialCache,
}

impl Harness {
    /// Logged-in harness using the default settings
    pub fn new() -> Self {
        Self::with_settings(&AppSettings::default(), true)
    }

    pub fn with_settings(settings: &AppSettings, logged_in: bool) -> Self {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let sessions = SessionStore::new(store.clone());
        let credentials = CredentialCache::new(store.clone());
        if logged_in {
            sessions.save(&test_session()).unwrap();
        }
        let executor = Arc::new(ScriptedExecutor::new());
        let relay = Arc::new(ScriptedRelay::new());
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Arc::new(
            Orchestrator::new(
                executor.clone(),
                relay.clone(),
                sessions.clone(),
                credentials.clone(),
                sink.clone(),
                settings,
            )
            .unwrap(),
        );
        Self {
            orchestrator,
            executor,
            relay,
            sink,
            store,
            sessions,
            credentials,
        }
    }

    /// Make `/connect` answer 200 with `key`
    pub fn issue(&self, key: &str) {
        self.relay
            .respond("/connect", Ok((200, format!(r#"{{"auth_key":"{}"}}"#, key))));
    }
}
