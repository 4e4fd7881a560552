//! Tunnel connection lifecycle.
//!
//! `Disconnected -> Connecting -> Connected -> Disconnected`, with every
//! failure inside `Connecting` falling back to `Disconnected`. The state lock
//! is never held across an await: entry into `Connecting` is a check-and-set,
//! so a second `connect()` racing the first sees `Connecting` and backs off.

pub mod commands;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AppSettings;
use crate::credentials::{CredentialCache, SessionStore};
use crate::executor::{CommandExecutor, CommandRequest};
use crate::models::account::{KeyIssueRequest, KeyIssueResponse};
use crate::models::connection::{ConnectionState, ConnectionStatus};
use crate::models::error::VpnError;
use crate::models::server::{filter_servers, ServerDescriptor, ServerId};
use crate::relay::{ApiRelay, ApiRequest};

pub use commands::TunnelCommands;

/// Receives lifecycle notifications for the UI
pub trait StatusSink: Send + Sync {
    fn status_changed(&self, status: &ConnectionStatus);

    /// A background teardown failed after the state already moved on
    fn teardown_failed(&self, error: &VpnError);
}

/// Sink that drops every notification
pub struct NoopSink;

impl StatusSink for NoopSink {
    fn status_changed(&self, _status: &ConnectionStatus) {}
    fn teardown_failed(&self, _error: &VpnError) {}
}

struct Inner {
    state: ConnectionState,
    selected: ServerDescriptor,
    connected_since: Option<chrono::DateTime<Utc>>,
    last_error: Option<String>,
    catalog: Vec<ServerDescriptor>,
    commands: TunnelCommands,
    /// Bumped on every state transition
    revision: u64,
}

impl Inner {
    fn snapshot(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            server: self.selected.clone(),
            connected_since: self.connected_since,
            last_error: self.last_error.clone(),
        }
    }

    fn settle_disconnected(&mut self, error: &VpnError) -> ConnectionStatus {
        self.state = ConnectionState::Disconnected;
        self.connected_since = None;
        self.last_error = Some(error.to_string());
        self.revision += 1;
        self.snapshot()
    }
}

type TeardownTask = JoinHandle<Result<(), VpnError>>;

pub struct Orchestrator {
    executor: Arc<dyn CommandExecutor>,
    relay: Arc<dyn ApiRelay>,
    sessions: SessionStore,
    credentials: CredentialCache,
    sink: Arc<dyn StatusSink>,
    inner: Mutex<Inner>,
    pending_teardown: Mutex<Option<TeardownTask>>,
    /// Bumped when the session ends; a connect started under an older value abandons
    session_epoch: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        relay: Arc<dyn ApiRelay>,
        sessions: SessionStore,
        credentials: CredentialCache,
        sink: Arc<dyn StatusSink>,
        settings: &AppSettings,
    ) -> Result<Self, VpnError> {
        settings.validate()?;

        // Reselect the server a persisted key was issued for, so it stays usable
        let selected = credentials
            .issued_for()?
            .and_then(|id| settings.find_server(&id).cloned())
            .unwrap_or_else(|| settings.servers[0].clone());

        Ok(Self {
            executor,
            relay,
            sessions,
            credentials,
            sink,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                selected,
                connected_since: None,
                last_error: None,
                catalog: settings.servers.clone(),
                commands: TunnelCommands::from(settings),
                revision: 0,
            }),
            pending_teardown: Mutex::new(None),
            session_epoch: AtomicU64::new(0),
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().snapshot()
    }

    pub fn servers(&self, query: &str) -> Vec<ServerDescriptor> {
        filter_servers(&self.inner.lock().catalog, query)
    }

    fn publish(&self, status: &ConnectionStatus) {
        self.sink.status_changed(status);
    }

    fn session_current(&self, epoch: u64) -> bool {
        self.session_epoch.load(Ordering::SeqCst) == epoch
    }

    fn session_ended() -> VpnError {
        VpnError::NotAuthenticated("session ended while connecting".to_string())
    }

    /// Bring the tunnel up for the selected server.
    ///
    /// A call while already `Connecting` or `Connected` does nothing and
    /// returns the current status. If the session ends before the tunnel is
    /// committed as `Connected`, the attempt is rolled back.
    pub async fn connect(&self) -> Result<ConnectionStatus, VpnError> {
        // A logout after this point shows up as an epoch change
        let epoch = self.session_epoch.load(Ordering::SeqCst);
        let token = self.sessions.token()?;

        let (server, commands, token, snapshot) = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Disconnected {
                debug!("connect() ignored while {}", inner.state);
                return Ok(inner.snapshot());
            }
            // Local session state may have been cleared since the UI offered the action
            let token = token.ok_or_else(|| {
                VpnError::NotAuthenticated("no active session".to_string())
            })?;

            inner.state = ConnectionState::Connecting;
            inner.last_error = None;
            inner.revision += 1;
            (
                inner.selected.clone(),
                inner.commands.clone(),
                token,
                inner.snapshot(),
            )
        };
        self.publish(&snapshot);
        info!("Connecting to {} ({})", server.name, server.address);

        let outcome = self.run_connect(&server, &commands, &token, epoch).await;

        // The epoch check and the commit share the state lock, so a logout
        // either sees `Connected` and disconnects, or makes this attempt abandon
        let committed = {
            let mut inner = self.inner.lock();
            match &outcome {
                Ok(exit_node_error) if self.session_current(epoch) => {
                    inner.state = ConnectionState::Connected;
                    inner.connected_since = Some(Utc::now());
                    inner.last_error = exit_node_error.as_ref().map(|e| e.to_string());
                    inner.revision += 1;
                    Some(inner.snapshot())
                }
                Ok(_) => None,
                Err(e) => Some(inner.settle_disconnected(e)),
            }
        };

        let (outcome, snapshot) = match committed {
            Some(snapshot) => (outcome.map(|_| ()), snapshot),
            None => {
                warn!("Session ended while connecting to {}, taking the tunnel down", server.name);
                if let Err(e) = run_teardown(self.executor.as_ref(), &commands).await {
                    warn!("Tunnel teardown failed: {}", e);
                    self.sink.teardown_failed(&e);
                }
                self.drop_cached_key();
                let e = Self::session_ended();
                let snapshot = self.inner.lock().settle_disconnected(&e);
                (Err(e), snapshot)
            }
        };
        self.publish(&snapshot);

        match outcome {
            Ok(()) => {
                info!("Connected to {}", server.name);
                Ok(snapshot)
            }
            Err(e) => {
                error!("Connection to {} failed: {}", server.name, e);
                Err(e)
            }
        }
    }

    /// The `Connecting` sequence. On success returns the exit-node failure, if any,
    /// which is logged but does not undo the connection.
    async fn run_connect(
        &self,
        server: &ServerDescriptor,
        commands: &TunnelCommands,
        token: &str,
        epoch: u64,
    ) -> Result<Option<VpnError>, VpnError> {
        let auth_key = match self.credentials.get(&server.id)? {
            Some(key) => {
                debug!("Using cached auth key for {}", server.id);
                key
            }
            None => {
                let key = self.issue_key(server, token).await?;
                self.credentials.set(&server.id, &key)?;
                // Checked after the write: a logout racing it has either
                // cleared the store already or will clear it next
                if !self.session_current(epoch) {
                    self.drop_cached_key();
                    return Err(Self::session_ended());
                }
                key
            }
        };

        let (bring_up, key_index) = match commands.bring_up(server, &auth_key) {
            Ok(built) => built,
            Err(e) => {
                self.drop_cached_key();
                return Err(e);
            }
        };

        self.clear_stale_tunnel(commands).await;

        if !self.session_current(epoch) {
            self.drop_cached_key();
            return Err(Self::session_ended());
        }

        if let Err(e) = self.execute_redacted(&bring_up, &[key_index]).await {
            // The key may have expired; let the next attempt fetch a fresh one
            self.drop_cached_key();
            return Err(e);
        }

        if !server.default_egress {
            return Ok(None);
        }
        let exit_node = match commands.set_exit_node() {
            Ok(request) => self.executor.execute(&request).await.map(|_| ()),
            Err(e) => Err(e),
        };
        match exit_node {
            Ok(()) => {
                debug!("Exit node set for {}", server.name);
                Ok(None)
            }
            Err(e) => {
                warn!("Tunnel is up but setting the exit node failed: {}", e);
                Ok(Some(e))
            }
        }
    }

    fn drop_cached_key(&self) {
        if let Err(e) = self.credentials.clear() {
            warn!("Failed to drop cached auth key: {}", e);
        }
    }

    async fn issue_key(&self, server: &ServerDescriptor, token: &str) -> Result<String, VpnError> {
        info!("Requesting a new auth key for {}", server.id);
        let body = serde_json::to_value(KeyIssueRequest {
            server_ip: server.address.clone(),
        })?;
        let request = ApiRequest::post("/connect", body).bearer(token);

        let response = self.relay.send(&request).await?.error_for_status()?;
        let parsed: KeyIssueResponse = response.json()?;
        parsed
            .auth_key
            .filter(|k| !k.trim().is_empty() && k != "undefined")
            .ok_or_else(|| VpnError::ParseError("key response has no auth_key".to_string()))
    }

    /// Best-effort removal of leftover tunnel state before bring-up
    async fn clear_stale_tunnel(&self, commands: &TunnelCommands) {
        // A teardown from an earlier disconnect must finish before the new tunnel comes up
        let pending = self.pending_teardown.lock().take();
        if let Some(task) = pending {
            debug!("Waiting for previous teardown to finish");
            finish_teardown(task).await;
        }

        if let Err(e) = self.executor.execute(&commands.teardown_script()).await {
            warn!("Stale tunnel teardown failed (continuing): {}", e);
        }
    }

    async fn execute_redacted(
        &self,
        request: &CommandRequest,
        secret_positions: &[usize],
    ) -> Result<String, VpnError> {
        self.executor.execute(request).await.map_err(|e| match e {
            VpnError::CommandFailed {
                exit_code, stderr, ..
            } => VpnError::CommandFailed {
                command: request.redacted(secret_positions),
                exit_code,
                stderr,
            },
            other => other,
        })
    }

    /// Drop the tunnel. The visible state changes at once; the teardown runs in
    /// the background and its failure is reported through the sink.
    pub fn disconnect(&self) -> ConnectionStatus {
        let (commands, snapshot) = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Connected {
                debug!("disconnect() ignored while {}", inner.state);
                return inner.snapshot();
            }
            inner.state = ConnectionState::Disconnected;
            inner.connected_since = None;
            inner.last_error = None;
            inner.revision += 1;
            (inner.commands.clone(), inner.snapshot())
        };
        self.publish(&snapshot);
        info!("Disconnected from {}", snapshot.server.name);

        let executor = self.executor.clone();
        let sink = self.sink.clone();
        let mut pending = self.pending_teardown.lock();
        let previous = pending.take();
        *pending = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                finish_teardown(previous).await;
            }
            let result = run_teardown(executor.as_ref(), &commands).await;
            if let Err(e) = &result {
                warn!("Tunnel teardown failed: {}", e);
                sink.teardown_failed(e);
            }
            result
        }));

        snapshot
    }

    /// End the session: an in-flight connect abandons and rolls back,
    /// a live tunnel is disconnected
    pub fn end_session(&self) -> ConnectionStatus {
        self.session_epoch.fetch_add(1, Ordering::SeqCst);
        self.disconnect()
    }

    /// Wait for the background teardown started by the last `disconnect()`
    pub async fn wait_for_teardown(&self) -> Option<Result<(), VpnError>> {
        let task = self.pending_teardown.lock().take()?;
        Some(
            task.await
                .unwrap_or_else(|e| Err(VpnError::Internal(format!("teardown task: {}", e)))),
        )
    }

    /// Change the selected server.
    ///
    /// While disconnected a change clears the cached key, which belongs to the
    /// previous server. While connecting or connected a change is refused.
    pub fn select_server(&self, id: &ServerId) -> Result<ConnectionStatus, VpnError> {
        let snapshot = {
            let mut inner = self.inner.lock();
            let server = inner
                .catalog
                .iter()
                .find(|s| &s.id == id)
                .cloned()
                .ok_or_else(|| VpnError::ServerNotFound(id.to_string()))?;

            if inner.selected.id == server.id {
                return Ok(inner.snapshot());
            }
            if inner.state != ConnectionState::Disconnected {
                return Err(VpnError::InvalidOperation {
                    message: format!("cannot switch servers while {}", inner.state),
                });
            }

            self.credentials.clear()?;
            info!("Selected server {} ({})", server.name, server.address);
            inner.selected = server;
            inner.last_error = None;
            inner.snapshot()
        };
        self.publish(&snapshot);
        Ok(snapshot)
    }

    /// Reconcile the state with what the tunnel client reports.
    ///
    /// A pending teardown is waited for and wins; the tunnel is not queried
    /// while it may still be coming down.
    pub async fn probe(&self) -> ConnectionStatus {
        let pending = self.pending_teardown.lock().take();
        if let Some(task) = pending {
            debug!("Probe waiting for teardown instead of querying the tunnel");
            finish_teardown(task).await;
            return self.status();
        }

        let (commands, revision) = {
            let inner = self.inner.lock();
            if inner.state == ConnectionState::Connecting {
                return inner.snapshot();
            }
            (inner.commands.clone(), inner.revision)
        };

        let up = match self.executor.execute(&commands.status()).await {
            Ok(output) => commands.is_tunnel_up(&output),
            Err(e) => {
                debug!("Tunnel status probe failed, assuming down: {}", e);
                false
            }
        };

        let (changed, snapshot) = {
            let mut inner = self.inner.lock();
            // A connect or disconnect while the probe ran makes its observation stale
            if inner.revision != revision {
                debug!("State changed during probe, keeping {}", inner.state);
                return inner.snapshot();
            }
            let observed = if up {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            };
            let changed = inner.state != observed;
            if changed {
                info!("Tunnel reported {}, was {}", observed, inner.state);
                inner.state = observed;
                inner.connected_since = up.then(Utc::now);
                inner.revision += 1;
            }
            (changed, inner.snapshot())
        };
        if changed {
            self.publish(&snapshot);
        }
        snapshot
    }

    /// Take new command settings and catalog; only allowed while disconnected
    pub fn apply_settings(&self, settings: &AppSettings) -> Result<ConnectionStatus, VpnError> {
        settings.validate()?;
        let snapshot = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Disconnected {
                return Err(VpnError::InvalidOperation {
                    message: format!("cannot change settings while {}", inner.state),
                });
            }

            let reselected = settings
                .find_server(&inner.selected.id)
                .cloned()
                .unwrap_or_else(|| settings.servers[0].clone());
            if reselected.id != inner.selected.id || reselected.address != inner.selected.address {
                self.credentials.clear()?;
            }

            inner.selected = reselected;
            inner.catalog = settings.servers.clone();
            inner.commands = TunnelCommands::from(settings);
            inner.snapshot()
        };
        self.publish(&snapshot);
        Ok(snapshot)
    }
}

/// Await an earlier teardown task; its own failure was already reported
async fn finish_teardown(task: TeardownTask) {
    if let Err(e) = task.await {
        warn!("Teardown task did not complete: {}", e);
    }
}

async fn run_teardown(
    executor: &dyn CommandExecutor,
    commands: &TunnelCommands,
) -> Result<(), VpnError> {
    let script = executor.execute(&commands.teardown_script()).await.map(|_| ());
    let down = executor.execute(&commands.down()).await.map(|_| ());
    script.and(down)
}

#[cfg(test)]
mod tests;
