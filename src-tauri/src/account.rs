//! Login, registration and the admin node inventory.

use std::sync::Arc;

use tracing::{info, warn};

use crate::credentials::SessionStore;
use crate::models::account::{
    InventoryReport, InventorySummary, LoginRequest, LoginResponse, NodeInventory,
    RegistrationRequest, Session, SessionInfo, ValidationRequest,
};
use crate::models::error::VpnError;
use crate::orchestrator::Orchestrator;
use crate::relay::{ApiRelay, ApiRequest, ApiResponse};

fn require(field: &str, value: &str) -> Result<(), VpnError> {
    if value.trim().is_empty() {
        return Err(VpnError::InvalidArgument(format!("{} is required", field)));
    }
    Ok(())
}

pub struct AccountService {
    relay: Arc<dyn ApiRelay>,
    sessions: SessionStore,
    orchestrator: Arc<Orchestrator>,
}

impl AccountService {
    pub fn new(
        relay: Arc<dyn ApiRelay>,
        sessions: SessionStore,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            relay,
            sessions,
            orchestrator,
        }
    }

    async fn post<T: serde::Serialize>(&self, path: &str, body: &T) -> Result<ApiResponse, VpnError> {
        let request = ApiRequest::post(path, serde_json::to_value(body)?);
        self.relay.send(&request).await?.error_for_status()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<SessionInfo, VpnError> {
        require("email", email)?;
        require("password", password)?;

        // Another user's tunnel and cached key must not outlive the switch
        if let Some(previous) = self.sessions.load()? {
            if !previous.email.eq_ignore_ascii_case(email) {
                info!("Switching account, clearing data of {}", previous.username);
                self.logout()?;
            }
        }

        let response = self
            .post(
                "/login",
                &LoginRequest {
                    email: email.to_string(),
                    password: password.to_string(),
                },
            )
            .await?;
        let parsed: LoginResponse = response.json()?;
        if parsed.access_token.trim().is_empty() {
            return Err(VpnError::ParseError(
                "login response has no access_token".to_string(),
            ));
        }

        let email = if parsed.email.is_empty() {
            email.to_string()
        } else {
            parsed.email
        };
        let session = Session {
            session_token: parsed.access_token,
            username: if parsed.username.is_empty() {
                email.clone()
            } else {
                parsed.username
            },
            email,
            role: if parsed.role.is_empty() {
                "user".to_string()
            } else {
                parsed.role
            },
        };
        self.sessions.save(&session)?;
        info!("Logged in as {}", session.username);
        Ok(SessionInfo::from(&session))
    }

    /// Drop the tunnel if it is up, abandon a connect in flight, and forget
    /// every persisted value
    pub fn logout(&self) -> Result<(), VpnError> {
        self.orchestrator.end_session();
        self.sessions.clear_all()?;
        info!("Logged out");
        Ok(())
    }

    pub async fn register(&self, email: &str, password: &str, username: &str) -> Result<(), VpnError> {
        require("email", email)?;
        require("password", password)?;
        require("username", username)?;
        self.post(
            "/register",
            &RegistrationRequest {
                email: email.to_string(),
                password: password.to_string(),
                username: username.to_string(),
            },
        )
        .await?;
        info!("Registered {}, awaiting activation", email);
        Ok(())
    }

    pub async fn validate(&self, email: &str, code: &str) -> Result<(), VpnError> {
        require("email", email)?;
        require("code", code)?;
        self.post(
            "/validate",
            &ValidationRequest {
                email: email.to_string(),
                code: code.trim().to_string(),
            },
        )
        .await?;
        info!("Activated {}", email);
        Ok(())
    }

    pub async fn resend_code(&self, email: &str, password: &str, username: &str) -> Result<(), VpnError> {
        require("email", email)?;
        self.post(
            "/resend-code",
            &RegistrationRequest {
                email: email.to_string(),
                password: password.to_string(),
                username: username.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    pub fn current_session(&self) -> Result<Option<SessionInfo>, VpnError> {
        Ok(self.sessions.load()?.as_ref().map(SessionInfo::from))
    }

    /// Nodes registered on every control-plane server, with totals
    pub async fn list_node_inventory(&self) -> Result<InventoryReport, VpnError> {
        let token = self
            .sessions
            .token()?
            .ok_or_else(|| VpnError::NotAuthenticated("no active session".to_string()))?;

        let response = self
            .relay
            .send(&ApiRequest::get("/servers").bearer(&token))
            .await?;
        if response.status_code == 401 {
            warn!("Session token rejected while listing nodes");
        }
        let servers: Vec<NodeInventory> = response.error_for_status()?.json()?;
        let summary = InventorySummary::from_inventory(&servers);
        Ok(InventoryReport { servers, summary })
    }
}
