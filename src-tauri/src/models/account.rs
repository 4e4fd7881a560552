use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// The logged-in user, created on login and destroyed on logout
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_token: String,
    pub username: String,
    pub email: String,
    pub role: String,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case("admin")
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_token", &"[REDACTED]")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("role", &self.role)
            .finish()
    }
}

/// Session details the UI may display; never carries the token
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub username: String,
    pub email: String,
    pub role: String,
    pub is_admin: bool,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            username: session.username.clone(),
            email: session.email.clone(),
            role: session.role.clone(),
            is_admin: session.is_admin(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
}

/// Body shared by `/register` and `/resend-code`
#[derive(Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub email: String,
    pub password: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyIssueRequest {
    pub server_ip: String,
}

#[derive(Clone, Deserialize)]
pub struct KeyIssueResponse {
    #[serde(default)]
    pub auth_key: Option<String>,
}

/// A tunnel peer registered on a control-plane server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InventoryNode {
    pub id: String,
    pub hostname: String,
    pub name: String,
    pub user: String,
    pub ip_addresses: Vec<String>,
    pub ephemeral: bool,
    pub last_seen: Option<String>,
    pub expiration: Option<String>,
    pub connected: bool,
    pub online: bool,
    pub expired: bool,
}

impl InventoryNode {
    pub fn is_online(&self) -> bool {
        self.online || self.connected
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeInventory {
    pub server_id: String,
    pub server_name: String,
    pub nodes: Vec<InventoryNode>,
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InventorySummary {
    pub total_users: usize,
    pub total_nodes: usize,
    pub online_nodes: usize,
}

impl InventorySummary {
    pub fn from_inventory(inventory: &[NodeInventory]) -> Self {
        let users: HashSet<&str> = inventory
            .iter()
            .flat_map(|s| s.nodes.iter().map(|n| n.user.as_str()))
            .collect();
        Self {
            total_users: users.len(),
            total_nodes: inventory.iter().map(|s| s.nodes.len()).sum(),
            online_nodes: inventory
                .iter()
                .map(|s| s.nodes.iter().filter(|n| n.is_online()).count())
                .sum(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReport {
    pub servers: Vec<NodeInventory>,
    pub summary: InventorySummary,
}
