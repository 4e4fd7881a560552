use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::error::VpnError;
use crate::models::server::{built_in_servers, ServerDescriptor, ServerId};

/// Application settings, stored as a singleton row in the database
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    /// Host of the provisioning API
    pub api_host: String,
    pub api_port: u16,
    /// Tunnel client executable
    pub tunnel_binary: String,
    /// Prefix tunnel control commands with `sudo`
    pub use_sudo: bool,
    pub control_plane_scheme: String,
    pub control_plane_port: u16,
    /// Script that clears stale tunnel state; `~` is expanded
    pub disconnect_script: String,
    /// Peer that all traffic is routed through on the default egress server
    pub exit_node: String,
    /// Tunnel addresses start with this prefix when the tunnel is up
    pub tunnel_address_prefix: String,
    pub servers: Vec<ServerDescriptor>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_host: "128.85.43.221".to_string(),
            api_port: 8000,
            tunnel_binary: "tailscale".to_string(),
            use_sudo: true,
            control_plane_scheme: "http".to_string(),
            control_plane_port: 8081,
            disconnect_script: "~/.vpn/disconnect.sh".to_string(),
            exit_node: "100.64.0.12".to_string(),
            tunnel_address_prefix: "100.64.".to_string(),
            servers: built_in_servers(),
        }
    }
}

impl AppSettings {
    /// Reject settings the orchestrator cannot work with
    pub fn validate(&self) -> Result<(), VpnError> {
        if self.api_host.trim().is_empty() {
            return Err(VpnError::InvalidArgument("API host is empty".to_string()));
        }
        if self.tunnel_binary.trim().is_empty() {
            return Err(VpnError::InvalidArgument("tunnel binary is empty".to_string()));
        }
        if !matches!(self.control_plane_scheme.as_str(), "http" | "https") {
            return Err(VpnError::InvalidArgument(format!(
                "control plane scheme {}",
                self.control_plane_scheme
            )));
        }
        if self.servers.is_empty() {
            return Err(VpnError::InvalidArgument("server catalog is empty".to_string()));
        }
        for (i, server) in self.servers.iter().enumerate() {
            if self.servers[..i].iter().any(|s| s.id == server.id) {
                return Err(VpnError::InvalidArgument(format!(
                    "duplicate server id {}",
                    server.id
                )));
            }
        }
        Ok(())
    }

    pub fn find_server(&self, id: &ServerId) -> Option<&ServerDescriptor> {
        self.servers.iter().find(|s| &s.id == id)
    }

    pub fn disconnect_script_path(&self) -> PathBuf {
        expand_home(&self.disconnect_script)
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
