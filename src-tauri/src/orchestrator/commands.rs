use std::net::IpAddr;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::AppSettings;
use crate::executor::CommandRequest;
use crate::models::error::VpnError;
use crate::models::server::ServerDescriptor;

static HOSTNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$")
        .expect("hostname pattern")
});

static AUTH_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.:-]+$").expect("auth key pattern"));

/// Format a host for use in a URL, bracketing IPv6 literals.
/// Anything that is neither an IP nor a DNS name is rejected.
pub fn url_host(address: &str) -> Result<String, VpnError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(match ip {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{}]", v6),
        });
    }
    if address.len() <= 253 && HOSTNAME_RE.is_match(address) {
        Ok(address.to_string())
    } else {
        Err(VpnError::InvalidArgument(format!("server address {:?}", address)))
    }
}

pub fn validate_auth_key(auth_key: &str) -> Result<(), VpnError> {
    if auth_key.starts_with('-') || !AUTH_KEY_RE.is_match(auth_key) {
        return Err(VpnError::InvalidArgument(
            "auth key contains unexpected characters".to_string(),
        ));
    }
    Ok(())
}

/// Builds the tunnel client invocations from the current settings
#[derive(Debug, Clone)]
pub struct TunnelCommands {
    tunnel_binary: String,
    use_sudo: bool,
    control_plane_scheme: String,
    control_plane_port: u16,
    disconnect_script: PathBuf,
    exit_node: String,
    tunnel_address_prefix: String,
}

impl From<&AppSettings> for TunnelCommands {
    fn from(settings: &AppSettings) -> Self {
        Self {
            tunnel_binary: settings.tunnel_binary.clone(),
            use_sudo: settings.use_sudo,
            control_plane_scheme: settings.control_plane_scheme.clone(),
            control_plane_port: settings.control_plane_port,
            disconnect_script: settings.disconnect_script_path(),
            exit_node: settings.exit_node.clone(),
            tunnel_address_prefix: settings.tunnel_address_prefix.clone(),
        }
    }
}

impl TunnelCommands {
    fn privileged<I, S>(&self, args: I) -> CommandRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.use_sudo {
            CommandRequest::new("sudo")
                .arg(self.tunnel_binary.clone())
                .args(args)
        } else {
            CommandRequest::new(self.tunnel_binary.clone()).args(args)
        }
    }

    /// Script that clears any stale tunnel state
    pub fn teardown_script(&self) -> CommandRequest {
        CommandRequest::new(self.disconnect_script.to_string_lossy().to_string())
    }

    pub fn down(&self) -> CommandRequest {
        self.privileged(["down"])
    }

    /// The `up` invocation, with the argument index holding the auth key
    pub fn bring_up(
        &self,
        server: &ServerDescriptor,
        auth_key: &str,
    ) -> Result<(CommandRequest, usize), VpnError> {
        let host = url_host(&server.address)?;
        validate_auth_key(auth_key)?;
        let request = self.privileged([
            "up".to_string(),
            format!(
                "--login-server={}://{}:{}",
                self.control_plane_scheme, host, self.control_plane_port
            ),
            "--authkey".to_string(),
        ]);
        let key_index = request.args.len();
        Ok((request.arg(auth_key), key_index))
    }

    pub fn set_exit_node(&self) -> Result<CommandRequest, VpnError> {
        let node: IpAddr = self
            .exit_node
            .parse()
            .map_err(|_| VpnError::InvalidArgument(format!("exit node {:?}", self.exit_node)))?;
        Ok(self.privileged(["set".to_string(), "--exit-node".to_string(), node.to_string()]))
    }

    /// Read-only status query, never elevated
    pub fn status(&self) -> CommandRequest {
        CommandRequest::new(self.tunnel_binary.clone()).arg("status")
    }

    /// Whether `tunnel status` output shows a tunnel address
    pub fn is_tunnel_up(&self, status_output: &str) -> bool {
        !self.tunnel_address_prefix.is_empty()
            && status_output
                .split_whitespace()
                .any(|token| token.starts_with(&self.tunnel_address_prefix))
    }
}
