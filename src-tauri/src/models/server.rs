use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ServerId(pub String);

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A VPN server the user can connect to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescriptor {
    pub id: ServerId,
    pub name: String,
    /// Control-plane host of the server
    pub address: String,
    pub location: String,
    /// Connections to this server also route all traffic through the exit node
    #[serde(default)]
    pub default_egress: bool,
}

impl ServerDescriptor {
    pub fn new(name: &str, address: &str, location: &str, default_egress: bool) -> Self {
        Self {
            id: ServerId(address.to_string()),
            name: name.to_string(),
            address: address.to_string(),
            location: location.to_string(),
            default_egress,
        }
    }

    /// Case-insensitive match on name or location, substring match on address
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return true;
        }
        let lowered = query.to_lowercase();
        self.name.to_lowercase().contains(&lowered)
            || self.location.to_lowercase().contains(&lowered)
            || self.address.contains(query)
    }
}

/// The servers shipped with the client
pub fn built_in_servers() -> Vec<ServerDescriptor> {
    vec![
        ServerDescriptor::new("Server 1", "128.85.43.221", "New York, US", true),
        ServerDescriptor::new("Server 2", "4.251.118.138", "London, UK", false),
    ]
}

/// Filter a catalog by a search query, keeping catalog order
pub fn filter_servers(servers: &[ServerDescriptor], query: &str) -> Vec<ServerDescriptor> {
    servers.iter().filter(|s| s.matches(query)).cloned().collect()
}
