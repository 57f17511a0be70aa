use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Runtime settings of the registry node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Address channel nodes connect to
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Shared secret every channel node must present when identifying
    #[serde(default = "default_password")]
    pub password: String,

    /// Listen backlog passed to the socket
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            password: default_password(),
            backlog: default_backlog(),
        }
    }
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 11000))
}

fn default_password() -> String {
    "change_me".to_string()
}

fn default_backlog() -> i32 {
    1024
}
