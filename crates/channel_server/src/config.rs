//! Channel node settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings of one channel node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Group this node belongs to, first half of its `group/name`
    #[serde(default = "default_server_group")]
    pub server_group: String,

    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Host advertised to the registry for clients to connect to
    #[serde(default = "default_host")]
    pub host: String,

    /// Client listener address; its port is advertised along with `host`
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    #[serde(default = "default_max_users")]
    pub max_users: i32,

    #[serde(default = "default_registry_address")]
    pub registry_address: String,

    /// Shared secret presented to the registry
    #[serde(default = "default_registry_password")]
    pub registry_password: String,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Wait between attempts to reach the registry
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,

    /// Where shared global variables are persisted
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    #[serde(default)]
    pub commands: CommandSettings,
}

impl ChannelConfig {
    pub fn full_name(&self) -> String {
        cluster_protocol::full_name(&self.server_group, &self.node_name)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            server_group: default_server_group(),
            node_name: default_node_name(),
            host: default_host(),
            bind_address: default_bind_address(),
            max_users: default_max_users(),
            registry_address: default_registry_address(),
            registry_password: default_registry_password(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            reconnect_interval_secs: default_reconnect_interval_secs(),
            state_file: default_state_file(),
            commands: CommandSettings::default(),
        }
    }
}

/// In-session command settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSettings {
    /// Marks a line as a command, `>shutdown 300`
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Marks a command aimed at another character, `>>msg Bob hello`
    #[serde(default = "default_target_prefix")]
    pub target_prefix: String,

    /// Authority overrides keyed by command name
    #[serde(default)]
    pub overrides: BTreeMap<String, CommandOverride>,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            target_prefix: default_target_prefix(),
            overrides: BTreeMap::new(),
        }
    }
}

/// Replaces one or both authority levels of a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOverride {
    #[serde(default)]
    pub global_min: Option<i32>,
    /// `-1` forbids targeted use
    #[serde(default)]
    pub target_min: Option<i32>,
}

fn default_server_group() -> String {
    "World1".to_string()
}

fn default_node_name() -> String {
    "Alpha".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 11020))
}

fn default_max_users() -> i32 {
    20
}

fn default_registry_address() -> String {
    "127.0.0.1:11000".to_string()
}

fn default_registry_password() -> String {
    "change_me".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

fn default_reconnect_interval_secs() -> u64 {
    10
}

fn default_state_file() -> PathBuf {
    PathBuf::from("data/global_vars.json")
}

fn default_prefix() -> String {
    ">".to_string()
}

fn default_target_prefix() -> String {
    ">>".to_string()
}
