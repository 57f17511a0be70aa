//! Control messages exchanged between the registry and its channel nodes.
//!
//! Every message travels as one JSON document per frame, tagged by `op`:
//!
//! ```json
//! { "op": "channel_shutdown", "delay_seconds": 300 }
//! ```

use crate::health::HealthState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A channel node as seen by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub server_group: String,
    pub node_name: String,
    pub host: String,
    pub port: u16,
    pub current_users: i32,
    pub max_users: i32,
    pub health: HealthState,
    /// Unix timestamp (seconds) of the last heartbeat that touched this entry
    pub last_heartbeat: u64,
}

impl ServiceEntry {
    /// Address form used by operators, `group/name`.
    pub fn full_name(&self) -> String {
        full_name(&self.server_group, &self.node_name)
    }
}

/// Builds the operator-facing name of a node.
pub fn full_name(server_group: &str, node_name: &str) -> String {
    format!("{server_group}/{node_name}")
}

/// Outcome of a shutdown request on a channel node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownResult {
    Success,
    AlreadyInProgress,
    Fail,
}

impl fmt::Display for ShutdownResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownResult::Success => f.write_str("Success"),
            ShutdownResult::AlreadyInProgress => f.write_str("Already in progress"),
            ShutdownResult::Fail => f.write_str("Failed"),
        }
    }
}

/// Status report sent by a channel node on every heartbeat tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub server_group: String,
    pub node_name: String,
    pub host: String,
    pub port: u16,
    pub current_users: i32,
    pub max_users: i32,
    pub health: HealthState,
}

/// Every message that can travel over an established control link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlMessage {
    /// node -> registry, first message after the challenge
    ServerIdentify { password_hash: String },
    /// registry -> node
    ServerIdentifyResult { success: bool },
    /// node -> registry
    ChannelStatus(ChannelStatus),
    /// registry -> nodes and directory observers
    ChannelStatusBroadcast { entries: Vec<ServiceEntry> },
    /// registry -> node
    ChannelShutdown { delay_seconds: i64 },
    /// node -> registry
    ChannelShutdownResult { status: ShutdownResult },
    /// node -> registry -> every node
    BroadcastNotice { message: String },
}

impl ControlMessage {
    /// Short name used in logs and protocol errors.
    pub fn op(&self) -> &'static str {
        match self {
            ControlMessage::ServerIdentify { .. } => "server_identify",
            ControlMessage::ServerIdentifyResult { .. } => "server_identify_result",
            ControlMessage::ChannelStatus(_) => "channel_status",
            ControlMessage::ChannelStatusBroadcast { .. } => "channel_status_broadcast",
            ControlMessage::ChannelShutdown { .. } => "channel_shutdown",
            ControlMessage::ChannelShutdownResult { .. } => "channel_shutdown_result",
            ControlMessage::BroadcastNotice { .. } => "broadcast_notice",
        }
    }

    /// Serializes the message as JSON, the payload of one frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses one frame payload.
    ///
    /// # Arguments
    ///
    /// * `data` - Decrypted payload bytes
    ///
    /// # Returns
    ///
    /// The message, or the JSON error for unknown types and malformed fields
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}
