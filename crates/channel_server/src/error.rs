use crate::store::StoreError;
use cluster_protocol::ProtocolError;

/// Errors surfaced by a channel node.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Socket setup or accept failure
    #[error("Network error: {0}")]
    Network(String),
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("State store error: {0}")]
    Store(#[from] StoreError),
}
