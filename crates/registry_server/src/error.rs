use cluster_protocol::ProtocolError;

/// Errors surfaced by the registry server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Socket setup or accept failure
    #[error("Network error: {0}")]
    Network(String),
    /// A link failed at the protocol level
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
