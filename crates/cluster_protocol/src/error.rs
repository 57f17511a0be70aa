//! Error types for the control-plane protocol.

use std::net::SocketAddr;

/// Errors that can occur while establishing or using a control link.
///
/// Every variant is recoverable from the cluster's point of view: a channel
/// node reacts to any of them by tearing the link down and retrying, and the
/// registry reacts by dropping that single link.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The remote end refused or could not be reached
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Socket level failure on an established stream
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A control message could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The peer announced a frame beyond the accepted size
    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// The seed/acknowledgement round trip did not complete as expected
    #[error("Challenge failed with {peer}: {reason}")]
    ChallengeFailed { peer: SocketAddr, reason: String },

    /// The registry rejected our shared secret
    #[error("Identify rejected by {0}")]
    IdentifyRejected(SocketAddr),

    /// The peer sent a message that is not valid in the current link state
    #[error("Unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage { expected: String, actual: String },

    /// The link is dead or the peer closed the stream
    #[error("Connection closed")]
    ConnectionClosed,
}
