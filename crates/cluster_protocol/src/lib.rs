//! # Cluster Protocol
//!
//! Shared control-plane building blocks for the cluster: one registry node
//! keeping the directory of channel nodes, and any number of channel nodes
//! reporting to it.
//!
//! ## Contents
//!
//! * [`messages`] - the control messages and the directory entry type
//! * [`health`] - load classification reported by channel nodes
//! * [`cipher`] / [`frame`] - seed-keyed stream cipher and length-prefixed framing
//! * [`link`] - established links: shared send handle, receive half, writer task
//! * [`handshake`] - challenge round trip and identify exchange
//! * [`schedule`] - virtual-time deadline scheduler and the sleeping seam
//! * [`console`] - operator console command table and line tokenizer
//! * [`accounts`] - account storage seam used for authority lookups
//!
//! ## Link lifecycle
//!
//! ```text
//! Connecting -> AwaitingChallenge -> Identifying -> LoggedIn
//!      \______________\__________________\______________\__> Dead
//! ```
//!
//! `Dead` is absorbing; a link never leaves it.

pub mod accounts;
pub mod cipher;
pub mod console;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod health;
pub mod link;
pub mod messages;
pub mod schedule;

pub use accounts::{AccountRecord, AccountStore, MemoryAccountStore};
pub use console::{parse_line, CommandResult, ConsoleCommands};
pub use error::ProtocolError;
pub use health::HealthState;
pub use link::{LinkHandle, LinkId, LinkReader, LinkState};
pub use messages::{full_name, ChannelStatus, ControlMessage, ServiceEntry, ShutdownResult};
pub use schedule::{Scheduler, Sleeper, TimerId, TokioSleeper};

/// Current unix time in seconds.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
