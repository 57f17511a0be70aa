//! # Channel Server
//!
//! A channel node of the cluster. It serves client sessions, reports its
//! load to the registry every heartbeat and keeps the directory the
//! registry sends back.
//!
//! ## Components
//!
//! * [`registry_link`] - connect/identify loop and registry message handling
//! * [`status`] - node identity, health and the current upstream link
//! * [`clients`] - live client sessions
//! * [`commands`] - in-session command router with two-tier authority
//! * [`shutdown`] - time-boxed graceful shutdown, local or remote
//! * [`client_listener`] - client line protocol
//! * [`store`] - shared global variables persisted on shutdown
//! * [`server`] - wiring and startup order
//!
//! Clients type commands starting with `>`; `>>` aims the command at another
//! character, named by the first argument:
//!
//! ```text
//! >shutdown 300
//! >>msg Bob Please log out
//! ```

pub mod client_listener;
pub mod clients;
pub mod commands;
pub mod config;
pub mod console;
pub mod error;
pub mod registry_link;
pub mod server;
pub mod shutdown;
pub mod status;
pub mod store;

pub use clients::{ActorDirectory, AdmitError, ClientEvent, ClientRegistry, ClientSession};
pub use commands::{CommandContext, CommandRouter, CommandSet, CommandSetBuilder};
pub use config::{ChannelConfig, CommandOverride, CommandSettings};
pub use error::ChannelError;
pub use server::{ChannelContext, ChannelDeps, ChannelServer};
pub use shutdown::{ProcessExit, ShutdownCoordinator, ShutdownSession, ShutdownStatus, StdProcessExit};
pub use store::{FileStateStore, SharedStateStore, StoreError};
