//! # Registry Server
//!
//! The registry node of the cluster. Channel nodes connect to it, pass the
//! challenge, identify with the shared secret and then report their status
//! every heartbeat. The registry keeps the resulting directory and hands a
//! fresh copy of it to every authenticated node after each update.
//!
//! Operators reach the nodes through the registry console: `shutdown`
//! addresses one node by `group/name` or all of them with `*`.

pub mod config;
pub mod console;
pub mod directory;
pub mod error;
pub mod server;

pub use config::RegistryConfig;
pub use directory::{DirectoryObserver, ServiceRegistry};
pub use error::ServerError;
pub use server::RegistryServer;
