//! Registry accept loop and per-link message handling.

mod core;
mod handlers;

pub use self::core::RegistryServer;
pub use self::handlers::{handle_connection, handle_message};
