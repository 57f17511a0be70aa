//! Registry server core.
//!
//! Binds the node-facing listener, accepts channel node connections and
//! spawns one handler task per connection. The server owns the
//! [`ServiceRegistry`] and the account store used by the console; both are
//! handed out as `Arc`s.

use crate::config::RegistryConfig;
use crate::directory::ServiceRegistry;
use crate::error::ServerError;
use crate::server::handlers::handle_connection;
use cluster_protocol::AccountStore;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// The registry process: listener, directory and account store.
pub struct RegistryServer {
    config: RegistryConfig,
    registry: Arc<ServiceRegistry>,
    accounts: Arc<dyn AccountStore>,
    shutdown_sender: broadcast::Sender<()>,
}

impl RegistryServer {
    /// Creates a server with an empty directory.
    ///
    /// # Arguments
    ///
    /// * `config` - bind address, shared node secret and listen backlog
    /// * `accounts` - account store the `auth` and `passwd` console commands write to
    pub fn new(config: RegistryConfig, accounts: Arc<dyn AccountStore>) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);
        Self {
            config,
            registry: Arc::new(ServiceRegistry::new()),
            accounts,
            shutdown_sender,
        }
    }

    /// Configuration the server was built with.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Shared handle to the directory of channel nodes.
    pub fn registry(&self) -> Arc<ServiceRegistry> {
        self.registry.clone()
    }

    /// Account store consulted by console commands.
    pub fn accounts(&self) -> Arc<dyn AccountStore> {
        self.accounts.clone()
    }

    /// Binds the configured address and serves until [`RegistryServer::shutdown`].
    pub async fn start(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Creates the node-facing listener.
    ///
    /// # Returns
    ///
    /// The bound tokio listener, or [`ServerError::Network`] if the socket
    /// could not be created, bound or put into listening mode.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let address = self.config.bind_address;
        let domain = if address.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
        if let Err(e) = socket.set_reuse_address(true) {
            warn!("Failed to set SO_REUSEADDR: {}", e);
        }
        socket
            .bind(&address.into())
            .map_err(|e| ServerError::Network(format!("Bind failed: {e}")))?;
        socket
            .listen(self.config.backlog)
            .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

        let std_listener: StdTcpListener = socket.into();
        std_listener
            .set_nonblocking(true)
            .map_err(|e| ServerError::Network(format!("Failed to set non-blocking: {e}")))?;

        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))?;

        let local = listener.local_addr().unwrap_or(address);
        info!("✅ Registry listening for channel nodes on {}", local);
        Ok(listener)
    }

    /// Accept loop. Every connection gets its own task.
    ///
    /// Returns `Ok(())` once [`RegistryServer::shutdown`] is called, after
    /// killing every authenticated node link.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let secret: Arc<str> = Arc::from(self.config.password.as_str());

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_handler(stream, peer, secret.clone()),
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        return Err(ServerError::Network(format!("Accept failed: {e}")));
                    }
                },
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("🧹 Closing {} node link(s)...", self.registry.authenticated_links().len());
        for link in self.registry.authenticated_links() {
            link.kill();
        }
        info!("Registry stopped");
        Ok(())
    }

    fn spawn_handler(&self, stream: tokio::net::TcpStream, peer: SocketAddr, secret: Arc<str>) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let registry = self.registry.clone();
        let shutdown = self.shutdown_sender.subscribe();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, registry, secret, shutdown).await {
                warn!("Link from {} ended with error: {}", peer, e);
            }
        });
    }

    /// Stops the accept loop and every link handler.
    pub fn shutdown(&self) {
        let _ = self.shutdown_sender.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_protocol::MemoryAccountStore;

    fn server_on(bind_address: SocketAddr) -> RegistryServer {
        let config = RegistryConfig {
            bind_address,
            ..RegistryConfig::default()
        };
        RegistryServer::new(config, Arc::new(MemoryAccountStore::new()))
    }

    #[tokio::test]
    async fn test_address_in_use_is_a_network_error() {
        let first = server_on("127.0.0.1:0".parse().unwrap());
        let listener = first.bind().unwrap();
        let taken = listener.local_addr().unwrap();

        let second = server_on(taken);
        assert!(matches!(second.bind(), Err(ServerError::Network(_))));
    }

    #[tokio::test]
    async fn test_serve_returns_after_shutdown() {
        let server = Arc::new(server_on("127.0.0.1:0".parse().unwrap()));
        let listener = server.bind().unwrap();

        let serving = server.clone();
        let task = tokio::spawn(async move { serving.serve(listener).await });
        // The accept loop subscribes once it starts; keep signalling until it stops
        for _ in 0..100 {
            server.shutdown();
            if task.is_finished() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
