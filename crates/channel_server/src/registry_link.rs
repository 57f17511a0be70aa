//! Connection from a channel node to the registry.
//!
//! Startup blocks on [`RegistryLink::connect_until_ready`]: connect, pass the
//! challenge and identify, retrying every reconnect interval until it
//! works. After that [`RegistryLink::run`] processes what the registry sends
//! and, when the link drops, waits one interval and goes through the same
//! loop again while the node keeps serving its clients.

use crate::clients::ClientRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::status::{NodeStatus, ServerList, UpstreamLink};
use cluster_protocol::handshake::{connect, identify, node_challenge, Established};
use cluster_protocol::{ControlMessage, LinkHandle, ProtocolError, Sleeper};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

pub struct RegistryLink {
    address: String,
    password: String,
    reconnect_interval: Duration,
    upstream: Arc<UpstreamLink>,
    status: Arc<NodeStatus>,
    server_list: Arc<ServerList>,
    clients: Arc<ClientRegistry>,
    coordinator: Arc<ShutdownCoordinator>,
    sleeper: Arc<dyn Sleeper>,
}

impl RegistryLink {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        address: impl Into<String>,
        password: impl Into<String>,
        reconnect_interval: Duration,
        upstream: Arc<UpstreamLink>,
        status: Arc<NodeStatus>,
        server_list: Arc<ServerList>,
        clients: Arc<ClientRegistry>,
        coordinator: Arc<ShutdownCoordinator>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            address: address.into(),
            password: password.into(),
            reconnect_interval,
            upstream,
            status,
            server_list,
            clients,
            coordinator,
            sleeper,
        }
    }

    /// Retries until the registry accepts this node. Never gives up.
    pub async fn connect_until_ready(&self) -> Established<TcpStream> {
        loop {
            info!("📡 Connecting to registry at {}", self.address);
            match self.try_connect().await {
                Ok(established) => {
                    info!("✅ Identified with registry at {}", self.address);
                    return established;
                }
                Err(e) => {
                    error!(
                        "Unable to connect to registry at {}: {}. Retrying in {}s",
                        self.address,
                        e,
                        self.reconnect_interval.as_secs()
                    );
                    self.sleeper.sleep(self.reconnect_interval).await;
                }
            }
        }
    }

    async fn try_connect(&self) -> Result<Established<TcpStream>, ProtocolError> {
        let stream = connect(&self.address).await?;
        let peer = stream.peer_addr()?;
        let (link, mut reader) = node_challenge(stream, peer).await?;

        if let Err(e) = identify(&link, &mut reader, &self.password).await {
            link.kill();
            return Err(e);
        }
        link.set_label("registry");
        Ok((link, reader))
    }

    /// Serves established links forever, reconnecting whenever one drops.
    pub async fn run(self: Arc<Self>, established: Established<TcpStream>) {
        let mut established = established;
        loop {
            let (link, mut reader) = established;
            self.upstream.set(link.clone());
            self.status.push();

            loop {
                tokio::select! {
                    message = reader.next_message() => match message {
                        Ok(Some(message)) => self.handle_message(&link, message),
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Registry link error: {}", e);
                            break;
                        }
                    },
                    _ = link.wait_killed() => break,
                }
            }

            link.kill();
            self.upstream.clear(link.id());
            warn!(
                "💔 Lost connection to registry, reconnecting in {}s",
                self.reconnect_interval.as_secs()
            );
            self.sleeper.sleep(self.reconnect_interval).await;
            established = self.connect_until_ready().await;
        }
    }

    /// Handles one message from the registry.
    pub fn handle_message(&self, link: &LinkHandle, message: ControlMessage) {
        match message {
            ControlMessage::ChannelStatusBroadcast { entries } => {
                debug!("Directory update with {} channel(s)", entries.len());
                self.server_list.update(entries);
            }
            ControlMessage::ChannelShutdown { delay_seconds } => {
                info!("🛑 Registry requested shutdown in {}s", delay_seconds);
                let status = self.coordinator.request(delay_seconds);
                if link.send(ControlMessage::ChannelShutdownResult { status }).is_err() {
                    warn!("Could not report shutdown result ({}) to registry", status);
                }
            }
            ControlMessage::BroadcastNotice { message } => {
                let reached = self.clients.broadcast_notice(&message);
                debug!("Notice delivered to {} client(s)", reached);
            }
            other => {
                warn!("Unexpected '{}' from registry", other.op());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::clients::{ClientEvent, ClientSession};
    use crate::config::ChannelConfig;
    use crate::server::{ChannelContext, ChannelDeps};
    use crate::shutdown::tests::{entry, CountingStore, RecordingExit};
    use cluster_protocol::{ControlMessage, LinkHandle, LinkState, MemoryAccountStore, ShutdownResult, TokioSleeper};
    use std::sync::Arc;

    fn context() -> Arc<ChannelContext> {
        ChannelContext::new(
            ChannelConfig::default(),
            ChannelDeps {
                accounts: Arc::new(MemoryAccountStore::new()),
                store: Arc::new(CountingStore::default()),
                exit: Arc::new(RecordingExit::default()),
                sleeper: Arc::new(TokioSleeper),
            },
        )
    }

    #[test]
    fn test_directory_broadcast_replaces_server_list() {
        let ctx = context();
        let (link, _rx) = LinkHandle::new("127.0.0.1:11000".parse().unwrap(), LinkState::LoggedIn);

        ctx.registry_link.handle_message(
            &link,
            ControlMessage::ChannelStatusBroadcast {
                entries: vec![entry("World1", "Alpha"), entry("World1", "Beta")],
            },
        );
        assert_eq!(ctx.server_list.snapshot().len(), 2);
        assert!(ctx.server_list.contains("World1", "Beta"));
    }

    #[test]
    fn test_remote_shutdown_is_clamped_and_answered() {
        let ctx = context();
        let (link, mut rx) = LinkHandle::new("127.0.0.1:11000".parse().unwrap(), LinkState::LoggedIn);
        ctx.server_list.update(vec![entry("World1", "Alpha")]);

        ctx.registry_link
            .handle_message(&link, ControlMessage::ChannelShutdown { delay_seconds: 5000 });
        assert_eq!(ctx.coordinator.session().duration_secs, 1800);
        assert_eq!(
            rx.try_recv().unwrap(),
            ControlMessage::ChannelShutdownResult {
                status: ShutdownResult::Success
            }
        );

        ctx.registry_link
            .handle_message(&link, ControlMessage::ChannelShutdown { delay_seconds: 60 });
        assert_eq!(
            rx.try_recv().unwrap(),
            ControlMessage::ChannelShutdownResult {
                status: ShutdownResult::AlreadyInProgress
            }
        );
    }

    #[test]
    fn test_remote_shutdown_fails_when_unlisted() {
        let ctx = context();
        let (link, mut rx) = LinkHandle::new("127.0.0.1:11000".parse().unwrap(), LinkState::LoggedIn);

        ctx.registry_link
            .handle_message(&link, ControlMessage::ChannelShutdown { delay_seconds: 300 });
        assert_eq!(
            rx.try_recv().unwrap(),
            ControlMessage::ChannelShutdownResult {
                status: ShutdownResult::Fail
            }
        );
    }

    #[test]
    fn test_notice_reaches_clients() {
        let ctx = context();
        let (link, _rx) = LinkHandle::new("127.0.0.1:11000".parse().unwrap(), LinkState::LoggedIn);
        let (session, mut client_rx) = ClientSession::new("127.0.0.1:1".parse().unwrap(), "a", "Alice", 0);
        ctx.clients.add(session);

        ctx.registry_link.handle_message(
            &link,
            ControlMessage::BroadcastNotice {
                message: "GM: hello".to_string(),
            },
        );
        assert_eq!(
            client_rx.try_recv().unwrap(),
            ClientEvent::Notice {
                message: "GM: hello".to_string()
            }
        );
    }
}
