use crate::directory::ServiceRegistry;
use crate::error::ServerError;
use cluster_protocol::handshake::{random_seed, registry_challenge, verify_secret};
use cluster_protocol::{ControlMessage, LinkHandle, LinkState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Runs one node connection from the challenge until it closes.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    registry: Arc<ServiceRegistry>,
    secret: Arc<str>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    debug!("🔗 Connection from {}", peer);
    let (link, mut reader) = registry_challenge(stream, peer, random_seed()).await?;

    let result = loop {
        tokio::select! {
            message = reader.next_message() => match message {
                Ok(Some(message)) => handle_message(&registry, &link, &secret, message),
                Ok(None) => break Ok(()),
                Err(e) => break Err(ServerError::from(e)),
            },
            _ = link.wait_killed() => break Ok(()),
            _ = shutdown.recv() => break Ok(()),
        }
    };

    if registry.remove_link(link.id()).is_some() {
        info!("👋 {} disconnected", link.display_name());
    }
    link.kill();
    result
}

/// Handles one message from a node link.
pub fn handle_message(registry: &ServiceRegistry, link: &Arc<LinkHandle>, secret: &str, message: ControlMessage) {
    match message {
        ControlMessage::ServerIdentify { password_hash } => {
            if link.state() != LinkState::Identifying {
                warn!("Repeated identify from {}, ignoring", link.display_name());
                return;
            }

            if !verify_secret(secret, &password_hash) {
                let _ = link.send(ControlMessage::ServerIdentifyResult { success: false });
                warn!("🚨 Rejected node identify from {}: wrong password", link.peer());
                link.kill();
                return;
            }

            link.set_state(LinkState::LoggedIn);
            // Reply before joining the set so no broadcast overtakes the result
            let _ = link.send(ControlMessage::ServerIdentifyResult { success: true });
            registry.add_authenticated(link.clone());
            info!("🔐 Node at {} identified", link.peer());
        }
        ControlMessage::ChannelStatus(status) => {
            registry.ingest_from(link, &status);
        }
        ControlMessage::ChannelShutdownResult { status } if link.is_logged_in() => {
            info!("🛑 Shutdown request result from {}: {}", link.display_name(), status);
        }
        ControlMessage::BroadcastNotice { message } if link.is_logged_in() => {
            let reached = registry.broadcast_notice(&message);
            info!("📢 Notice from {} relayed to {} node(s)", link.display_name(), reached);
        }
        other => {
            warn!("Unexpected '{}' from {}", other.op(), link.display_name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_protocol::handshake::hash_secret;
    use cluster_protocol::{ChannelStatus, HealthState, ShutdownResult};

    fn peer() -> SocketAddr {
        "127.0.0.1:50100".parse().unwrap()
    }

    fn status() -> ChannelStatus {
        ChannelStatus {
            server_group: "World1".to_string(),
            node_name: "Alpha".to_string(),
            host: "127.0.0.1".to_string(),
            port: 11020,
            current_users: 10,
            max_users: 100,
            health: HealthState::Normal,
        }
    }

    #[test]
    fn test_wrong_identify_kills_link() {
        let registry = ServiceRegistry::new();
        let (link, mut rx) = LinkHandle::new(peer(), LinkState::Identifying);

        handle_message(
            &registry,
            &link,
            "secret",
            ControlMessage::ServerIdentify {
                password_hash: hash_secret("guess"),
            },
        );

        assert_eq!(rx.try_recv().unwrap(), ControlMessage::ServerIdentifyResult { success: false });
        assert!(link.is_dead());
        assert!(!registry.is_authenticated(link.id()));
    }

    #[test]
    fn test_identify_then_heartbeat() {
        let registry = ServiceRegistry::new();
        let (link, mut rx) = LinkHandle::new(peer(), LinkState::Identifying);

        handle_message(
            &registry,
            &link,
            "secret",
            ControlMessage::ServerIdentify {
                password_hash: hash_secret("secret"),
            },
        );
        assert_eq!(rx.try_recv().unwrap(), ControlMessage::ServerIdentifyResult { success: true });
        assert!(link.is_logged_in());
        assert!(registry.is_authenticated(link.id()));

        handle_message(&registry, &link, "secret", ControlMessage::ChannelStatus(status()));
        assert!(matches!(rx.try_recv().unwrap(), ControlMessage::ChannelStatusBroadcast { .. }));
        assert_eq!(registry.get("World1", "Alpha").unwrap().health, HealthState::Normal);
    }

    #[test]
    fn test_unauthenticated_link_cannot_report_or_relay() {
        let registry = ServiceRegistry::new();
        let (pending, mut rx) = LinkHandle::new(peer(), LinkState::Identifying);
        let (other, mut other_rx) = LinkHandle::new(peer(), LinkState::LoggedIn);
        registry.add_authenticated(other);

        handle_message(&registry, &pending, "secret", ControlMessage::ChannelStatus(status()));
        handle_message(
            &registry,
            &pending,
            "secret",
            ControlMessage::BroadcastNotice {
                message: "hi".to_string(),
            },
        );
        handle_message(
            &registry,
            &pending,
            "secret",
            ControlMessage::ChannelShutdownResult {
                status: ShutdownResult::Success,
            },
        );

        assert!(registry.is_empty());
        assert!(rx.try_recv().is_err());
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn test_notice_is_relayed_to_every_node() {
        let registry = ServiceRegistry::new();
        let (sender, mut sender_rx) = LinkHandle::new(peer(), LinkState::LoggedIn);
        let (other, mut other_rx) = LinkHandle::new(peer(), LinkState::LoggedIn);
        registry.add_authenticated(sender.clone());
        registry.add_authenticated(other);

        handle_message(
            &registry,
            &sender,
            "secret",
            ControlMessage::BroadcastNotice {
                message: "GM: hello".to_string(),
            },
        );

        let expected = ControlMessage::BroadcastNotice {
            message: "GM: hello".to_string(),
        };
        assert_eq!(sender_rx.try_recv().unwrap(), expected);
        assert_eq!(other_rx.try_recv().unwrap(), expected);
    }
}
