//! What a channel node reports upstream, and the slot holding the current
//! registry link.

use crate::clients::ClientRegistry;
use cluster_protocol::schedule::Scheduler;
use cluster_protocol::{ChannelStatus, ControlMessage, HealthState, LinkHandle, LinkId, ServiceEntry, TimerId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// The registry link currently in use, if any.
///
/// The link is replaced on every reconnect; components that talk upstream
/// go through this slot instead of holding a link themselves.
#[derive(Debug, Default)]
pub struct UpstreamLink {
    current: Mutex<Option<Arc<LinkHandle>>>,
}

impl UpstreamLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, link: Arc<LinkHandle>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(link);
    }

    /// Clears the slot if it still holds link `id`.
    pub fn clear(&self, id: LinkId) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if current.as_ref().is_some_and(|link| link.id() == id) {
            *current = None;
        }
    }

    pub fn current(&self) -> Option<Arc<LinkHandle>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.current().is_some_and(|link| link.is_logged_in())
    }

    /// Sends upstream if the link is logged in. Returns whether it was sent.
    pub fn send(&self, message: ControlMessage) -> bool {
        match self.current() {
            Some(link) if link.is_logged_in() => link.send(message).is_ok(),
            _ => false,
        }
    }
}

/// Identity and load of this node, and the heartbeat built from them.
pub struct NodeStatus {
    server_group: String,
    node_name: String,
    host: String,
    port: u16,
    max_users: i32,
    maintenance: AtomicBool,
    running: AtomicBool,
    clients: Arc<ClientRegistry>,
    upstream: Arc<UpstreamLink>,
}

impl NodeStatus {
    /// A new node starts in maintenance and not running, which reports
    /// `Booting` until startup completes.
    pub fn new(
        server_group: impl Into<String>,
        node_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        max_users: i32,
        clients: Arc<ClientRegistry>,
        upstream: Arc<UpstreamLink>,
    ) -> Self {
        Self {
            server_group: server_group.into(),
            node_name: node_name.into(),
            host: host.into(),
            port,
            max_users,
            maintenance: AtomicBool::new(true),
            running: AtomicBool::new(false),
            clients,
            upstream,
        }
    }

    pub fn server_group(&self) -> &str {
        &self.server_group
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn full_name(&self) -> String {
        cluster_protocol::full_name(&self.server_group, &self.node_name)
    }

    pub fn max_users(&self) -> i32 {
        self.max_users
    }

    pub fn current_users(&self) -> i32 {
        i32::try_from(self.clients.count()).unwrap_or(i32::MAX)
    }

    pub fn is_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Changes the maintenance flag; a change is pushed upstream at once.
    pub fn set_maintenance(&self, maintenance: bool) {
        if self.maintenance.swap(maintenance, Ordering::SeqCst) != maintenance {
            info!(
                "🔧 {} maintenance {}",
                self.full_name(),
                if maintenance { "started" } else { "ended" }
            );
            self.push();
        }
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn health(&self) -> HealthState {
        HealthState::classify(self.is_maintenance(), self.is_running(), self.current_users(), self.max_users)
    }

    pub fn current_status(&self) -> ChannelStatus {
        ChannelStatus {
            server_group: self.server_group.clone(),
            node_name: self.node_name.clone(),
            host: self.host.clone(),
            port: self.port,
            current_users: self.current_users(),
            max_users: self.max_users,
            health: self.health(),
        }
    }

    /// Sends one heartbeat if the registry link is logged in.
    pub fn push(&self) -> bool {
        self.upstream.send(ControlMessage::ChannelStatus(self.current_status()))
    }

    /// Registers the recurring heartbeat. Ticks while not logged in are
    /// skipped.
    pub fn start_heartbeat(self: &Arc<Self>, scheduler: &Scheduler, period: Duration) -> TimerId {
        let status = self.clone();
        scheduler.schedule_every(period, move || {
            if !status.push() {
                debug!("Heartbeat skipped: not logged in to the registry");
            }
        })
    }
}

/// The directory as last received from the registry.
#[derive(Debug, Default)]
pub struct ServerList {
    entries: Mutex<Vec<ServiceEntry>>,
}

impl ServerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, entries: Vec<ServiceEntry>) {
        *self.entries.lock().unwrap_or_else(|e| e.into_inner()) = entries;
    }

    pub fn snapshot(&self) -> Vec<ServiceEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn contains(&self, server_group: &str, node_name: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|entry| entry.server_group == server_group && entry.node_name == node_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_protocol::LinkState;
    use crate::clients::ClientSession;

    fn node(upstream: Arc<UpstreamLink>, clients: Arc<ClientRegistry>) -> Arc<NodeStatus> {
        Arc::new(NodeStatus::new("World1", "Alpha", "127.0.0.1", 11020, 100, clients, upstream))
    }

    #[test]
    fn test_boot_then_running_health() {
        let status = node(Arc::new(UpstreamLink::new()), Arc::new(ClientRegistry::new()));
        assert_eq!(status.health(), HealthState::Booting);

        status.set_running(true);
        assert_eq!(status.health(), HealthState::Maintenance);

        status.set_maintenance(false);
        assert_eq!(status.health(), HealthState::Normal);
    }

    #[test]
    fn test_heartbeat_skipped_until_logged_in() {
        let upstream = Arc::new(UpstreamLink::new());
        let clients = Arc::new(ClientRegistry::new());
        let (session, _rx) = ClientSession::new("127.0.0.1:1".parse().unwrap(), "a", "Alice", 0);
        clients.add(session);
        let status = node(upstream.clone(), clients);
        let scheduler = Scheduler::new();
        status.start_heartbeat(&scheduler, Duration::from_secs(60));

        let (link, mut rx) = LinkHandle::new("127.0.0.1:11000".parse().unwrap(), LinkState::Identifying);
        upstream.set(link.clone());
        scheduler.advance(Duration::from_secs(60));
        assert!(rx.try_recv().is_err());

        link.set_state(LinkState::LoggedIn);
        scheduler.advance(Duration::from_secs(60));
        match rx.try_recv().unwrap() {
            ControlMessage::ChannelStatus(report) => {
                assert_eq!(report.current_users, 1);
                assert_eq!(report.max_users, 100);
                assert_eq!(report.health, HealthState::Booting);
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_maintenance_change_pushes_status() {
        let upstream = Arc::new(UpstreamLink::new());
        let status = node(upstream.clone(), Arc::new(ClientRegistry::new()));
        status.set_running(true);
        let (link, mut rx) = LinkHandle::new("127.0.0.1:11000".parse().unwrap(), LinkState::LoggedIn);
        upstream.set(link.clone());

        status.set_maintenance(false);
        status.set_maintenance(false);
        status.set_maintenance(true);

        let healths: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|message| match message {
                ControlMessage::ChannelStatus(report) => report.health,
                other => panic!("unexpected message {other:?}"),
            })
            .collect();
        assert_eq!(healths, vec![HealthState::Normal, HealthState::Maintenance]);

        upstream.clear(link.id());
        assert!(!upstream.is_logged_in());
    }
}
