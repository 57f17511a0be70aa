//! The cluster directory.
//!
//! [`ServiceRegistry`] owns the map `(server_group, node_name) -> ServiceEntry`
//! together with the set of authenticated node links. Both live behind one
//! mutex so that ingesting a heartbeat and fanning the new directory out to
//! every node happen as one step: no node can observe a directory older
//! than one it was already sent.
//!
//! Entries are created by the first heartbeat of a node and updated in
//! place afterwards. They are never removed; `last_heartbeat` tells stale
//! entries apart.

use cluster_protocol::{current_timestamp, ChannelStatus, ControlMessage, LinkHandle, LinkId, ServiceEntry};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info};

/// Downstream consumer of directory updates (for example a front-end that
/// shows the channel list to players).
///
/// Observers are called with the directory lock held and must not call back
/// into the registry.
pub trait DirectoryObserver: Send + Sync {
    /// Called after every ingested heartbeat.
    ///
    /// # Arguments
    ///
    /// * `entries` - The whole directory, ordered by group then name
    fn directory_updated(&self, entries: &[ServiceEntry]);
}

#[derive(Default)]
struct Directory {
    entries: BTreeMap<(String, String), ServiceEntry>,
    links: Vec<Arc<LinkHandle>>,
}

impl Directory {
    fn snapshot(&self) -> Vec<ServiceEntry> {
        self.entries.values().cloned().collect()
    }
}

/// Directory of channel nodes plus the authenticated links that receive
/// its broadcasts.
pub struct ServiceRegistry {
    directory: Mutex<Directory>,
    observers: Mutex<Vec<Arc<dyn DirectoryObserver>>>,
    feed: watch::Sender<Arc<Vec<ServiceEntry>>>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    /// Creates an empty directory with no observers and no links.
    pub fn new() -> Self {
        let (feed, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            directory: Mutex::new(Directory::default()),
            observers: Mutex::new(Vec::new()),
            feed,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Directory> {
        self.directory.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Receives a fresh snapshot after every ingest.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<ServiceEntry>>> {
        self.feed.subscribe()
    }

    /// Registers an observer for every later directory update.
    pub fn add_observer(&self, observer: Arc<dyn DirectoryObserver>) {
        self.observers.lock().unwrap_or_else(|e| e.into_inner()).push(observer);
    }

    /// Creates or refreshes the entry for one node and broadcasts the new
    /// directory to observers and to every logged-in node link.
    ///
    /// # Arguments
    ///
    /// * `status` - Status reported by the node; `(server_group, node_name)` is the key
    ///
    /// # Returns
    ///
    /// The stored entry, stamped with the current time
    pub fn ingest_heartbeat(&self, status: &ChannelStatus) -> ServiceEntry {
        let mut directory = self.lock();

        let key = (status.server_group.clone(), status.node_name.clone());
        let entry = ServiceEntry {
            server_group: status.server_group.clone(),
            node_name: status.node_name.clone(),
            host: status.host.clone(),
            port: status.port,
            current_users: status.current_users,
            max_users: status.max_users,
            health: status.health,
            last_heartbeat: current_timestamp(),
        };

        match directory.entries.insert(key, entry.clone()) {
            None => info!(
                "🆕 {} registered at {}:{} ({})",
                entry.full_name(),
                entry.host,
                entry.port,
                entry.health
            ),
            Some(previous) if previous.health != entry.health => info!(
                "📊 {} changed from {} to {}",
                entry.full_name(),
                previous.health,
                entry.health
            ),
            Some(_) => debug!(
                "💓 Heartbeat from {} ({}/{})",
                entry.full_name(),
                entry.current_users,
                entry.max_users
            ),
        }

        let snapshot = directory.snapshot();

        for observer in self.observers.lock().unwrap_or_else(|e| e.into_inner()).iter() {
            observer.directory_updated(&snapshot);
        }

        let broadcast = ControlMessage::ChannelStatusBroadcast {
            entries: snapshot.clone(),
        };
        for link in directory.links.iter().filter(|link| link.is_logged_in()) {
            // A failed send means the link is going away; its handler cleans up
            let _ = link.send(broadcast.clone());
        }

        self.feed.send_replace(Arc::new(snapshot));

        entry
    }

    /// Heartbeat received on `link`. Ignored unless the link is logged in;
    /// the first accepted heartbeat labels the link with the node's name.
    pub fn ingest_from(&self, link: &LinkHandle, status: &ChannelStatus) -> Option<ServiceEntry> {
        if !link.is_logged_in() {
            debug!("Ignoring heartbeat from unauthenticated link {}", link.peer());
            return None;
        }

        let entry = self.ingest_heartbeat(status);
        if link.label().is_none() {
            link.set_label(entry.full_name());
            info!("🏷️ Link {} from {} is {}", link.id(), link.peer(), entry.full_name());
        }
        Some(entry)
    }

    /// Copy of every entry, ordered by group then name.
    pub fn snapshot(&self) -> Vec<ServiceEntry> {
        self.lock().snapshot()
    }

    /// Entry for one node, if it has ever sent a heartbeat.
    pub fn get(&self, server_group: &str, node_name: &str) -> Option<ServiceEntry> {
        self.lock()
            .entries
            .get(&(server_group.to_string(), node_name.to_string()))
            .cloned()
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds a link to the broadcast set. Adding the same link twice is a no-op.
    pub fn add_authenticated(&self, link: Arc<LinkHandle>) {
        let mut directory = self.lock();
        if !directory.links.iter().any(|known| known.id() == link.id()) {
            directory.links.push(link);
        }
    }

    /// Drops a link from the broadcast set.
    ///
    /// # Returns
    ///
    /// The removed link, or `None` if it was never added
    pub fn remove_link(&self, id: LinkId) -> Option<Arc<LinkHandle>> {
        let mut directory = self.lock();
        let index = directory.links.iter().position(|link| link.id() == id)?;
        Some(directory.links.remove(index))
    }

    /// Every link in the broadcast set, logged in or not.
    pub fn authenticated_links(&self) -> Vec<Arc<LinkHandle>> {
        self.lock().links.clone()
    }

    pub fn is_authenticated(&self, id: LinkId) -> bool {
        self.lock().links.iter().any(|link| link.id() == id)
    }

    /// Logged-in link labelled `group/name` (case-insensitive).
    pub fn find_link(&self, full_name: &str) -> Option<Arc<LinkHandle>> {
        self.lock()
            .links
            .iter()
            .find(|link| {
                link.is_logged_in()
                    && link
                        .label()
                        .is_some_and(|label| label.eq_ignore_ascii_case(full_name))
            })
            .cloned()
    }

    /// Sends a notice to every logged-in node.
    pub fn broadcast_notice(&self, message: &str) -> usize {
        let notice = ControlMessage::BroadcastNotice {
            message: message.to_string(),
        };
        let directory = self.lock();
        directory
            .links
            .iter()
            .filter(|link| link.is_logged_in())
            .filter(|link| link.send(notice.clone()).is_ok())
            .count()
    }

    /// Asks one node (`group/name`) or every node (`*`) to shut down after
    /// `delay_seconds`. Does not wait for the answers; they arrive as
    /// `channel_shutdown_result` on each link.
    ///
    /// # Arguments
    ///
    /// * `target` - `group/name` of one node, or `*` for all of them
    /// * `delay_seconds` - Countdown the node starts before stopping
    ///
    /// # Returns
    ///
    /// How many requests were sent, `None` if the name matches no logged-in node
    pub fn request_channel_shutdown(&self, target: &str, delay_seconds: i64) -> Option<usize> {
        let request = ControlMessage::ChannelShutdown { delay_seconds };

        let targets = if target == "*" {
            self.authenticated_links()
                .into_iter()
                .filter(|link| link.is_logged_in())
                .collect()
        } else {
            vec![self.find_link(target)?]
        };

        let mut sent = 0;
        for link in targets {
            if link.send(request.clone()).is_ok() {
                info!("🛑 Requested shutdown of {} in {}s", link.display_name(), delay_seconds);
                sent += 1;
            }
        }
        Some(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_protocol::{HealthState, LinkState};
    use std::net::SocketAddr;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn status(group: &str, name: &str, users: i32, max: i32) -> ChannelStatus {
        ChannelStatus {
            server_group: group.to_string(),
            node_name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port: 11020,
            current_users: users,
            max_users: max,
            health: HealthState::classify(false, true, users, max),
        }
    }

    struct Recorder(Mutex<Vec<usize>>);

    impl DirectoryObserver for Recorder {
        fn directory_updated(&self, entries: &[ServiceEntry]) {
            self.0.lock().unwrap().push(entries.len());
        }
    }

    #[test]
    fn test_heartbeat_creates_normal_entry() {
        let registry = ServiceRegistry::new();
        let entry = registry.ingest_heartbeat(&status("World1", "Alpha", 10, 100));

        assert_eq!(entry.health, HealthState::Normal);
        assert_eq!(entry.current_users, 10);
        assert_eq!(entry.max_users, 100);
        assert!(entry.last_heartbeat > 0);
        assert_eq!(registry.get("World1", "Alpha"), Some(entry));
    }

    #[test]
    fn test_repeated_heartbeats_update_in_place() {
        let registry = ServiceRegistry::new();
        for users in [1, 50, 100, 3] {
            registry.ingest_heartbeat(&status("World1", "Alpha", users, 100));
        }
        registry.ingest_heartbeat(&status("World1", "Beta", 0, 100));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("World1", "Alpha").unwrap().current_users, 3);
    }

    #[test]
    fn test_ingest_fans_out_to_links_observers_and_feed() {
        let registry = ServiceRegistry::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        registry.add_observer(recorder.clone());
        let mut feed = registry.subscribe();

        let (logged_in, mut logged_in_rx) = LinkHandle::new(peer(), LinkState::LoggedIn);
        let (identifying, mut identifying_rx) = LinkHandle::new(peer(), LinkState::Identifying);
        registry.add_authenticated(logged_in.clone());
        registry.add_authenticated(identifying.clone());

        registry.ingest_heartbeat(&status("World1", "Alpha", 10, 100));

        match logged_in_rx.try_recv().unwrap() {
            ControlMessage::ChannelStatusBroadcast { entries } => assert_eq!(entries.len(), 1),
            other => panic!("unexpected message {other:?}"),
        }
        assert!(identifying_rx.try_recv().is_err());
        assert_eq!(*recorder.0.lock().unwrap(), vec![1]);
        assert!(feed.has_changed().unwrap());
        assert_eq!(feed.borrow_and_update().len(), 1);
    }

    #[test]
    fn test_ingest_from_requires_login_and_labels_link() {
        let registry = ServiceRegistry::new();

        let (pending, _rx) = LinkHandle::new(peer(), LinkState::Identifying);
        assert!(registry.ingest_from(&pending, &status("World1", "Alpha", 1, 10)).is_none());
        assert!(registry.is_empty());

        let (link, _rx) = LinkHandle::new(peer(), LinkState::LoggedIn);
        registry.add_authenticated(link.clone());
        registry.ingest_from(&link, &status("World1", "Alpha", 1, 10)).unwrap();
        assert_eq!(link.label().as_deref(), Some("World1/Alpha"));
        assert_eq!(registry.find_link("alpha/world1").map(|l| l.id()), Some(link.id()));
    }

    #[test]
    fn test_remote_shutdown_addressing() {
        let registry = ServiceRegistry::new();
        let mut receivers = Vec::new();
        for name in ["Alpha", "Beta"] {
            let (link, rx) = LinkHandle::new(peer(), LinkState::LoggedIn);
            registry.add_authenticated(link.clone());
            registry.ingest_from(&link, &status("World1", name, 0, 10)).unwrap();
            receivers.push(rx);
        }
        for rx in receivers.iter_mut() {
            while rx.try_recv().is_ok() {}
        }

        assert_eq!(registry.request_channel_shutdown("World1/Gamma", 60), None);
        assert_eq!(registry.request_channel_shutdown("World1/Beta", 60), Some(1));
        assert!(receivers[0].try_recv().is_err());
        assert_eq!(
            receivers[1].try_recv().unwrap(),
            ControlMessage::ChannelShutdown { delay_seconds: 60 }
        );

        assert_eq!(registry.request_channel_shutdown("*", 5000), Some(2));
        for rx in receivers.iter_mut() {
            assert_eq!(rx.try_recv().unwrap(), ControlMessage::ChannelShutdown { delay_seconds: 5000 });
        }
    }

    #[test]
    fn test_remove_link() {
        let registry = ServiceRegistry::new();
        let (link, _rx) = LinkHandle::new(peer(), LinkState::LoggedIn);
        registry.add_authenticated(link.clone());
        registry.add_authenticated(link.clone());
        assert_eq!(registry.authenticated_links().len(), 1);

        assert!(registry.remove_link(link.id()).is_some());
        assert!(!registry.is_authenticated(link.id()));
        assert!(registry.remove_link(link.id()).is_none());
    }
}
