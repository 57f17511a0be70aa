//! Client sessions on a channel node.
//!
//! A [`ClientSession`] is one connected player: the account it logged in
//! with, the character it controls, the account's authority and a queue of
//! events for the client. The [`ClientRegistry`] is the node's list of live
//! sessions; shutdown walks it under its lock.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Server -> client line, one JSON document per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Broadcast-style announcement shown to everyone
    Notice { message: String },
    /// Direct system reply to this client
    ServerMessage { message: String },
    /// The client should disconnect within `seconds`
    DisconnectRequest { seconds: i64 },
}

#[derive(Debug)]
pub struct ClientSession {
    id: SessionId,
    account: String,
    character: String,
    authority: i32,
    remote_addr: SocketAddr,
    connected_at: SystemTime,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    killed: watch::Sender<bool>,
}

impl ClientSession {
    /// Creates a session and the queue its writer drains.
    pub fn new(
        remote_addr: SocketAddr,
        account: impl Into<String>,
        character: impl Into<String>,
        authority: i32,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ClientEvent>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (killed, _) = watch::channel(false);
        let session = Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            account: account.into(),
            character: character.into(),
            authority,
            remote_addr,
            connected_at: SystemTime::now(),
            outbound,
            killed,
        });
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Name of the character this session controls.
    pub fn character(&self) -> &str {
        &self.character
    }

    pub fn authority(&self) -> i32 {
        self.authority
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    /// Queues an event; `false` once the client is gone.
    pub fn send(&self, event: ClientEvent) -> bool {
        !self.is_killed() && self.outbound.send(event).is_ok()
    }

    pub fn server_message(&self, message: impl Into<String>) -> bool {
        self.send(ClientEvent::ServerMessage {
            message: message.into(),
        })
    }

    pub fn notice(&self, message: impl Into<String>) -> bool {
        self.send(ClientEvent::Notice {
            message: message.into(),
        })
    }

    /// Ends the session. Events queued before the kill are still written.
    pub fn kill(&self) {
        if !self.killed.send_replace(true) {
            debug!("Session {} ({}) killed", self.id, self.character);
        }
    }

    pub fn is_killed(&self) -> bool {
        *self.killed.borrow()
    }

    pub async fn wait_killed(&self) {
        let mut rx = self.killed.subscribe();
        let _ = rx.wait_for(|killed| *killed).await;
    }
}

/// Looks characters up by name for targeted commands.
pub trait ActorDirectory: Send + Sync {
    fn find_character(&self, name: &str) -> Option<Arc<ClientSession>>;
}

/// Why [`ClientRegistry::admit`] turned a session away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitError {
    Full,
    AlreadyOnline,
}

/// Every live session of this node.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    sessions: Mutex<BTreeMap<SessionId, Arc<ClientSession>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<SessionId, Arc<ClientSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a session unless its character is already online.
    pub fn add(&self, session: Arc<ClientSession>) -> bool {
        self.admit(session, usize::MAX).is_ok()
    }

    /// Adds a session if fewer than `capacity` are online and its character
    /// is not. Both checks and the insert happen under one lock.
    pub fn admit(&self, session: Arc<ClientSession>, capacity: usize) -> Result<(), AdmitError> {
        let mut sessions = self.lock();
        if sessions.len() >= capacity {
            return Err(AdmitError::Full);
        }
        if sessions
            .values()
            .any(|s| s.character().eq_ignore_ascii_case(session.character()))
        {
            return Err(AdmitError::AlreadyOnline);
        }
        info!("👋 {} ({}) joined from {}", session.character(), session.account(), session.remote_addr());
        sessions.insert(session.id(), session);
        Ok(())
    }

    pub fn remove(&self, id: SessionId) -> Option<Arc<ClientSession>> {
        let removed = self.lock().remove(&id);
        if let Some(session) = &removed {
            info!("👋 {} left", session.character());
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn snapshot(&self) -> Vec<Arc<ClientSession>> {
        self.lock().values().cloned().collect()
    }

    /// Sends a notice to every client. Returns how many were reached.
    pub fn broadcast_notice(&self, message: &str) -> usize {
        self.lock()
            .values()
            .filter(|session| session.notice(message))
            .count()
    }

    /// Asks every client to disconnect within `seconds`.
    pub fn request_disconnect(&self, seconds: i64) -> usize {
        self.lock()
            .values()
            .filter(|session| session.send(ClientEvent::DisconnectRequest { seconds }))
            .count()
    }

    /// Kills every session while holding the list lock, so no session can
    /// join halfway through.
    pub fn kill_all(&self) -> usize {
        let sessions = self.lock();
        for session in sessions.values() {
            session.kill();
        }
        sessions.len()
    }
}

impl ActorDirectory for ClientRegistry {
    fn find_character(&self, name: &str) -> Option<Arc<ClientSession>> {
        self.lock()
            .values()
            .find(|session| session.character().eq_ignore_ascii_case(name))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:60000".parse().unwrap()
    }

    #[test]
    fn test_character_names_are_unique() {
        let clients = ClientRegistry::new();
        let (first, _rx1) = ClientSession::new(addr(), "a", "Bob", 0);
        let (second, _rx2) = ClientSession::new(addr(), "b", "bob", 0);

        assert!(clients.add(first.clone()));
        assert!(!clients.add(second));
        assert_eq!(clients.count(), 1);
        assert_eq!(clients.find_character("BOB").map(|s| s.id()), Some(first.id()));

        clients.remove(first.id());
        assert!(clients.find_character("bob").is_none());
    }

    #[test]
    fn test_admit_enforces_capacity() {
        let clients = ClientRegistry::new();
        let (alice, _rx1) = ClientSession::new(addr(), "a", "Alice", 0);
        let (bob, _rx2) = ClientSession::new(addr(), "b", "Bob", 0);
        let (again, _rx3) = ClientSession::new(addr(), "c", "alice", 0);

        assert_eq!(clients.admit(alice, 1), Ok(()));
        assert_eq!(clients.admit(again, 2), Err(AdmitError::AlreadyOnline));
        assert_eq!(clients.admit(bob, 1), Err(AdmitError::Full));
        assert_eq!(clients.count(), 1);
    }

    #[test]
    fn test_concurrent_admits_never_exceed_capacity() {
        let clients = Arc::new(ClientRegistry::new());
        let threads: Vec<_> = (0..16)
            .map(|i| {
                let clients = clients.clone();
                std::thread::spawn(move || {
                    let (session, _rx) = ClientSession::new(addr(), "acct", &format!("Player{i}"), 0);
                    clients.admit(session, 5).is_ok()
                })
            })
            .collect();

        let admitted = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 5);
        assert_eq!(clients.count(), 5);
    }

    #[test]
    fn test_broadcast_and_disconnect_request() {
        let clients = ClientRegistry::new();
        let (alice, mut alice_rx) = ClientSession::new(addr(), "a", "Alice", 0);
        let (bob, mut bob_rx) = ClientSession::new(addr(), "b", "Bob", 0);
        clients.add(alice);
        clients.add(bob.clone());
        bob.kill();

        assert_eq!(clients.broadcast_notice("hello"), 1);
        assert_eq!(
            alice_rx.try_recv().unwrap(),
            ClientEvent::Notice {
                message: "hello".to_string()
            }
        );
        assert!(bob_rx.try_recv().is_err());

        assert_eq!(clients.request_disconnect(30), 1);
        assert_eq!(alice_rx.try_recv().unwrap(), ClientEvent::DisconnectRequest { seconds: 30 });
    }

    #[test]
    fn test_kill_all() {
        let clients = ClientRegistry::new();
        let sessions: Vec<_> = ["A", "B", "C"]
            .iter()
            .map(|name| {
                let (session, _rx) = ClientSession::new(addr(), *name, *name, 0);
                clients.add(session.clone());
                session
            })
            .collect();

        assert_eq!(clients.kill_all(), 3);
        assert!(sessions.iter().all(|s| s.is_killed()));
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_string(&ClientEvent::DisconnectRequest { seconds: 30 }).unwrap();
        assert_eq!(json, r#"{"event":"disconnect_request","seconds":30}"#);
    }
}
