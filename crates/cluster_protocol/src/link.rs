//! Established control links.
//!
//! A link is split in two once the challenge is done: a [`LinkHandle`] that
//! any task may clone and send through, and a [`LinkReader`] owned by the
//! single task that processes the peer's messages. Outbound messages go
//! through an unbounded queue drained by a writer task, so sending never
//! blocks the caller (the registry relies on this to fan out broadcasts
//! while holding its directory lock).

use crate::cipher::StreamCipher;
use crate::error::ProtocolError;
use crate::frame::{read_frame, write_frame};
use crate::messages::ControlMessage;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Unique identifier of a link within one process.
pub type LinkId = usize;

static NEXT_LINK_ID: AtomicUsize = AtomicUsize::new(1);

/// Lifecycle of a control link. `Dead` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    AwaitingChallenge,
    Identifying,
    LoggedIn,
    Dead,
}

/// Shared handle to one end of a control link.
#[derive(Debug)]
pub struct LinkHandle {
    id: LinkId,
    peer: SocketAddr,
    state: Mutex<LinkState>,
    /// Operator-facing name of the peer once known (`group/name`)
    label: Mutex<Option<String>>,
    outbound: mpsc::UnboundedSender<ControlMessage>,
    killed: watch::Sender<bool>,
}

impl LinkHandle {
    /// Creates a handle and the queue its writer drains.
    ///
    /// Production code hands the receiver to [`spawn_writer`]; tests keep it
    /// to observe what was sent.
    pub fn new(peer: SocketAddr, state: LinkState) -> (Arc<Self>, mpsc::UnboundedReceiver<ControlMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (killed, _) = watch::channel(false);
        let handle = Arc::new(Self {
            id: NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            state: Mutex::new(state),
            label: Mutex::new(None),
            outbound,
            killed,
        });
        (handle, rx)
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Moves the link to `next`. Returns `false` (and changes nothing) once
    /// the link is dead.
    pub fn set_state(&self, next: LinkState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == LinkState::Dead {
            return false;
        }
        *state = next;
        true
    }

    pub fn is_logged_in(&self) -> bool {
        self.state() == LinkState::LoggedIn
    }

    pub fn is_dead(&self) -> bool {
        self.state() == LinkState::Dead
    }

    /// `group/name` of the node behind the link, once known.
    pub fn label(&self) -> Option<String> {
        self.label.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        *self.label.lock().unwrap_or_else(|e| e.into_inner()) = Some(label.into());
    }

    /// Name used in logs: the label if known, the peer address otherwise.
    pub fn display_name(&self) -> String {
        self.label().unwrap_or_else(|| self.peer.to_string())
    }

    /// Queues a message for the peer.
    pub fn send(&self, message: ControlMessage) -> Result<(), ProtocolError> {
        if self.is_dead() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.outbound
            .send(message)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Marks the link dead and asks its tasks to wind down. Messages queued
    /// before the kill are still flushed by the writer.
    pub fn kill(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == LinkState::Dead {
                return;
            }
            *state = LinkState::Dead;
        }
        debug!("🔌 Link {} to {} killed", self.id, self.display_name());
        self.killed.send_replace(true);
    }

    /// Resolves once [`LinkHandle::kill`] has been called.
    pub async fn wait_killed(&self) {
        let mut rx = self.killed.subscribe();
        until_killed(&mut rx).await;
    }
}

/// Receiving half of an established link.
pub struct LinkReader<R> {
    reader: R,
    cipher: StreamCipher,
}

impl<R> LinkReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, cipher: StreamCipher) -> Self {
        Self { reader, cipher }
    }

    /// Reads the next control message, `Ok(None)` on clean close.
    pub async fn next_message(&mut self) -> Result<Option<ControlMessage>, ProtocolError> {
        match read_frame(&mut self.reader, &mut self.cipher).await? {
            Some(payload) => Ok(Some(ControlMessage::from_bytes(&payload)?)),
            None => Ok(None),
        }
    }
}

/// Spawns the task that drains `rx` onto the socket.
///
/// The task ends when the link is killed (after flushing what was already
/// queued) or when a write fails, in which case it kills the link itself.
pub fn spawn_writer<W>(
    handle: Arc<LinkHandle>,
    mut writer: W,
    mut cipher: StreamCipher,
    mut rx: mpsc::UnboundedReceiver<ControlMessage>,
) -> tokio::task::JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut killed = handle.killed.subscribe();

        loop {
            tokio::select! {
                biased;
                message = rx.recv() => {
                    let Some(message) = message else { break };
                    if let Err(e) = write_message(&mut writer, &mut cipher, &message).await {
                        warn!("Failed to write '{}' to {}: {}", message.op(), handle.display_name(), e);
                        handle.kill();
                        break;
                    }
                }
                _ = until_killed(&mut killed) => {
                    // Flush whatever was queued before the kill
                    while let Ok(message) = rx.try_recv() {
                        if write_message(&mut writer, &mut cipher, &message).await.is_err() {
                            break;
                        }
                    }
                    break;
                }
            }
        }

        let _ = writer.shutdown().await;
    })
}

async fn until_killed(killed: &mut watch::Receiver<bool>) {
    let _ = killed.wait_for(|killed| *killed).await;
}

async fn write_message<W>(writer: &mut W, cipher: &mut StreamCipher, message: &ControlMessage) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let payload = message.to_bytes()?;
    write_frame(writer, &payload, cipher).await
}
