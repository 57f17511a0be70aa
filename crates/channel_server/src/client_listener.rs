//! Client-facing listener of a channel node.
//!
//! Clients speak a line protocol. The first line is `<account> <character>`;
//! every line after that is chat or a command. The server answers with one
//! JSON [`ClientEvent`] per line.

use crate::clients::{AdmitError, ClientEvent, ClientSession};
use crate::error::ChannelError;
use crate::server::ChannelContext;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long a new connection has to send its login line.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Binds the client listener.
pub fn bind_listener(address: SocketAddr, backlog: i32) -> Result<TcpListener, ChannelError> {
    let domain = if address.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ChannelError::Network(format!("Socket creation failed: {e}")))?;
    if let Err(e) = socket.set_reuse_address(true) {
        warn!("Failed to set SO_REUSEADDR: {}", e);
    }
    socket
        .bind(&address.into())
        .map_err(|e| ChannelError::Network(format!("Bind failed: {e}")))?;
    socket
        .listen(backlog)
        .map_err(|e| ChannelError::Network(format!("Listen failed: {e}")))?;

    let std_listener: StdTcpListener = socket.into();
    std_listener
        .set_nonblocking(true)
        .map_err(|e| ChannelError::Network(format!("Failed to set non-blocking: {e}")))?;
    TcpListener::from_std(std_listener)
        .map_err(|e| ChannelError::Network(format!("Tokio listener creation failed: {e}")))
}

/// Runs one client connection from login until it closes.
pub async fn handle_client(stream: TcpStream, peer: SocketAddr, context: Arc<ChannelContext>) -> Result<(), ChannelError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let login = match tokio::time::timeout(LOGIN_TIMEOUT, lines.next_line()).await {
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            debug!("{} sent no login line in time", peer);
            return Ok(());
        }
    };

    let mut parts = login.split_whitespace();
    let (Some(account), Some(character)) = (parts.next(), parts.next()) else {
        return reject(&mut write_half, "Expected '<account> <character>'.").await;
    };
    let Some(authority) = context.accounts.authority(account) else {
        warn!("Login from {} with unknown account '{}'", peer, account);
        return reject(&mut write_half, "Unknown account.").await;
    };
    if context.status.is_maintenance() {
        return reject(&mut write_half, "The server is in maintenance.").await;
    }

    let (session, rx) = ClientSession::new(peer, account, character, authority);
    let capacity = usize::try_from(context.status.max_users()).unwrap_or(0);
    match context.clients.admit(session.clone(), capacity) {
        Ok(()) => {}
        Err(AdmitError::Full) => return reject(&mut write_half, "The channel is full.").await,
        Err(AdmitError::AlreadyOnline) => {
            return reject(&mut write_half, "That character is already online.").await
        }
    }

    let writer = tokio::spawn(write_events(write_half, rx, session.clone()));
    session.server_message(format!("Welcome to {}.", context.status.full_name()));

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    if !context.router.process(&session, text) {
                        debug!("💬 {}: {}", session.character(), text);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Read error from {}: {}", peer, e);
                    break;
                }
            },
            _ = session.wait_killed() => break,
        }
    }

    context.clients.remove(session.id());
    session.kill();
    let _ = writer.await;
    Ok(())
}

async fn reject<W>(writer: &mut W, message: &str) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin,
{
    info!("Refused client: {}", message);
    write_event(
        writer,
        &ClientEvent::ServerMessage {
            message: message.to_string(),
        },
    )
    .await?;
    writer.shutdown().await?;
    Ok(())
}

async fn write_event<W>(writer: &mut W, event: &ClientEvent) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

async fn write_events<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<ClientEvent>, session: Arc<ClientSession>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            event = rx.recv() => {
                let Some(event) = event else { break };
                if let Err(e) = write_event(&mut writer, &event).await {
                    debug!("Write to {} failed: {}", session.character(), e);
                    session.kill();
                    break;
                }
            }
            _ = session.wait_killed() => {
                while let Ok(event) = rx.try_recv() {
                    if write_event(&mut writer, &event).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
}
