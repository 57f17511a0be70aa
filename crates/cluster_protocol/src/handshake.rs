//! Challenge and identify exchange.
//!
//! ```text
//! registry                          node
//!    | ---- seed (u32 LE, clear) ---> |
//!    | <--- empty frame ------------- |   both sides now keyed
//!    | ---- challenge marker -------> |
//!    | <--- server_identify --------- |
//!    | ---- server_identify_result -> |
//! ```
//!
//! After the marker the link is data-ready and in `Identifying`; the
//! identify exchange moves it to `LoggedIn` or kills it.

use crate::cipher::CipherPair;
use crate::error::ProtocolError;
use crate::frame::{read_frame, write_frame};
use crate::link::{spawn_writer, LinkHandle, LinkReader, LinkState};
use crate::messages::ControlMessage;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

/// Payload of the frame that completes the challenge.
pub const CHALLENGE_COMPLETE_MARKER: &[u8] = b"ready";

/// How long either side waits for the other during the challenge.
pub const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(10);

/// An established, keyed link: the shared handle plus the receiving half.
pub type Established<S> = (Arc<LinkHandle>, LinkReader<ReadHalf<S>>);

/// Opens the raw stream to the registry.
pub async fn connect(address: &str) -> Result<TcpStream, ProtocolError> {
    TcpStream::connect(address)
        .await
        .map_err(|source| ProtocolError::Connect {
            addr: address.to_string(),
            source,
        })
}

/// Registry side of the challenge on a freshly accepted stream.
///
/// # Arguments
///
/// * `stream` - the accepted connection
/// * `peer` - its remote address, kept on the link for logging
/// * `seed` - cipher seed sent to the node in the clear
///
/// # Returns
///
/// The keyed link in `Identifying`, or `ChallengeFailed` naming the state the
/// exchange stalled in.
pub async fn registry_challenge<S>(stream: S, peer: SocketAddr, seed: u32) -> Result<Established<S>, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (link, rx) = LinkHandle::new(peer, LinkState::Connecting);
    let (stream, ciphers) = with_timeout(&link, registry_keying(stream, &link, seed)).await?;
    debug!("🤝 Challenge with {} complete", peer);
    Ok(establish(stream, link, rx, ciphers))
}

async fn registry_keying<S>(mut stream: S, link: &LinkHandle, seed: u32) -> Result<(S, CipherPair), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&seed.to_le_bytes()).await?;
    stream.flush().await?;
    link.set_state(LinkState::AwaitingChallenge);

    let mut ciphers = CipherPair::for_registry(seed);

    match read_frame(&mut stream, &mut ciphers.inbound).await? {
        Some(ack) if ack.is_empty() => {}
        Some(ack) => {
            return Err(ProtocolError::ChallengeFailed {
                peer: link.peer(),
                reason: format!("expected empty acknowledgement, got {} bytes", ack.len()),
            })
        }
        None => return Err(ProtocolError::ConnectionClosed),
    }

    write_frame(&mut stream, CHALLENGE_COMPLETE_MARKER, &mut ciphers.outbound).await?;
    Ok((stream, ciphers))
}

/// Node side of the challenge on a freshly connected stream.
///
/// # Returns
///
/// The keyed link in `Identifying`, ready for [`identify`].
pub async fn node_challenge<S>(stream: S, peer: SocketAddr) -> Result<Established<S>, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (link, rx) = LinkHandle::new(peer, LinkState::Connecting);
    let (stream, ciphers) = with_timeout(&link, node_keying(stream, &link)).await?;
    Ok(establish(stream, link, rx, ciphers))
}

async fn node_keying<S>(mut stream: S, link: &LinkHandle) -> Result<(S, CipherPair), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut seed = [0u8; 4];
    stream.read_exact(&mut seed).await?;
    let mut ciphers = CipherPair::for_node(u32::from_le_bytes(seed));

    write_frame(&mut stream, &[], &mut ciphers.outbound).await?;
    link.set_state(LinkState::AwaitingChallenge);

    match read_frame(&mut stream, &mut ciphers.inbound).await? {
        Some(marker) if marker == CHALLENGE_COMPLETE_MARKER => {}
        Some(_) => {
            return Err(ProtocolError::ChallengeFailed {
                peer: link.peer(),
                reason: "unexpected challenge completion marker".to_string(),
            })
        }
        None => return Err(ProtocolError::ConnectionClosed),
    }

    Ok((stream, ciphers))
}

fn establish<S>(
    stream: S,
    link: Arc<LinkHandle>,
    rx: mpsc::UnboundedReceiver<ControlMessage>,
    ciphers: CipherPair,
) -> Established<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    link.set_state(LinkState::Identifying);
    let (read_half, write_half) = tokio::io::split(stream);
    spawn_writer(link.clone(), write_half, ciphers.outbound, rx);
    (link, LinkReader::new(read_half, ciphers.inbound))
}

async fn with_timeout<T>(
    link: &LinkHandle,
    fut: impl std::future::Future<Output = Result<T, ProtocolError>>,
) -> Result<T, ProtocolError> {
    match tokio::time::timeout(CHALLENGE_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::ChallengeFailed {
            peer: link.peer(),
            reason: format!(
                "timed out after {}s in {:?}",
                CHALLENGE_TIMEOUT.as_secs(),
                link.state()
            ),
        }),
    }
}

/// Node side of the identify exchange. On success the link is `LoggedIn`.
pub async fn identify<R>(link: &LinkHandle, reader: &mut LinkReader<R>, secret: &str) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    link.send(ControlMessage::ServerIdentify {
        password_hash: hash_secret(secret),
    })?;

    let reply = with_timeout(link, async {
        reader.next_message().await?.ok_or(ProtocolError::ConnectionClosed)
    })
    .await?;

    match reply {
        ControlMessage::ServerIdentifyResult { success: true } => {
            if link.set_state(LinkState::LoggedIn) {
                Ok(())
            } else {
                Err(ProtocolError::ConnectionClosed)
            }
        }
        ControlMessage::ServerIdentifyResult { success: false } => Err(ProtocolError::IdentifyRejected(link.peer())),
        other => Err(ProtocolError::UnexpectedMessage {
            expected: "server_identify_result".to_string(),
            actual: other.op().to_string(),
        }),
    }
}

/// Lowercase hex SHA-256 of a shared secret; what travels in
/// `server_identify` instead of the secret itself.
pub fn hash_secret(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Checks a presented hash against the locally configured secret.
pub fn verify_secret(configured_secret: &str, presented_hash: &str) -> bool {
    let expected = hash_secret(configured_secret);
    let presented = presented_hash.trim().to_ascii_lowercase();

    // Compare every byte regardless of where the first mismatch is
    expected.len() == presented.len()
        && expected
            .bytes()
            .zip(presented.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Draws the seed the registry issues to a new connection.
pub fn random_seed() -> u32 {
    rand::random::<u32>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40001".parse().unwrap()
    }

    #[test]
    fn test_hash_secret_is_hex_sha256() {
        let hash = hash_secret("change_me");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash, "change_me");
        assert_eq!(hash, hash_secret("change_me"));
    }

    #[test]
    fn test_verify_secret() {
        assert!(verify_secret("change_me", &hash_secret("change_me")));
        assert!(verify_secret("change_me", &hash_secret("change_me").to_uppercase()));
        assert!(!verify_secret("change_me", &hash_secret("other")));
        assert!(!verify_secret("change_me", "wrong"));
        assert!(!verify_secret("change_me", "change_me"));
    }

    #[tokio::test]
    async fn test_challenge_and_identify_over_duplex() {
        let (registry_side, node_side) = tokio::io::duplex(4096);

        let registry = tokio::spawn(async move {
            let (link, mut reader) = registry_challenge(registry_side, peer(), 0xDEAD_BEEF).await.unwrap();
            assert_eq!(link.state(), LinkState::Identifying);

            let message = reader.next_message().await.unwrap().unwrap();
            let ControlMessage::ServerIdentify { password_hash } = message else {
                panic!("expected server_identify, got {message:?}");
            };
            let success = verify_secret("secret", &password_hash);
            link.send(ControlMessage::ServerIdentifyResult { success }).unwrap();
            success
        });

        let (link, mut reader) = node_challenge(node_side, peer()).await.unwrap();
        identify(&link, &mut reader, "secret").await.unwrap();
        assert!(link.is_logged_in());
        assert!(registry.await.unwrap());
    }

    #[tokio::test]
    async fn test_identify_rejected() {
        let (registry_side, node_side) = tokio::io::duplex(4096);

        tokio::spawn(async move {
            let (link, mut reader) = registry_challenge(registry_side, peer(), 7).await.unwrap();
            let _ = reader.next_message().await;
            link.send(ControlMessage::ServerIdentifyResult { success: false }).unwrap();
            link.kill();
        });

        let (link, mut reader) = node_challenge(node_side, peer()).await.unwrap();
        let result = identify(&link, &mut reader, "wrong").await;
        assert!(matches!(result, Err(ProtocolError::IdentifyRejected(_))));
        assert!(!link.is_logged_in());
    }

    #[tokio::test]
    async fn test_non_empty_ack_fails_challenge() {
        let (registry_side, mut node_side) = tokio::io::duplex(4096);

        let registry = tokio::spawn(async move { registry_challenge(registry_side, peer(), 99).await.map(|_| ()) });

        let mut seed = [0u8; 4];
        node_side.read_exact(&mut seed).await.unwrap();
        let mut ciphers = CipherPair::for_node(u32::from_le_bytes(seed));
        write_frame(&mut node_side, b"junk", &mut ciphers.outbound).await.unwrap();

        let result = registry.await.unwrap();
        assert!(matches!(result, Err(ProtocolError::ChallengeFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_node_times_out_awaiting_challenge() {
        let (registry_side, _node_side) = tokio::io::duplex(4096);

        let result = registry_challenge(registry_side, peer(), 5).await.map(|_| ());
        let Err(ProtocolError::ChallengeFailed { reason, .. }) = result else {
            panic!("expected a challenge failure, got {result:?}");
        };
        assert!(reason.contains("AwaitingChallenge"), "{reason}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_without_seed_times_out_connecting() {
        let (_registry_side, node_side) = tokio::io::duplex(4096);

        let result = node_challenge(node_side, peer()).await.map(|_| ());
        let Err(ProtocolError::ChallengeFailed { reason, .. }) = result else {
            panic!("expected a challenge failure, got {result:?}");
        };
        assert!(reason.contains("Connecting"), "{reason}");
    }
}
