//! The bidirectional version/verack handshake.
//!
//! Both sides send `version` concurrently and validate what they receive;
//! each then acknowledges with `verack`. Either phase timing out or failing
//! validation aborts the connection. Inbound peers delay their `version`
//! send by a small jitter so two nodes dialing each other do not produce a
//! symmetric send-storm.

use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::constants::{
    HANDSHAKE_TIMEOUT, HANDSHAKE_TIME_DRIFT, MAX_HEIGHT_LEAD, MAX_USER_AGENT_BYTES,
    PROTOCOL_VERSION, USER_AGENT,
};
use crate::protocol::message::{Message, Version};
use crate::protocol::Codec;

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("handshake i/o failure: {0}")]
    Io(#[from] umbra_chain::SerializationError),

    #[error("connection closed during handshake")]
    ConnectionClosed,

    #[error("handshake phase timed out")]
    Timeout,

    #[error("unexpected message during handshake: {0}")]
    UnexpectedMessage(String),

    #[error("unacceptable version: {0}")]
    Rejected(&'static str),
}

/// What the local node advertises.
pub fn local_version(height: i32) -> Version {
    Version::new(
        PROTOCOL_VERSION,
        height,
        Utc::now().timestamp(),
        USER_AGENT.to_string(),
    )
}

/// Validate a remote `version` against the acceptance rules: protocol
/// version in the accepted set, timestamp within ±24 h, advertised height
/// not implausibly far ahead, bounded user agent.
pub fn validate_remote_version(
    remote: &Version,
    local_height: i32,
) -> Result<(), HandshakeError> {
    if remote.version != PROTOCOL_VERSION {
        return Err(HandshakeError::Rejected("unsupported protocol version"));
    }
    let skew = (Utc::now().timestamp() - remote.timestamp).unsigned_abs();
    if skew > HANDSHAKE_TIME_DRIFT.as_secs() {
        return Err(HandshakeError::Rejected("timestamp outside drift window"));
    }
    if remote.height < 0 || remote.height as i64 > local_height as i64 + MAX_HEIGHT_LEAD as i64 {
        return Err(HandshakeError::Rejected("implausible advertised height"));
    }
    if remote.user_agent.len() > MAX_USER_AGENT_BYTES {
        return Err(HandshakeError::Rejected("oversized user agent"));
    }
    Ok(())
}

async fn next_message(
    framed: &mut Framed<TcpStream, Codec>,
) -> Result<Message, HandshakeError> {
    match timeout(HANDSHAKE_TIMEOUT, framed.next()).await {
        Err(_) => Err(HandshakeError::Timeout),
        Ok(None) => Err(HandshakeError::ConnectionClosed),
        Ok(Some(result)) => Ok(result?),
    }
}

/// Run the handshake over a fresh framed stream. Returns the remote's
/// validated version message.
pub async fn perform(
    framed: &mut Framed<TcpStream, Codec>,
    local_height: i32,
    inbound: bool,
) -> Result<Version, HandshakeError> {
    // Phase 1: concurrent version exchange. The inbound side sends after a
    // small random delay.
    if inbound {
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(10..100));
        tokio::time::sleep(jitter).await;
    }
    timeout(
        HANDSHAKE_TIMEOUT,
        framed.send(Message::Version(local_version(local_height))),
    )
    .await
    .map_err(|_| HandshakeError::Timeout)??;

    let remote = match next_message(framed).await? {
        Message::Version(version) => version,
        other => return Err(HandshakeError::UnexpectedMessage(other.to_string())),
    };
    validate_remote_version(&remote, local_height)?;
    debug!(agent = %remote.user_agent, height = remote.height, "validated remote version");

    // Phase 2: verack exchange.
    timeout(HANDSHAKE_TIMEOUT, framed.send(Message::Verack))
        .await
        .map_err(|_| HandshakeError::Timeout)??;
    match next_message(framed).await? {
        Message::Verack => Ok(remote),
        other => Err(HandshakeError::UnexpectedMessage(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_validation_rules() {
        let good = Version::new(PROTOCOL_VERSION, 50, Utc::now().timestamp(), "/x/".into());
        validate_remote_version(&good, 100).unwrap();

        let wrong_version = Version::new(2, 50, Utc::now().timestamp(), "/x/".into());
        assert!(validate_remote_version(&wrong_version, 100).is_err());

        let stale = Version::new(
            PROTOCOL_VERSION,
            50,
            Utc::now().timestamp() - 25 * 60 * 60,
            "/x/".into(),
        );
        assert!(validate_remote_version(&stale, 100).is_err());

        let liar = Version::new(
            PROTOCOL_VERSION,
            100 + MAX_HEIGHT_LEAD as i32 + 1,
            Utc::now().timestamp(),
            "/x/".into(),
        );
        assert!(validate_remote_version(&liar, 100).is_err());

        // Exactly at the lead cap is acceptable.
        let eager = Version::new(
            PROTOCOL_VERSION,
            100 + MAX_HEIGHT_LEAD as i32,
            Utc::now().timestamp(),
            "/x/".into(),
        );
        validate_remote_version(&eager, 100).unwrap();
    }

    #[tokio::test]
    async fn handshake_completes_in_both_directions() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, Codec::builder().finish());
            perform(&mut framed, 10, true).await
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, Codec::builder().finish());
        let remote = perform(&mut framed, 20, false).await.unwrap();
        assert_eq!(remote.height, 10);

        let server_view = server.await.unwrap().unwrap();
        assert_eq!(server_view.height, 20);
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        // Shrink nothing: rely on the peer never sending version. To keep
        // the test fast we only check that an immediate close errors.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, Codec::builder().finish());
        assert!(perform(&mut framed, 0, false).await.is_err());
        server.await.unwrap();
    }
}
