//! Lease event relay.
//!
//! dnsmasq invokes the agent binary as its `--dhcp-script`; the binary
//! parses the invocation into a [`LeaseEvent`] and forwards it over a
//! Unix socket to whichever daemon cares about lease state. Delivery is
//! fire-and-forget: a missing socket is not an error and there are no
//! retries, since dnsmasq blocks on the hook process.

use crate::error::{Result, SubnetdError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::debug;

/// Action argument dnsmasq passes to its lease-change script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseAction {
    Add,
    Del,
    Old,
}

impl FromStr for LeaseAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "add" => Ok(LeaseAction::Add),
            "del" => Ok(LeaseAction::Del),
            "old" => Ok(LeaseAction::Old),
            other => Err(format!("unknown lease action: {}", other)),
        }
    }
}

/// One lease change as reported by dnsmasq.
#[derive(Debug, Clone)]
pub struct LeaseEvent {
    pub action: LeaseAction,
    pub mac_address: String,
    pub ip_address: String,
    /// Seconds left on the lease; zero when unknown.
    pub time_remaining: u64,
}

/// Wire form of a lease notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseNotice {
    pub network_id: String,
    pub mac_address: String,
    pub ip_address: String,
    pub lease_remaining: u64,
}

/// Forward one lease event over the relay socket.
///
/// Quietly succeeds when no one is listening (socket file absent).
pub async fn relay_lease_event(
    network_id: &str,
    socket_path: &Path,
    event: &LeaseEvent,
) -> Result<()> {
    if !socket_path.exists() {
        debug!(path = ?socket_path, "No lease relay socket; dropping event");
        return Ok(());
    }

    let notice = LeaseNotice {
        network_id: network_id.to_string(),
        mac_address: event.mac_address.clone(),
        ip_address: event.ip_address.clone(),
        // A deleted lease has no time left regardless of what was passed.
        lease_remaining: match event.action {
            LeaseAction::Del => 0,
            _ => event.time_remaining,
        },
    };
    let payload = serde_json::to_vec(&notice).map_err(SubnetdError::internal)?;

    let mut stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| SubnetdError::IoError { path: socket_path.to_path_buf(), source: e })?;
    stream
        .write_all(&payload)
        .await
        .map_err(|e| SubnetdError::IoError { path: socket_path.to_path_buf(), source: e })?;
    stream
        .shutdown()
        .await
        .map_err(|e| SubnetdError::IoError { path: socket_path.to_path_buf(), source: e })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    #[test]
    fn test_lease_action_parse() {
        assert_eq!("add".parse::<LeaseAction>().unwrap(), LeaseAction::Add);
        assert_eq!("del".parse::<LeaseAction>().unwrap(), LeaseAction::Del);
        assert_eq!("old".parse::<LeaseAction>().unwrap(), LeaseAction::Old);
        assert!("init".parse::<LeaseAction>().is_err());
    }

    #[tokio::test]
    async fn test_relay_missing_socket_is_noop() {
        let dir = TempDir::new().unwrap();
        let event = LeaseEvent {
            action: LeaseAction::Add,
            mac_address: "aa:bb:cc:dd:ee:ff".to_string(),
            ip_address: "10.0.0.5".to_string(),
            time_remaining: 3600,
        };
        relay_lease_event("net-1", &dir.path().join("missing.sock"), &event)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_relay_delivers_notice() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relay.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await.unwrap();
            serde_json::from_slice::<LeaseNotice>(&buf).unwrap()
        });

        let event = LeaseEvent {
            action: LeaseAction::Old,
            mac_address: "aa:bb:cc:dd:ee:ff".to_string(),
            ip_address: "10.0.0.5".to_string(),
            time_remaining: 3600,
        };
        relay_lease_event("net-1", &path, &event).await.unwrap();

        let notice = server.await.unwrap();
        assert_eq!(notice.network_id, "net-1");
        assert_eq!(notice.mac_address, "aa:bb:cc:dd:ee:ff");
        assert_eq!(notice.lease_remaining, 3600);
    }

    #[tokio::test]
    async fn test_relay_del_zeroes_remaining() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relay.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await.unwrap();
            serde_json::from_slice::<LeaseNotice>(&buf).unwrap()
        });

        let event = LeaseEvent {
            action: LeaseAction::Del,
            mac_address: "aa:bb:cc:dd:ee:ff".to_string(),
            ip_address: "10.0.0.5".to_string(),
            time_remaining: 3600,
        };
        relay_lease_event("net-1", &path, &event).await.unwrap();

        assert_eq!(server.await.unwrap().lease_remaining, 0);
    }
}
