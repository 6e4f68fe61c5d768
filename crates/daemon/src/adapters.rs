//! Enforcement adapters
//!
//! The reconciler hands computed deltas to a [`PacketFilter`] and a
//! [`PeerControl`]. Both must tolerate re-application of a delta they have
//! already applied, since a failed tick re-announces everything.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};
use wgnet_common::{Error, Peer, Result};

/// Packet filter address sets
#[async_trait]
pub trait PacketFilter: Send + Sync {
    /// Addresses allowed to reach the manager SSH port
    async fn update_trust(&self, removed: &[Ipv4Addr], added: &[Ipv4Addr]) -> Result<()>;

    /// Device addresses owned by managers
    async fn update_managers(&self, removed: &[Ipv4Addr], added: &[Ipv4Addr]) -> Result<()>;

    /// Device addresses allowed to forward to the WAN
    async fn update_forward(&self, removed: &[Ipv4Addr], added: &[Ipv4Addr]) -> Result<()>;
}

/// VPN control plane peers, keyed by public key
#[async_trait]
pub trait PeerControl: Send + Sync {
    /// Upsert peers, replacing each one's allowed networks
    async fn set_peers(&self, peers: &[Peer]) -> Result<()>;

    /// Revoke peers by public key
    async fn remove_peers(&self, peers: &[Peer]) -> Result<()>;
}

/// Adapter that only logs deltas, used when enforcement is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnly;

fn log_addresses(set: &str, removed: &[Ipv4Addr], added: &[Ipv4Addr]) {
    for addr in removed {
        info!(set, %addr, "remove address");
    }
    for addr in added {
        info!(set, %addr, "add address");
    }
}

#[async_trait]
impl PacketFilter for LogOnly {
    async fn update_trust(&self, removed: &[Ipv4Addr], added: &[Ipv4Addr]) -> Result<()> {
        log_addresses("trust", removed, added);
        Ok(())
    }

    async fn update_managers(&self, removed: &[Ipv4Addr], added: &[Ipv4Addr]) -> Result<()> {
        log_addresses("manager", removed, added);
        Ok(())
    }

    async fn update_forward(&self, removed: &[Ipv4Addr], added: &[Ipv4Addr]) -> Result<()> {
        log_addresses("forward", removed, added);
        Ok(())
    }
}

#[async_trait]
impl PeerControl for LogOnly {
    async fn set_peers(&self, peers: &[Peer]) -> Result<()> {
        for peer in peers {
            info!(public_key = %peer.public_key, network = %peer.network, "set peer");
        }
        Ok(())
    }

    async fn remove_peers(&self, peers: &[Peer]) -> Result<()> {
        for peer in peers {
            info!(public_key = %peer.public_key, network = %peer.network, "remove peer");
        }
        Ok(())
    }
}

/// Run an external tool, optionally feeding `input` on stdin.
///
/// A spawn failure or a non-zero exit becomes [`Error::Enforcement`].
pub(crate) async fn run_tool(binary: &Path, args: &[String], input: Option<&str>) -> Result<()> {
    let tool = binary.display().to_string();
    debug!("Running {} {}", tool, args.join(" "));

    let mut child = Command::new(binary)
        .args(args)
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Enforcement(format!("{} failed to start: {}", tool, e)))?;

    if let Some(input) = input {
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| Error::Enforcement(format!("{} stdin: {}", tool, e)))?;
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| Error::Enforcement(format!("{} failed: {}", tool, e)))?;

    if !output.status.success() {
        return Err(Error::Enforcement(format!(
            "{} exited with {}: {}",
            tool,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_log_only_accepts_everything() {
        let addrs = [Ipv4Addr::new(10, 0, 0, 2)];
        let filter = LogOnly;
        filter.update_trust(&addrs, &[]).await.unwrap();
        filter.update_managers(&[], &addrs).await.unwrap();
        filter.update_forward(&addrs, &addrs).await.unwrap();

        let peer = Peer::new(
            "10.0.0.2/32".parse().unwrap(),
            wgnet_common::PublicKey::from_bytes([7; 32]),
        );
        PeerControl::set_peers(&filter, &[peer.clone()]).await.unwrap();
        PeerControl::remove_peers(&filter, &[peer]).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_tool_missing_binary() {
        let err = run_tool(&PathBuf::from("/nonexistent/wgnet-tool"), &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Enforcement(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_exit_status() {
        let sh = PathBuf::from("/bin/sh");
        let cat = vec!["-c".to_string(), "cat >/dev/null".to_string()];
        run_tool(&sh, &cat, Some("data")).await.unwrap();

        let fail = vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()];
        let err = run_tool(&sh, &fail, None).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
