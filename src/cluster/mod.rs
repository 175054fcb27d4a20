//! Cluster membership.
//!
//! The agent only needs two things from the membership layer: join a list of
//! seed peers at startup, and report who it knows. [`TcpMembership`] provides
//! that with a one-line handshake over TCP:
//!
//! ```text
//! joiner -> peer : JOIN <joiner-name>\n
//! peer -> joiner : WELCOME <peer-name>\n
//! ```
//!
//! Both sides record the other's name. Anything richer (gossip, failure
//! detection) sits behind the [`ClusterMembership`] trait.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{FleetError, Result};

/// Default per-peer handshake timeout.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest handshake line accepted.
const MAX_LINE_BYTES: u64 = 256;

#[async_trait]
pub trait ClusterMembership: Send + Sync {
    /// Contact every peer; returns how many answered. Fails when none did.
    async fn join(&self, peers: &[String]) -> Result<usize>;

    /// Known node names, this node included.
    async fn members(&self) -> Vec<String>;
}

/// Membership over a line-based TCP handshake.
#[derive(Debug, Clone)]
pub struct TcpMembership {
    node_name: String,
    local_addr: SocketAddr,
    members: Arc<RwLock<BTreeSet<String>>>,
}

impl TcpMembership {
    /// Bind the membership listener and start answering handshakes.
    ///
    /// The returned task runs the accept loop; abort it to leave the cluster.
    pub async fn bind(
        node_name: impl Into<String>,
        addr: impl ToSocketAddrs,
    ) -> Result<(Self, JoinHandle<()>)> {
        let node_name = node_name.into();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| FleetError::Cluster(format!("failed to bind membership listener: {}", e)))?;
        let local_addr = listener.local_addr()?;

        let mut members = BTreeSet::new();
        members.insert(node_name.clone());
        let membership = Self {
            node_name,
            local_addr,
            members: Arc::new(RwLock::new(members)),
        };

        info!(node = %membership.node_name, addr = %local_addr, "Membership listener bound");
        let handle = tokio::spawn(membership.clone().accept_loop(listener));
        Ok((membership, handle))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        match tokio::time::timeout(HANDSHAKE_TIMEOUT, this.welcome(stream))
                            .await
                        {
                            Ok(Ok(name)) => info!(member = %name, %peer, "Node joined"),
                            Ok(Err(e)) => warn!(%peer, error = %e, "Rejected join handshake"),
                            Err(_) => warn!(%peer, "Join handshake timed out"),
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Membership accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Answer one incoming `JOIN`.
    async fn welcome(&self, mut stream: TcpStream) -> Result<String> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader.take(MAX_LINE_BYTES));
        let mut line = String::new();
        reader.read_line(&mut line).await?;

        let name = parse_line(&line, "JOIN")?;
        self.members.write().await.insert(name.clone());
        writer
            .write_all(format!("WELCOME {}\n", self.node_name).as_bytes())
            .await?;
        writer.flush().await?;
        Ok(name)
    }

    /// Send one `JOIN` and wait for the peer's `WELCOME`.
    async fn handshake(&self, peer: &str) -> Result<String> {
        let mut stream = TcpStream::connect(peer).await?;
        let (reader, mut writer) = stream.split();
        writer
            .write_all(format!("JOIN {}\n", self.node_name).as_bytes())
            .await?;
        writer.flush().await?;

        let mut reader = BufReader::new(reader.take(MAX_LINE_BYTES));
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        parse_line(&line, "WELCOME")
    }
}

#[async_trait]
impl ClusterMembership for TcpMembership {
    async fn join(&self, peers: &[String]) -> Result<usize> {
        if peers.is_empty() {
            return Ok(0);
        }

        let mut joined = 0;
        let mut last_error = String::new();
        for peer in peers {
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, self.handshake(peer)).await {
                Ok(Ok(name)) => {
                    debug!(peer = %peer, member = %name, "Handshake complete");
                    self.members.write().await.insert(name);
                    joined += 1;
                }
                Ok(Err(e)) => last_error = format!("{}: {}", peer, e),
                Err(_) => last_error = format!("{}: handshake timed out", peer),
            }
        }

        if joined == 0 {
            return Err(FleetError::Cluster(format!(
                "no peer answered ({} tried), last error: {}",
                peers.len(),
                last_error
            )));
        }
        Ok(joined)
    }

    async fn members(&self) -> Vec<String> {
        self.members.read().await.iter().cloned().collect()
    }
}

fn parse_line(line: &str, verb: &str) -> Result<String> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(v), Some(name), None) if v == verb => Ok(name.to_string()),
        _ => Err(FleetError::Cluster(format!(
            "expected '{} <name>', got {:?}",
            verb,
            line.trim_end()
        ))),
    }
}

/// Join `peers`, retrying up to `attempts` times with `delay` in between.
///
/// An empty peer list is a standalone node and succeeds immediately.
pub async fn join_with_retry(
    membership: &dyn ClusterMembership,
    peers: &[String],
    attempts: u32,
    delay: Duration,
) -> Result<usize> {
    if peers.is_empty() {
        info!("No cluster members configured, running standalone");
        return Ok(0);
    }

    let mut last_error = None;
    for attempt in 1..=attempts {
        match membership.join(peers).await {
            Ok(joined) => {
                info!(attempt, joined, "Joined cluster");
                return Ok(joined);
            }
            Err(e) => {
                warn!(attempt, error = %e, "Failed to join cluster, retrying...");
                last_error = Some(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }

    Err(FleetError::Cluster(format!(
        "failed to join cluster after {} attempts: {}",
        attempts,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}
