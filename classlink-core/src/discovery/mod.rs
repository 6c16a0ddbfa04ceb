//! UDP server discovery.
//!
//! The teacher server periodically broadcasts a 9-byte announcement:
//!
//! ```text
//! [0x00][a][b][c][d][http port u16 LE][tcp port u16 LE]
//! ```
//!
//! [`ServerDiscovery::discover`] listens on the announcement port until
//! the first valid datagram arrives or the timeout expires.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::LinkError;
use crate::network::Endpoint;

/// Opcode byte that starts every announcement.
pub const ANNOUNCE_OPCODE: u8 = 0x00;
/// Exact announcement length.
pub const ANNOUNCE_LEN: usize = 9;

/// Address and ports of a server found on the local network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerAnnouncement {
    pub address: Ipv4Addr,
    pub http_port: u16,
    pub tcp_port: u16,
}

impl ServerAnnouncement {
    pub fn parse(datagram: &[u8]) -> Result<Self, LinkError> {
        let bytes: &[u8; ANNOUNCE_LEN] = datagram.try_into().map_err(|_| {
            LinkError::InvalidAnnouncement(format!(
                "expected {ANNOUNCE_LEN} bytes, got {}",
                datagram.len()
            ))
        })?;
        if bytes[0] != ANNOUNCE_OPCODE {
            return Err(LinkError::InvalidAnnouncement(format!(
                "unexpected opcode {:#04x}",
                bytes[0]
            )));
        }
        Ok(Self {
            address: Ipv4Addr::new(bytes[1], bytes[2], bytes[3], bytes[4]),
            http_port: u16::from_le_bytes([bytes[5], bytes[6]]),
            tcp_port: u16::from_le_bytes([bytes[7], bytes[8]]),
        })
    }

    pub fn encode(&self) -> [u8; ANNOUNCE_LEN] {
        let mut out = [0u8; ANNOUNCE_LEN];
        out[0] = ANNOUNCE_OPCODE;
        out[1..5].copy_from_slice(&self.address.octets());
        out[5..7].copy_from_slice(&self.http_port.to_le_bytes());
        out[7..9].copy_from_slice(&self.tcp_port.to_le_bytes());
        out
    }

    /// Where the control channel listens.
    pub fn tcp_endpoint(&self) -> Endpoint {
        Endpoint::new(self.address.to_string(), self.tcp_port)
    }
}

impl fmt::Display for ServerAnnouncement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (http {}, tcp {})",
            self.address, self.http_port, self.tcp_port
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DiscoveryState {
    #[default]
    Idle,
    Searching,
    Found,
    Timeout,
    Error,
}

/// Listens for server announcements.
pub struct ServerDiscovery {
    config: DiscoveryConfig,
    state_tx: watch::Sender<DiscoveryState>,
}

impl ServerDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        let (state_tx, _) = watch::channel(DiscoveryState::Idle);
        Self { config, state_tx }
    }

    pub fn state(&self) -> DiscoveryState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DiscoveryState> {
        self.state_tx.subscribe()
    }

    /// Bind the announcement port on all interfaces and wait for a server.
    pub async fn discover(&self) -> Result<ServerAnnouncement, LinkError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.port));
        let socket = match UdpSocket::bind(addr).await {
            Ok(socket) => socket,
            Err(err) => {
                warn!(%addr, error = %err, "discovery bind failed");
                self.state_tx.send_replace(DiscoveryState::Error);
                return Err(err.into());
            }
        };
        if let Err(err) = socket.set_broadcast(true) {
            debug!(error = %err, "could not enable SO_BROADCAST");
        }
        self.discover_on(socket).await
    }

    /// Wait for an announcement on an already bound socket.
    pub async fn discover_on(&self, socket: UdpSocket) -> Result<ServerAnnouncement, LinkError> {
        self.state_tx.send_replace(DiscoveryState::Searching);
        info!(port = self.config.port, timeout = ?self.config.timeout, "searching for server");

        match tokio::time::timeout(self.config.timeout, receive_announcement(&socket)).await {
            Ok(Ok(announcement)) => {
                info!(%announcement, "server found");
                self.state_tx.send_replace(DiscoveryState::Found);
                Ok(announcement)
            }
            Ok(Err(err)) => {
                warn!(error = %err, "discovery failed");
                self.state_tx.send_replace(DiscoveryState::Error);
                Err(err)
            }
            Err(_) => {
                warn!("no server announcement received");
                self.state_tx.send_replace(DiscoveryState::Timeout);
                Err(LinkError::Timeout(self.config.timeout))
            }
        }
    }
}

async fn receive_announcement(socket: &UdpSocket) -> Result<ServerAnnouncement, LinkError> {
    let mut buf = [0u8; 64];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        match ServerAnnouncement::parse(&buf[..n]) {
            Ok(announcement) => return Ok(announcement),
            Err(err) => debug!(%from, error = %err, "ignoring datagram"),
        }
    }
}
