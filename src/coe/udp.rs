//! # CoE UDP Transport
//!
//! Owns the UDP socket shared by every producer and consumer talking to
//! one CMI. The port is revision-specific (5441 for V1, 5442 for V2) and
//! the socket both sends encoded datagrams to the CMI and receives the
//! CMI's own transmissions, decoding them and fanning the readings out to
//! all subscribers. Malformed datagrams are dropped with a debug log,
//! never treated as a fault.

use crate::coe::frame::{decode_datagram, BlockReading, ProtocolRevision};
use crate::coe::scheduler::PacketSink;
use crate::error::CoeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Receive buffer size; the largest legal datagram is a full V2 frame
/// (4 + 8 * 16 = 132 bytes).
const RECV_BUFFER_SIZE: usize = 256;

/// Capacity of the broadcast channel feeding subscribers.
const READING_CHANNEL_CAPACITY: usize = 64;

/// One reading received from the wire, stamped with its origin.
#[derive(Debug, Clone)]
pub struct InboundReading {
    pub reading: BlockReading,
    pub source: SocketAddr,
    pub revision: ProtocolRevision,
    pub received_at: DateTime<Utc>,
}

/// Shared UDP socket for one CMI destination and protocol revision.
pub struct CoeUdpTransport {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    revision: ProtocolRevision,
    readings: broadcast::Sender<InboundReading>,
    recv_task: JoinHandle<()>,
}

impl CoeUdpTransport {
    /// Binds the revision's well-known port and starts the receive loop.
    /// The CMI side listens on that same port.
    pub async fn bind(target: IpAddr, revision: ProtocolRevision) -> Result<Self, CoeError> {
        let target = SocketAddr::new(target, revision.port());
        Self::bind_with_port(target, revision, revision.port()).await
    }

    /// Binds an explicit local port and target address (port 0 picks an
    /// ephemeral local port; useful for tests and multi-instance setups).
    pub async fn bind_with_port(
        target: SocketAddr,
        revision: ProtocolRevision,
        port: u16,
    ) -> Result<Self, CoeError> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .map_err(|e| CoeError::Transport(format!("failed to bind UDP port {port}: {e}")))?;
        let socket = Arc::new(socket);
        log::info!(
            "CoE UDP socket listening on 0.0.0.0:{port} (V{})",
            revision.number()
        );

        let (readings, _) = broadcast::channel(READING_CHANNEL_CAPACITY);
        let recv_task = tokio::spawn(Self::recv_loop(
            socket.clone(),
            revision,
            readings.clone(),
        ));

        Ok(CoeUdpTransport {
            socket,
            target,
            revision,
            readings,
            recv_task,
        })
    }

    async fn recv_loop(
        socket: Arc<UdpSocket>,
        revision: ProtocolRevision,
        readings: broadcast::Sender<InboundReading>,
    ) {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            let (len, source) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(err) => {
                    log::error!("UDP receive error: {err}");
                    continue;
                }
            };
            match decode_datagram(&buf[..len], revision) {
                Ok(decoded) => {
                    let received_at = Utc::now();
                    for reading in decoded {
                        // Send only fails when no subscriber is listening
                        let _ = readings.send(InboundReading {
                            reading,
                            source,
                            revision,
                            received_at,
                        });
                    }
                }
                Err(err) => {
                    log::debug!("dropping datagram from {source}: {err}");
                }
            }
        }
    }

    /// Subscribes to decoded inbound readings.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundReading> {
        self.readings.subscribe()
    }

    pub fn revision(&self) -> ProtocolRevision {
        self.revision
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, CoeError> {
        self.socket
            .local_addr()
            .map_err(|e| CoeError::Transport(e.to_string()))
    }

    /// Sends one datagram to the configured CMI destination.
    pub async fn send(&self, packet: &[u8]) -> Result<(), CoeError> {
        self.socket
            .send_to(packet, self.target)
            .await
            .map_err(|e| CoeError::Transport(format!("failed to send to {}: {e}", self.target)))?;
        Ok(())
    }

    /// Stops the receive loop. Pending subscribers see the channel close.
    pub fn shutdown(&self) {
        self.recv_task.abort();
    }
}

impl Drop for CoeUdpTransport {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

#[async_trait]
impl PacketSink for CoeUdpTransport {
    async fn send_packet(&self, packet: &[u8]) -> Result<(), CoeError> {
        self.send(packet).await
    }
}
