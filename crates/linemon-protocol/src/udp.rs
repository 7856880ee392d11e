//! JSON datagram transport over UDP.
//!
//! One datagram carries one `Envelope`. `UdpClient` implements the polling
//! side, `UdpTransport` the listening side.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use linemon_core::ObjectId;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::client::{GetResponse, PollTarget, ProtocolClient, ProtocolError};
use crate::message::{Envelope, Pdu, PduKind};
use crate::transport::{InboundMessage, InboundTransport, ReplyHandle, Responder, TransportError};
use crate::version::ProtocolVersion;

/// Largest UDP payload we accept or send.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

// ============================================================================
// Client
// ============================================================================

/// Value-request client. Each request uses its own ephemeral socket, so
/// one client can be shared by every poll task.
#[derive(Debug)]
pub struct UdpClient {
    next_request_id: AtomicI32,
}

impl UdpClient {
    pub fn new() -> Self {
        Self {
            next_request_id: AtomicI32::new(1),
        }
    }

    fn request_id(&self) -> i32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed) & i32::MAX
    }
}

impl Default for UdpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolClient for UdpClient {
    async fn get(&self, target: &PollTarget, oid: &ObjectId) -> Result<GetResponse, ProtocolError> {
        let local: SocketAddr = if target.address.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        socket
            .connect(target.address)
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;

        let request_id = self.request_id();
        let request = Envelope::new(
            target.version,
            target.credential.clone(),
            Pdu::get(request_id, oid.clone()),
        )
        .encode()
        .map_err(|e| ProtocolError::Codec(e.to_string()))?;

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        for attempt in 0..=target.retries {
            socket
                .send(&request)
                .await
                .map_err(|e| ProtocolError::Transport(e.to_string()))?;

            match timeout(target.timeout, recv_response(&socket, &mut buf, request_id)).await {
                Ok(Ok(pdu)) => return Ok(GetResponse::from_pdu(&pdu, oid)),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(
                        target = %target.address,
                        oid = %oid,
                        attempt,
                        "Request timed out"
                    );
                }
            }
        }

        Err(ProtocolError::Timeout(target.max_wait()))
    }
}

/// Reads until a response with `request_id` arrives. Stale or undecodable
/// datagrams are skipped.
async fn recv_response(
    socket: &UdpSocket,
    buf: &mut [u8],
    request_id: i32,
) -> Result<Pdu, ProtocolError> {
    loop {
        let n = socket
            .recv(buf)
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        let bytes = buf.get(..n).unwrap_or(&[]);

        match Envelope::decode(bytes) {
            Ok(env) if env.pdu.kind == PduKind::Response && env.pdu.request_id == request_id => {
                return Ok(env.pdu);
            }
            Ok(env) => {
                trace!(
                    expected = request_id,
                    got = env.pdu.request_id,
                    kind = ?env.pdu.kind,
                    "Skipping unrelated datagram"
                );
            }
            Err(e) => {
                debug!(error = %e, "Skipping undecodable response");
            }
        }
    }
}

// ============================================================================
// Listening transport
// ============================================================================

/// Bound UDP endpoint yielding inbound messages.
///
/// Dropping the transport closes the endpoint once outstanding reply
/// handles are gone.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    buf: Vec<u8>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            socket: Arc::new(socket),
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket
            .local_addr()
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[async_trait]
impl InboundTransport for UdpTransport {
    async fn recv(&mut self) -> Result<InboundMessage, TransportError> {
        let (n, peer) = self
            .socket
            .recv_from(&mut self.buf)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let bytes = self.buf.get(..n).unwrap_or(&[]);

        let env = Envelope::decode(bytes).map_err(|e| TransportError::Malformed {
            source_addr: peer,
            reason: e.to_string(),
        })?;

        let reply = if env.pdu.kind.requires_ack() {
            let responder: ReplyHandle = Arc::new(UdpResponder {
                socket: Arc::clone(&self.socket),
                peer,
                version: env.version,
                credential: env.credential.clone(),
            });
            Some(responder)
        } else {
            None
        };

        Ok(InboundMessage::new(peer, env.pdu, reply))
    }
}

/// Replies to the sender of one datagram, echoing its version and credential.
struct UdpResponder {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    version: ProtocolVersion,
    credential: String,
}

#[async_trait]
impl Responder for UdpResponder {
    async fn respond(&self, pdu: Pdu) -> Result<(), TransportError> {
        let bytes = Envelope::new(self.version, self.credential.clone(), pdu)
            .encode()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.socket
            .send_to(&bytes, self.peer)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }
}
