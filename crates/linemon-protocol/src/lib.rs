//! linemon protocol - management protocol messages and transports
//!
//! This crate provides the message types exchanged with remote devices,
//! the two seams the engine is driven through (`ProtocolClient` for
//! polling, `InboundTransport` for notifications) and a JSON-datagram
//! UDP implementation of both.

pub mod client;
pub mod message;
pub mod transport;
pub mod udp;
pub mod version;

pub use client::{GetResponse, PollTarget, ProtocolClient, ProtocolError};
pub use message::{Envelope, MessageKind, Pdu, PduKind, Value, VarBind};
pub use transport::{InboundMessage, InboundTransport, ReplyHandle, Responder, TransportError};
pub use udp::{UdpClient, UdpTransport, MAX_DATAGRAM_SIZE};
pub use version::ProtocolVersion;
