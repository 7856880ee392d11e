//! Inbound message seam used by the notification listener.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{MessageKind, Pdu, VarBind};

/// Sends a reply back to whoever sent an inbound message.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, pdu: Pdu) -> Result<(), TransportError>;
}

/// Reply handle captured on a message that expects an acknowledgement.
pub type ReplyHandle = Arc<dyn Responder>;

/// A received message, classified and ready for dispatch.
pub struct InboundMessage {
    pub source: SocketAddr,
    pub kind: MessageKind,
    pub pdu: Pdu,
    /// Present only when the PDU kind requires an acknowledgement
    pub reply: Option<ReplyHandle>,
}

impl InboundMessage {
    /// Wraps a decoded PDU. The reply handle is dropped for kinds that
    /// do not expect one.
    pub fn new(source: SocketAddr, pdu: Pdu, reply: Option<ReplyHandle>) -> Self {
        let reply = if pdu.kind.requires_ack() { reply } else { None };
        Self {
            source,
            kind: MessageKind::of(pdu.kind),
            pdu,
            reply,
        }
    }

    pub fn bindings(&self) -> &[VarBind] {
        &self.pdu.bindings
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("source", &self.source)
            .field("kind", &self.kind)
            .field("pdu", &self.pdu)
            .field("has_reply", &self.reply.is_some())
            .finish()
    }
}

/// Yields inbound messages one at a time.
#[async_trait]
pub trait InboundTransport: Send {
    /// Waits for the next message.
    ///
    /// `Malformed` and `Io` errors concern a single datagram and the
    /// caller may keep receiving; `Closed` ends the stream.
    async fn recv(&mut self) -> Result<InboundMessage, TransportError>;
}

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("socket error: {0}")]
    Io(String),

    #[error("malformed message from {source_addr}: {reason}")]
    Malformed {
        source_addr: SocketAddr,
        reason: String,
    },

    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// True when no further messages can be received.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PduKind;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Pdu>>);

    #[async_trait]
    impl Responder for Recorder {
        async fn respond(&self, pdu: Pdu) -> Result<(), TransportError> {
            self.0.lock().unwrap().push(pdu);
            Ok(())
        }
    }

    fn source() -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 214], 49152))
    }

    #[test]
    fn test_reply_kept_for_requests() {
        let reply: ReplyHandle = Arc::new(Recorder::default());
        let msg = InboundMessage::new(source(), Pdu::new(1, PduKind::Get, vec![]), Some(reply));
        assert_eq!(msg.kind, MessageKind::Request);
        assert!(msg.reply.is_some());
    }

    #[test]
    fn test_reply_dropped_for_traps() {
        let reply: ReplyHandle = Arc::new(Recorder::default());
        let msg = InboundMessage::new(source(), Pdu::new(1, PduKind::Trap, vec![]), Some(reply));
        assert_eq!(msg.kind, MessageKind::Notification);
        assert!(msg.reply.is_none());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(TransportError::Closed.is_fatal());
        assert!(!TransportError::Io("reset".into()).is_fatal());
        assert!(!TransportError::Malformed {
            source_addr: source(),
            reason: "eof".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_debug_hides_handle() {
        let msg = InboundMessage::new(source(), Pdu::new(1, PduKind::Response, vec![]), None);
        let dbg = format!("{msg:?}");
        assert!(dbg.contains("has_reply: false"));
    }
}
