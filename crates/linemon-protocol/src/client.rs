//! Value requests against a remote device.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use linemon_core::ObjectId;
use thiserror::Error;

use crate::message::{Pdu, Value, NO_ERROR};
use crate::version::ProtocolVersion;

/// Everything needed to address one request.
///
/// Built fresh for every poll from the current settings, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub address: SocketAddr,
    pub credential: String,
    pub version: ProtocolVersion,
    pub retries: u32,
    pub timeout: Duration,
}

impl PollTarget {
    /// Upper bound on how long one request may take: `timeout * (retries + 1)`.
    pub fn max_wait(&self) -> Duration {
        self.timeout.saturating_mul(self.retries.saturating_add(1))
    }
}

/// Outcome of a value request that got an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResponse {
    pub error_status: u32,
    pub error_index: u32,
    /// Value bound to the requested identifier, if the response carried it
    pub value: Option<Value>,
}

impl GetResponse {
    /// Extracts the answer for `oid` from a response PDU.
    pub fn from_pdu(pdu: &Pdu, oid: &ObjectId) -> Self {
        Self {
            error_status: pdu.error_status,
            error_index: pdu.error_index,
            value: pdu.value_of(oid).cloned(),
        }
    }

    pub fn ok(value: Value) -> Self {
        Self {
            error_status: NO_ERROR,
            error_index: 0,
            value: Some(value),
        }
    }

    pub fn error(error_status: u32, error_index: u32) -> Self {
        Self {
            error_status,
            error_index,
            value: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_status != NO_ERROR
    }
}

/// Failures of a value request that produced no usable response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(String),
}

/// Issues value requests. Implementations must be safe to call from many
/// poll tasks at once.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn get(&self, target: &PollTarget, oid: &ObjectId) -> Result<GetResponse, ProtocolError>;
}
