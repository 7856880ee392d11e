//! Protocol message types exchanged with remote devices.

use linemon_core::ObjectId;
use serde::{Deserialize, Serialize};

use crate::version::ProtocolVersion;

/// Error status of a successful response.
pub const NO_ERROR: u32 = 0;

// ============================================================================
// Values
// ============================================================================

/// Typed value carried in a variable binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Integer(i64),
    Counter(u64),
    Gauge(u64),
    TimeTicks(u64),
    OctetString(String),
    ObjectId(ObjectId),
    /// Placeholder in requests and empty replies
    Null,
}

impl Value {
    /// Returns the value as an integer, if it is numeric and fits in `i64`.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Counter(v) | Self::Gauge(v) | Self::TimeTicks(v) => i64::try_from(*v).ok(),
            Self::OctetString(_) | Self::ObjectId(_) | Self::Null => None,
        }
    }
}

/// One (identifier, value) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarBind {
    pub oid: ObjectId,
    pub value: Value,
}

impl VarBind {
    pub fn new(oid: ObjectId, value: Value) -> Self {
        Self { oid, value }
    }

    pub fn null(oid: ObjectId) -> Self {
        Self::new(oid, Value::Null)
    }
}

// ============================================================================
// PDUs
// ============================================================================

/// Wire-level PDU type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PduKind {
    Get,
    GetNext,
    GetBulk,
    Set,
    Response,
    /// Version 1 trap
    Trap,
    /// Version 2 trap
    TrapV2,
    /// Acknowledged notification
    Inform,
    Report,
}

/// How the listener treats an inbound PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Unsolicited state-change message carrying values
    Notification,
    /// Solicited message that expects a reply
    Request,
    Response,
    Other,
}

impl MessageKind {
    pub fn of(kind: PduKind) -> Self {
        match kind {
            PduKind::Trap | PduKind::TrapV2 | PduKind::Inform => Self::Notification,
            PduKind::Get | PduKind::GetNext | PduKind::GetBulk | PduKind::Set => Self::Request,
            PduKind::Response => Self::Response,
            PduKind::Report => Self::Other,
        }
    }
}

impl PduKind {
    /// True for kinds whose sender waits for a reply.
    ///
    /// Informs are notifications that still expect an acknowledgement.
    pub fn requires_ack(&self) -> bool {
        matches!(
            self,
            Self::Get | Self::GetNext | Self::GetBulk | Self::Set | Self::Inform
        )
    }
}

/// A protocol data unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pdu {
    pub request_id: i32,
    pub kind: PduKind,
    #[serde(default)]
    pub error_status: u32,
    #[serde(default)]
    pub error_index: u32,
    #[serde(default)]
    pub bindings: Vec<VarBind>,
}

impl Pdu {
    pub fn new(request_id: i32, kind: PduKind, bindings: Vec<VarBind>) -> Self {
        Self {
            request_id,
            kind,
            error_status: NO_ERROR,
            error_index: 0,
            bindings,
        }
    }

    /// Creates a single-identifier value request.
    pub fn get(request_id: i32, oid: ObjectId) -> Self {
        Self::new(request_id, PduKind::Get, vec![VarBind::null(oid)])
    }

    /// Builds the empty success reply for this PDU.
    ///
    /// The reply keeps the request id and the requested identifiers but
    /// carries no values and zero error status/index.
    pub fn acknowledgement(&self) -> Self {
        let bindings = self
            .bindings
            .iter()
            .map(|vb| VarBind::null(vb.oid.clone()))
            .collect();
        Self::new(self.request_id, PduKind::Response, bindings)
    }

    /// Returns the value bound to `oid`, if present.
    pub fn value_of(&self, oid: &ObjectId) -> Option<&Value> {
        self.bindings
            .iter()
            .find(|vb| &vb.oid == oid)
            .map(|vb| &vb.value)
    }

    pub fn is_error(&self) -> bool {
        self.error_status != NO_ERROR
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// One datagram on the wire: version, credential and PDU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: ProtocolVersion,
    pub credential: String,
    pub pdu: Pdu,
}

impl Envelope {
    pub fn new(version: ProtocolVersion, credential: impl Into<String>, pdu: Pdu) -> Self {
        Self {
            version,
            credential: credential.into(),
            pdu,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(s: &str) -> ObjectId {
        ObjectId::parse(s).unwrap()
    }

    #[test]
    fn test_classification() {
        assert_eq!(MessageKind::of(PduKind::Trap), MessageKind::Notification);
        assert_eq!(MessageKind::of(PduKind::TrapV2), MessageKind::Notification);
        assert_eq!(MessageKind::of(PduKind::Inform), MessageKind::Notification);
        assert_eq!(MessageKind::of(PduKind::Get), MessageKind::Request);
        assert_eq!(MessageKind::of(PduKind::Set), MessageKind::Request);
        assert_eq!(MessageKind::of(PduKind::Response), MessageKind::Response);
        assert_eq!(MessageKind::of(PduKind::Report), MessageKind::Other);
    }

    #[test]
    fn test_requires_ack() {
        assert!(PduKind::Get.requires_ack());
        assert!(PduKind::GetBulk.requires_ack());
        assert!(PduKind::Inform.requires_ack());
        assert!(!PduKind::Trap.requires_ack());
        assert!(!PduKind::TrapV2.requires_ack());
        assert!(!PduKind::Response.requires_ack());
        assert!(!PduKind::Report.requires_ack());
    }

    #[test]
    fn test_acknowledgement_is_empty_and_correlated() {
        let request = Pdu::new(
            77,
            PduKind::Set,
            vec![VarBind::new(oid("1.3.6.1.4.1.1.1"), Value::Integer(5))],
        );
        let ack = request.acknowledgement();

        assert_eq!(ack.request_id, 77);
        assert_eq!(ack.kind, PduKind::Response);
        assert_eq!(ack.error_status, NO_ERROR);
        assert_eq!(ack.error_index, 0);
        assert_eq!(ack.bindings, vec![VarBind::null(oid("1.3.6.1.4.1.1.1"))]);
    }

    #[test]
    fn test_value_as_integer() {
        assert_eq!(Value::Integer(-3).as_integer(), Some(-3));
        assert_eq!(Value::Gauge(1).as_integer(), Some(1));
        assert_eq!(Value::Counter(u64::MAX).as_integer(), None);
        assert_eq!(Value::OctetString("1".into()).as_integer(), None);
        assert_eq!(Value::Null.as_integer(), None);
    }

    #[test]
    fn test_value_of() {
        let pdu = Pdu::new(
            1,
            PduKind::Response,
            vec![
                VarBind::new(oid("1.3.6.1.2.1.1.3.0"), Value::TimeTicks(100)),
                VarBind::new(oid("1.3.6.1.4.1.25728.8900.1.1.2.1"), Value::Integer(1)),
            ],
        );
        assert_eq!(
            pdu.value_of(&oid("1.3.6.1.4.1.25728.8900.1.1.2.1")),
            Some(&Value::Integer(1))
        );
        assert!(pdu.value_of(&oid("1.3.6.1.9")).is_none());
    }

    #[test]
    fn test_envelope_wire_shape() {
        let env = Envelope::new(
            ProtocolVersion::V1,
            "public",
            Pdu::get(9, oid("1.3.6.1.4.1.1")),
        );
        let json: serde_json::Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        assert_eq!(json["version"], "1");
        assert_eq!(json["credential"], "public");
        assert_eq!(json["pdu"]["kind"], "get");
        assert_eq!(json["pdu"]["bindings"][0]["oid"], "1.3.6.1.4.1.1");
        assert_eq!(json["pdu"]["bindings"][0]["value"]["type"], "null");
    }

    #[test]
    fn test_decode_defaults_missing_fields() {
        let raw = br#"{"version":"2c","credential":"public","pdu":{"request_id":3,"kind":"trap_v2"}}"#;
        let env = Envelope::decode(raw).unwrap();
        assert_eq!(env.pdu.kind, PduKind::TrapV2);
        assert!(env.pdu.bindings.is_empty());
        assert_eq!(env.pdu.error_status, 0);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Envelope::decode(b"\x30\x82\x01").is_err());
        assert!(Envelope::decode(br#"{"version":"3","credential":"x","pdu":{"request_id":1,"kind":"get"}}"#).is_err());
    }
}
