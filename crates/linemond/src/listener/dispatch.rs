//! Handling of a single inbound message.
//!
//! Runs on a dispatch worker. Nothing here returns an error to the
//! listener loop: failures are logged and summarized in the outcome.

use linemon_protocol::{InboundMessage, MessageKind};
use tracing::{debug, warn};

use crate::line::UpdateSource;
use crate::registry::LineRegistry;

/// What dispatching one message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A notification was routed
    Routed {
        /// Bindings that changed (or re-confirmed) a line's state
        applied: usize,
        /// Bindings with no registered line or an unrecognized value
        dropped: usize,
        /// Whether an acknowledgement was sent (informs only)
        acknowledged: bool,
    },
    /// A request was answered with an empty success reply
    Acknowledged,
    /// The reply could not be sent
    ReplyFailed,
    /// Responses, reports and requests without a reply handle
    Ignored,
}

/// Classifies and handles one message.
pub async fn dispatch(registry: &LineRegistry, msg: InboundMessage) -> DispatchOutcome {
    match msg.kind {
        MessageKind::Notification => route_notification(registry, &msg).await,
        MessageKind::Request => acknowledge(&msg).await,
        MessageKind::Response | MessageKind::Other => {
            debug!(source = %msg.source, kind = ?msg.pdu.kind, "Ignoring message");
            DispatchOutcome::Ignored
        }
    }
}

async fn route_notification(registry: &LineRegistry, msg: &InboundMessage) -> DispatchOutcome {
    let device = msg.source.ip();
    let mut applied = 0;
    let mut dropped = 0;

    for binding in msg.bindings() {
        let Some(line) = registry.lookup(device, &binding.oid).await else {
            debug!(
                source = %msg.source,
                identifier = %binding.oid,
                "No line registered for notification binding"
            );
            dropped += 1;
            continue;
        };

        match line
            .apply_sample(Some(&binding.value), UpdateSource::Notification)
            .await
        {
            Some(event) => {
                debug!(line = %line.id(), state = %event.state, "Notification applied");
                applied += 1;
            }
            None => dropped += 1,
        }
    }

    let acknowledged = match &msg.reply {
        Some(_) => matches!(acknowledge(msg).await, DispatchOutcome::Acknowledged),
        None => false,
    };

    DispatchOutcome::Routed {
        applied,
        dropped,
        acknowledged,
    }
}

async fn acknowledge(msg: &InboundMessage) -> DispatchOutcome {
    let Some(reply) = &msg.reply else {
        warn!(source = %msg.source, kind = ?msg.pdu.kind, "Request without reply handle");
        return DispatchOutcome::Ignored;
    };

    match reply.respond(msg.pdu.acknowledgement()).await {
        Ok(()) => {
            debug!(source = %msg.source, request_id = msg.pdu.request_id, "Acknowledged request");
            DispatchOutcome::Acknowledged
        }
        Err(e) => {
            warn!(source = %msg.source, error = %e, "Failed to send reply");
            DispatchOutcome::ReplyFailed
        }
    }
}
