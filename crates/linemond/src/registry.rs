//! Line registry: routes (device address, identifier) to the owning line.
//!
//! Both the monitor (registration on configuration changes) and the
//! notification workers (lookups) hold clones of the same `LineRegistry`.
//! Registration is a single insert under the write lock, so a lookup sees
//! either no entry or the complete line.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use linemon_core::{LineId, ObjectId};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::line::LineHandle;

type RouteKey = (IpAddr, ObjectId);

/// Cheap-to-clone handle to the shared routing table.
#[derive(Clone, Default)]
pub struct LineRegistry {
    routes: Arc<RwLock<HashMap<RouteKey, LineHandle>>>,
}

impl LineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes notifications for `identifier` from `device` to `line`.
    ///
    /// Re-registering the same line under the same key is a no-op.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RouteTaken` if another line already owns the key
    pub async fn register(
        &self,
        device: IpAddr,
        identifier: ObjectId,
        line: LineHandle,
    ) -> Result<(), RegistryError> {
        let key = (canonical(device), identifier);
        let mut routes = self.routes.write().await;

        if let Some(owner) = routes.get(&key) {
            if owner.id() == line.id() {
                return Ok(());
            }
            return Err(RegistryError::RouteTaken {
                device: key.0,
                identifier: key.1,
                owner: owner.id().clone(),
            });
        }

        debug!(device = %key.0, identifier = %key.1, line = %line.id(), "Route registered");
        routes.insert(key, line);
        Ok(())
    }

    /// Finds the line that owns `identifier` on `device`.
    pub async fn lookup(&self, device: IpAddr, identifier: &ObjectId) -> Option<LineHandle> {
        let key = (canonical(device), identifier.clone());
        self.routes.read().await.get(&key).cloned()
    }

    /// Removes every route owned by `line`. Returns how many were removed.
    pub async fn unregister(&self, line: &LineId) -> usize {
        let mut routes = self.routes.write().await;
        let before = routes.len();
        routes.retain(|_, owner| owner.id() != line);
        let removed = before - routes.len();
        if removed > 0 {
            debug!(line = %line, removed, "Routes unregistered");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.routes.read().await.is_empty()
    }
}

/// Maps IPv4-mapped IPv6 sources back to IPv4 so dual-stack sockets
/// route the same as IPv4 ones.
fn canonical(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(addr),
        IpAddr::V4(_) => addr,
    }
}

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("identifier {identifier} on {device} is already routed to {owner}")]
    RouteTaken {
        device: IpAddr,
        identifier: ObjectId,
        owner: LineId,
    },
}
