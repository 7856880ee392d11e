//! linemon core - shared types for IO line monitoring
//!
//! This crate provides the domain types shared between the protocol
//! layer (`linemon-protocol`) and the engine (`linemond`): identifiers,
//! presentations and the per-line state machine.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod identifier;
pub mod line;
pub mod presentation;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use identifier::ObjectId;
pub use line::{DeviceId, LineId, LineSnapshot, LineState, LineStateMachine, Transition};
pub use presentation::{Color, Presentation};
