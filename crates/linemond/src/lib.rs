//! linemon engine - line registry, poll scheduler and notification listener
//!
//! This crate provides the monitoring engine of the linemon daemon:
//! - `monitor` - Owns devices and lines, applies configuration
//! - `scheduler` - One recurring poll task per active line
//! - `poll` - What a single poll tick does
//! - `listener` - Receives notifications and requests, bounded dispatch
//! - `registry` - Routes (device, identifier) to the owning line
//! - `line` - Shared line state machine plus transition events
//! - `config` - Settings file model
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       linemond daemon                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐          ┌─────────────────────────┐   │
//! │  │  PollScheduler  │          │  NotificationListener   │   │
//! │  │ (task per line) │          │ (bounded dispatch pool) │   │
//! │  └────────┬────────┘          └────────────┬────────────┘   │
//! │           │ tick                           │ lookup         │
//! │           ▼                                ▼                │
//! │  ┌─────────────────┐          ┌─────────────────────────┐   │
//! │  │ ProtocolClient  │          │      LineRegistry       │   │
//! │  └────────┬────────┘          └────────────┬────────────┘   │
//! │           │ value / error                  │                │
//! │           └──────────────┬─────────────────┘                │
//! │                          ▼                                  │
//! │                ┌───────────────────┐                        │
//! │                │   MonitoredLine   │──▶ broadcast LineEvent │
//! │                └───────────────────┘                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Poll and dispatch failures stay inside their task

pub mod config;
pub mod line;
pub mod listener;
pub mod monitor;
pub mod poll;
pub mod registry;
pub mod scheduler;

pub use config::{ConfigError, DeviceConfig, LineConfig, PollSettings, Settings};
pub use line::{LineEvent, LineHandle, MonitoredLine, UpdateSource};
pub use listener::{ListenerError, NotificationListener};
pub use monitor::{LineMonitor, MonitorError};
pub use registry::{LineRegistry, RegistryError};
pub use scheduler::{PollHandle, PollScheduler};
