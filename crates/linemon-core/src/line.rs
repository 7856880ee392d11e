//! Line domain entities and the per-line state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::presentation::Presentation;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Name of a monitored device, unique within one monitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier of a line: the owning device plus the line name.
///
/// Line names are only unique within a device, so the device is part of
/// the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineId {
    pub device: DeviceId,
    pub name: String,
}

impl LineId {
    pub fn new(device: DeviceId, name: impl Into<String>) -> Self {
        Self {
            device,
            name: name.into(),
        }
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.name)
    }
}

// ============================================================================
// Line State
// ============================================================================

/// Observable state of a binary line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineState {
    /// Nothing accepted yet
    #[default]
    Unknown,
    /// Last accepted value was 1
    On,
    /// Last accepted value was 0
    Off,
    /// Last poll failed (timeout, transport or protocol error)
    Error,
}

impl LineState {
    /// Maps a sampled integer to a state. Only 0 and 1 are recognized.
    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::On),
            0 => Some(Self::Off),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::On => "on",
            Self::Off => "off",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of an accepted application on a `LineStateMachine`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub previous: LineState,
    pub state: LineState,
    pub presentation: Presentation,
    /// False when the same value was re-applied and nothing observable moved.
    pub changed: bool,
    pub at: DateTime<Utc>,
}

/// Point-in-time copy of a line's observable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSnapshot {
    pub state: LineState,
    pub presentation: Presentation,
    pub last_applied_at: Option<DateTime<Utc>>,
}

// ============================================================================
// State Machine
// ============================================================================

/// Pure state machine for one line.
///
/// Inputs are sampled values and error signals; outputs are the abstract
/// state and the presentation chosen for it. It holds no locks and does
/// no I/O, callers that share it across tasks wrap it in a mutex.
#[derive(Debug, Clone)]
pub struct LineStateMachine {
    state: LineState,
    presentation: Presentation,
    on_presentation: Presentation,
    off_presentation: Presentation,
    last_applied_at: Option<DateTime<Utc>>,
}

impl LineStateMachine {
    pub fn new(on_presentation: Presentation, off_presentation: Presentation) -> Self {
        Self {
            state: LineState::Unknown,
            presentation: Presentation::unknown(),
            on_presentation,
            off_presentation,
            last_applied_at: None,
        }
    }

    pub fn state(&self) -> LineState {
        self.state
    }

    pub fn presentation(&self) -> &Presentation {
        &self.presentation
    }

    pub fn on_presentation(&self) -> &Presentation {
        &self.on_presentation
    }

    pub fn off_presentation(&self) -> &Presentation {
        &self.off_presentation
    }

    pub fn last_applied_at(&self) -> Option<DateTime<Utc>> {
        self.last_applied_at
    }

    /// Replaces the presentation used for value 1.
    ///
    /// The displayed presentation is not touched; the new record is used
    /// from the next accepted value on.
    pub fn set_on_presentation(&mut self, presentation: Presentation) {
        self.on_presentation = presentation;
    }

    /// Replaces the presentation used for value 0. See `set_on_presentation`.
    pub fn set_off_presentation(&mut self, presentation: Presentation) {
        self.off_presentation = presentation;
    }

    /// Applies a sampled value.
    ///
    /// 1 moves to `On`, 0 moves to `Off`. Any other value is ignored and
    /// returns `None` without touching state, presentation or timestamp.
    pub fn apply_value(&mut self, value: i64) -> Option<Transition> {
        let next = LineState::from_value(value)?;
        let presentation = match next {
            LineState::On => self.on_presentation.clone(),
            _ => self.off_presentation.clone(),
        };
        Some(self.enter(next, presentation))
    }

    /// Moves to `Error` with the fixed error presentation.
    pub fn apply_error(&mut self) -> Transition {
        self.enter(LineState::Error, Presentation::error())
    }

    pub fn snapshot(&self) -> LineSnapshot {
        LineSnapshot {
            state: self.state,
            presentation: self.presentation.clone(),
            last_applied_at: self.last_applied_at,
        }
    }

    fn enter(&mut self, state: LineState, presentation: Presentation) -> Transition {
        let previous = self.state;
        let changed = previous != state || self.presentation != presentation;
        let at = Utc::now();

        self.state = state;
        self.presentation = presentation.clone();
        self.last_applied_at = Some(at);

        Transition {
            previous,
            state,
            presentation,
            changed,
            at,
        }
    }
}

impl Default for LineStateMachine {
    fn default() -> Self {
        Self::new(Presentation::default_on(), Presentation::default_off())
    }
}
