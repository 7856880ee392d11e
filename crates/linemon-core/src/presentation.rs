//! Presentation records attached to line states.
//!
//! The core never renders anything; it only chooses which `Presentation`
//! accompanies a state and hands it to whoever subscribes to transitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// 24-bit RGB color, written as `#RRGGBB` in settings files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0x00, 0x00, 0x00);
    pub const WHITE: Color = Color::rgb(0xFF, 0xFF, 0xFF);
    pub const GREEN: Color = Color::rgb(0x00, 0xC8, 0x00);
    pub const RED: Color = Color::rgb(0xE0, 0x00, 0x00);

    /// Background used when a line has no value-specific presentation.
    pub const NEUTRAL: Color = Color::rgb(0xEE, 0xEE, 0xEE);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses `#RRGGBB` (the leading `#` is optional).
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let invalid = || DomainError::InvalidColor(s.to_string());
        let hex = s.trim().strip_prefix('#').unwrap_or(s.trim());
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let channel = |range: std::ops::Range<usize>| {
            hex.get(range)
                .and_then(|part| u8::from_str_radix(part, 16).ok())
                .ok_or_else(invalid)
        };

        Ok(Self::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl TryFrom<String> for Color {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Color> for String {
    fn from(value: Color) -> Self {
        value.to_string()
    }
}

/// Text plus foreground/background colors shown for a line state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presentation {
    pub text: String,
    pub foreground: Color,
    pub background: Color,
}

impl Presentation {
    pub fn new(text: impl Into<String>, foreground: Color, background: Color) -> Self {
        Self {
            text: text.into(),
            foreground,
            background,
        }
    }

    /// Fixed presentation for a line whose state has not been observed yet.
    pub fn unknown() -> Self {
        Self::new("Unknown", Color::BLACK, Color::NEUTRAL)
    }

    /// Fixed presentation for a line whose last poll failed.
    pub fn error() -> Self {
        Self::new("Error", Color::BLACK, Color::NEUTRAL)
    }

    /// Default presentation for value 1 when none is configured.
    pub fn default_on() -> Self {
        Self::new("On", Color::BLACK, Color::GREEN)
    }

    /// Default presentation for value 0 when none is configured.
    pub fn default_off() -> Self {
        Self::new("Off", Color::BLACK, Color::RED)
    }
}
