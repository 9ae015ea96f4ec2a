//! Host style: colors and spacing used by the built-in renderer.
//!
//! A style can be handed over directly or loaded from a JSON file. When a
//! path is used, each render worker loads its own copy at startup.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer};
use std::path::Path;

/// An RGBA color, written as `#RRGGBB` or `#AARRGGBB` in JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color([r, g, b, 255])
    }

    /// Parse `#RRGGBB` or `#AARRGGBB` (alpha first, as cards write it).
    pub fn parse(s: &str) -> Option<Self> {
        let hex = s.strip_prefix('#')?;
        let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        match hex.len() {
            6 => Some(Color([byte(0)?, byte(2)?, byte(4)?, 255])),
            8 => Some(Color([byte(2)?, byte(4)?, byte(6)?, byte(0)?])),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Color::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid color '{}'", s)))
    }
}

/// Largest accepted `glyphUnit`
pub const MAX_GLYPH_UNIT: u32 = 64;
/// Largest accepted `padding` and `spacing`, in pixels
pub const MAX_GAP: u32 = 4096;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostStyle {
    pub background: Color,
    pub foreground: Color,
    pub subtle: Color,
    pub accent: Color,
    pub placeholder: Color,
    /// Padding around the card content, in pixels
    pub padding: u32,
    /// Vertical gap between elements, in pixels
    pub spacing: u32,
    /// Pixel size of one text glyph unit at the smallest text size
    pub glyph_unit: u32,
}

impl Default for HostStyle {
    fn default() -> Self {
        Self {
            background: Color::rgb(0xff, 0xff, 0xff),
            foreground: Color::rgb(0x33, 0x33, 0x33),
            subtle: Color::rgb(0x88, 0x88, 0x88),
            accent: Color::rgb(0x00, 0x63, 0xb1),
            placeholder: Color::rgb(0xdd, 0xdd, 0xdd),
            padding: 12,
            spacing: 8,
            glyph_unit: 1,
        }
    }
}

impl HostStyle {
    pub fn from_json(json: &str) -> Result<Self> {
        let style: HostStyle = serde_json::from_str(json)?;
        style.validate()?;
        Ok(style)
    }

    /// Reject metrics the layout cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_GLYPH_UNIT).contains(&self.glyph_unit) {
            return Err(Error::ConfigError(format!(
                "glyphUnit must be between 1 and {}, got {}",
                MAX_GLYPH_UNIT, self.glyph_unit
            )));
        }
        for (name, value) in [("padding", self.padding), ("spacing", self.spacing)] {
            if value > MAX_GAP {
                return Err(Error::ConfigError(format!(
                    "{} must be at most {}, got {}",
                    name, MAX_GAP, value
                )));
            }
        }
        Ok(())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("cannot read style {}: {}", path.display(), e)))?;
        Self::from_json(&data)
    }
}
