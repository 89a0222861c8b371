//! Bracket weighting.
//!
//! A weighted segment is wrapped `level` times in `{}` (increase) or `[]`
//! (decrease). Each level multiplies the emphasis by [`WEIGHT_BASE`]:
//!
//! ```text
//! display_value = 1.05^level    (Increase)
//! display_value = 1.05^-level   (Decrease)
//! ```
//!
//! Levels are clamped to `[0, MAX_BRACKET_LEVEL]`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest bracket nesting level a weighted segment can carry.
pub const MAX_BRACKET_LEVEL: u8 = 78;

/// Multiplicative weight contributed by a single bracket level.
pub const WEIGHT_BASE: f64 = 1.05;

/// Direction of a bracket weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BracketType {
    /// `{...}`: strengthen the enclosed text.
    Increase,
    /// `[...]`: weaken the enclosed text.
    Decrease,
}

impl BracketType {
    /// Opening character for this bracket type.
    pub fn open_char(&self) -> char {
        match self {
            Self::Increase => '{',
            Self::Decrease => '[',
        }
    }

    /// Closing character for this bracket type.
    pub fn close_char(&self) -> char {
        match self {
            Self::Increase => '}',
            Self::Decrease => ']',
        }
    }

    /// Bracket type opened by `c`, if any.
    pub fn from_open(c: char) -> Option<Self> {
        match c {
            '{' => Some(Self::Increase),
            '[' => Some(Self::Decrease),
            _ => None,
        }
    }

    /// Bracket type closed by `c`, if any.
    pub fn from_close(c: char) -> Option<Self> {
        match c {
            '}' => Some(Self::Increase),
            ']' => Some(Self::Decrease),
            _ => None,
        }
    }

    /// Parse bracket type from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "increase" | "{" => Some(Self::Increase),
            "decrease" | "[" => Some(Self::Decrease),
            _ => None,
        }
    }
}

impl Default for BracketType {
    fn default() -> Self {
        Self::Increase
    }
}

impl fmt::Display for BracketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Increase => write!(f, "increase"),
            Self::Decrease => write!(f, "decrease"),
        }
    }
}

/// Normalize a requested level: absolute value, clamped to `[0, 78]`.
pub fn normalize_level(level: i64) -> u8 {
    level.unsigned_abs().min(MAX_BRACKET_LEVEL as u64) as u8
}

/// Compute the display weight for a bracket type and level.
///
/// Level 0 is always `1.0` regardless of direction.
pub fn display_value(bracket_type: BracketType, level: u8) -> f64 {
    if level == 0 {
        return 1.0;
    }
    let exponent = i32::from(level.min(MAX_BRACKET_LEVEL));
    match bracket_type {
        BracketType::Increase => WEIGHT_BASE.powi(exponent),
        BracketType::Decrease => WEIGHT_BASE.powi(-exponent),
    }
}

/// Closest bracket type and level for a desired display weight.
///
/// Non-finite or non-positive values map to level 0.
pub fn level_for_display_value(value: f64) -> (BracketType, u8) {
    if !value.is_finite() || value <= 0.0 {
        return (BracketType::Increase, 0);
    }
    let steps = (value.ln() / WEIGHT_BASE.ln()).round();
    let bracket_type = if steps < 0.0 {
        BracketType::Decrease
    } else {
        BracketType::Increase
    };
    (bracket_type, normalize_level(steps as i64))
}
