//! Logical prompt scopes addressed by the root map.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// A logical prompt scope owning one root segment.
///
/// Ordered main scopes first, then characters by index, positive before
/// negative within each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PromptScope {
    /// `main.positive`
    MainPositive,
    /// `main.negative`
    MainNegative,
    /// `character[i].positive`
    CharacterPositive(usize),
    /// `character[i].negative`
    CharacterNegative(usize),
}

impl PromptScope {
    /// Character index for character scopes.
    pub fn character_index(&self) -> Option<usize> {
        match self {
            Self::CharacterPositive(i) | Self::CharacterNegative(i) => Some(*i),
            Self::MainPositive | Self::MainNegative => None,
        }
    }

    /// Whether this scope holds a negative prompt.
    pub fn is_negative(&self) -> bool {
        matches!(self, Self::MainNegative | Self::CharacterNegative(_))
    }
}

impl PromptScope {
    fn sort_key(&self) -> (usize, usize, bool) {
        match self {
            Self::MainPositive => (0, 0, false),
            Self::MainNegative => (0, 0, true),
            Self::CharacterPositive(i) => (1, *i, false),
            Self::CharacterNegative(i) => (1, *i, true),
        }
    }
}

impl Ord for PromptScope {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for PromptScope {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Error parsing a scope name.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScopeError {
    /// Name does not match any scope form.
    #[error("Invalid prompt scope: {0}")]
    Invalid(String),
}

fn character_scope_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^character\[(\d+)\]\.(positive|negative)$")
            .expect("character scope pattern is valid")
    })
}

impl FromStr for PromptScope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main.positive" => return Ok(Self::MainPositive),
            "main.negative" => return Ok(Self::MainNegative),
            _ => {}
        }
        let caps = character_scope_pattern()
            .captures(s)
            .ok_or_else(|| ScopeError::Invalid(s.to_string()))?;
        let index: usize = caps[1]
            .parse()
            .map_err(|_| ScopeError::Invalid(s.to_string()))?;
        match &caps[2] {
            "positive" => Ok(Self::CharacterPositive(index)),
            _ => Ok(Self::CharacterNegative(index)),
        }
    }
}

impl TryFrom<String> for PromptScope {
    type Error = ScopeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PromptScope> for String {
    fn from(scope: PromptScope) -> Self {
        scope.to_string()
    }
}

impl fmt::Display for PromptScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MainPositive => write!(f, "main.positive"),
            Self::MainNegative => write!(f, "main.negative"),
            Self::CharacterPositive(i) => write!(f, "character[{}].positive", i),
            Self::CharacterNegative(i) => write!(f, "character[{}].negative", i),
        }
    }
}
