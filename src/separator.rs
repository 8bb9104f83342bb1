// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Namespace separator matching.
//!
//! Keys encode their hierarchy through a separator convention:
//!
//! ```text
//! user:123:profile      (literal ":")
//! user::123/profile     (pattern "::|/", variable length)
//! ```
//!
//! A [`Separator`] locates the next occurrence at or after an offset and
//! reports how many bytes it spans, so the next segment starts at
//! `start + len` even when the pattern matches different lengths.

use regex::bytes::Regex;

use crate::error::TreeError;

/// A located separator occurrence inside a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeparatorMatch {
    /// Byte offset where the separator begins
    pub start: usize,
    /// Number of bytes the separator spans
    pub len: usize,
}

impl SeparatorMatch {
    /// Offset of the first byte after the separator.
    #[inline]
    #[must_use]
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Namespace separator: a fixed byte string or a regular expression.
#[derive(Debug, Clone)]
pub enum Separator {
    Literal(Vec<u8>),
    Pattern(Regex),
}

impl Default for Separator {
    fn default() -> Self {
        Self::Literal(b":".to_vec())
    }
}

impl Separator {
    /// Literal separator (e.g. `":"`).
    pub fn literal(text: impl AsRef<[u8]>) -> Self {
        Self::Literal(text.as_ref().to_vec())
    }

    /// Pattern separator compiled from a regular expression.
    pub fn pattern(expr: &str) -> Result<Self, TreeError> {
        Regex::new(expr)
            .map(Self::Pattern)
            .map_err(|e| TreeError::InvalidPattern(format!("separator '{}': {}", expr, e)))
    }

    /// Build a separator from connection settings.
    pub fn parse(text: &str, is_pattern: bool) -> Result<Self, TreeError> {
        if is_pattern {
            Self::pattern(text)
        } else {
            Ok(Self::literal(text))
        }
    }

    /// Whether this separator can never split a key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Literal(bytes) => bytes.is_empty(),
            Self::Pattern(re) => re.as_str().is_empty(),
        }
    }

    /// Locate the next separator at or after `from`.
    ///
    /// Zero-length pattern matches are skipped: they would create namespaces
    /// with an empty display part and never advance.
    #[must_use]
    pub fn locate(&self, haystack: &[u8], from: usize) -> Option<SeparatorMatch> {
        if from > haystack.len() {
            return None;
        }
        match self {
            Self::Literal(needle) => {
                if needle.is_empty() || haystack.len() - from < needle.len() {
                    return None;
                }
                haystack[from..]
                    .windows(needle.len())
                    .position(|w| w == needle.as_slice())
                    .map(|pos| SeparatorMatch { start: from + pos, len: needle.len() })
            }
            Self::Pattern(re) => re
                .find_iter(&haystack[from..])
                .find(|m| !m.is_empty())
                .map(|m| SeparatorMatch { start: from + m.start(), len: m.len() }),
        }
    }
}

impl std::fmt::Display for Separator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            Self::Pattern(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}
