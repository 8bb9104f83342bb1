// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Glob key filters with Redis `MATCH` semantics.
//!
//! The same pattern is handed to the key source (`SCAN ... MATCH`) and
//! re-applied locally, so sources that ignore it still produce a filtered
//! tree.
//!
//! # Example
//!
//! ```
//! use keyspace_tree::KeyFilter;
//!
//! let filter = KeyFilter::new("user:*:profile").unwrap();
//! assert!(filter.matches(b"user:123:profile"));
//! assert!(!filter.matches(b"order:1"));
//! ```

use std::fmt::Write as _;

use regex::bytes::Regex;

use crate::error::TreeError;

/// Anchored glob predicate over raw key bytes.
#[derive(Debug, Clone)]
pub struct KeyFilter {
    pattern: String,
    regex: Regex,
}

impl KeyFilter {
    /// Compile a glob pattern (`*`, `?`, `[abc]`, `[^a]`, `[a-z]`, `\x`).
    pub fn new(pattern: impl Into<String>) -> Result<Self, TreeError> {
        let pattern = pattern.into();
        let regex = Regex::new(&glob_to_regex(pattern.as_bytes()))
            .map_err(|e| TreeError::InvalidPattern(format!("filter '{}': {}", pattern, e)))?;
        Ok(Self { pattern, regex })
    }

    /// The glob text as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Whether the pattern matches every key.
    #[must_use]
    pub fn is_match_all(&self) -> bool {
        self.pattern.is_empty() || self.pattern.bytes().all(|b| b == b'*')
    }

    #[must_use]
    pub fn matches(&self, key: &[u8]) -> bool {
        self.regex.is_match(key)
    }
}

impl PartialEq for KeyFilter {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for KeyFilter {}

impl std::fmt::Display for KeyFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pattern)
    }
}

fn push_byte(out: &mut String, byte: u8) {
    let _ = write!(out, "\\x{:02X}", byte);
}

/// Translate a glob into a byte-oriented, fully anchored regex.
///
/// Every literal byte is emitted as a `\xHH` escape so arbitrary binary keys
/// round-trip without Unicode surprises. An empty pattern matches everything.
fn glob_to_regex(glob: &[u8]) -> String {
    if glob.is_empty() {
        return "(?s-u)^.*$".to_string();
    }
    let mut out = String::from("(?s-u)^");
    let mut i = 0;
    while i < glob.len() {
        match glob[i] {
            b'*' => out.push_str(".*"),
            b'?' => out.push('.'),
            b'\\' if i + 1 < glob.len() => {
                i += 1;
                push_byte(&mut out, glob[i]);
            }
            b'[' => match parse_class(&glob[i + 1..]) {
                Some((class, consumed)) => {
                    out.push_str(&class);
                    i += consumed;
                }
                None => push_byte(&mut out, b'['),
            },
            other => push_byte(&mut out, other),
        }
        i += 1;
    }
    out.push('$');
    out
}

/// Parse a bracket class starting right after `[`.
///
/// Returns the regex class and the number of bytes consumed including the
/// closing `]`, or `None` when the class is unterminated or empty.
fn parse_class(rest: &[u8]) -> Option<(String, usize)> {
    let mut i = 0;
    let negate = rest.first() == Some(&b'^');
    if negate {
        i += 1;
    }
    let mut items: Vec<(u8, u8)> = Vec::new();
    while i < rest.len() && rest[i] != b']' {
        let mut lo = rest[i];
        if lo == b'\\' && i + 1 < rest.len() {
            i += 1;
            lo = rest[i];
        }
        // Range bounds are taken verbatim, as Redis does: `[a-\]` ends at `\`
        if i + 2 < rest.len() && rest[i + 1] == b'-' && rest[i + 2] != b']' {
            let hi = rest[i + 2];
            items.push(if lo <= hi { (lo, hi) } else { (hi, lo) });
            i += 2;
        } else {
            items.push((lo, lo));
        }
        i += 1;
    }
    if i >= rest.len() || items.is_empty() {
        return None;
    }

    let mut class = String::from("[");
    if negate {
        class.push('^');
    }
    for (lo, hi) in items {
        push_byte(&mut class, lo);
        if hi != lo {
            class.push('-');
            push_byte(&mut class, hi);
        }
    }
    class.push(']');
    Some((class, i + 1))
}
