// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the tree engine.

use thiserror::Error;
use tracing::error;

use crate::source::FetchError;
use crate::tree::NodeId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The key source failed; nothing was applied.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Growing a child sequence failed; the pass stopped at a consistent point.
    #[error("Not enough memory to render all keys")]
    AllocationFailure,

    /// A live update would exceed the configured key cap.
    #[error("Live update disabled for db{db_index}: {keys} keys exceed the limit of {cap}")]
    LiveUpdateCapExceeded { db_index: u32, keys: usize, cap: usize },

    /// Internal consistency check failed.
    #[error("Tree invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Node {node} is not a {expected}")]
    WrongNodeKind { node: NodeId, expected: &'static str },

    /// Another load or live update owns the database.
    #[error("Another operation is in progress for db{0}")]
    Locked(u32),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl TreeError {
    /// Report an invariant violation.
    ///
    /// Panics in debug builds; release builds log and let the caller skip
    /// the offending item.
    #[track_caller]
    pub fn violation(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        error!(detail = %detail, "Tree invariant violated");
        debug_assert!(false, "tree invariant violated: {}", detail);
        Self::InvariantViolation(detail)
    }

    /// Whether the error leaves the database usable for a manual reload.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Fetch(_) | Self::LiveUpdateCapExceeded { .. } | Self::Locked(_) | Self::AllocationFailure
        )
    }
}
