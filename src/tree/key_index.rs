// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-database lookup from full key bytes to the Key node showing it.

use std::collections::HashMap;

use super::arena::NodeId;

/// Non-owning index of materialized keys.
///
/// Holds exactly one entry per Key node under one database. The model
/// removes entries in the same bracket that destroys the node.
#[derive(Debug, Default, Clone)]
pub struct KeyIndex {
    entries: HashMap<Vec<u8>, NodeId>,
}

impl KeyIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key; returns the previous node if the key was already indexed.
    pub fn insert(&mut self, key: Vec<u8>, node: NodeId) -> Option<NodeId> {
        self.entries.insert(key, node)
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<NodeId> {
        self.entries.remove(key)
    }

    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<NodeId> {
        self.entries.get(key).copied()
    }

    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.keys().map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], NodeId)> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), *v))
    }
}
