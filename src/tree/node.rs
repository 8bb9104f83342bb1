// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tree node variants.
//!
//! ```text
//! Root (hidden)
//! ├── Group "prod"
//! │   └── Server "cache-1"
//! │       └── Database db0
//! │           ├── Namespace "user:"     full_path "user"
//! │           │   ├── Key "user:1"
//! │           │   └── Key "user:2"
//! │           └── Key "version"
//! └── Server "local"
//! ```

use std::collections::HashMap;

use super::arena::NodeId;
use super::key_index::KeyIndex;
use crate::filter::KeyFilter;

/// Keys parked under a node plus its namespace lookup table.
///
/// Shared by databases and namespaces, the two node kinds that group keys.
#[derive(Debug, Default)]
pub struct Grouping {
    /// Fetched keys deliberately not materialized (render limit or collapsed)
    pub(crate) raw_keys: Vec<Vec<u8>>,
    /// Child namespaces by display part (segment including separator)
    pub(crate) namespaces: HashMap<Vec<u8>, NodeId>,
}

impl Grouping {
    #[must_use]
    pub fn raw_keys(&self) -> &[Vec<u8>] {
        &self.raw_keys
    }

    #[must_use]
    pub fn namespace(&self, display_part: &[u8]) -> Option<NodeId> {
        self.namespaces.get(display_part).copied()
    }
}

/// Per-database state.
#[derive(Debug)]
pub struct DatabaseState {
    pub(crate) index: u32,
    pub(crate) declared_key_count: u64,
    pub(crate) grouping: Grouping,
    pub(crate) filter: Option<KeyFilter>,
    pub(crate) key_index: KeyIndex,
    /// Bumped on unload and filter change; tasks stamped with an older
    /// value are discarded.
    pub(crate) epoch: u64,
    pub(crate) loaded: bool,
    pub(crate) live_update: bool,
    pub(crate) pending_reload: bool,
    /// Keys in the last applied fetch (materialized + parked)
    pub(crate) fetched_key_count: usize,
}

impl DatabaseState {
    fn new(index: u32, declared_key_count: u64) -> Self {
        Self {
            index,
            declared_key_count,
            grouping: Grouping::default(),
            filter: None,
            key_index: KeyIndex::new(),
            epoch: 0,
            loaded: false,
            live_update: false,
            pending_reload: false,
            fetched_key_count: 0,
        }
    }

    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[must_use]
    pub fn declared_key_count(&self) -> u64 {
        self.declared_key_count
    }

    #[must_use]
    pub fn filter(&self) -> Option<&KeyFilter> {
        self.filter.as_ref()
    }

    #[must_use]
    pub fn key_index(&self) -> &KeyIndex {
        &self.key_index
    }

    #[must_use]
    pub fn raw_keys(&self) -> &[Vec<u8>] {
        &self.grouping.raw_keys
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    #[must_use]
    pub fn live_update(&self) -> bool {
        self.live_update
    }
}

/// Per-namespace state.
#[derive(Debug)]
pub struct NamespaceState {
    /// Key prefix up to and including the matched separator
    pub(crate) prefix: Vec<u8>,
    /// This node's segment including the separator
    pub(crate) display_part: Vec<u8>,
    pub(crate) grouping: Grouping,
}

impl NamespaceState {
    #[must_use]
    pub fn display_part(&self) -> &[u8] {
        &self.display_part
    }

    #[must_use]
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    #[must_use]
    pub fn raw_keys(&self) -> &[Vec<u8>] {
        &self.grouping.raw_keys
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Root,
    Group { name: String },
    Server { name: String },
    Database(DatabaseState),
    Namespace(NamespaceState),
    Key,
}

impl NodeKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Group { .. } => "server_group",
            Self::Server { .. } => "server",
            Self::Database(_) => "database",
            Self::Namespace(_) => "namespace",
            Self::Key => "key",
        }
    }
}

/// A node in the arena.
#[derive(Debug)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) full_path: Vec<u8>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) row: usize,
    pub(crate) expanded: bool,
    pub(crate) locked: bool,
}

impl Node {
    fn with_kind(kind: NodeKind, full_path: Vec<u8>) -> Self {
        Self {
            kind,
            full_path,
            parent: None,
            children: Vec::new(),
            row: 0,
            expanded: false,
            locked: false,
        }
    }

    pub(crate) fn root() -> Self {
        let mut node = Self::with_kind(NodeKind::Root, Vec::new());
        node.expanded = true;
        node
    }

    pub(crate) fn group(name: impl Into<String>) -> Self {
        Self::with_kind(NodeKind::Group { name: name.into() }, Vec::new())
    }

    pub(crate) fn server(name: impl Into<String>) -> Self {
        Self::with_kind(NodeKind::Server { name: name.into() }, Vec::new())
    }

    pub(crate) fn database(index: u32, declared_key_count: u64) -> Self {
        let mut node = Self::with_kind(
            NodeKind::Database(DatabaseState::new(index, declared_key_count)),
            Vec::new(),
        );
        node.expanded = true;
        node
    }

    pub(crate) fn namespace(full_path: Vec<u8>, prefix: Vec<u8>, display_part: Vec<u8>, expanded: bool) -> Self {
        let mut node = Self::with_kind(
            NodeKind::Namespace(NamespaceState {
                prefix,
                display_part,
                grouping: Grouping::default(),
            }),
            full_path,
        );
        node.expanded = expanded;
        node
    }

    pub(crate) fn key(full_path: Vec<u8>) -> Self {
        Self::with_kind(NodeKind::Key, full_path)
    }

    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[must_use]
    pub fn full_path(&self) -> &[u8] {
        &self.full_path
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[must_use]
    pub fn row(&self) -> usize {
        self.row
    }

    #[must_use]
    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    #[must_use]
    pub fn is_key(&self) -> bool {
        matches!(self.kind, NodeKind::Key)
    }

    #[must_use]
    pub fn is_namespace(&self) -> bool {
        matches!(self.kind, NodeKind::Namespace(_))
    }

    #[must_use]
    pub fn as_database(&self) -> Option<&DatabaseState> {
        match &self.kind {
            NodeKind::Database(db) => Some(db),
            _ => None,
        }
    }

    pub(crate) fn as_database_mut(&mut self) -> Option<&mut DatabaseState> {
        match &mut self.kind {
            NodeKind::Database(db) => Some(db),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_namespace(&self) -> Option<&NamespaceState> {
        match &self.kind {
            NodeKind::Namespace(ns) => Some(ns),
            _ => None,
        }
    }

    #[must_use]
    pub fn grouping(&self) -> Option<&Grouping> {
        match &self.kind {
            NodeKind::Database(db) => Some(&db.grouping),
            NodeKind::Namespace(ns) => Some(&ns.grouping),
            _ => None,
        }
    }

    pub(crate) fn grouping_mut(&mut self) -> Option<&mut Grouping> {
        match &mut self.kind {
            NodeKind::Database(db) => Some(&mut db.grouping),
            NodeKind::Namespace(ns) => Some(&mut ns.grouping),
            _ => None,
        }
    }

    /// Offset in descendant keys where this node's child segment begins.
    #[must_use]
    pub fn children_offset(&self) -> usize {
        match &self.kind {
            NodeKind::Namespace(ns) => ns.prefix.len(),
            _ => 0,
        }
    }

    /// Bytes that order this node among its siblings.
    ///
    /// Namespaces sort by their prefix (separator included), so a key equal
    /// to a namespace path sorts before the namespace it shadows.
    #[must_use]
    pub fn sort_key(&self) -> &[u8] {
        match &self.kind {
            NodeKind::Namespace(ns) => &ns.prefix,
            _ => &self.full_path,
        }
    }
}
