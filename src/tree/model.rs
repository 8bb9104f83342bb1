// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The tree model: arena-backed node graph plus the view adapter.
//!
//! All structural mutation goes through this type so that every change is
//! reported as a single, non-nested bracket and rows stay contiguous.
//! Key index entries and namespace lookups are updated inside the same
//! bracket that inserts or destroys the node.

use tracing::{debug, warn};

use super::arena::{Arena, NodeId};
use super::node::{DatabaseState, Node, NodeKind};
use super::view::{Change, NullObserver, TreeEvent, TreeObserver, TreeView};
use crate::error::TreeError;

pub struct TreeModel {
    arena: Arena,
    root: NodeId,
    observer: Box<dyn TreeObserver>,
    /// Currently open bracket, if any
    open: Option<Change>,
}

impl std::fmt::Debug for TreeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeModel")
            .field("nodes", &self.arena.len())
            .field("root", &self.root)
            .field("open", &self.open)
            .finish()
    }
}

impl Default for TreeModel {
    fn default() -> Self {
        Self::detached()
    }
}

impl TreeModel {
    /// Create an empty model reporting to `observer`.
    pub fn new(observer: impl TreeObserver + 'static) -> Self {
        let mut arena = Arena::default();
        let root = arena.insert(Node::root());
        Self {
            arena,
            root,
            observer: Box::new(observer),
            open: None,
        }
    }

    /// Model without a consumer, used for background builds.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(NullObserver)
    }

    /// Replace the notification consumer.
    pub fn set_observer(&mut self, observer: impl TreeObserver + 'static) {
        self.observer = Box::new(observer);
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.arena.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.contains(id)
    }

    /// Live nodes including the hidden root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.child_count(self.root) == 0
    }

    pub(crate) fn require(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.arena.get(id).ok_or(TreeError::UnknownNode(id))
    }

    pub(crate) fn require_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        self.arena.get_mut(id).ok_or(TreeError::UnknownNode(id))
    }

    // ========== Brackets ==========

    fn begin(&mut self, change: Change) -> Result<(), TreeError> {
        if let Some(open) = self.open {
            return Err(TreeError::violation(format!(
                "nested structural change {:?} inside {:?}",
                change, open
            )));
        }
        self.open = Some(change);
        self.observer.notify(&TreeEvent::Begin(change));
        Ok(())
    }

    fn end(&mut self) {
        if let Some(change) = self.open.take() {
            self.observer.notify(&TreeEvent::End(change));
        }
    }

    /// Report a non-structural change of `node`.
    pub fn data_changed(&mut self, node: NodeId) {
        if self.arena.contains(node) {
            self.observer.notify(&TreeEvent::DataChanged(node));
        }
    }

    // ========== Connections ==========

    /// Append a server group at top level.
    pub fn add_group(&mut self, name: impl Into<String>) -> Result<NodeId, TreeError> {
        let root = self.root;
        self.append_one(root, Node::group(name))
    }

    /// Append a server at top level or inside `group`.
    pub fn add_server(&mut self, group: Option<NodeId>, name: impl Into<String>) -> Result<NodeId, TreeError> {
        let parent = group.unwrap_or(self.root);
        self.append_one(parent, Node::server(name))
    }

    /// Append a database reported by `server`.
    pub fn add_database(&mut self, server: NodeId, index: u32, declared_key_count: u64) -> Result<NodeId, TreeError> {
        self.append_one(server, Node::database(index, declared_key_count))
    }

    /// Remove `node` and everything below it.
    pub fn remove_node(&mut self, node: NodeId) -> Result<(), TreeError> {
        let (parent, row) = {
            let n = self.require(node)?;
            (n.parent.ok_or(TreeError::WrongNodeKind { node, expected: "removable node" })?, n.row)
        };
        self.remove_rows(parent, row, 1)
    }

    /// Re-parent a server into `group`, or to top level when `None`.
    pub fn move_server(&mut self, server: NodeId, group: Option<NodeId>) -> Result<(), TreeError> {
        if !matches!(self.require(server)?.kind, NodeKind::Server { .. }) {
            return Err(TreeError::WrongNodeKind { node: server, expected: "server" });
        }
        let destination = group.unwrap_or(self.root);
        let row = self.child_count(destination);
        self.move_row(server, destination, row)
    }

    fn append_one(&mut self, parent: NodeId, node: Node) -> Result<NodeId, TreeError> {
        let at = self.child_count(parent);
        self.insert_nodes(parent, at, vec![node])?
            .into_iter()
            .next()
            .ok_or_else(|| TreeError::violation("single insert produced no node"))
    }

    // ========== Structural mutation ==========

    fn accepts(parent: &NodeKind, child: &NodeKind) -> bool {
        matches!(
            (parent, child),
            (NodeKind::Root, NodeKind::Group { .. })
                | (NodeKind::Root, NodeKind::Server { .. })
                | (NodeKind::Group { .. }, NodeKind::Server { .. })
                | (NodeKind::Server { .. }, NodeKind::Database(_))
                | (NodeKind::Database(_), NodeKind::Namespace(_))
                | (NodeKind::Database(_), NodeKind::Key)
                | (NodeKind::Namespace(_), NodeKind::Namespace(_))
                | (NodeKind::Namespace(_), NodeKind::Key)
        )
    }

    /// Insert `nodes` as consecutive rows starting at `at` under one bracket.
    ///
    /// Keys are registered in the owning database's index and namespaces in
    /// the parent's lookup table. Nodes that would duplicate an indexed key
    /// or an existing namespace are invariant violations and are skipped.
    pub(crate) fn insert_nodes(&mut self, parent: NodeId, at: usize, nodes: Vec<Node>) -> Result<Vec<NodeId>, TreeError> {
        let database = self.database_of(parent);
        let (at, accepted) = {
            let parent_node = self.require(parent)?;
            let at = at.min(parent_node.children.len());
            let mut accepted = Vec::with_capacity(nodes.len());
            let mut batch_keys = std::collections::HashSet::new();
            let mut batch_namespaces = std::collections::HashSet::new();
            for node in nodes {
                if !Self::accepts(&parent_node.kind, &node.kind) {
                    return Err(TreeError::WrongNodeKind { node: parent, expected: "container for this node kind" });
                }
                match &node.kind {
                    NodeKind::Key => {
                        let indexed = database
                            .and_then(|db| self.arena.get(db))
                            .and_then(Node::as_database)
                            .is_some_and(|db| db.key_index.contains(&node.full_path));
                        if indexed || !batch_keys.insert(node.full_path.clone()) {
                            TreeError::violation(format!(
                                "key '{}' is already materialized",
                                String::from_utf8_lossy(&node.full_path)
                            ));
                            continue;
                        }
                    }
                    NodeKind::Namespace(ns) => {
                        let exists = parent_node
                            .grouping()
                            .is_some_and(|g| g.namespaces.contains_key(&ns.display_part));
                        if exists || !batch_namespaces.insert(ns.display_part.clone()) {
                            TreeError::violation(format!(
                                "duplicate namespace segment '{}'",
                                String::from_utf8_lossy(&ns.display_part)
                            ));
                            continue;
                        }
                    }
                    _ => {}
                }
                accepted.push(node);
            }
            (at, accepted)
        };
        if accepted.is_empty() {
            return Ok(Vec::new());
        }

        self.require_mut(parent)?
            .children
            .try_reserve(accepted.len())
            .map_err(|_| TreeError::AllocationFailure)?;

        let count = accepted.len();
        self.begin(Change::Insert { parent, start: at, count })?;

        let mut ids = Vec::with_capacity(count);
        let mut keys = Vec::new();
        let mut namespaces = Vec::new();
        for mut node in accepted {
            node.parent = Some(parent);
            let key_path = node.is_key().then(|| node.full_path.clone());
            let display = node.as_namespace().map(|ns| ns.display_part.clone());
            let id = self.arena.insert(node);
            if let Some(path) = key_path {
                keys.push((path, id));
            }
            if let Some(display) = display {
                namespaces.push((display, id));
            }
            ids.push(id);
        }

        if let Some(parent_node) = self.arena.get_mut(parent) {
            parent_node.children.splice(at..at, ids.iter().copied());
            if let Some(grouping) = parent_node.grouping_mut() {
                grouping.namespaces.extend(namespaces);
            }
        }
        self.renumber(parent, at);

        if !keys.is_empty() {
            if let Some(db) = database.and_then(|db| self.arena.get_mut(db)).and_then(Node::as_database_mut) {
                for (path, id) in keys {
                    db.key_index.insert(path, id);
                }
            }
        }

        self.end();
        Ok(ids)
    }

    /// Remove `count` rows starting at `start`, destroying their subtrees.
    pub(crate) fn remove_rows(&mut self, parent: NodeId, start: usize, count: usize) -> Result<(), TreeError> {
        let len = self.require(parent)?.children.len();
        if count == 0 {
            return Ok(());
        }
        if start + count > len {
            return Err(TreeError::violation(format!(
                "remove rows {}..{} out of range for {} children of {}",
                start,
                start + count,
                len,
                parent
            )));
        }
        let database = self.database_of(parent);

        self.begin(Change::Remove { parent, start, count })?;

        let removed: Vec<NodeId> = match self.arena.get_mut(parent) {
            Some(parent_node) => parent_node.children.drain(start..start + count).collect(),
            None => Vec::new(),
        };
        self.renumber(parent, start);

        let mut stale_keys = Vec::new();
        for child in removed {
            let display = self
                .arena
                .get(child)
                .and_then(Node::as_namespace)
                .map(|ns| ns.display_part.clone());
            if let Some(display) = display {
                if let Some(grouping) = self.arena.get_mut(parent).and_then(Node::grouping_mut) {
                    grouping.namespaces.remove(&display);
                }
            }
            self.destroy_subtree(child, &mut stale_keys);
        }

        if let Some(db) = database.and_then(|db| self.arena.get_mut(db)).and_then(Node::as_database_mut) {
            for (path, id) in stale_keys {
                match db.key_index.get(&path) {
                    Some(indexed) if indexed == id => {
                        db.key_index.remove(&path);
                    }
                    _ => {
                        warn!(key = %String::from_utf8_lossy(&path), "Destroyed key had no matching index entry");
                    }
                }
            }
        }

        self.end();
        Ok(())
    }

    /// Remove every child of `parent` under one bracket.
    pub fn clear_children(&mut self, parent: NodeId) -> Result<(), TreeError> {
        let count = self.require(parent)?.children.len();
        self.remove_rows(parent, 0, count)
    }

    /// Move `node` to `destination_row` of `destination` under one bracket.
    ///
    /// `destination_row` uses the destination's row numbering before the move.
    pub(crate) fn move_row(&mut self, node: NodeId, destination: NodeId, destination_row: usize) -> Result<(), TreeError> {
        let (source, row) = {
            let n = self.require(node)?;
            let source = n.parent.ok_or(TreeError::WrongNodeKind { node, expected: "movable node" })?;
            (source, n.row)
        };
        {
            let dst = self.require(destination)?;
            if !Self::accepts(&dst.kind, &self.require(node)?.kind) {
                return Err(TreeError::WrongNodeKind { node: destination, expected: "container for this node kind" });
            }
            if destination_row > dst.children.len() {
                return Err(TreeError::violation(format!(
                    "move target row {} beyond {} children",
                    destination_row,
                    dst.children.len()
                )));
            }
        }
        if self.is_ancestor_or_self(node, destination) {
            return Err(TreeError::WrongNodeKind { node: destination, expected: "node outside the moved subtree" });
        }
        if source == destination && (destination_row == row || destination_row == row + 1) {
            return Ok(());
        }

        self.begin(Change::Move { source, start: row, count: 1, destination, destination_row })?;

        if let Some(src) = self.arena.get_mut(source) {
            src.children.remove(row);
        }
        self.renumber(source, row);

        let insert_at = if source == destination && destination_row > row {
            destination_row - 1
        } else {
            destination_row
        };
        if let Some(dst) = self.arena.get_mut(destination) {
            dst.children.insert(insert_at, node);
        }
        if let Some(moved) = self.arena.get_mut(node) {
            moved.parent = Some(destination);
        }
        self.renumber(destination, insert_at);

        self.end();
        debug!(%node, %source, %destination, "Row moved");
        Ok(())
    }

    fn destroy_subtree(&mut self, node: NodeId, stale_keys: &mut Vec<(Vec<u8>, NodeId)>) {
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if let Some(removed) = self.arena.remove(id) {
                if removed.is_key() {
                    stale_keys.push((removed.full_path, id));
                }
                stack.extend(removed.children);
            }
        }
    }

    fn renumber(&mut self, parent: NodeId, from: usize) {
        let children: Vec<NodeId> = match self.arena.get(parent) {
            Some(p) if from < p.children.len() => p.children[from..].to_vec(),
            _ => return,
        };
        for (offset, child) in children.into_iter().enumerate() {
            if let Some(c) = self.arena.get_mut(child) {
                c.row = from + offset;
            }
        }
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.arena.get(node).and_then(|n| n.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    // ========== Node state ==========

    pub fn set_expanded(&mut self, node: NodeId, expanded: bool) -> Result<(), TreeError> {
        let n = self.require_mut(node)?;
        if n.expanded != expanded {
            n.expanded = expanded;
            self.data_changed(node);
        }
        Ok(())
    }

    pub fn set_locked(&mut self, node: NodeId, locked: bool) -> Result<(), TreeError> {
        let n = self.require_mut(node)?;
        if n.locked != locked {
            n.locked = locked;
            self.data_changed(node);
        }
        Ok(())
    }

    pub(crate) fn push_raw_key(&mut self, node: NodeId, key: Vec<u8>) -> Result<(), TreeError> {
        let grouping = self
            .require_mut(node)?
            .grouping_mut()
            .ok_or(TreeError::WrongNodeKind { node, expected: "database or namespace" })?;
        grouping.raw_keys.try_reserve(1).map_err(|_| TreeError::AllocationFailure)?;
        grouping.raw_keys.push(key);
        Ok(())
    }

    pub(crate) fn take_raw_keys(&mut self, node: NodeId) -> Result<Vec<Vec<u8>>, TreeError> {
        let grouping = self
            .require_mut(node)?
            .grouping_mut()
            .ok_or(TreeError::WrongNodeKind { node, expected: "database or namespace" })?;
        Ok(std::mem::take(&mut grouping.raw_keys))
    }

    /// Keep only parked keys for which `keep` holds; returns how many were dropped.
    pub(crate) fn retain_raw_keys(&mut self, node: NodeId, mut keep: impl FnMut(&[u8]) -> bool) -> usize {
        match self.arena.get_mut(node).and_then(Node::grouping_mut) {
            Some(grouping) => {
                let before = grouping.raw_keys.len();
                grouping.raw_keys.retain(|k| keep(k));
                before - grouping.raw_keys.len()
            }
            None => 0,
        }
    }

    // ========== Queries ==========

    pub fn database(&self, db: NodeId) -> Result<&DatabaseState, TreeError> {
        self.require(db)?
            .as_database()
            .ok_or(TreeError::WrongNodeKind { node: db, expected: "database" })
    }

    pub(crate) fn database_mut(&mut self, db: NodeId) -> Result<&mut DatabaseState, TreeError> {
        self.require_mut(db)?
            .as_database_mut()
            .ok_or(TreeError::WrongNodeKind { node: db, expected: "database" })
    }

    /// The database owning `node` (itself when `node` is a database).
    #[must_use]
    pub fn database_of(&self, node: NodeId) -> Option<NodeId> {
        let mut current = node;
        loop {
            let n = self.arena.get(current)?;
            match n.kind {
                NodeKind::Database(_) => return Some(current),
                NodeKind::Namespace(_) | NodeKind::Key => current = n.parent?,
                _ => return None,
            }
        }
    }

    /// Database with `index` under `server`.
    #[must_use]
    pub fn find_database(&self, server: NodeId, index: u32) -> Option<NodeId> {
        self.arena.get(server)?.children.iter().copied().find(|&child| {
            self.arena
                .get(child)
                .and_then(Node::as_database)
                .is_some_and(|db| db.index == index)
        })
    }

    #[must_use]
    pub fn find_child_namespace(&self, parent: NodeId, display_part: &[u8]) -> Option<NodeId> {
        self.arena.get(parent)?.grouping()?.namespace(display_part)
    }

    /// Key node showing `key` in `db`, if materialized.
    #[must_use]
    pub fn key_node(&self, db: NodeId, key: &[u8]) -> Option<NodeId> {
        self.database(db).ok()?.key_index.get(key)
    }

    /// `node` and all its descendants in pre-order.
    #[must_use]
    pub fn subtree(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if let Some(n) = self.arena.get(id) {
                out.push(id);
                stack.extend(n.children.iter().rev().copied());
            }
        }
        out
    }

    /// Full paths of Key nodes under `node`.
    #[must_use]
    pub fn materialized_keys(&self, node: NodeId) -> Vec<Vec<u8>> {
        self.subtree(node)
            .into_iter()
            .filter_map(|id| self.arena.get(id))
            .filter(|n| n.is_key())
            .map(|n| n.full_path.clone())
            .collect()
    }

    /// Keys parked in raw storage anywhere under `node`.
    #[must_use]
    pub fn parked_keys(&self, node: NodeId) -> Vec<Vec<u8>> {
        self.subtree(node)
            .into_iter()
            .filter_map(|id| self.arena.get(id))
            .filter_map(Node::grouping)
            .flat_map(|g| g.raw_keys.iter().cloned())
            .collect()
    }

    /// Verify structural invariants of the whole model.
    pub fn check_invariants(&self) -> Result<(), TreeError> {
        let fail = |msg: String| Err(TreeError::InvariantViolation(msg));
        for id in self.subtree(self.root) {
            let Some(node) = self.arena.get(id) else { continue };
            let mut namespaces = 0;
            for (row, &child) in node.children.iter().enumerate() {
                let Some(c) = self.arena.get(child) else {
                    return fail(format!("{} lists missing child {}", id, child));
                };
                if c.row != row {
                    return fail(format!("{} has row {} at position {}", child, c.row, row));
                }
                if c.parent != Some(id) {
                    return fail(format!("{} does not point back to parent {}", child, id));
                }
                if matches!(c.kind, NodeKind::Namespace(_) | NodeKind::Key) && !c.full_path.starts_with(&node.full_path) {
                    return fail(format!("{} path is not below its parent {}", child, id));
                }
                if let Some(ns) = c.as_namespace() {
                    namespaces += 1;
                    if node.grouping().and_then(|g| g.namespace(&ns.display_part)) != Some(child) {
                        return fail(format!("namespace {} missing from lookup of {}", child, id));
                    }
                }
            }
            if let Some(grouping) = node.grouping() {
                if grouping.namespaces.len() != namespaces {
                    return fail(format!("namespace lookup of {} has stale entries", id));
                }
            }
            if let Some(db) = node.as_database() {
                let keys: Vec<NodeId> = self
                    .subtree(id)
                    .into_iter()
                    .filter(|&k| self.arena.get(k).is_some_and(Node::is_key))
                    .collect();
                if keys.len() != db.key_index.len() {
                    return fail(format!(
                        "db{} indexes {} keys but holds {} key nodes",
                        db.index,
                        db.key_index.len(),
                        keys.len()
                    ));
                }
                for k in keys {
                    let path = self.arena.get(k).map(|n| n.full_path.as_slice()).unwrap_or_default();
                    if db.key_index.get(path) != Some(k) {
                        return fail(format!("key node {} not indexed in db{}", k, db.index));
                    }
                }
            }
        }
        Ok(())
    }

    // ========== Splicing background results ==========

    /// Move the children and parked keys of `scratch_db` in `scratch` under
    /// `db` as one insert bracket. Returns the number of top-level rows.
    pub(crate) fn splice_subtree(&mut self, db: NodeId, mut scratch: TreeModel, scratch_db: NodeId) -> Result<usize, TreeError> {
        self.database(db)?;
        let tops = scratch.require(scratch_db)?.children.clone();
        let raw = scratch.take_raw_keys(scratch_db)?;
        let at = self.child_count(db);

        let conflicts = tops.iter().any(|&top| match scratch.node(top).map(|n| &n.kind) {
            Some(NodeKind::Namespace(ns)) => self.find_child_namespace(db, &ns.display_part).is_some(),
            Some(NodeKind::Key) => scratch
                .node(top)
                .is_some_and(|n| self.key_node(db, &n.full_path).is_some()),
            _ => false,
        });
        if conflicts {
            return Err(TreeError::violation("spliced subtree overlaps materialized rows"));
        }

        {
            let db_node = self.require_mut(db)?;
            db_node.children.try_reserve(tops.len()).map_err(|_| TreeError::AllocationFailure)?;
            if let Some(grouping) = db_node.grouping_mut() {
                grouping.raw_keys.try_reserve(raw.len()).map_err(|_| TreeError::AllocationFailure)?;
                grouping.raw_keys.extend(raw);
            }
        }
        if tops.is_empty() {
            self.data_changed(db);
            return Ok(0);
        }

        let count = tops.len();
        self.begin(Change::Insert { parent: db, start: at, count })?;
        let mut keys = Vec::new();
        for (offset, top) in tops.into_iter().enumerate() {
            if let Some(id) = self.adopt(&mut scratch, top, db, at + offset, &mut keys) {
                let display = self.arena.get(id).and_then(Node::as_namespace).map(|ns| ns.display_part.clone());
                if let Some(db_node) = self.arena.get_mut(db) {
                    db_node.children.push(id);
                    if let (Some(display), Some(grouping)) = (display, db_node.grouping_mut()) {
                        grouping.namespaces.insert(display, id);
                    }
                }
            }
        }
        if let Some(state) = self.arena.get_mut(db).and_then(Node::as_database_mut) {
            for (path, id) in keys {
                state.key_index.insert(path, id);
            }
        }
        self.end();
        Ok(count)
    }

    /// Move `node` and its subtree from `scratch` into this arena.
    fn adopt(
        &mut self,
        scratch: &mut TreeModel,
        node: NodeId,
        parent: NodeId,
        row: usize,
        keys: &mut Vec<(Vec<u8>, NodeId)>,
    ) -> Option<NodeId> {
        let mut taken = scratch.arena.remove(node)?;
        let old_children = std::mem::take(&mut taken.children);
        if let Some(grouping) = taken.grouping_mut() {
            grouping.namespaces.clear();
        }
        taken.parent = Some(parent);
        taken.row = row;
        let is_key = taken.is_key();
        let path = is_key.then(|| taken.full_path.clone());
        let id = self.arena.insert(taken);
        if let Some(path) = path {
            keys.push((path, id));
        }

        let mut adopted = Vec::with_capacity(old_children.len());
        let mut namespaces = Vec::new();
        for (child_row, child) in old_children.into_iter().enumerate() {
            if let Some(child_id) = self.adopt(scratch, child, id, child_row, keys) {
                if let Some(ns) = self.arena.get(child_id).and_then(Node::as_namespace) {
                    namespaces.push((ns.display_part.clone(), child_id));
                }
                adopted.push(child_id);
            }
        }
        if let Some(n) = self.arena.get_mut(id) {
            n.children = adopted;
            if let Some(grouping) = n.grouping_mut() {
                grouping.namespaces.extend(namespaces);
            }
        }
        Some(id)
    }
}

impl TreeView for TreeModel {
    fn root(&self) -> NodeId {
        self.root
    }

    fn child_count(&self, node: NodeId) -> usize {
        self.arena.get(node).map_or(0, |n| n.children.len())
    }

    fn child_at(&self, node: NodeId, row: usize) -> Option<NodeId> {
        self.arena.get(node)?.children.get(row).copied()
    }

    fn parent_of(&self, node: NodeId) -> Option<NodeId> {
        self.arena.get(node)?.parent
    }

    fn row_of(&self, node: NodeId) -> Option<usize> {
        self.arena.get(node).map(|n| n.row)
    }

    fn is_expanded(&self, node: NodeId) -> bool {
        self.arena.get(node).is_some_and(Node::is_expanded)
    }

    fn is_locked(&self, node: NodeId) -> bool {
        self.arena.get(node).is_some_and(Node::is_locked)
    }

    fn display_name(&self, node: NodeId) -> Option<String> {
        let n = self.arena.get(node)?;
        let name = match &n.kind {
            NodeKind::Root => String::new(),
            NodeKind::Group { name } | NodeKind::Server { name } => name.clone(),
            NodeKind::Database(db) => {
                if !db.loaded {
                    format!("db{} ({})", db.index, db.declared_key_count)
                } else {
                    let filter = db
                        .filter
                        .as_ref()
                        .map(|f| format!(" [filter: {}]", f))
                        .unwrap_or_default();
                    format!("db{}{} ({}/{})", db.index, filter, db.fetched_key_count, db.declared_key_count)
                }
            }
            NodeKind::Namespace(ns) => {
                let parent_offset = ns.prefix.len().saturating_sub(ns.display_part.len());
                let segment = n.full_path.get(parent_offset..).unwrap_or_default();
                let count = n.children.len() + ns.grouping.raw_keys.len();
                format!("{} ({})", String::from_utf8_lossy(segment), count)
            }
            NodeKind::Key => String::from_utf8_lossy(&n.full_path).into_owned(),
        };
        Some(name)
    }
}
