// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Grouping flat keys into namespaces.
//!
//! The builder walks each key segment by segment, starting at the entry
//! parent's children offset:
//!
//! ```text
//! entry = db0, key = "user:42:name", separator ":"
//!
//!   "user:"  -> namespace user      (reuse or create)
//!   "42:"    -> namespace user:42   (reuse or create, unless collapsed)
//!   "name"   -> Key "user:42:name"
//! ```
//!
//! Materialization is bounded:
//! - a parent at `render_limit` children parks further keys in `raw_keys`
//! - a collapsed namespace below the entry parent parks every key it receives
//! - a namespace that would hold a single key is skipped; the key is shown
//!   directly under the current parent
//!
//! In [`BuildMode::Append`], consecutive direct children of the entry parent
//! are inserted under one bracket.

use std::collections::HashSet;
use std::time::Instant;

use tracing::debug;

use crate::error::TreeError;
use crate::separator::{Separator, SeparatorMatch};
use crate::tree::{Node, NodeId, TreeModel, TreeView};

/// Where new children land among their siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Fresh builds: children are appended in input order.
    #[default]
    Append,
    /// Incremental inserts: children are placed at their lexical position.
    Sorted,
}

/// Result of one build pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Key nodes created, in creation order
    pub inserted: Vec<NodeId>,
    /// Namespaces created
    pub namespaces: usize,
    /// Keys parked in raw storage instead of materialized
    pub deferred: usize,
}

impl BuildReport {
    fn merge(&mut self, other: BuildReport) {
        self.inserted.extend(other.inserted);
        self.namespaces += other.namespaces;
        self.deferred += other.deferred;
    }
}

/// Database and placement shared by every key of one pass.
#[derive(Debug, Clone, Copy)]
struct Pass {
    db: NodeId,
    mode: BuildMode,
}

/// Groups key lists into a [`TreeModel`].
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    separator: Separator,
    render_limit: usize,
    /// Full paths of namespaces created expanded
    expanded: HashSet<Vec<u8>>,
    mode: BuildMode,
}

impl TreeBuilder {
    #[must_use]
    pub fn new(separator: Separator, render_limit: usize) -> Self {
        Self {
            separator,
            render_limit,
            expanded: HashSet::new(),
            mode: BuildMode::Append,
        }
    }

    #[must_use]
    pub fn with_expanded(mut self, expanded: HashSet<Vec<u8>>) -> Self {
        self.expanded = expanded;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn separator(&self) -> &Separator {
        &self.separator
    }

    #[must_use]
    pub fn render_limit(&self) -> usize {
        self.render_limit
    }

    #[must_use]
    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    /// Group `keys` under `parent` (a database or namespace).
    ///
    /// Keys are processed in the given order. Already materialized keys and
    /// duplicates are skipped. An allocation failure stops the pass; the
    /// nodes inserted so far remain valid.
    pub fn build(&self, model: &mut TreeModel, parent: NodeId, keys: &[Vec<u8>]) -> Result<BuildReport, TreeError> {
        self.build_as(model, parent, keys, self.mode)
    }

    fn build_as(
        &self,
        model: &mut TreeModel,
        parent: NodeId,
        keys: &[Vec<u8>],
        mode: BuildMode,
    ) -> Result<BuildReport, TreeError> {
        let start = Instant::now();
        let (db, offset) = {
            let node = model.require(parent)?;
            if node.grouping().is_none() {
                return Err(TreeError::WrongNodeKind { node: parent, expected: "database or namespace" });
            }
            let db = model
                .database_of(parent)
                .ok_or(TreeError::WrongNodeKind { node: parent, expected: "node inside a database" })?;
            (db, node.children_offset())
        };

        let mut report = BuildReport::default();
        let mut i = 0;
        while i < keys.len() {
            if mode == BuildMode::Append {
                let run = keys[i..]
                    .iter()
                    .take_while(|k| self.separator.locate(k, offset).is_none())
                    .count();
                if run > 0 {
                    self.bulk_insert(model, parent, db, &keys[i..i + run], &mut report)?;
                    i += run;
                    continue;
                }
            }
            self.place(model, parent, Pass { db, mode }, &keys[i], keys.get(i + 1), &mut report)?;
            i += 1;
        }

        crate::metrics::record_build(keys.len(), report.inserted.len(), report.deferred, start.elapsed());
        debug!(
            %parent,
            keys = keys.len(),
            inserted = report.inserted.len(),
            namespaces = report.namespaces,
            deferred = report.deferred,
            "Keys grouped"
        );
        Ok(report)
    }

    /// Materialize parked keys under `node` and its expanded namespaces.
    ///
    /// Used after expanding a namespace or raising the render limit.
    /// Collapsed namespaces below `node` keep their parked keys.
    pub fn rematerialize(&self, model: &mut TreeModel, node: NodeId) -> Result<BuildReport, TreeError> {
        let targets: Vec<NodeId> = model
            .subtree(node)
            .into_iter()
            .filter(|&id| {
                model.node(id).is_some_and(|n| {
                    let open = id == node || n.as_database().is_some() || n.is_expanded();
                    open && n.grouping().is_some_and(|g| !g.raw_keys().is_empty())
                })
            })
            .collect();

        let mut report = BuildReport::default();
        for target in targets {
            if !model.contains(target) {
                continue;
            }
            let mut parked = model.take_raw_keys(target)?;
            parked.sort_unstable();
            parked.dedup();
            let mode = self.placement_for(model, target, &parked);
            report.merge(self.build_as(model, target, &parked, mode)?);
        }
        Ok(report)
    }

    /// Parked keys that sort before an existing row are placed lexically.
    fn placement_for(&self, model: &TreeModel, target: NodeId, parked: &[Vec<u8>]) -> BuildMode {
        if self.mode == BuildMode::Sorted {
            return BuildMode::Sorted;
        }
        let last = model
            .node(target)
            .and_then(|n| n.children().last().copied())
            .and_then(|id| model.node(id));
        match (last, parked.first()) {
            (Some(last), Some(first)) if first.as_slice() < last.sort_key() => BuildMode::Sorted,
            _ => BuildMode::Append,
        }
    }

    /// Insert a run of direct children of `parent` under one bracket.
    fn bulk_insert(
        &self,
        model: &mut TreeModel,
        parent: NodeId,
        db: NodeId,
        run: &[Vec<u8>],
        report: &mut BuildReport,
    ) -> Result<(), TreeError> {
        let mut seen = HashSet::with_capacity(run.len());
        let mut fresh: Vec<&[u8]> = Vec::with_capacity(run.len());
        for key in run {
            if model.key_node(db, key).is_none() && seen.insert(key.as_slice()) {
                fresh.push(key);
            }
        }
        if fresh.is_empty() {
            return Ok(());
        }

        let budget = self.render_limit.saturating_sub(model.child_count(parent));
        let split = budget.min(fresh.len());
        let (shown, parked) = fresh.split_at(split);

        if !shown.is_empty() {
            let nodes = shown.iter().map(|k| Node::key(k.to_vec())).collect();
            let at = model.child_count(parent);
            let ids = model.insert_nodes(parent, at, nodes)?;
            report.inserted.extend(ids);
        }
        for key in parked {
            model.push_raw_key(parent, key.to_vec())?;
            report.deferred += 1;
        }
        Ok(())
    }

    /// Route one key from `entry` down to its place.
    fn place(
        &self,
        model: &mut TreeModel,
        entry: NodeId,
        pass: Pass,
        key: &[u8],
        next: Option<&Vec<u8>>,
        report: &mut BuildReport,
    ) -> Result<(), TreeError> {
        let Pass { db, mode } = pass;
        if model.key_node(db, key).is_some() {
            return Ok(());
        }

        let mut current = entry;
        loop {
            let (offset, collapsed) = {
                let node = model.require(current)?;
                (node.children_offset(), current != entry && node.is_namespace() && !node.is_expanded())
            };
            if collapsed {
                return self.park(model, current, key, report);
            }

            let Some(m) = self.separator.locate(key, offset) else {
                if model.child_count(current) >= self.render_limit {
                    return self.park(model, current, key, report);
                }
                return self.insert_key(model, current, key, mode, report);
            };

            let display = &key[offset..m.end()];
            if let Some(ns) = model.find_child_namespace(current, display) {
                current = ns;
                continue;
            }

            let segment = &key[..m.end()];
            let at_limit = model.child_count(current) >= self.render_limit;
            let siblings = if at_limit && mode == BuildMode::Append {
                Vec::new()
            } else {
                self.segment_siblings(model, current, segment, offset, m, mode)
            };
            if siblings.is_empty() {
                if at_limit {
                    return self.park(model, current, key, report);
                }
                if !self.shares_segment(key, next, offset, m) {
                    return self.insert_key(model, current, key, mode, report);
                }
            }

            let mut absorbed = Vec::with_capacity(siblings.len());
            for sibling in siblings {
                let Some(node) = model.node(sibling) else { continue };
                let (row, path) = (node.row(), node.full_path().to_vec());
                model.remove_rows(current, row, 1)?;
                absorbed.push(path);
            }

            let full_path = key[..m.start].to_vec();
            let expanded = self.expanded.contains(&full_path);
            let node = Node::namespace(full_path, segment.to_vec(), display.to_vec(), expanded);
            let at = self.position(model, current, segment, mode);
            let ns = model
                .insert_nodes(current, at, vec![node])?
                .into_iter()
                .next()
                .ok_or_else(|| TreeError::violation("namespace insert produced no node"))?;
            report.namespaces += 1;

            for sibling in absorbed {
                if expanded {
                    self.place(model, ns, pass, &sibling, None, report)?;
                } else {
                    self.park(model, ns, &sibling, report)?;
                }
            }
            current = ns;
        }
    }

    /// Key rows of `parent` that were shown directly but belong in the
    /// namespace for `segment`.
    fn segment_siblings(
        &self,
        model: &TreeModel,
        parent: NodeId,
        segment: &[u8],
        offset: usize,
        m: SeparatorMatch,
        mode: BuildMode,
    ) -> Vec<NodeId> {
        let Some(node) = model.node(parent) else { return Vec::new() };
        let children = node.children();
        let candidates = match mode {
            BuildMode::Append => children,
            BuildMode::Sorted => {
                let in_segment = |id: &NodeId| model.node(*id).is_some_and(|c| c.sort_key().starts_with(segment));
                let from = children.partition_point(|&id| model.node(id).is_some_and(|c| c.sort_key() < segment));
                let len = children[from..].iter().take_while(|&id| in_segment(id)).count();
                &children[from..from + len]
            }
        };
        candidates
            .iter()
            .copied()
            .filter(|&id| {
                model.node(id).is_some_and(|c| {
                    c.is_key()
                        && c.full_path().starts_with(segment)
                        && self.separator.locate(c.full_path(), offset) == Some(m)
                })
            })
            .collect()
    }

    /// Whether `next` falls into the same namespace segment as `key`.
    fn shares_segment(&self, key: &[u8], next: Option<&Vec<u8>>, offset: usize, m: SeparatorMatch) -> bool {
        let Some(next) = next else { return false };
        next.len() >= m.end()
            && next[..m.end()] == key[..m.end()]
            && self.separator.locate(next, offset) == Some(m)
    }

    fn insert_key(
        &self,
        model: &mut TreeModel,
        parent: NodeId,
        key: &[u8],
        mode: BuildMode,
        report: &mut BuildReport,
    ) -> Result<(), TreeError> {
        let at = self.position(model, parent, key, mode);
        let ids = model.insert_nodes(parent, at, vec![Node::key(key.to_vec())])?;
        report.inserted.extend(ids);
        Ok(())
    }

    fn park(&self, model: &mut TreeModel, node: NodeId, key: &[u8], report: &mut BuildReport) -> Result<(), TreeError> {
        model.push_raw_key(node, key.to_vec())?;
        report.deferred += 1;
        Ok(())
    }

    /// Row for a new child whose sort key is `sort_key`.
    fn position(&self, model: &TreeModel, parent: NodeId, sort_key: &[u8], mode: BuildMode) -> usize {
        let count = model.child_count(parent);
        match mode {
            BuildMode::Append => count,
            BuildMode::Sorted => {
                let Some(node) = model.node(parent) else { return count };
                node.children()
                    .partition_point(|&child| model.node(child).is_some_and(|c| c.sort_key() < sort_key))
            }
        }
    }
}
