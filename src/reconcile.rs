// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Incremental reconciliation of a database against a fresh key list.
//!
//! ```text
//! known   = key index ∪ parked keys
//! removed = key index − fresh      (rows removed, empty namespaces collected)
//! added   = fresh − known          (inserted at their lexical position)
//! ```
//!
//! Parked keys that vanished are dropped without events; they have no rows.

use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, warn};

use crate::builder::{BuildMode, TreeBuilder};
use crate::error::TreeError;
use crate::tree::{NodeId, TreeModel};

/// Keys that changed in one reconcile pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// New keys, sorted
    pub added: Vec<Vec<u8>>,
    /// Materialized keys whose rows were removed
    pub removed: Vec<Vec<u8>>,
    /// Parked keys dropped silently
    pub pruned: usize,
    /// Namespaces collected after becoming empty
    pub namespaces_removed: usize,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.pruned == 0
    }
}

/// Applies live-update fetches to a loaded database.
#[derive(Debug, Clone)]
pub struct Reconciler {
    builder: TreeBuilder,
    max_keys: usize,
}

impl Reconciler {
    /// `builder` is switched to sorted placement.
    #[must_use]
    pub fn new(builder: TreeBuilder, max_keys: usize) -> Self {
        Self {
            builder: builder.with_mode(BuildMode::Sorted),
            max_keys,
        }
    }

    #[must_use]
    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    /// Bring `db` in line with `new_keys`.
    ///
    /// Above the key cap nothing is mutated: live update is switched off for
    /// the database and [`TreeError::LiveUpdateCapExceeded`] is returned.
    pub fn reconcile(&self, model: &mut TreeModel, db: NodeId, new_keys: &[Vec<u8>]) -> Result<ReconcileReport, TreeError> {
        let start = Instant::now();
        let fresh: HashSet<&[u8]> = new_keys.iter().map(Vec::as_slice).collect();

        let db_index = model.database(db)?.index();
        if fresh.len() > self.max_keys {
            let state = model.database_mut(db)?;
            state.live_update = false;
            model.data_changed(db);
            crate::metrics::record_live_update_disabled("cap");
            warn!(db = db_index, keys = fresh.len(), cap = self.max_keys, "Live update disabled: too many keys");
            return Err(TreeError::LiveUpdateCapExceeded { db_index, keys: fresh.len(), cap: self.max_keys });
        }

        let mut report = ReconcileReport::default();
        let (stale, known): (Vec<(Vec<u8>, NodeId)>, HashSet<Vec<u8>>) = {
            let index = model.database(db)?.key_index();
            let stale = index
                .iter()
                .filter(|(key, _)| !fresh.contains(key))
                .map(|(key, id)| (key.to_vec(), id))
                .collect();
            let mut known: HashSet<Vec<u8>> = index.keys().map(<[u8]>::to_vec).collect();
            known.extend(model.parked_keys(db));
            (stale, known)
        };

        // Parked keys first: namespaces emptied here are collected below.
        let mut candidates = Vec::new();
        for node in model.subtree(db) {
            let dropped = model.retain_raw_keys(node, |key| fresh.contains(key));
            if dropped > 0 {
                report.pruned += dropped;
                candidates.push(node);
            }
        }

        for (key, node) in stale {
            let Some((parent, row)) = model.node(node).and_then(|n| n.parent().map(|p| (p, n.row()))) else {
                continue;
            };
            model.remove_rows(parent, row, 1)?;
            candidates.push(parent);
            report.removed.push(key);
        }
        for candidate in candidates {
            report.namespaces_removed += self.collect_empty(model, db, candidate)?;
        }

        let mut added: Vec<Vec<u8>> = fresh
            .iter()
            .filter(|key| !known.contains(**key))
            .map(|key| key.to_vec())
            .collect();
        added.sort_unstable();
        if !added.is_empty() {
            self.builder.build(model, db, &added)?;
        }
        report.added = added;

        let state = model.database_mut(db)?;
        let count_changed = state.fetched_key_count != fresh.len();
        state.fetched_key_count = fresh.len();
        if count_changed {
            model.data_changed(db);
        }

        crate::metrics::record_reconcile(report.added.len(), report.removed.len(), start.elapsed());
        debug!(
            db = db_index,
            added = report.added.len(),
            removed = report.removed.len(),
            pruned = report.pruned,
            namespaces_removed = report.namespaces_removed,
            "Database reconciled"
        );
        Ok(report)
    }

    /// Remove `node` and its ancestors below `db` while they are empty namespaces.
    fn collect_empty(&self, model: &mut TreeModel, db: NodeId, mut node: NodeId) -> Result<usize, TreeError> {
        let mut removed = 0;
        while node != db {
            let Some(n) = model.node(node) else { break };
            let empty = n.is_namespace() && n.children().is_empty() && n.grouping().is_some_and(|g| g.raw_keys().is_empty());
            let Some(parent) = n.parent() else { break };
            if !empty {
                break;
            }
            model.remove_node(node)?;
            removed += 1;
            node = parent;
        }
        Ok(removed)
    }
}
