// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Index-addressable view protocol.
//!
//! A presentation layer reads the tree through [`TreeView`] and follows
//! structure changes through [`TreeObserver`]. Every structural mutation is
//! reported as a bracket:
//!
//! ```text
//! Begin(Insert { parent, start, count })
//!     ... model mutates, rows renumbered ...
//! End(Insert { parent, start, count })
//! ```
//!
//! Brackets never nest. Between `Begin` and `End` the consumer must not read
//! the affected parent; after `End` every row is contiguous again.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use super::arena::NodeId;

/// A structural change to a contiguous row range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Insert { parent: NodeId, start: usize, count: usize },
    Remove { parent: NodeId, start: usize, count: usize },
    /// `destination_row` is expressed in the destination's rows before the move.
    Move {
        source: NodeId,
        start: usize,
        count: usize,
        destination: NodeId,
        destination_row: usize,
    },
}

/// Notification emitted by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeEvent {
    Begin(Change),
    End(Change),
    /// Non-structural update (lock state, counts, expansion).
    DataChanged(NodeId),
}

/// Receiver of tree notifications.
pub trait TreeObserver: Send {
    fn notify(&mut self, event: &TreeEvent);
}

/// Discards all notifications (scratch trees built off the live graph).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl TreeObserver for NullObserver {
    fn notify(&mut self, _event: &TreeEvent) {}
}

/// Forwards notifications to a channel; a closed receiver is ignored.
impl TreeObserver for UnboundedSender<TreeEvent> {
    fn notify(&mut self, event: &TreeEvent) {
        let _ = self.send(*event);
    }
}

/// Records notifications; clones share the same log.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: Arc<Mutex<Vec<TreeEvent>>>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain recorded events.
    pub fn take(&self) -> Vec<TreeEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Structural brackets only, in order.
    #[must_use]
    pub fn changes(&self) -> Vec<Change> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                TreeEvent::Begin(change) => Some(*change),
                _ => None,
            })
            .collect()
    }
}

impl TreeObserver for EventLog {
    fn notify(&mut self, event: &TreeEvent) {
        self.events.lock().push(*event);
    }
}

/// Read side of the view protocol.
pub trait TreeView {
    /// The hidden root whose children are the top-level rows.
    fn root(&self) -> NodeId;
    fn child_count(&self, node: NodeId) -> usize;
    fn child_at(&self, node: NodeId, row: usize) -> Option<NodeId>;
    fn parent_of(&self, node: NodeId) -> Option<NodeId>;
    fn row_of(&self, node: NodeId) -> Option<usize>;
    fn display_name(&self, node: NodeId) -> Option<String>;
    fn is_expanded(&self, node: NodeId) -> bool;
    /// A background task owns the node's subtree.
    fn is_locked(&self, node: NodeId) -> bool;

    /// Whether the consumer should offer an expander for `node`.
    fn has_children(&self, node: NodeId) -> bool {
        self.child_count(node) > 0
    }
}
