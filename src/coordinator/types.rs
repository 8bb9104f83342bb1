// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the tree coordinator.

use crate::builder::BuildReport;
use crate::error::TreeError;
use crate::filter::KeyFilter;
use crate::reconcile::ReconcileReport;
use crate::source::{DatabaseInfo, FetchError};
use crate::tree::{NodeId, TreeModel};

/// Why a background result was dropped without touching the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// The node was destroyed (server removed)
    Node,
    /// The database was unloaded or re-filtered after dispatch
    Epoch,
    /// Live update was switched off or the database unloaded
    Inactive,
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node => write!(f, "node"),
            Self::Epoch => write!(f, "epoch"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

/// What applying one background result did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A server listed its databases
    DatabasesListed { server: NodeId, count: usize },
    /// Database discovery failed
    ConnectFailed { server: NodeId, error: FetchError },
    /// Keys were fetched, grouped and spliced into the tree.
    ///
    /// `error` carries an allocation failure that cut the build short; the
    /// keys grouped before it are shown.
    Loaded {
        db: NodeId,
        keys: usize,
        inserted: usize,
        deferred: usize,
        error: Option<TreeError>,
    },
    /// The load failed; the database stays unloaded
    LoadFailed { db: NodeId, error: TreeError },
    /// A live-update tick dispatched a refresh
    LiveUpdateStarted { db: NodeId },
    /// A live-update cycle was applied
    LiveUpdated { db: NodeId, report: ReconcileReport },
    /// The tick found the database busy; the timer was re-armed
    LiveUpdateDeferred { db: NodeId },
    /// The source returned no keys; nothing changed, the timer was re-armed
    LiveUpdateEmpty { db: NodeId },
    /// Live update switched itself off
    LiveUpdateStopped { db: NodeId, error: TreeError },
    /// A result arrived for a database that changed since dispatch
    Discarded { db: NodeId, reason: StaleReason },
    /// A command sent to [`super::TreeCoordinator::run`] was rejected
    Rejected { error: TreeError },
}

/// Requests accepted by [`super::TreeCoordinator::run`].
#[derive(Debug, Clone)]
pub enum Command {
    Connect(NodeId),
    Load(NodeId),
    Reload(NodeId),
    Unload(NodeId),
    SetFilter(NodeId, Option<KeyFilter>),
    Expand(NodeId),
    Collapse(NodeId),
    SetLiveUpdate(NodeId, bool),
    SetRenderLimit(usize),
    MoveServer { server: NodeId, group: Option<NodeId> },
    RemoveServer(NodeId),
    Shutdown,
}

/// A database subtree built off the live graph.
#[derive(Debug)]
pub(crate) struct ScratchTree {
    pub(crate) model: TreeModel,
    pub(crate) db: NodeId,
    pub(crate) keys: usize,
    pub(crate) report: BuildReport,
    pub(crate) error: Option<TreeError>,
}

/// Result of a background task, applied on the coordinator.
#[derive(Debug)]
pub(crate) enum TaskOutput {
    Databases {
        server: NodeId,
        result: Result<Vec<DatabaseInfo>, FetchError>,
    },
    Loaded {
        db: NodeId,
        epoch: u64,
        result: Result<ScratchTree, TreeError>,
    },
    Refreshed {
        db: NodeId,
        epoch: u64,
        result: Result<Vec<Vec<u8>>, TreeError>,
    },
    LiveUpdateDue {
        db: NodeId,
        epoch: u64,
    },
}
