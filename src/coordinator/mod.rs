// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tree coordinator.
//!
//! The [`TreeCoordinator`] is the only context that mutates the tree. It
//! dispatches fetch/build work to tokio, applies the results, and drives
//! live-update timers:
//!
//! ```text
//!   load(db) ──► lock db, stamp epoch ──► task: keys() ─► spawn_blocking: prepare + build scratch
//!                                                                          │
//!   process_next() ◄───────────────────────────────────────────────────────┘
//!        │  epoch still current?  ── no ──► Discarded
//!        └─ splice scratch subtree under db (one Insert bracket), unlock
//!
//!   live update: timer ─► lock ─► task: keys() + prepare ─► reconcile ─► re-arm timer
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keyspace_tree::{BrowserConfig, EventLog, MemoryKeySource, TreeCoordinator};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), keyspace_tree::TreeError> {
//! let source = Arc::new(MemoryKeySource::new());
//! source.set_keys(0, ["user:1", "user:2", "version"]);
//!
//! let mut coordinator = TreeCoordinator::new(BrowserConfig::default(), EventLog::new());
//! let server = coordinator.add_server(None, "local", source)?;
//! coordinator.connect(server)?;
//! coordinator.process_next().await;
//!
//! let db = coordinator.model().find_database(server, 0).unwrap();
//! coordinator.load(db)?;
//! coordinator.process_next().await;
//! # Ok(())
//! # }
//! ```

mod lifecycle;
mod live_update;
mod tasks;
mod types;

pub use types::{Command, Outcome, StaleReason};

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info};

use crate::builder::TreeBuilder;
use crate::config::BrowserConfig;
use crate::error::TreeError;
use crate::source::ServerConnection;
use crate::tree::{NodeId, NodeKind, TreeModel, TreeObserver, TreeView};

use types::TaskOutput;

/// Owns the tree and everything that mutates it.
pub struct TreeCoordinator {
    pub(super) config: BrowserConfig,
    pub(super) model: TreeModel,
    /// Server node → its connection
    pub(super) servers: HashMap<NodeId, Arc<dyn ServerConnection>>,
    pub(super) tasks: JoinSet<TaskOutput>,
    /// Pending live-update timers per database
    pub(super) timers: HashMap<NodeId, AbortHandle>,
    /// Current render limit (starts at `config.render_limit`)
    pub(super) render_limit: usize,
}

impl std::fmt::Debug for TreeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeCoordinator")
            .field("model", &self.model)
            .field("servers", &self.servers.len())
            .field("tasks", &self.tasks.len())
            .field("render_limit", &self.render_limit)
            .finish()
    }
}

impl TreeCoordinator {
    /// Create a coordinator reporting tree changes to `observer`.
    pub fn new(config: BrowserConfig, observer: impl TreeObserver + 'static) -> Self {
        let render_limit = config.render_limit;
        Self {
            config,
            model: TreeModel::new(observer),
            servers: HashMap::new(),
            tasks: JoinSet::new(),
            timers: HashMap::new(),
            render_limit,
        }
    }

    /// Read access for the presentation layer.
    #[must_use]
    pub fn model(&self) -> &TreeModel {
        &self.model
    }

    #[must_use]
    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    #[must_use]
    pub fn render_limit(&self) -> usize {
        self.render_limit
    }

    /// Background tasks and timers not yet applied.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for the next background result and apply it.
    ///
    /// Returns `None` when nothing is in flight.
    pub async fn process_next(&mut self) -> Option<Outcome> {
        loop {
            let joined = self.tasks.join_next().await?;
            crate::metrics::set_tasks_in_flight(self.tasks.len());
            match joined {
                Ok(output) => {
                    let outcome = self.apply(output);
                    crate::metrics::set_tree_nodes(self.model.len());
                    return Some(outcome);
                }
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    error!(error = %e, "Background task panicked");
                    continue;
                }
            }
        }
    }

    /// Serve `commands` until [`Command::Shutdown`] or the sender is dropped.
    ///
    /// Every applied background result is forwarded to `outcomes`.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, outcomes: mpsc::UnboundedSender<Outcome>) {
        info!("Tree coordinator running");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => {
                        if let Err(error) = self.handle(command) {
                            let _ = outcomes.send(Outcome::Rejected { error });
                        }
                    }
                },
                Some(outcome) = self.process_next(), if !self.tasks.is_empty() => {
                    let _ = outcomes.send(outcome);
                }
            }
        }
        self.tasks.shutdown().await;
        info!("Tree coordinator stopped");
    }

    /// Apply one command.
    pub fn handle(&mut self, command: Command) -> Result<(), TreeError> {
        debug!(?command, "Command received");
        match command {
            Command::Connect(server) => self.connect(server),
            Command::Load(db) => self.load(db),
            Command::Reload(db) => self.reload(db),
            Command::Unload(db) => self.unload(db),
            Command::SetFilter(db, filter) => self.set_filter(db, filter),
            Command::Expand(ns) => self.expand(ns),
            Command::Collapse(ns) => self.collapse(ns),
            Command::SetLiveUpdate(db, enabled) => self.set_live_update(db, enabled),
            Command::SetRenderLimit(limit) => self.set_render_limit(limit),
            Command::MoveServer { server, group } => self.move_server(server, group),
            Command::RemoveServer(server) => self.remove_server(server),
            Command::Shutdown => Ok(()),
        }
    }

    fn apply(&mut self, output: TaskOutput) -> Outcome {
        match output {
            TaskOutput::Databases { server, result } => self.apply_databases(server, result),
            TaskOutput::Loaded { db, epoch, result } => self.apply_loaded(db, epoch, result),
            TaskOutput::Refreshed { db, epoch, result } => self.apply_refreshed(db, epoch, result),
            TaskOutput::LiveUpdateDue { db, epoch } => self.on_live_update_due(db, epoch),
        }
    }

    // ========== Helpers shared by lifecycle and live update ==========

    /// Run `work` on tokio; a panic inside it becomes `on_panic`'s output.
    pub(super) fn spawn_guarded<F>(&mut self, work: F, on_panic: impl FnOnce(String) -> TaskOutput + Send + 'static)
    where
        F: Future<Output = TaskOutput> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        self.tasks.spawn(async move {
            match handle.await {
                Ok(output) => output,
                Err(e) => on_panic(e.to_string()),
            }
        });
        crate::metrics::set_tasks_in_flight(self.tasks.len());
    }

    /// Connection serving `db`.
    pub(super) fn connection_for(&self, db: NodeId) -> Result<Arc<dyn ServerConnection>, TreeError> {
        let server = self
            .model
            .parent_of(db)
            .ok_or(TreeError::WrongNodeKind { node: db, expected: "database attached to a server" })?;
        self.servers
            .get(&server)
            .cloned()
            .ok_or(TreeError::WrongNodeKind { node: server, expected: "connected server" })
    }

    /// Builder using the separator of `db`'s server and the current limit.
    pub(super) fn builder_for(&self, db: NodeId, expanded: HashSet<Vec<u8>>) -> Result<TreeBuilder, TreeError> {
        let connection = self.connection_for(db)?;
        Ok(TreeBuilder::new(connection.namespace_separator(), self.render_limit).with_expanded(expanded))
    }

    /// Full paths of expanded namespaces under `db`.
    pub(super) fn expanded_paths(&self, db: NodeId) -> HashSet<Vec<u8>> {
        self.model
            .subtree(db)
            .into_iter()
            .filter_map(|id| self.model.node(id))
            .filter(|n| n.is_namespace() && n.is_expanded())
            .map(|n| n.full_path().to_vec())
            .collect()
    }

    pub(super) fn require_namespace(&self, node: NodeId) -> Result<(), TreeError> {
        match self.model.node(node).map(|n| n.kind()) {
            Some(NodeKind::Namespace(_)) => Ok(()),
            Some(_) => Err(TreeError::WrongNodeKind { node, expected: "namespace" }),
            None => Err(TreeError::UnknownNode(node)),
        }
    }
}
