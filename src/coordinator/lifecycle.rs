// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection and database lifecycle: connect, load, reload, unload, filter,
//! expansion and render limit.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::tasks;
use super::types::{Outcome, ScratchTree, StaleReason, TaskOutput};
use super::TreeCoordinator;
use crate::error::TreeError;
use crate::filter::KeyFilter;
use crate::source::{DatabaseInfo, FetchError, ServerConnection};
use crate::tree::{NodeId, NodeKind, TreeView};

impl TreeCoordinator {
    // ========== Connections ==========

    /// Append a server group at top level.
    pub fn add_group(&mut self, name: impl Into<String>) -> Result<NodeId, TreeError> {
        self.model.add_group(name)
    }

    /// Register a server backed by `connection`. Databases appear after
    /// [`Self::connect`].
    pub fn add_server(
        &mut self,
        group: Option<NodeId>,
        name: impl Into<String>,
        connection: Arc<dyn ServerConnection>,
    ) -> Result<NodeId, TreeError> {
        let server = self.model.add_server(group, name)?;
        self.servers.insert(server, connection);
        Ok(server)
    }

    /// List the server's databases in the background.
    #[tracing::instrument(skip(self))]
    pub fn connect(&mut self, server: NodeId) -> Result<(), TreeError> {
        let connection = self
            .servers
            .get(&server)
            .cloned()
            .ok_or(TreeError::WrongNodeKind { node: server, expected: "registered server" })?;
        debug!(%server, source = connection.name(), "Listing databases");
        self.spawn_guarded(
            async move {
                let result = connection.databases().await;
                if result.is_err() {
                    crate::metrics::record_fetch_error("databases");
                }
                TaskOutput::Databases { server, result }
            },
            move |message| TaskOutput::Databases { server, result: Err(FetchError::new(message)) },
        );
        Ok(())
    }

    pub(super) fn apply_databases(&mut self, server: NodeId, result: Result<Vec<DatabaseInfo>, FetchError>) -> Outcome {
        if !self.model.contains(server) {
            return self.discard(server, StaleReason::Node);
        }
        let databases = match result {
            Ok(databases) => databases,
            Err(error) => {
                warn!(%server, error = %error, "Cannot list databases");
                return Outcome::ConnectFailed { server, error };
            }
        };

        for info in &databases {
            match self.model.find_database(server, info.index) {
                Some(db) => {
                    if let Ok(state) = self.model.database_mut(db) {
                        state.declared_key_count = info.keys;
                    }
                    self.model.data_changed(db);
                }
                None => {
                    if let Err(error) = self.model.add_database(server, info.index, info.keys) {
                        return Outcome::Rejected { error };
                    }
                }
            }
        }
        info!(%server, databases = databases.len(), "Databases listed");
        Outcome::DatabasesListed { server, count: databases.len() }
    }

    /// Remove a server with its databases. In-flight results for them are
    /// discarded when they arrive.
    #[tracing::instrument(skip(self))]
    pub fn remove_server(&mut self, server: NodeId) -> Result<(), TreeError> {
        let node = self.model.require(server)?;
        if !matches!(node.kind(), NodeKind::Server { .. }) {
            return Err(TreeError::WrongNodeKind { node: server, expected: "server" });
        }
        let databases = node.children().to_vec();
        for db in databases {
            if let Some(timer) = self.timers.remove(&db) {
                timer.abort();
            }
            if let Ok(state) = self.model.database_mut(db) {
                state.epoch += 1;
            }
        }
        self.model.remove_node(server)?;
        self.servers.remove(&server);
        info!(%server, "Server removed");
        Ok(())
    }

    /// Re-parent a server into `group`, or to top level.
    pub fn move_server(&mut self, server: NodeId, group: Option<NodeId>) -> Result<(), TreeError> {
        self.model.move_server(server, group)
    }

    // ========== Loading ==========

    /// Fetch and group the keys of `db`.
    ///
    /// A loaded database is left alone; use [`Self::reload`] to refresh it.
    /// Fails with [`TreeError::Locked`] while its first load is in flight.
    #[tracing::instrument(skip(self))]
    pub fn load(&mut self, db: NodeId) -> Result<(), TreeError> {
        let state = self.model.database(db)?;
        if state.is_loaded() {
            return Ok(());
        }
        if self.model.require(db)?.is_locked() {
            return Err(TreeError::Locked(state.index()));
        }
        self.dispatch_load(db, HashSet::new())
    }

    /// Drop the tree of `db` and load it again, keeping expanded namespaces
    /// expanded and live update as it was.
    #[tracing::instrument(skip(self))]
    pub fn reload(&mut self, db: NodeId) -> Result<(), TreeError> {
        self.model.database(db)?;
        if self.model.require(db)?.is_locked() {
            self.model.database_mut(db)?.pending_reload = true;
            debug!(%db, "Database busy, reload queued");
            return Ok(());
        }
        let expanded = self.expanded_paths(db);
        self.reset_database(db, true)?;
        self.dispatch_load(db, expanded)
    }

    /// Destroy the tree of `db` and switch live update off.
    #[tracing::instrument(skip(self))]
    pub fn unload(&mut self, db: NodeId) -> Result<(), TreeError> {
        let index = self.model.database(db)?.index();
        self.reset_database(db, false)?;
        if let Ok(connection) = self.connection_for(db) {
            connection.notify_db_unloaded(index);
        }
        info!(db = index, "Database unloaded");
        Ok(())
    }

    /// Change the key filter of `db`. A match-all pattern clears it.
    ///
    /// A loaded (or loading) database is reloaded under the new filter.
    #[tracing::instrument(skip(self, filter))]
    pub fn set_filter(&mut self, db: NodeId, filter: Option<KeyFilter>) -> Result<(), TreeError> {
        let filter = filter.filter(|f| !f.is_match_all());
        let state = self.model.database(db)?;
        if state.filter() == filter.as_ref() {
            return Ok(());
        }
        let active = state.is_loaded() || self.model.require(db)?.is_locked();
        let expanded = self.expanded_paths(db);
        if active {
            self.reset_database(db, true)?;
        }
        debug!(%db, filter = filter.as_ref().map(KeyFilter::as_str), "Filter changed");
        self.model.database_mut(db)?.filter = filter;
        self.model.data_changed(db);
        if active {
            self.dispatch_load(db, expanded)?;
        }
        Ok(())
    }

    /// Clear `db` back to the unloaded state; the epoch bump invalidates
    /// anything still in flight.
    pub(super) fn reset_database(&mut self, db: NodeId, keep_live_update: bool) -> Result<(), TreeError> {
        if let Some(timer) = self.timers.remove(&db) {
            timer.abort();
        }
        self.model.clear_children(db)?;
        self.model.take_raw_keys(db)?;
        let state = self.model.database_mut(db)?;
        state.loaded = false;
        state.fetched_key_count = 0;
        state.epoch += 1;
        state.pending_reload = false;
        if !keep_live_update {
            state.live_update = false;
        }
        self.model.set_locked(db, false)?;
        self.model.data_changed(db);
        Ok(())
    }

    pub(super) fn dispatch_load(&mut self, db: NodeId, expanded: HashSet<Vec<u8>>) -> Result<(), TreeError> {
        let connection = self.connection_for(db)?;
        let builder = self.builder_for(db, expanded)?;
        let state = self.model.database(db)?;
        let (index, epoch, filter) = (state.index(), state.epoch(), state.filter().cloned());
        let sort = self.config.sort_keys;

        self.model.set_locked(db, true)?;
        debug!(db = index, epoch, "Load dispatched");
        self.spawn_guarded(
            async move {
                let result = tasks::load(connection, index, filter, sort, builder).await;
                TaskOutput::Loaded { db, epoch, result }
            },
            move |message| TaskOutput::Loaded { db, epoch, result: Err(TreeError::TaskFailed(message)) },
        );
        Ok(())
    }

    pub(super) fn apply_loaded(&mut self, db: NodeId, epoch: u64, result: Result<ScratchTree, TreeError>) -> Outcome {
        if let Some(reason) = self.stale(db, epoch) {
            return self.discard(db, reason);
        }
        let _ = self.model.set_locked(db, false);

        let outcome = match result {
            Ok(scratch) => self.splice_loaded(db, scratch),
            Err(error) => {
                warn!(%db, error = %error, "Load failed");
                Outcome::LoadFailed { db, error }
            }
        };
        self.dispatch_pending(db);
        outcome
    }

    fn splice_loaded(&mut self, db: NodeId, scratch: ScratchTree) -> Outcome {
        let ScratchTree { model, db: scratch_db, keys, report, error } = scratch;
        if let Err(error) = self.model.splice_subtree(db, model, scratch_db) {
            return Outcome::LoadFailed { db, error };
        }
        let (inserted, live_update) = match self.model.database_mut(db) {
            Ok(state) => {
                state.loaded = true;
                state.fetched_key_count = keys;
                (state.key_index().len(), state.live_update())
            }
            Err(error) => return Outcome::LoadFailed { db, error },
        };
        let deferred = self.model.parked_keys(db).len();
        self.model.data_changed(db);
        if live_update {
            self.arm_timer(db);
        }

        info!(%db, keys, inserted, deferred, namespaces = report.namespaces, "Database loaded");
        Outcome::Loaded { db, keys, inserted, deferred, error }
    }

    /// Run a reload queued while `db` was busy.
    pub(super) fn dispatch_pending(&mut self, db: NodeId) {
        let pending = self
            .model
            .database_mut(db)
            .map(|state| std::mem::take(&mut state.pending_reload))
            .unwrap_or(false);
        if pending {
            if let Err(e) = self.reload(db) {
                warn!(%db, error = %e, "Queued reload failed");
            }
        }
    }

    pub(super) fn stale(&self, db: NodeId, epoch: u64) -> Option<StaleReason> {
        match self.model.database(db) {
            Err(_) => Some(StaleReason::Node),
            Ok(state) if state.epoch() != epoch => Some(StaleReason::Epoch),
            Ok(_) => None,
        }
    }

    pub(super) fn discard(&self, db: NodeId, reason: StaleReason) -> Outcome {
        crate::metrics::record_stale_result(&reason.to_string());
        debug!(%db, %reason, "Stale result discarded");
        Outcome::Discarded { db, reason }
    }

    // ========== Presentation state ==========

    /// Expand a namespace and materialize what it parked.
    pub fn expand(&mut self, namespace: NodeId) -> Result<(), TreeError> {
        self.require_namespace(namespace)?;
        self.model.set_expanded(namespace, true)?;
        let db = self
            .model
            .database_of(namespace)
            .ok_or(TreeError::WrongNodeKind { node: namespace, expected: "node inside a database" })?;
        let builder = self.builder_for(db, self.expanded_paths(db))?;
        let report = builder.rematerialize(&mut self.model, namespace)?;
        if !report.inserted.is_empty() {
            self.model.data_changed(namespace);
        }
        Ok(())
    }

    /// Collapse a namespace. Rows already shown stay in place.
    pub fn collapse(&mut self, namespace: NodeId) -> Result<(), TreeError> {
        self.require_namespace(namespace)?;
        self.model.set_expanded(namespace, false)
    }

    /// Change the render limit; loaded databases materialize parked keys up
    /// to the new limit. Lowering it leaves existing rows alone.
    pub fn set_render_limit(&mut self, limit: usize) -> Result<(), TreeError> {
        let limit = limit.max(1);
        if limit == self.render_limit {
            return Ok(());
        }
        self.render_limit = limit;
        let root = self.model.root();
        let loaded: Vec<NodeId> = self
            .model
            .subtree(root)
            .into_iter()
            .filter(|&id| self.model.database(id).is_ok_and(|state| state.is_loaded()))
            .collect();
        for db in loaded {
            let builder = self.builder_for(db, self.expanded_paths(db))?;
            let report = builder.rematerialize(&mut self.model, db)?;
            if !report.inserted.is_empty() {
                self.model.data_changed(db);
            }
        }
        info!(limit, "Render limit changed");
        Ok(())
    }
}
