// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Live update: single-shot timers, background refresh, reconcile.
//!
//! ```text
//! arm_timer ─► sleep(interval) ─► LiveUpdateDue
//!                                   │ locked? ─► re-arm (deferred)
//!                                   └─► lock, refresh task ─► Refreshed
//!                                                              │ error    ─► live update off
//!                                                              │ empty    ─► re-arm
//!                                                              └─ reconcile ─► re-arm (or off above cap)
//! ```

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::tasks;
use super::types::{Outcome, StaleReason, TaskOutput};
use super::TreeCoordinator;
use crate::error::TreeError;
use crate::reconcile::Reconciler;
use crate::tree::NodeId;

impl TreeCoordinator {
    /// Switch periodic refresh of `db` on or off.
    ///
    /// Enabling it on an unloaded database takes effect once it is loaded.
    pub fn set_live_update(&mut self, db: NodeId, enabled: bool) -> Result<(), TreeError> {
        let state = self.model.database_mut(db)?;
        if state.live_update == enabled {
            return Ok(());
        }
        state.live_update = enabled;
        let loaded = state.loaded;
        self.model.data_changed(db);

        if !enabled {
            if let Some(timer) = self.timers.remove(&db) {
                timer.abort();
            }
            debug!(%db, "Live update disabled");
        } else if loaded && !self.model.require(db)?.is_locked() {
            self.arm_timer(db);
            debug!(%db, "Live update enabled");
        }
        Ok(())
    }

    /// Schedule the next tick for `db`, replacing any pending one.
    pub(super) fn arm_timer(&mut self, db: NodeId) {
        let Ok(state) = self.model.database(db) else { return };
        let epoch = state.epoch();
        let interval = self.config.live_update_interval();
        if let Some(previous) = self.timers.remove(&db) {
            previous.abort();
        }
        let handle = self.tasks.spawn(async move {
            tokio::time::sleep(interval).await;
            TaskOutput::LiveUpdateDue { db, epoch }
        });
        self.timers.insert(db, handle);
    }

    pub(super) fn on_live_update_due(&mut self, db: NodeId, epoch: u64) -> Outcome {
        self.timers.remove(&db);
        if let Some(reason) = self.stale(db, epoch) {
            return self.discard(db, reason);
        }
        let (index, filter) = match self.model.database(db) {
            Ok(state) if state.live_update() && state.is_loaded() => (state.index(), state.filter().cloned()),
            _ => return self.discard(db, StaleReason::Inactive),
        };
        if self.model.node(db).is_some_and(|n| n.is_locked()) {
            debug!(db = index, "Database busy, live update deferred");
            self.arm_timer(db);
            return Outcome::LiveUpdateDeferred { db };
        }
        let connection = match self.connection_for(db) {
            Ok(connection) => connection,
            Err(error) => return self.stop_live_update(db, error),
        };

        let _ = self.model.set_locked(db, true);
        let sort = self.config.sort_keys;
        self.spawn_guarded(
            async move {
                let result = tasks::refresh(connection, index, filter, sort).await;
                TaskOutput::Refreshed { db, epoch, result }
            },
            move |message| TaskOutput::Refreshed { db, epoch, result: Err(TreeError::TaskFailed(message)) },
        );
        Outcome::LiveUpdateStarted { db }
    }

    pub(super) fn apply_refreshed(&mut self, db: NodeId, epoch: u64, result: Result<Vec<Vec<u8>>, TreeError>) -> Outcome {
        if let Some(reason) = self.stale(db, epoch) {
            return self.discard(db, reason);
        }
        let _ = self.model.set_locked(db, false);

        let outcome = if self.model.database(db).is_ok_and(|state| state.live_update()) {
            self.apply_fresh_keys(db, result)
        } else {
            self.discard(db, StaleReason::Inactive)
        };
        self.dispatch_pending(db);
        outcome
    }

    fn apply_fresh_keys(&mut self, db: NodeId, result: Result<Vec<Vec<u8>>, TreeError>) -> Outcome {
        let keys = match result {
            Ok(keys) => keys,
            Err(error) => {
                crate::metrics::record_live_update_disabled("fetch_error");
                return self.stop_live_update(db, error);
            }
        };
        if keys.is_empty() {
            debug!(%db, "Live update returned no keys, skipping cycle");
            self.arm_timer(db);
            return Outcome::LiveUpdateEmpty { db };
        }

        let builder = match self.builder_for(db, HashSet::new()) {
            Ok(builder) => builder,
            Err(error) => return self.stop_live_update(db, error),
        };
        let reconciler = Reconciler::new(builder, self.config.live_update_max_keys);
        match reconciler.reconcile(&mut self.model, db, &keys) {
            Ok(report) => {
                if !report.is_empty() {
                    info!(
                        %db,
                        added = report.added.len(),
                        removed = report.removed.len(),
                        pruned = report.pruned,
                        "Live update applied"
                    );
                }
                self.arm_timer(db);
                Outcome::LiveUpdated { db, report }
            }
            Err(error @ TreeError::LiveUpdateCapExceeded { .. }) => Outcome::LiveUpdateStopped { db, error },
            Err(error) => self.stop_live_update(db, error),
        }
    }

    fn stop_live_update(&mut self, db: NodeId, error: TreeError) -> Outcome {
        if let Ok(state) = self.model.database_mut(db) {
            state.live_update = false;
        }
        if let Some(timer) = self.timers.remove(&db) {
            timer.abort();
        }
        self.model.data_changed(db);
        warn!(%db, error = %error, "Live update stopped");
        Outcome::LiveUpdateStopped { db, error }
    }
}
