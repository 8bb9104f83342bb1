// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Work that runs off the coordinator.
//!
//! Nothing here touches the live tree: fetches await the key source,
//! preparation and grouping run on the blocking pool into a scratch model.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::types::ScratchTree;
use crate::builder::TreeBuilder;
use crate::error::TreeError;
use crate::filter::KeyFilter;
use crate::source::ServerConnection;
use crate::tree::TreeModel;

/// Filter locally, then sort or dedupe in arrival order.
pub(crate) fn prepare_keys(mut keys: Vec<Vec<u8>>, filter: Option<&KeyFilter>, sort: bool) -> Vec<Vec<u8>> {
    if let Some(filter) = filter.filter(|f| !f.is_match_all()) {
        keys.retain(|k| filter.matches(k));
    }
    if sort {
        keys.sort_unstable();
        keys.dedup();
    } else {
        let mut seen = HashSet::with_capacity(keys.len());
        keys.retain(|k| seen.insert(k.clone()));
    }
    keys
}

/// Group `keys` into a fresh scratch database.
pub(crate) fn build_scratch(keys: &[Vec<u8>], builder: &TreeBuilder, db_index: u32) -> Result<ScratchTree, TreeError> {
    let mut model = TreeModel::detached();
    let server = model.add_server(None, "scratch")?;
    let db = model.add_database(server, db_index, keys.len() as u64)?;
    let (report, error) = match builder.build(&mut model, db, keys) {
        Ok(report) => (report, None),
        Err(TreeError::AllocationFailure) => {
            warn!(db = db_index, "Allocation failed while grouping keys, showing partial tree");
            (Default::default(), Some(TreeError::AllocationFailure))
        }
        Err(e) => return Err(e),
    };
    Ok(ScratchTree { model, db, keys: keys.len(), report, error })
}

async fn fetch(
    source: &Arc<dyn ServerConnection>,
    db_index: u32,
    filter: Option<&KeyFilter>,
    operation: &str,
) -> Result<Vec<Vec<u8>>, TreeError> {
    match source.keys(db_index, filter).await {
        Ok(keys) => {
            debug!(db = db_index, keys = keys.len(), source = source.name(), "Keys received");
            Ok(keys)
        }
        Err(e) => {
            crate::metrics::record_fetch_error(operation);
            warn!(db = db_index, error = %e, "Cannot load keys");
            Err(e.into())
        }
    }
}

/// Fetch, prepare and group keys for a full load.
pub(crate) async fn load(
    source: Arc<dyn ServerConnection>,
    db_index: u32,
    filter: Option<KeyFilter>,
    sort: bool,
    builder: TreeBuilder,
) -> Result<ScratchTree, TreeError> {
    let keys = fetch(&source, db_index, filter.as_ref(), "load").await?;
    tokio::task::spawn_blocking(move || {
        let _timer = crate::metrics::LatencyTimer::new("load_build");
        let keys = prepare_keys(keys, filter.as_ref(), sort);
        build_scratch(&keys, &builder, db_index)
    })
    .await
    .map_err(|e| TreeError::TaskFailed(e.to_string()))?
}

/// Fetch and prepare keys for a live-update cycle.
pub(crate) async fn refresh(
    source: Arc<dyn ServerConnection>,
    db_index: u32,
    filter: Option<KeyFilter>,
    sort: bool,
) -> Result<Vec<Vec<u8>>, TreeError> {
    let keys = fetch(&source, db_index, filter.as_ref(), "live_update").await?;
    tokio::task::spawn_blocking(move || prepare_keys(keys, filter.as_ref(), sort))
        .await
        .map_err(|e| TreeError::TaskFailed(e.to_string()))
}
