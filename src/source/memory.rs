// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::traits::{DatabaseInfo, FetchError, KeySource, Operations};
use crate::filter::KeyFilter;
use crate::separator::Separator;

/// Keyspace held in memory.
///
/// Keys are returned in insertion order. Failures and latency can be
/// injected to exercise error paths and in-flight tasks.
pub struct MemoryKeySource {
    databases: DashMap<u32, Vec<Vec<u8>>>,
    separator: Mutex<Separator>,
    latency: Mutex<Option<Duration>>,
    failures: Mutex<Vec<FetchError>>,
    unloaded: Mutex<Vec<u32>>,
    fetches: AtomicUsize,
}

impl MemoryKeySource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            databases: DashMap::new(),
            separator: Mutex::new(Separator::default()),
            latency: Mutex::new(None),
            failures: Mutex::new(Vec::new()),
            unloaded: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_separator(self, separator: Separator) -> Self {
        *self.separator.lock() = separator;
        self
    }

    /// Replace the keys of `db_index`, creating the database if needed.
    pub fn set_keys<I, K>(&self, db_index: u32, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let keys = keys.into_iter().map(|k| k.as_ref().to_vec()).collect();
        self.databases.insert(db_index, keys);
    }

    pub fn insert_key(&self, db_index: u32, key: impl AsRef<[u8]>) {
        self.databases.entry(db_index).or_default().push(key.as_ref().to_vec());
    }

    pub fn remove_key(&self, db_index: u32, key: &[u8]) {
        if let Some(mut keys) = self.databases.get_mut(&db_index) {
            keys.retain(|k| k.as_slice() != key);
        }
    }

    /// Delay every fetch by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Queue a failure for an upcoming fetch; queued failures are served in order.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.failures.lock().push(FetchError::new(message));
    }

    /// Number of `keys` calls served (including failed ones).
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Databases reported through [`Operations::notify_db_unloaded`].
    #[must_use]
    pub fn unloaded(&self) -> Vec<u32> {
        self.unloaded.lock().clone()
    }
}

impl Default for MemoryKeySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeySource for MemoryKeySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn databases(&self) -> Result<Vec<DatabaseInfo>, FetchError> {
        let mut list: Vec<DatabaseInfo> = self
            .databases
            .iter()
            .map(|entry| DatabaseInfo { index: *entry.key(), keys: entry.value().len() as u64 })
            .collect();
        list.sort_by_key(|db| db.index);
        Ok(list)
    }

    async fn keys(&self, db_index: u32, filter: Option<&KeyFilter>) -> Result<Vec<Vec<u8>>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let failure = {
            let mut failures = self.failures.lock();
            (!failures.is_empty()).then(|| failures.remove(0))
        };
        if let Some(err) = failure {
            return Err(err);
        }

        let keys = self
            .databases
            .get(&db_index)
            .map(|keys| {
                keys.iter()
                    .filter(|k| filter.map_or(true, |f| f.matches(k)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(keys)
    }
}

impl Operations for MemoryKeySource {
    fn namespace_separator(&self) -> Separator {
        self.separator.lock().clone()
    }

    fn notify_db_unloaded(&self, db_index: u32) {
        self.unloaded.lock().push(db_index);
    }
}
