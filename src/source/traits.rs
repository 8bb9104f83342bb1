// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

use crate::filter::KeyFilter;
use crate::separator::Separator;

/// Failure reported by a key source; the message is shown verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FetchError {
    message: String,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A logical database as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub index: u32,
    /// Key count the server declares (may be stale or approximate)
    pub keys: u64,
}

/// Asynchronous supplier of raw key lists.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Short label used in logs and metrics.
    fn name(&self) -> &str;

    async fn databases(&self) -> Result<Vec<DatabaseInfo>, FetchError>;

    /// All keys of `db_index`, narrowed by `filter` when given.
    ///
    /// Order is unspecified; duplicates are tolerated.
    async fn keys(&self, db_index: u32, filter: Option<&KeyFilter>) -> Result<Vec<Vec<u8>>, FetchError>;
}

/// Connection-level settings and callbacks.
pub trait Operations: Send + Sync {
    fn namespace_separator(&self) -> Separator;

    /// Called after a database's keys were dropped from the tree.
    fn notify_db_unloaded(&self, db_index: u32);
}

/// Everything the coordinator needs from one server connection.
pub trait ServerConnection: KeySource + Operations {}

impl<T: KeySource + Operations> ServerConnection for T {}
