// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis key source.
//!
//! Database discovery reads `INFO keyspace`:
//!
//! ```text
//! # Keyspace
//! db0:keys=1523,expires=0,avg_ttl=0
//! db3:keys=12,expires=2,avg_ttl=41230
//! ```
//!
//! Servers that report nothing there (empty instances, some proxies) are
//! probed with `SELECT n` until the server refuses. Keys are listed with
//! `SCAN cursor MATCH pattern COUNT n`, or `KEYS pattern` on servers older
//! than 2.8.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{Client, ConnectionInfo};
use tracing::{debug, info, instrument, warn};

use super::traits::{DatabaseInfo, FetchError, KeySource, Operations};
use crate::config::BrowserConfig;
use crate::filter::KeyFilter;
use crate::resilience::retry::{retry, RetryConfig};
use crate::separator::Separator;

/// Upper bound on `SELECT` probing.
const MAX_PROBED_DATABASES: u32 = 64;

/// Parse the `# Keyspace` section of `INFO`.
pub(crate) fn parse_keyspace(info: &str) -> Vec<DatabaseInfo> {
    let mut databases: Vec<DatabaseInfo> = info
        .lines()
        .filter_map(|line| {
            let (name, fields) = line.trim().split_once(':')?;
            let index = name.strip_prefix("db")?.parse().ok()?;
            let keys = fields
                .split(',')
                .find_map(|field| field.strip_prefix("keys="))?
                .parse()
                .ok()?;
            Some(DatabaseInfo { index, keys })
        })
        .collect();
    databases.sort_by_key(|db| db.index);
    databases
}

/// `(major, minor)` from the `redis_version` field of `INFO server`.
pub(crate) fn parse_version(info: &str) -> Option<(u32, u32)> {
    let line = info.lines().find_map(|l| l.trim().strip_prefix("redis_version:"))?;
    let mut parts = line.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some((major, minor))
}

fn backend_error(context: &str, err: redis::RedisError) -> FetchError {
    FetchError::new(format!("{}: {}", context, err))
}

pub struct RedisKeySource {
    client: Client,
    /// Connection on the default database, used for INFO and probing
    control: ConnectionManager,
    /// One connection per database so SELECT never races between tasks
    connections: DashMap<u32, ConnectionManager>,
    separator: Separator,
    scan_count: usize,
    supports_scan: bool,
}

impl RedisKeySource {
    /// Connect to `connection_string` (e.g. `redis://localhost:6379`).
    pub async fn connect(connection_string: &str, config: &BrowserConfig) -> Result<Self, FetchError> {
        let client = Client::open(connection_string).map_err(|e| backend_error("Invalid connection string", e))?;
        let separator = config
            .separator()
            .map_err(|e| FetchError::new(e.to_string()))?;

        // Startup preset: fail fast on a bad address instead of hanging
        let mut control = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| backend_error("Cannot connect to server", e))?;

        let server_info: String = redis::cmd("INFO")
            .arg("server")
            .query_async(&mut control)
            .await
            .map_err(|e| backend_error("Cannot read server info", e))?;
        let version = parse_version(&server_info);
        let supports_scan = version.map_or(true, |v| v >= (2, 8));
        info!(?version, supports_scan, "Connected to Redis");

        Ok(Self {
            client,
            control,
            connections: DashMap::new(),
            separator,
            scan_count: config.scan_count,
            supports_scan,
        })
    }

    #[must_use]
    pub fn supports_scan(&self) -> bool {
        self.supports_scan
    }

    async fn connection(&self, db_index: u32) -> Result<ConnectionManager, FetchError> {
        if let Some(conn) = self.connections.get(&db_index).map(|c| c.clone()) {
            return Ok(conn);
        }
        let mut info: ConnectionInfo = self.client.get_connection_info().clone();
        info.redis.db = i64::from(db_index);
        let client = Client::open(info).map_err(|e| backend_error("Invalid connection settings", e))?;
        let conn = retry("redis_connect_db", &RetryConfig::query(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| backend_error("Cannot connect to database", e))?;
        self.connections.insert(db_index, conn.clone());
        Ok(conn)
    }

    /// Count databases by selecting them one after another.
    async fn probe_databases(&self) -> Result<Vec<DatabaseInfo>, FetchError> {
        let mut conn = self.control.clone();
        let mut found = Vec::new();
        for index in 0..MAX_PROBED_DATABASES {
            let selected: Result<(), redis::RedisError> = redis::cmd("SELECT").arg(index).query_async(&mut conn).await;
            if selected.is_err() {
                break;
            }
            found.push(DatabaseInfo { index, keys: 0 });
        }
        let _: () = redis::cmd("SELECT")
            .arg(0)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("Cannot restore database selection", e))?;
        debug!(databases = found.len(), "Probed databases with SELECT");
        Ok(found)
    }

    async fn scan(&self, conn: &mut ConnectionManager, pattern: &str) -> Result<Vec<Vec<u8>>, FetchError> {
        let mut keys: Vec<Vec<u8>> = Vec::new();
        let mut cursor = 0u64;
        loop {
            let (next, batch): (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(self.scan_count)
                .query_async(conn)
                .await
                .map_err(|e| backend_error("Cannot load keys", e))?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl KeySource for RedisKeySource {
    fn name(&self) -> &str {
        "redis"
    }

    #[instrument(skip(self))]
    async fn databases(&self) -> Result<Vec<DatabaseInfo>, FetchError> {
        let mut conn = self.control.clone();
        let keyspace: String = redis::cmd("INFO")
            .arg("keyspace")
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("Cannot read keyspace info", e))?;

        let databases = parse_keyspace(&keyspace);
        if !databases.is_empty() {
            return Ok(databases);
        }
        self.probe_databases().await
    }

    #[instrument(skip(self, filter))]
    async fn keys(&self, db_index: u32, filter: Option<&KeyFilter>) -> Result<Vec<Vec<u8>>, FetchError> {
        let mut conn = self.connection(db_index).await?;
        let pattern = filter.map_or("*", KeyFilter::as_str);

        let keys = if self.supports_scan {
            self.scan(&mut conn, pattern).await?
        } else {
            warn!(db = db_index, "Server predates SCAN, falling back to KEYS");
            redis::cmd("KEYS")
                .arg(pattern)
                .query_async(&mut conn)
                .await
                .map_err(|e| backend_error("Cannot load keys", e))?
        };
        crate::metrics::record_fetch(self.name(), keys.len());
        debug!(db = db_index, keys = keys.len(), "Keys fetched");
        Ok(keys)
    }
}

impl Operations for RedisKeySource {
    fn namespace_separator(&self) -> Separator {
        self.separator.clone()
    }

    fn notify_db_unloaded(&self, db_index: u32) {
        if db_index != 0 {
            self.connections.remove(&db_index);
        }
    }
}
