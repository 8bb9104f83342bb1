// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the key browser.
//!
//! # Example
//!
//! ```
//! use keyspace_tree::BrowserConfig;
//!
//! // Defaults
//! let config = BrowserConfig::default();
//! assert_eq!(config.render_limit, 1000);
//!
//! // Tuned for a very large keyspace
//! let config = BrowserConfig {
//!     render_limit: 300,
//!     live_update_max_keys: 5000,
//!     ..Default::default()
//! };
//! assert!(config.sort_keys);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::TreeError;
use crate::separator::Separator;

/// Read-only settings threaded into the builder, reconciler and coordinator.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    /// Max children materialized under one parent (default: 1000)
    #[serde(default = "default_render_limit")]
    pub render_limit: usize,

    /// Seconds between live-update polls (default: 10)
    #[serde(default = "default_live_update_interval_secs")]
    pub live_update_interval_secs: u64,

    /// Live update switches itself off above this many keys (default: 1000)
    #[serde(default = "default_live_update_max_keys")]
    pub live_update_max_keys: usize,

    /// Sort fetched keys before grouping
    #[serde(default = "default_sort_keys")]
    pub sort_keys: bool,

    /// `SCAN ... COUNT` hint (default: 10000)
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,

    /// Namespace separator for sources that don't override it
    #[serde(default = "default_namespace_separator")]
    pub namespace_separator: String,

    /// Treat `namespace_separator` as a regular expression
    #[serde(default)]
    pub separator_is_pattern: bool,
}

fn default_render_limit() -> usize { 1000 }
fn default_live_update_interval_secs() -> u64 { 10 }
fn default_live_update_max_keys() -> usize { 1000 }
fn default_sort_keys() -> bool { true }
fn default_scan_count() -> usize { 10_000 }
fn default_namespace_separator() -> String { ":".to_string() }

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            render_limit: default_render_limit(),
            live_update_interval_secs: default_live_update_interval_secs(),
            live_update_max_keys: default_live_update_max_keys(),
            sort_keys: default_sort_keys(),
            scan_count: default_scan_count(),
            namespace_separator: default_namespace_separator(),
            separator_is_pattern: false,
        }
    }
}

impl BrowserConfig {
    #[must_use]
    pub fn live_update_interval(&self) -> Duration {
        Duration::from_secs(self.live_update_interval_secs)
    }

    /// Compile the configured separator.
    pub fn separator(&self) -> Result<Separator, TreeError> {
        Separator::parse(&self.namespace_separator, self.separator_is_pattern)
    }
}
