// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Keyspace Tree
//!
//! Namespace-tree indexing engine for a key-value database browser.
//!
//! Flat key lists fetched from a server are grouped into a navigable tree by
//! splitting each key on a namespace separator (`user:1:name` lives under
//! `user` → `1`). The tree is kept cheap to render by capping how many
//! children are materialized per parent, and kept current by periodically
//! re-fetching and reconciling instead of rebuilding.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   keys()    ┌──────────────────────────────┐
//! │  KeySource    │ ──────────► │ background task              │
//! │ (Redis, mem)  │             │  filter / sort / dedupe      │
//! └───────────────┘             │  TreeBuilder → scratch tree  │
//!                               └──────────────┬───────────────┘
//!                                              │ splice (one Insert bracket)
//!                                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ TreeCoordinator (single mutator)                             │
//! │  TreeModel: arena of Group/Server/Database/Namespace/Key     │
//! │  epoch guard, per-database lock, live-update timers          │
//! │  Reconciler: removed = index − fresh, added = fresh − known  │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ Begin / End / DataChanged
//!                                ▼
//!                          TreeObserver (view)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keyspace_tree::{BrowserConfig, NullObserver, RedisKeySource, TreeCoordinator, TreeView};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BrowserConfig::default();
//!     let source = RedisKeySource::connect("redis://localhost:6379", &config).await?;
//!
//!     let mut coordinator = TreeCoordinator::new(config, NullObserver);
//!     let server = coordinator.add_server(None, "local", Arc::new(source))?;
//!     coordinator.connect(server)?;
//!     coordinator.process_next().await;
//!
//!     if let Some(db) = coordinator.model().find_database(server, 0) {
//!         coordinator.load(db)?;
//!         coordinator.process_next().await;
//!         println!("{} rows", coordinator.model().child_count(db));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`tree`]: arena-backed node graph, key index and view protocol
//! - [`builder`]: grouping keys into namespaces under a render limit
//! - [`reconcile`]: incremental live-update diffing
//! - [`coordinator`]: the single mutator, background loads and timers
//! - [`source`]: key sources (Redis, in-memory)
//! - [`separator`] / [`filter`]: namespace separators and key filters

pub mod builder;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod reconcile;
pub mod resilience;
pub mod separator;
pub mod source;
pub mod tree;

pub use builder::{BuildMode, BuildReport, TreeBuilder};
pub use config::BrowserConfig;
pub use coordinator::{Command, Outcome, StaleReason, TreeCoordinator};
pub use error::TreeError;
pub use filter::KeyFilter;
pub use metrics::LatencyTimer;
pub use reconcile::{ReconcileReport, Reconciler};
pub use resilience::retry::RetryConfig;
pub use separator::{Separator, SeparatorMatch};
pub use source::{DatabaseInfo, FetchError, KeySource, MemoryKeySource, Operations, RedisKeySource, ServerConnection};
pub use tree::{
    Change, DatabaseState, EventLog, Grouping, KeyIndex, NamespaceState, Node, NodeId, NodeKind, NullObserver,
    TreeEvent, TreeModel, TreeObserver, TreeView,
};
