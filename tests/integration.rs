// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration tests for the tree coordinator.
//!
//! Every test drives a [`TreeCoordinator`] against an in-memory key source
//! on a paused tokio clock, so live-update intervals elapse instantly.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//! - `happy_*` - connect, load, expand, reload, filter, live update
//! - `failure_*` - fetch errors, key cap, stale results, busy databases

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use keyspace_tree::{
    BrowserConfig, Change, Command, EventLog, FetchError, KeyFilter, MemoryKeySource, NodeId, NullObserver, Outcome,
    StaleReason, TreeCoordinator, TreeError, TreeView,
};

// =============================================================================
// Helpers
// =============================================================================

/// Log to the test output when `RUST_LOG` is set.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .with_test_writer()
        .try_init();
}

struct Harness {
    coordinator: TreeCoordinator,
    source: Arc<MemoryKeySource>,
    log: EventLog,
    server: NodeId,
    db: NodeId,
}

/// Coordinator with one server whose db0 holds `keys`, databases listed.
async fn connected(config: BrowserConfig, keys: &[&str]) -> Harness {
    init_tracing();
    let source = Arc::new(MemoryKeySource::new());
    source.set_keys(0, keys.iter().copied());
    let log = EventLog::new();
    let mut coordinator = TreeCoordinator::new(config, log.clone());
    let server = coordinator.add_server(None, "local", source.clone()).unwrap();
    coordinator.connect(server).unwrap();
    let outcome = coordinator.process_next().await.expect("listing in flight");
    assert!(matches!(outcome, Outcome::DatabasesListed { count: 1, .. }), "{:?}", outcome);
    let db = coordinator.model().find_database(server, 0).expect("db0 listed");
    Harness { coordinator, source, log, server, db }
}

/// Harness with db0 already loaded.
async fn loaded(config: BrowserConfig, keys: &[&str]) -> Harness {
    let mut h = connected(config, keys).await;
    h.coordinator.load(h.db).unwrap();
    let outcome = h.coordinator.process_next().await.expect("load in flight");
    assert!(matches!(outcome, Outcome::Loaded { error: None, .. }), "{:?}", outcome);
    h
}

/// Apply results until one satisfies `pred`.
async fn next_matching(coordinator: &mut TreeCoordinator, pred: impl Fn(&Outcome) -> bool) -> Outcome {
    for _ in 0..32 {
        let outcome = coordinator.process_next().await.expect("task in flight");
        if pred(&outcome) {
            return outcome;
        }
    }
    panic!("no matching outcome");
}

fn names(coordinator: &TreeCoordinator, parent: NodeId) -> Vec<String> {
    let model = coordinator.model();
    (0..model.child_count(parent))
        .filter_map(|row| model.child_at(parent, row))
        .filter_map(|id| model.display_name(id))
        .collect()
}

fn keys(list: &[&str]) -> Vec<Vec<u8>> {
    list.iter().map(|k| k.as_bytes().to_vec()).collect()
}

const KEYS: &[&str] = &["user:1", "user:2", "version", "order:1"];

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test(start_paused = true)]
async fn happy_connect_lists_databases() {
    let h = connected(BrowserConfig::default(), KEYS).await;

    assert_eq!(h.coordinator.model().display_name(h.db).as_deref(), Some("db0 (4)"));
    assert_eq!(h.coordinator.model().parent_of(h.db), Some(h.server));
    assert!(!h.coordinator.model().database(h.db).unwrap().is_loaded());
}

#[tokio::test(start_paused = true)]
async fn happy_reconnect_updates_declared_count() {
    let mut h = connected(BrowserConfig::default(), KEYS).await;
    h.source.insert_key(0, "extra");

    h.coordinator.connect(h.server).unwrap();
    h.coordinator.process_next().await;

    assert_eq!(h.coordinator.model().find_database(h.server, 0), Some(h.db));
    assert_eq!(h.coordinator.model().display_name(h.db).as_deref(), Some("db0 (5)"));
}

#[tokio::test(start_paused = true)]
async fn happy_load_groups_keys() {
    let mut h = connected(BrowserConfig::default(), KEYS).await;

    h.coordinator.load(h.db).unwrap();
    assert!(h.coordinator.model().node(h.db).unwrap().is_locked());
    let outcome = h.coordinator.process_next().await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Loaded { db: h.db, keys: 4, inserted: 2, deferred: 2, error: None }
    );
    assert_eq!(names(&h.coordinator, h.db), vec!["order:1", "user (2)", "version"]);
    assert_eq!(h.coordinator.model().display_name(h.db).as_deref(), Some("db0 (4/4)"));
    assert!(!h.coordinator.model().node(h.db).unwrap().is_locked());
    h.coordinator.model().check_invariants().unwrap();

    // The whole subtree arrives in one bracket
    let inserts: Vec<Change> = h
        .log
        .changes()
        .into_iter()
        .filter(|c| matches!(c, Change::Insert { parent, .. } if *parent == h.db))
        .collect();
    assert_eq!(inserts, vec![Change::Insert { parent: h.db, start: 0, count: 3 }]);
}

#[tokio::test(start_paused = true)]
async fn happy_load_is_noop_when_loaded() {
    let mut h = loaded(BrowserConfig::default(), KEYS).await;

    h.coordinator.load(h.db).unwrap();

    assert_eq!(h.coordinator.pending_tasks(), 0);
    assert_eq!(h.source.fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn happy_expand_materializes_parked_keys() {
    let mut h = loaded(BrowserConfig::default(), KEYS).await;
    let user = h.coordinator.model().find_child_namespace(h.db, b"user:").unwrap();

    h.coordinator.expand(user).unwrap();

    assert!(h.coordinator.model().node(user).unwrap().is_expanded());
    assert_eq!(names(&h.coordinator, user), vec!["user:1", "user:2"]);
    assert!(h.coordinator.model().parked_keys(h.db).is_empty());

    h.coordinator.collapse(user).unwrap();
    assert!(!h.coordinator.model().node(user).unwrap().is_expanded());
    assert_eq!(h.coordinator.model().child_count(user), 2);
}

#[tokio::test(start_paused = true)]
async fn happy_reload_keeps_expanded_namespaces() {
    let mut h = loaded(BrowserConfig::default(), KEYS).await;
    let user = h.coordinator.model().find_child_namespace(h.db, b"user:").unwrap();
    h.coordinator.expand(user).unwrap();
    h.source.insert_key(0, "user:3");

    h.coordinator.reload(h.db).unwrap();
    assert!(!h.coordinator.model().contains(user));
    let outcome = h.coordinator.process_next().await.unwrap();

    assert!(matches!(outcome, Outcome::Loaded { keys: 5, .. }), "{:?}", outcome);
    let user = h.coordinator.model().find_child_namespace(h.db, b"user:").unwrap();
    assert!(h.coordinator.model().node(user).unwrap().is_expanded());
    assert_eq!(names(&h.coordinator, user), vec!["user:1", "user:2", "user:3"]);
}

#[tokio::test(start_paused = true)]
async fn happy_filter_reloads_database() {
    let mut h = loaded(BrowserConfig::default(), KEYS).await;

    h.coordinator
        .set_filter(h.db, Some(KeyFilter::new("user:*").unwrap()))
        .unwrap();
    let outcome = h.coordinator.process_next().await.unwrap();

    assert!(matches!(outcome, Outcome::Loaded { keys: 2, .. }), "{:?}", outcome);
    assert_eq!(
        h.coordinator.model().display_name(h.db).as_deref(),
        Some("db0 [filter: user:*] (2/4)")
    );

    // A match-all pattern clears the filter
    h.coordinator.set_filter(h.db, Some(KeyFilter::new("*").unwrap())).unwrap();
    let outcome = h.coordinator.process_next().await.unwrap();
    assert!(matches!(outcome, Outcome::Loaded { keys: 4, .. }), "{:?}", outcome);
    assert!(h.coordinator.model().database(h.db).unwrap().filter().is_none());
}

#[tokio::test(start_paused = true)]
async fn happy_filter_on_unloaded_database_is_stored() {
    let mut h = connected(BrowserConfig::default(), KEYS).await;

    h.coordinator
        .set_filter(h.db, Some(KeyFilter::new("order:*").unwrap()))
        .unwrap();
    assert_eq!(h.coordinator.pending_tasks(), 0);

    h.coordinator.load(h.db).unwrap();
    let outcome = h.coordinator.process_next().await.unwrap();
    assert!(matches!(outcome, Outcome::Loaded { keys: 1, .. }), "{:?}", outcome);
}

#[tokio::test(start_paused = true)]
async fn happy_unload_clears_tree() {
    let mut h = loaded(BrowserConfig::default(), KEYS).await;
    h.coordinator.set_live_update(h.db, true).unwrap();

    h.coordinator.unload(h.db).unwrap();

    let state = h.coordinator.model().database(h.db).unwrap();
    assert!(!state.is_loaded());
    assert!(!state.live_update());
    assert!(state.key_index().is_empty());
    assert_eq!(h.coordinator.model().child_count(h.db), 0);
    assert_eq!(h.source.unloaded(), vec![0]);
    assert_eq!(h.coordinator.model().display_name(h.db).as_deref(), Some("db0 (4)"));
}

#[tokio::test(start_paused = true)]
async fn happy_render_limit_raised() {
    let config = BrowserConfig { render_limit: 2, ..Default::default() };
    let mut h = connected(config, &["a", "b", "c", "d", "e"]).await;

    h.coordinator.load(h.db).unwrap();
    let outcome = h.coordinator.process_next().await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Loaded { db: h.db, keys: 5, inserted: 2, deferred: 3, error: None }
    );

    h.coordinator.set_render_limit(5).unwrap();

    assert_eq!(names(&h.coordinator, h.db), vec!["a", "b", "c", "d", "e"]);
    assert!(h.coordinator.model().parked_keys(h.db).is_empty());
    h.coordinator.model().check_invariants().unwrap();
}

#[tokio::test(start_paused = true)]
async fn happy_live_update_applies_diff() {
    let mut h = loaded(BrowserConfig::default(), KEYS).await;
    h.coordinator.set_live_update(h.db, true).unwrap();
    let order = h.coordinator.model().key_node(h.db, b"order:1").unwrap();

    h.source.insert_key(0, "b:new");
    h.source.remove_key(0, b"version");

    let outcome = next_matching(&mut h.coordinator, |o| matches!(o, Outcome::LiveUpdated { .. })).await;
    let Outcome::LiveUpdated { report, .. } = outcome else { unreachable!() };
    assert_eq!(report.added, keys(&["b:new"]));
    assert_eq!(report.removed, keys(&["version"]));

    assert_eq!(h.coordinator.model().key_node(h.db, b"order:1"), Some(order));
    assert!(h.coordinator.model().key_node(h.db, b"b:new").is_some());
    assert!(h.coordinator.model().key_node(h.db, b"version").is_none());
    assert!(!h.coordinator.model().node(h.db).unwrap().is_locked());
    h.coordinator.model().check_invariants().unwrap();

    // Timer re-armed; an unchanged keyspace yields an empty pass
    let outcome = next_matching(&mut h.coordinator, |o| matches!(o, Outcome::LiveUpdated { .. })).await;
    let Outcome::LiveUpdated { report, .. } = outcome else { unreachable!() };
    assert!(report.is_empty());
}

#[tokio::test(start_paused = true)]
async fn happy_live_update_waits_for_interval() {
    let config = BrowserConfig { live_update_interval_secs: 30, ..Default::default() };
    let mut h = loaded(config, KEYS).await;
    h.coordinator.set_live_update(h.db, true).unwrap();
    let start = tokio::time::Instant::now();

    let outcome = h.coordinator.process_next().await.unwrap();

    assert_eq!(outcome, Outcome::LiveUpdateStarted { db: h.db });
    assert!(start.elapsed() >= Duration::from_secs(30));
    assert!(h.coordinator.model().node(h.db).unwrap().is_locked());
}

#[tokio::test(start_paused = true)]
async fn happy_live_update_disabled_cancels_timer() {
    let mut h = loaded(BrowserConfig::default(), KEYS).await;
    h.coordinator.set_live_update(h.db, true).unwrap();
    assert_eq!(h.coordinator.pending_tasks(), 1);

    h.coordinator.set_live_update(h.db, false).unwrap();

    assert!(h.coordinator.process_next().await.is_none());
    assert_eq!(h.source.fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn happy_move_server_into_group() {
    let mut h = connected(BrowserConfig::default(), KEYS).await;
    let group = h.coordinator.add_group("prod").unwrap();
    h.log.take();

    h.coordinator.move_server(h.server, Some(group)).unwrap();

    assert_eq!(h.coordinator.model().parent_of(h.server), Some(group));
    assert_eq!(h.coordinator.model().row_of(h.server), Some(0));
    assert!(matches!(h.log.changes().as_slice(), [Change::Move { destination, .. }] if *destination == group));

    h.coordinator.move_server(h.server, None).unwrap();
    assert_eq!(h.coordinator.model().parent_of(h.server), Some(h.coordinator.model().root()));
}

#[tokio::test(start_paused = true)]
async fn happy_run_loop_serves_commands() {
    let source = Arc::new(MemoryKeySource::new());
    source.set_keys(0, ["a", "b"]);
    let mut coordinator = TreeCoordinator::new(BrowserConfig::default(), NullObserver);
    let server = coordinator.add_server(None, "local", source.clone()).unwrap();

    let (commands, command_rx) = mpsc::unbounded_channel();
    let (outcome_tx, mut outcomes) = mpsc::unbounded_channel();
    let handle = tokio::spawn(coordinator.run(command_rx, outcome_tx));

    commands.send(Command::Connect(server)).unwrap();
    let listed = outcomes.recv().await;
    assert!(matches!(listed, Some(Outcome::DatabasesListed { count: 1, .. })), "{:?}", listed);

    // A server is not a database
    commands.send(Command::Load(server)).unwrap();
    let rejected = outcomes.recv().await;
    assert!(
        matches!(rejected, Some(Outcome::Rejected { error: TreeError::WrongNodeKind { .. } })),
        "{:?}",
        rejected
    );

    commands.send(Command::Shutdown).unwrap();
    handle.await.unwrap();
}

// =============================================================================
// Failure scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn failure_load_fetch_error() {
    let mut h = connected(BrowserConfig::default(), KEYS).await;
    h.source.fail_next("connection reset");

    h.coordinator.load(h.db).unwrap();
    let outcome = h.coordinator.process_next().await.unwrap();

    assert_eq!(
        outcome,
        Outcome::LoadFailed { db: h.db, error: TreeError::Fetch(FetchError::new("connection reset")) }
    );
    assert!(!h.coordinator.model().node(h.db).unwrap().is_locked());
    assert!(!h.coordinator.model().database(h.db).unwrap().is_loaded());
    assert_eq!(h.coordinator.model().child_count(h.db), 0);

    // A retry goes through
    h.coordinator.load(h.db).unwrap();
    let outcome = h.coordinator.process_next().await.unwrap();
    assert!(matches!(outcome, Outcome::Loaded { keys: 4, .. }), "{:?}", outcome);
}

#[tokio::test(start_paused = true)]
async fn failure_load_while_loading_is_locked() {
    let mut h = connected(BrowserConfig::default(), KEYS).await;
    h.source.set_latency(Some(Duration::from_secs(1)));

    h.coordinator.load(h.db).unwrap();

    assert_eq!(h.coordinator.load(h.db), Err(TreeError::Locked(0)));
}

#[tokio::test(start_paused = true)]
async fn failure_unload_discards_inflight_load() {
    let mut h = connected(BrowserConfig::default(), KEYS).await;
    h.source.set_latency(Some(Duration::from_secs(1)));

    h.coordinator.load(h.db).unwrap();
    h.coordinator.unload(h.db).unwrap();
    let outcome = h.coordinator.process_next().await.unwrap();

    assert_eq!(outcome, Outcome::Discarded { db: h.db, reason: StaleReason::Epoch });
    assert_eq!(h.coordinator.model().child_count(h.db), 0);
    assert!(!h.coordinator.model().database(h.db).unwrap().is_loaded());
}

#[tokio::test(start_paused = true)]
async fn failure_removed_server_discards_inflight_load() {
    let mut h = connected(BrowserConfig::default(), KEYS).await;
    h.source.set_latency(Some(Duration::from_secs(1)));

    h.coordinator.load(h.db).unwrap();
    h.coordinator.remove_server(h.server).unwrap();
    let outcome = h.coordinator.process_next().await.unwrap();

    assert_eq!(outcome, Outcome::Discarded { db: h.db, reason: StaleReason::Node });
    assert!(!h.coordinator.model().contains(h.db));
    assert!(h.coordinator.model().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failure_live_update_cap_exceeded() {
    let config = BrowserConfig { live_update_max_keys: 3, ..Default::default() };
    let mut h = loaded(config, KEYS).await;
    h.coordinator.set_live_update(h.db, true).unwrap();
    let before = names(&h.coordinator, h.db);

    let outcome = next_matching(&mut h.coordinator, |o| matches!(o, Outcome::LiveUpdateStopped { .. })).await;

    assert_eq!(
        outcome,
        Outcome::LiveUpdateStopped {
            db: h.db,
            error: TreeError::LiveUpdateCapExceeded { db_index: 0, keys: 4, cap: 3 },
        }
    );
    assert!(!h.coordinator.model().database(h.db).unwrap().live_update());
    assert_eq!(names(&h.coordinator, h.db), before);
    assert_eq!(h.coordinator.pending_tasks(), 0);
}

#[tokio::test(start_paused = true)]
async fn failure_live_update_fetch_error_stops() {
    let mut h = loaded(BrowserConfig::default(), KEYS).await;
    h.coordinator.set_live_update(h.db, true).unwrap();
    h.source.fail_next("connection reset");

    let outcome = next_matching(&mut h.coordinator, |o| matches!(o, Outcome::LiveUpdateStopped { .. })).await;

    assert_eq!(
        outcome,
        Outcome::LiveUpdateStopped { db: h.db, error: TreeError::Fetch(FetchError::new("connection reset")) }
    );
    assert!(!h.coordinator.model().database(h.db).unwrap().live_update());
    assert!(!h.coordinator.model().node(h.db).unwrap().is_locked());
    assert_eq!(h.coordinator.pending_tasks(), 0);
}

#[tokio::test(start_paused = true)]
async fn failure_live_update_empty_fetch_keeps_tree() {
    let mut h = loaded(BrowserConfig::default(), KEYS).await;
    h.coordinator.set_live_update(h.db, true).unwrap();
    let before = names(&h.coordinator, h.db);
    h.source.set_keys(0, Vec::<&str>::new());

    let outcome = next_matching(&mut h.coordinator, |o| !matches!(o, Outcome::LiveUpdateStarted { .. })).await;

    assert_eq!(outcome, Outcome::LiveUpdateEmpty { db: h.db });
    assert_eq!(names(&h.coordinator, h.db), before);
    assert!(h.coordinator.model().database(h.db).unwrap().live_update());
    assert_eq!(h.coordinator.pending_tasks(), 1);
}

#[tokio::test(start_paused = true)]
async fn failure_reload_while_busy_is_queued() {
    let mut h = loaded(BrowserConfig::default(), KEYS).await;
    h.source.set_latency(Some(Duration::from_secs(1)));
    h.coordinator.set_live_update(h.db, true).unwrap();

    let outcome = h.coordinator.process_next().await.unwrap();
    assert_eq!(outcome, Outcome::LiveUpdateStarted { db: h.db });

    h.source.insert_key(0, "late");
    h.coordinator.reload(h.db).unwrap();
    assert!(h.coordinator.model().node(h.db).unwrap().is_locked());

    let outcome = h.coordinator.process_next().await.unwrap();
    assert!(matches!(outcome, Outcome::LiveUpdated { .. }), "{:?}", outcome);
    // The queued reload now owns the database
    assert!(h.coordinator.model().node(h.db).unwrap().is_locked());

    let outcome = h.coordinator.process_next().await.unwrap();
    assert!(matches!(outcome, Outcome::Loaded { keys: 5, .. }), "{:?}", outcome);
    let state = h.coordinator.model().database(h.db).unwrap();
    assert!(state.is_loaded());
    assert!(state.live_update());
    h.coordinator.model().check_invariants().unwrap();
}

#[tokio::test(start_paused = true)]
async fn failure_commands_on_wrong_nodes() {
    let mut h = loaded(BrowserConfig::default(), KEYS).await;
    let version = h.coordinator.model().key_node(h.db, b"version").unwrap();

    assert!(matches!(h.coordinator.expand(version), Err(TreeError::WrongNodeKind { .. })));
    assert!(matches!(h.coordinator.reload(h.server), Err(TreeError::WrongNodeKind { .. })));
    assert!(matches!(h.coordinator.move_server(h.db, None), Err(TreeError::WrongNodeKind { .. })));

    h.coordinator.remove_server(h.server).unwrap();
    assert_eq!(h.coordinator.unload(h.db), Err(TreeError::UnknownNode(h.db)));
}
