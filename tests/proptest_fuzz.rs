// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Property-based tests for grouping and reconciliation.
//!
//! Uses proptest to generate key lists and structural edit sequences and
//! verifies the tree never loses, duplicates or misplaces a key.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::{BTreeSet, HashSet};

use proptest::prelude::*;

use keyspace_tree::{
    BuildMode, Change, EventLog, NodeId, Reconciler, Separator, TreeBuilder, TreeEvent, TreeModel, TreeView,
};

// =============================================================================
// Strategies and helpers
// =============================================================================

/// Keys like `a`, `ab:c`, `a/b:cc` over a tiny alphabet so namespaces collide.
fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    "[a-c]{1,2}([:/][a-c]{1,2}){0,3}".prop_map(String::into_bytes)
}

fn key_list_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(key_strategy(), 0..80)
}

/// Drop duplicates, keeping first occurrence order.
fn unique(keys: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut seen = HashSet::new();
    keys.iter().filter(|k| seen.insert((*k).clone())).cloned().collect()
}

fn setup() -> (TreeModel, EventLog, NodeId) {
    let log = EventLog::new();
    let mut model = TreeModel::new(log.clone());
    let server = model.add_server(None, "local").unwrap();
    let db = model.add_database(server, 0, 0).unwrap();
    log.take();
    (model, log, db)
}

/// Materialized leaves plus parked keys, asserting nothing appears twice.
fn leaves(model: &TreeModel, db: NodeId) -> BTreeSet<Vec<u8>> {
    let mut all = model.materialized_keys(db);
    all.extend(model.parked_keys(db));
    let count = all.len();
    let set: BTreeSet<Vec<u8>> = all.into_iter().collect();
    assert_eq!(set.len(), count, "a key is both shown and parked, or shown twice");
    set
}

fn expanded_set(paths: &[&str]) -> HashSet<Vec<u8>> {
    paths.iter().map(|p| p.as_bytes().to_vec()).collect()
}

/// Every Begin is closed by the matching End before the next Begin.
fn assert_brackets_balanced(events: &[TreeEvent]) {
    let mut open: Option<Change> = None;
    for event in events {
        match event {
            TreeEvent::Begin(change) => {
                assert!(open.is_none(), "nested bracket {:?} inside {:?}", change, open);
                open = Some(*change);
            }
            TreeEvent::End(change) => {
                assert_eq!(open.take(), Some(*change), "unmatched end");
            }
            TreeEvent::DataChanged(_) => {}
        }
    }
    assert!(open.is_none(), "bracket left open");
}

/// Every namespace path (`a`, `a:b`, ...) the keys can produce with `:`.
fn namespace_paths(keys: &[Vec<u8>]) -> HashSet<Vec<u8>> {
    keys.iter()
        .flat_map(|key| {
            key.iter()
                .enumerate()
                .filter(|&(_, &b)| b == b':')
                .map(move |(i, _)| key[..i].to_vec())
        })
        .collect()
}

/// Rows, namespaces and parked keys under `node` in display order.
fn shape(model: &TreeModel, node: NodeId) -> String {
    let n = model.node(node).unwrap();
    let mut out = String::from_utf8_lossy(n.full_path()).into_owned();
    if let Some(grouping) = n.grouping() {
        let mut parked: Vec<String> = grouping.raw_keys().iter().map(|k| String::from_utf8_lossy(k).into_owned()).collect();
        parked.sort();
        let rows: Vec<String> = n.children().iter().map(|&child| shape(model, child)).collect();
        out.push_str(&format!("{{{} | {}}}", rows.join(", "), parked.join(", ")));
    }
    out
}

#[derive(Debug, Clone)]
enum Edit {
    AddGroup,
    AddServer { group: usize },
    AddDatabase { server: usize },
    Remove { pick: usize },
    Move { server: usize, group: usize },
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        Just(Edit::AddGroup),
        (0usize..8).prop_map(|group| Edit::AddServer { group }),
        (0usize..8).prop_map(|server| Edit::AddDatabase { server }),
        (0usize..16).prop_map(|pick| Edit::Remove { pick }),
        (0usize..8, 0usize..8).prop_map(|(server, group)| Edit::Move { server, group }),
    ]
}

// =============================================================================
// Grouping properties
// =============================================================================

proptest! {
    /// Leaves and parked keys together are exactly the input, literal separator
    #[test]
    fn prop_round_trip_literal_separator(
        keys in key_list_strategy(),
        render_limit in 1usize..10,
        sorted in any::<bool>(),
        expand_a in any::<bool>(),
    ) {
        let (mut model, log, db) = setup();
        let mut input = unique(&keys);
        if sorted {
            input.sort();
        }
        let expanded = if expand_a { expanded_set(&["a", "b", "a:a"]) } else { HashSet::new() };
        let builder = TreeBuilder::new(Separator::literal(":"), render_limit).with_expanded(expanded);

        builder.build(&mut model, db, &input).unwrap();

        let expected: BTreeSet<Vec<u8>> = input.iter().cloned().collect();
        prop_assert_eq!(leaves(&model, db), expected);
        prop_assert!(model.check_invariants().is_ok());
        assert_brackets_balanced(&log.take());
    }

    /// Same guarantee for a variable-length pattern separator
    #[test]
    fn prop_round_trip_pattern_separator(
        keys in key_list_strategy(),
        render_limit in 1usize..10,
        mode_sorted in any::<bool>(),
    ) {
        let (mut model, log, db) = setup();
        let mut input = unique(&keys);
        input.sort();
        let mode = if mode_sorted { BuildMode::Sorted } else { BuildMode::Append };
        let builder = TreeBuilder::new(Separator::pattern("[:/]+").unwrap(), render_limit)
            .with_expanded(expanded_set(&["a", "b", "c"]))
            .with_mode(mode);

        builder.build(&mut model, db, &input).unwrap();

        let expected: BTreeSet<Vec<u8>> = input.iter().cloned().collect();
        prop_assert_eq!(leaves(&model, db), expected);
        prop_assert!(model.check_invariants().is_ok());
        assert_brackets_balanced(&log.take());
    }

    /// Raising the render limit materializes parked keys without duplicates
    #[test]
    fn prop_rematerialize_preserves_keys(keys in key_list_strategy(), low in 1usize..4) {
        let (mut model, _log, db) = setup();
        let mut input = unique(&keys);
        input.sort();
        let expanded = expanded_set(&["a", "b", "c"]);

        TreeBuilder::new(Separator::literal(":"), low)
            .with_expanded(expanded.clone())
            .build(&mut model, db, &input)
            .unwrap();
        TreeBuilder::new(Separator::literal(":"), 1000)
            .with_expanded(expanded)
            .rematerialize(&mut model, db)
            .unwrap();

        let expected: BTreeSet<Vec<u8>> = input.iter().cloned().collect();
        prop_assert_eq!(leaves(&model, db), expected);
        prop_assert!(model.check_invariants().is_ok());
    }

    /// Applying the same fetch twice changes nothing the second time
    #[test]
    fn prop_reconcile_idempotent(
        before in key_list_strategy(),
        after in key_list_strategy(),
        render_limit in 1usize..10,
    ) {
        let (mut model, log, db) = setup();
        let mut initial = unique(&before);
        initial.sort();
        let builder = TreeBuilder::new(Separator::literal(":"), render_limit)
            .with_expanded(expanded_set(&["a", "b"]));
        builder.build(&mut model, db, &initial).unwrap();

        let mut fresh = unique(&after);
        fresh.sort();
        let reconciler = Reconciler::new(builder, 10_000);

        reconciler.reconcile(&mut model, db, &fresh).unwrap();
        let expected: BTreeSet<Vec<u8>> = fresh.iter().cloned().collect();
        prop_assert_eq!(leaves(&model, db), expected);
        prop_assert!(model.check_invariants().is_ok());

        log.take();
        let second = reconciler.reconcile(&mut model, db, &fresh).unwrap();
        prop_assert!(second.is_empty(), "second pass reported {:?}", second);
        prop_assert!(log.changes().is_empty());
    }

    /// Growing a loaded tree gives the same shape as loading the grown key set
    #[test]
    fn prop_growth_matches_fresh_build(
        before in key_list_strategy(),
        extra in key_list_strategy(),
        expand_all in any::<bool>(),
    ) {
        let mut initial = unique(&before);
        initial.sort();
        let mut full: Vec<Vec<u8>> = initial.iter().chain(extra.iter()).cloned().collect();
        full.sort();
        full.dedup();
        let expanded = if expand_all { namespace_paths(&full) } else { HashSet::new() };
        let builder = TreeBuilder::new(Separator::literal(":"), 10_000).with_expanded(expanded);

        let (mut grown, _log, db) = setup();
        builder.build(&mut grown, db, &initial).unwrap();
        Reconciler::new(builder.clone(), usize::MAX).reconcile(&mut grown, db, &full).unwrap();

        let (mut fresh, _log, fresh_db) = setup();
        builder.build(&mut fresh, fresh_db, &full).unwrap();

        prop_assert_eq!(shape(&grown, db), shape(&fresh, fresh_db));
        prop_assert!(grown.check_invariants().is_ok());
    }

    /// Rows stay contiguous through any sequence of structural edits
    #[test]
    fn prop_rows_contiguous_under_edits(edits in prop::collection::vec(edit_strategy(), 1..60)) {
        let log = EventLog::new();
        let mut model = TreeModel::new(log.clone());
        let mut groups: Vec<NodeId> = Vec::new();
        let mut servers: Vec<NodeId> = Vec::new();
        let mut databases: Vec<NodeId> = Vec::new();
        let mut next_db = 0u32;

        for edit in edits {
            groups.retain(|&id| model.contains(id));
            servers.retain(|&id| model.contains(id));
            databases.retain(|&id| model.contains(id));

            match edit {
                Edit::AddGroup => groups.push(model.add_group("group").unwrap()),
                Edit::AddServer { group } => {
                    let parent = (!groups.is_empty()).then(|| groups[group % groups.len()]);
                    servers.push(model.add_server(parent, "server").unwrap());
                }
                Edit::AddDatabase { server } if !servers.is_empty() => {
                    let server = servers[server % servers.len()];
                    databases.push(model.add_database(server, next_db, 0).unwrap());
                    next_db += 1;
                }
                Edit::Remove { pick } => {
                    let all: Vec<NodeId> = groups.iter().chain(&servers).chain(&databases).copied().collect();
                    if !all.is_empty() {
                        model.remove_node(all[pick % all.len()]).unwrap();
                    }
                }
                Edit::Move { server, group } if !servers.is_empty() => {
                    let server = servers[server % servers.len()];
                    let target = (!groups.is_empty() && group % 3 != 0).then(|| groups[group % groups.len()]);
                    model.move_server(server, target).unwrap();
                }
                _ => {}
            }
            prop_assert!(model.check_invariants().is_ok());
        }

        assert_brackets_balanced(&log.take());
        for &server in &servers {
            let parent = model.parent_of(server).unwrap();
            let row = model.row_of(server).unwrap();
            prop_assert_eq!(model.child_at(parent, row), Some(server));
        }
    }
}

// =============================================================================
// Fixed scenarios
// =============================================================================

fn child_paths(model: &TreeModel, parent: NodeId) -> Vec<Vec<u8>> {
    (0..model.child_count(parent))
        .filter_map(|row| model.child_at(parent, row))
        .map(|id| model.node(id).unwrap().full_path().to_vec())
        .collect()
}

#[test]
fn bulk_insert_matches_one_by_one() {
    let keys: Vec<Vec<u8>> = (0..1000).map(|i| format!("key{:04}", i).into_bytes()).collect();

    let (mut bulk, bulk_log, bulk_db) = setup();
    TreeBuilder::new(Separator::literal(":"), 1000)
        .build(&mut bulk, bulk_db, &keys)
        .unwrap();

    let (mut single, single_log, single_db) = setup();
    TreeBuilder::new(Separator::literal(":"), 1000)
        .with_mode(BuildMode::Sorted)
        .build(&mut single, single_db, &keys)
        .unwrap();

    assert_eq!(child_paths(&bulk, bulk_db), child_paths(&single, single_db));
    assert_eq!(child_paths(&bulk, bulk_db), keys);
    assert_eq!(bulk_log.changes().len(), 1);
    assert_eq!(single_log.changes().len(), 1000);
    bulk.check_invariants().unwrap();
    single.check_invariants().unwrap();
}

#[test]
fn render_limit_boundary() {
    let (mut model, _log, db) = setup();
    let keys: Vec<Vec<u8>> = ["a", "b", "c", "d", "e"].iter().map(|k| k.as_bytes().to_vec()).collect();

    let report = TreeBuilder::new(Separator::literal(":"), 2).build(&mut model, db, &keys).unwrap();
    assert_eq!(report.inserted.len(), 2);
    assert_eq!(model.child_count(db), 2);
    assert_eq!(model.database(db).unwrap().raw_keys().len(), 3);

    TreeBuilder::new(Separator::literal(":"), 5).rematerialize(&mut model, db).unwrap();
    assert_eq!(child_paths(&model, db), keys);
    assert!(model.database(db).unwrap().raw_keys().is_empty());
    model.check_invariants().unwrap();
}

#[test]
fn diff_applies_in_place() {
    let (mut model, log, db) = setup();
    let builder = TreeBuilder::new(Separator::literal(":"), 1000).with_expanded(expanded_set(&["x", "y"]));
    let initial: Vec<Vec<u8>> = ["x:1", "x:2", "y:1"].iter().map(|k| k.as_bytes().to_vec()).collect();
    builder.build(&mut model, db, &initial).unwrap();
    let x1 = model.key_node(db, b"x:1").unwrap();
    log.take();

    let fresh: Vec<Vec<u8>> = ["x:1", "y:1", "y:2"].iter().map(|k| k.as_bytes().to_vec()).collect();
    let report = Reconciler::new(builder, 1000).reconcile(&mut model, db, &fresh).unwrap();

    assert_eq!(report.removed, vec![b"x:2".to_vec()]);
    assert_eq!(report.added, vec![b"y:2".to_vec()]);
    // Untouched rows keep their identity
    assert_eq!(model.key_node(db, b"x:1"), Some(x1));
    assert!(!log.changes().is_empty());

    // x keeps its remaining child; y is grouped around the old and new key
    let x = model.find_child_namespace(db, b"x:").unwrap();
    assert_eq!(child_paths(&model, x), vec![b"x:1".to_vec()]);
    let y = model.find_child_namespace(db, b"y:").expect("y keys grouped into a namespace");
    assert_eq!(child_paths(&model, y), vec![b"y:1".to_vec(), b"y:2".to_vec()]);
    assert_eq!(child_paths(&model, db), vec![b"x".to_vec(), b"y".to_vec()]);
    model.check_invariants().unwrap();
}
