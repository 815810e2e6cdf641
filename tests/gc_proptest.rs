//! Property suite: random object graphs under random collection sequences,
//! checked against an independent reachability oracle.
//!
//! Each case builds a directed graph of four-word nodes, roots a subset,
//! runs a few minor/major collections, and re-traverses the heap from the
//! (updated) roots after each one. petgraph computes the expected reachable
//! set; the heap traversal must find exactly those nodes, with contents
//! intact, no forwarding markers visible, and generations that only ever
//! grow older.

mod common;

use core::ptr::NonNull;
use std::collections::{BTreeMap, BTreeSet};

use common::*;
use hearth::config::{BLOCK_SIZE, MIN_OBJECT_SIZE, WORD_SIZE};
use hearth::{AllocationAction, Generation, Heap, Heaplet, HeapletConfig, Word};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use proptest::prelude::*;

const MAX_NODES: usize = 24;

fn generation_rank(generation: Generation) -> u8 {
    match generation {
        Generation::Young => 0,
        Generation::Old => 1,
        Generation::Shared => 2,
        other => panic!("mutator-visible object in {other} generation"),
    }
}

/// Follows quad edges from the root buffer, recording id -> (rank, spare)
/// and checking structural invariants along the way.
unsafe fn traverse(heaplet: &Heaplet, roots: &[Word]) -> BTreeMap<isize, u8> {
    let mut found = BTreeMap::new();
    let mut stack: Vec<Word> = roots.iter().copied().filter(|w| w.is_boxed()).collect();
    while let Some(w) = stack.pop() {
        assert!(!is_broken_heart(w), "mutator-visible forwarding marker");
        assert_eq!(w.untagged() as usize % MIN_OBJECT_SIZE, 0);
        let id = object_word(w, 0).immediate_value();
        let rank = generation_rank(heaplet.generation_of(w));
        assert_eq!(
            object_word(w, 3).immediate_value(),
            id ^ 0x5A5A,
            "payload of node {id} corrupted"
        );
        if found.insert(id, rank).is_some() {
            continue;
        }
        for index in [1, 2] {
            let edge = object_word(w, index);
            if edge.is_boxed() {
                stack.push(edge);
            }
        }
    }
    found
}

fn run_case(
    node_count: usize,
    edges: &[(usize, usize)],
    root_mask: &[bool],
    collections: &[u8],
) {
    let heap = Heap::new(quad_table());
    let mut heaplet = Heaplet::with_config(
        &heap,
        HeapletConfig {
            ageing_steps: 1,
            nursery_minimum: BLOCK_SIZE,
            nursery_initial: 8 * BLOCK_SIZE,
            ..HeapletConfig::default()
        },
    );

    // Root buffer registered before any allocation so intermediate
    // collections stay safe.
    let mut roots = vec![Word::ZERO; node_count];
    let handle = heaplet.register_global_root(
        NonNull::new(roots.as_mut_ptr()).unwrap(),
        node_count * WORD_SIZE,
    );

    let mut nodes = Vec::with_capacity(node_count);
    for id in 0..node_count {
        nodes.push(alloc_quad(&mut heaplet, id as isize));
    }
    // At most two out-edges per node (slots 1 and 2), first writers win.
    let mut out_degree = vec![0usize; node_count];
    let mut oracle: DiGraph<usize, ()> = DiGraph::new();
    let oracle_nodes: Vec<NodeIndex> = (0..node_count).map(|id| oracle.add_node(id)).collect();
    for &(from, to) in edges {
        let (from, to) = (from % node_count, to % node_count);
        if out_degree[from] < 2 {
            unsafe { set_object_word(nodes[from], 1 + out_degree[from], nodes[to]) };
            out_degree[from] += 1;
            oracle.add_edge(oracle_nodes[from], oracle_nodes[to], ());
        }
    }
    for (id, &rooted) in root_mask.iter().take(node_count).enumerate() {
        if rooted {
            roots[id] = nodes[id];
        }
    }

    let mut expected = BTreeSet::new();
    for (id, &rooted) in root_mask.iter().take(node_count).enumerate() {
        if rooted {
            let mut dfs = Dfs::new(&oracle, oracle_nodes[id]);
            while let Some(reached) = dfs.next(&oracle) {
                expected.insert(oracle[reached] as isize);
            }
        }
    }

    let mut last_ranks: BTreeMap<isize, u8> = BTreeMap::new();
    for &which in collections {
        let action = if which == 0 {
            AllocationAction::ForceMinor
        } else {
            AllocationAction::ForceMajor
        };
        heaplet.allocate_slow_path(0, action);

        let found = unsafe { traverse(&heaplet, &roots) };
        let found_ids: BTreeSet<isize> = found.keys().copied().collect();
        assert_eq!(found_ids, expected, "reachable set diverged from the oracle");
        for (&id, &rank) in &found {
            if let Some(&previous) = last_ranks.get(&id) {
                assert!(
                    rank >= previous,
                    "node {id} moved from rank {previous} back to {rank}"
                );
            }
        }
        last_ranks = found;
    }
    heaplet.deregister_global_root(handle);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn collections_preserve_reachable_graphs(
        node_count in 1usize..MAX_NODES,
        edges in proptest::collection::vec((0usize..MAX_NODES, 0usize..MAX_NODES), 0..48),
        root_mask in proptest::collection::vec(any::<bool>(), MAX_NODES),
        collections in proptest::collection::vec(0u8..2, 1..5),
    ) {
        run_case(node_count, &edges, &root_mask, &collections);
    }

    /// Remembered-set property over random old-to-young stores: after the
    /// next minor, every updated old object's field is consistent.
    #[test]
    fn random_old_to_young_stores_stay_consistent(
        store_targets in proptest::collection::vec(0usize..8, 1..24),
    ) {
        let heap = Heap::new(quad_table());
        let mut heaplet = Heaplet::with_config(
            &heap,
            HeapletConfig { ageing_steps: 0, ..HeapletConfig::default() },
        );
        let mut roots = vec![Word::ZERO; 8];
        let handle = heaplet.register_global_root(
            NonNull::new(roots.as_mut_ptr()).unwrap(),
            8 * WORD_SIZE,
        );
        for id in 0..8 {
            roots[id] = alloc_quad(&mut heaplet, id as isize);
        }
        heaplet.allocate_slow_path(0, AllocationAction::ForceMinor);

        let mut expected_payload = vec![None; 8];
        for (n, &target) in store_targets.iter().enumerate() {
            let updated = roots[target];
            let young = alloc_quad(&mut heaplet, 100 + n as isize);
            let slot = unsafe { object_slot(updated, 1) };
            heaplet.write_field(updated, slot, young);
            expected_payload[target] = Some(100 + n as isize);
        }
        heaplet.allocate_slow_path(0, AllocationAction::ForceMinor);

        for (id, expected) in expected_payload.iter().enumerate() {
            if let Some(expected) = expected {
                let field = unsafe { object_word(roots[id], 1) };
                prop_assert!(field.is_boxed());
                unsafe {
                    prop_assert!(!is_broken_heart(field));
                    prop_assert_eq!(heaplet.generation_of(field), Generation::Old);
                    prop_assert_eq!(object_word(field, 0).immediate_value(), *expected);
                }
            }
        }
        heaplet.deregister_global_root(handle);
    }
}
