//! Write barrier, SSB and remembered-set behavior across collections.

mod common;

use core::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use hearth::config::{BLOCK_SIZE, WORD_SIZE};
use hearth::{AllocationAction, CollectionKind, Generation, Heap, Heaplet, HeapletConfig, Word};

fn config() -> HeapletConfig {
    HeapletConfig {
        ageing_steps: 0,
        nursery_minimum: BLOCK_SIZE,
        nursery_initial: 4 * BLOCK_SIZE,
        ..HeapletConfig::default()
    }
}

/// Scenario: promote A, store a young B into A's field through the barrier,
/// and check the next minor keeps B alive through the remembered set alone.
#[test]
fn old_to_young_stores_survive_through_the_remembered_set() {
    let heap = Heap::new(pair_table());
    let mut heaplet = Heaplet::with_config(&heap, config());

    let mut roots = [alloc_pair(&mut heaplet, Word::immediate(10), Word::ZERO)];
    let handle = heaplet.register_global_root(
        NonNull::new(roots.as_mut_ptr()).unwrap(),
        WORD_SIZE,
    );
    heaplet.allocate_slow_path(0, AllocationAction::ForceMinor);
    let a = roots[0];
    unsafe { assert_eq!(heaplet.generation_of(a), Generation::Old) };

    // B is young and referenced only by A's field.
    let b = alloc_pair(&mut heaplet, Word::immediate(20), Word::ZERO);
    let slot = unsafe { object_slot(a, 1) };
    heaplet.write_field(a, slot, b);
    assert_eq!(heaplet.ssb_queue_length(), 1);

    heaplet.allocate_slow_path(0, AllocationAction::ForceMinor);

    assert_eq!(heaplet.ssb_queue_length(), 0);
    let field = unsafe { object_word(a, 1) };
    unsafe {
        assert_eq!(heaplet.generation_of(field), Generation::Old);
        assert!(!is_broken_heart(field));
        assert_eq!(object_word(field, 0).immediate_value(), 20);
    }
    assert!(heaplet.remembered_set_contains(a));
    heaplet.deregister_global_root(handle);
}

/// Stores into young objects never enter the SSB; duplicate old stores
/// collapse to one remembered-set entry.
#[test]
fn barrier_filters_young_updates_and_collapses_duplicates() {
    let heap = Heap::new(pair_table());
    let mut heaplet = Heaplet::with_config(&heap, config());

    let mut roots = [alloc_pair(&mut heaplet, Word::immediate(1), Word::ZERO)];
    let handle = heaplet.register_global_root(
        NonNull::new(roots.as_mut_ptr()).unwrap(),
        WORD_SIZE,
    );
    heaplet.allocate_slow_path(0, AllocationAction::ForceMinor);
    let old = roots[0];

    let young = alloc_pair(&mut heaplet, Word::immediate(2), Word::ZERO);
    let young_slot = unsafe { object_slot(young, 1) };
    heaplet.write_field(young, young_slot, Word::immediate(3));
    assert_eq!(heaplet.ssb_queue_length(), 0, "young updates bypass the SSB");

    let old_slot = unsafe { object_slot(old, 1) };
    heaplet.write_field(old, old_slot, young);
    heaplet.write_field(old, old_slot, young);
    assert_eq!(heaplet.ssb_queue_length(), 2);
    heaplet.ssb_flush();
    assert_eq!(heaplet.remembered_set_size(), 1, "duplicates collapse on flush");
    assert!(heaplet.remembered_set_contains(old));
    heaplet.deregister_global_root(handle);
}

/// SSB overflow flushes automatically and the overflowed entry is kept.
#[test]
fn ssb_overflow_drains_into_the_remembered_set() {
    let heap = Heap::new(pair_table());
    let mut heaplet = Heaplet::with_config(
        &heap,
        HeapletConfig {
            ssb_capacity_words: 8,
            ..config()
        },
    );

    const OLD_COUNT: usize = 12;
    let mut roots = vec![Word::ZERO; OLD_COUNT];
    let handle = heaplet.register_global_root(
        NonNull::new(roots.as_mut_ptr()).unwrap(),
        OLD_COUNT * WORD_SIZE,
    );
    for i in 0..OLD_COUNT {
        roots[i] = alloc_pair(&mut heaplet, Word::immediate(i as isize), Word::ZERO);
    }
    heaplet.allocate_slow_path(0, AllocationAction::ForceMinor);

    // Thirteen barrier hits against an eight-entry buffer: one automatic
    // flush (eight entries plus the overflowed one), four left queued.
    for pass in 0..=OLD_COUNT {
        let updated = roots[pass % OLD_COUNT];
        let slot = unsafe { object_slot(updated, 1) };
        heaplet.write_field(updated, slot, Word::immediate(pass as isize));
    }
    assert_eq!(heaplet.ssb_queue_length(), 4);
    assert_eq!(heaplet.statistics().ssb_flushes, 1 + 1); // collection flush + overflow
    assert_eq!(heaplet.remembered_set_size(), 9);
    heaplet.deregister_global_root(handle);
}

/// A major collection rebuilds the remembered set, following forwarded
/// entries and dropping dead ones.
#[test]
fn major_rebuilds_the_remembered_set() {
    let heap = Heap::new(pair_table());
    let mut heaplet = Heaplet::with_config(&heap, config());

    let mut roots = [
        alloc_pair(&mut heaplet, Word::immediate(1), Word::ZERO),
        alloc_pair(&mut heaplet, Word::immediate(2), Word::ZERO),
    ];
    let handle = heaplet.register_global_root(
        NonNull::new(roots.as_mut_ptr()).unwrap(),
        2 * WORD_SIZE,
    );
    heaplet.allocate_slow_path(0, AllocationAction::ForceMinor);

    // Make both old objects remembered.
    for &updated in roots.iter() {
        let young = alloc_pair(&mut heaplet, Word::immediate(9), Word::ZERO);
        let slot = unsafe { object_slot(updated, 1) };
        heaplet.write_field(updated, slot, young);
    }
    heaplet.ssb_flush();
    assert_eq!(heaplet.remembered_set_size(), 2);

    // Kill the second object and run a major: its entry must drop, the
    // survivor's entry must follow the moved object.
    let dead = roots[1];
    roots[1] = Word::ZERO;
    heaplet.allocate_slow_path(0, AllocationAction::ForceMajor);

    assert_eq!(heaplet.remembered_set_size(), 1);
    assert!(heaplet.remembered_set_contains(roots[0]));
    assert!(!heaplet.remembered_set_contains(dead));
    unsafe { assert_eq!(heaplet.generation_of(roots[0]), Generation::Old) };
    heaplet.deregister_global_root(handle);
}

/// SSB-flush hooks fire around every flush, including the one at collection
/// start, and see the pseudo-kind.
#[test]
fn ssb_flush_hooks_observe_every_flush() {
    let heap = Heap::new(pair_table());
    let mut heaplet = Heaplet::with_config(&heap, config());

    let pre = Arc::new(AtomicUsize::new(0));
    let post = Arc::new(AtomicUsize::new(0));
    let pre_count = Arc::clone(&pre);
    let post_count = Arc::clone(&post);
    let pre_handle = heaplet.register_pre_ssb_flush_hook(Box::new(move |kind| {
        assert_eq!(kind, CollectionKind::SsbFlush);
        pre_count.fetch_add(1, Ordering::SeqCst);
    }));
    let _post_handle = heaplet.register_post_ssb_flush_hook(Box::new(move |kind| {
        assert_eq!(kind, CollectionKind::SsbFlush);
        post_count.fetch_add(1, Ordering::SeqCst);
    }));

    heaplet.ssb_flush();
    heaplet.update_runtime_fields();
    heaplet.allocate_slow_path(0, AllocationAction::ForceMinor);
    assert_eq!(pre.load(Ordering::SeqCst), 3);
    assert_eq!(post.load(Ordering::SeqCst), 3);

    heaplet.deregister_pre_ssb_flush_hook(pre_handle);
    heaplet.ssb_flush();
    assert_eq!(pre.load(Ordering::SeqCst), 3, "deregistered hook stays silent");
    assert_eq!(post.load(Ordering::SeqCst), 4);
}
