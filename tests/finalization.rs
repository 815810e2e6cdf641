//! Finalization pipeline behavior: quick finalizers, complete-object
//! finalizers with consistent pointer fields, survivor re-registration, and
//! teardown finalization.

mod common;

use core::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use hearth::config::{BLOCK_SIZE, WORD_SIZE};
use hearth::{AllocationAction, Generation, Heap, Heaplet, HeapletConfig, ShapeTable, Word};

fn config() -> HeapletConfig {
    HeapletConfig {
        ageing_steps: 0,
        nursery_minimum: BLOCK_SIZE,
        nursery_initial: 4 * BLOCK_SIZE,
        ..HeapletConfig::default()
    }
}

fn quick_table(deaths: &Arc<AtomicUsize>) -> ShapeTable {
    let mut shapes = ShapeTable::new();
    add_pair(&mut shapes);
    add_quick_cell(&mut shapes, Arc::clone(deaths));
    shapes
}

#[test]
fn dead_quick_finalizables_run_exactly_once() {
    let deaths = Arc::new(AtomicUsize::new(0));
    let heap = Heap::new(quick_table(&deaths));
    let mut heaplet = Heaplet::with_config(&heap, config());

    let doomed = alloc_quick_cell(&mut heaplet, 41);
    heaplet.register_finalizable(doomed);

    heaplet.allocate_slow_path(0, AllocationAction::ForceMinor);
    assert_eq!(deaths.load(Ordering::SeqCst), 1);

    // Nothing left to finalize: further collections stay silent.
    heaplet.allocate_slow_path(0, AllocationAction::ForceMajor);
    assert_eq!(deaths.load(Ordering::SeqCst), 1);
}

#[test]
fn surviving_finalizables_are_reregistered_not_finalized() {
    let deaths = Arc::new(AtomicUsize::new(0));
    let heap = Heap::new(quick_table(&deaths));
    let mut heaplet = Heaplet::with_config(&heap, config());

    let mut roots = [alloc_quick_cell(&mut heaplet, 7)];
    let handle = heaplet.register_global_root(
        NonNull::new(roots.as_mut_ptr()).unwrap(),
        WORD_SIZE,
    );
    heaplet.register_finalizable(roots[0]);

    heaplet.allocate_slow_path(0, AllocationAction::ForceMinor);
    assert_eq!(deaths.load(Ordering::SeqCst), 0, "rooted object must not finalize");
    unsafe { assert_eq!(heaplet.generation_of(roots[0]), Generation::Old) };

    // The registration followed the object: dropping the root kills it.
    roots[0] = Word::ZERO;
    heaplet.allocate_slow_path(0, AllocationAction::ForceMajor);
    assert_eq!(deaths.load(Ordering::SeqCst), 1);
    heaplet.deregister_global_root(handle);
}

/// Scenario: a complete-object finalizer must observe pointer fields that
/// refer to valid (possibly relocated) objects, never to forwarding markers.
#[test]
fn complete_finalizers_observe_consistent_fields() {
    let deaths = Arc::new(AtomicUsize::new(0));
    let broken = Arc::new(AtomicUsize::new(0));
    let mut shapes = ShapeTable::new();
    add_pair(&mut shapes);
    add_complete_record(&mut shapes, Arc::clone(&deaths), Arc::clone(&broken));
    let heap = Heap::new(shapes);
    let mut heaplet = Heaplet::with_config(&heap, config());

    // The record's field points at an unrooted wrapper pair.
    let wrapper = alloc_pair(&mut heaplet, Word::immediate(99), Word::ZERO);
    let record = alloc_complete_record(&mut heaplet, wrapper);
    heaplet.register_finalizable(record);

    heaplet.allocate_slow_path(0, AllocationAction::ForceMajor);

    assert_eq!(deaths.load(Ordering::SeqCst), 1, "finalizer runs exactly once");
    assert_eq!(
        broken.load(Ordering::SeqCst),
        0,
        "finalizer saw a forwarding marker through a pointer field"
    );
    heaplet.allocate_slow_path(0, AllocationAction::ForceMajor);
    assert_eq!(deaths.load(Ordering::SeqCst), 1);
}

/// Two dead complete-object finalizables referencing each other both run,
/// each seeing a consistent peer.
#[test]
fn mutually_referencing_dead_finalizables_both_run() {
    let deaths = Arc::new(AtomicUsize::new(0));
    let broken = Arc::new(AtomicUsize::new(0));
    let mut shapes = ShapeTable::new();
    add_pair(&mut shapes);
    add_complete_record(&mut shapes, Arc::clone(&deaths), Arc::clone(&broken));
    let heap = Heap::new(shapes);
    let mut heaplet = Heaplet::with_config(&heap, config());

    let first = alloc_complete_record(&mut heaplet, Word::ZERO);
    let second = alloc_complete_record(&mut heaplet, first);
    unsafe { set_object_word(first, 1, second) };
    heaplet.register_finalizable(first);
    heaplet.register_finalizable(second);

    heaplet.allocate_slow_path(0, AllocationAction::ForceMinor);
    assert_eq!(deaths.load(Ordering::SeqCst), 2);
    assert_eq!(broken.load(Ordering::SeqCst), 0);
}

#[test]
fn heaplet_destruction_finalizes_survivors() {
    let deaths = Arc::new(AtomicUsize::new(0));
    let heap = Heap::new(quick_table(&deaths));
    let mut heaplet = Heaplet::with_config(&heap, config());

    let mut roots = [
        alloc_quick_cell(&mut heaplet, 1),
        alloc_quick_cell(&mut heaplet, 2),
        alloc_quick_cell(&mut heaplet, 3),
    ];
    let _handle = heaplet.register_global_root(
        NonNull::new(roots.as_mut_ptr()).unwrap(),
        3 * WORD_SIZE,
    );
    for &cell in roots.iter() {
        heaplet.register_finalizable(cell);
    }
    // Spread the registrations across generations.
    heaplet.allocate_slow_path(0, AllocationAction::ForceMinor);
    assert_eq!(deaths.load(Ordering::SeqCst), 0);

    drop(heaplet);
    assert_eq!(deaths.load(Ordering::SeqCst), 3);
}
