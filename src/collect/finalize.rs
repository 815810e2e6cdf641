//! Two-tier finalization.
//!
//! After scavenging, the candidate list holds every finalizable harvested
//! from this collection's fromspaces, live and dead alike. Deadness is
//! decided once, right after the main scavenge: an entry is dead when it was
//! not evacuated even though its space was drained. Survivors are
//! re-registered at their current address.
//!
//! With only quick finalizers registered, the dead are finalized directly:
//! quick finalizers read nothing but the object's own unboxed fields. Once
//! any complete-object finalizer exists, the dead first get their pointer
//! fields repaired and everything they reference is scavenged back to life,
//! so every complete finalizer observes consistent fields. A dead object can
//! itself be revived by that extra pass (mutual references between dead
//! finalizables); its finalizer then runs on the forwarded copy, whose
//! fields the scavenger settled, and still runs exactly once.
//!
//! A candidate whose containing space was not scavenged by this collection is
//! alive by assumption (an old object during a minor, a shared object); such
//! entries appear when a preceding share collection skipped finalization.

use core::ptr::NonNull;
use std::sync::Arc;

use crate::collect::scavenge::Collector;
use crate::heaplet::Heaplet;
use crate::shape::ShapeTable;
use crate::word::Word;

/// Runs the finalization pipeline until the candidate list stays empty.
pub(crate) unsafe fn run(heaplet: &mut Heaplet, collector: &mut Collector) {
    if !heaplet.shapes.has_finalizable() {
        debug_assert!(heaplet.candidate_dead_finalizables.is_empty());
        return;
    }
    while !heaplet.candidate_dead_finalizables.is_empty() {
        let shapes = Arc::clone(&heaplet.shapes);
        let candidates: Vec<Word> = std::mem::take(&mut heaplet.candidate_dead_finalizables)
            .into_iter()
            .collect();
        let dead: Vec<bool> = candidates.iter().map(|&w| is_dead(w)).collect();

        if shapes.has_complete_finalizable() {
            // Repair the fields of every dead candidate, keeping whatever
            // they reference alive, then settle the extra copies. A candidate
            // revived by an earlier repair is skipped: the scavenger updates
            // its copy instead.
            for (&object, &was_dead) in candidates.iter().zip(dead.iter()) {
                if was_dead && !object.target_is_broken_heart() {
                    collector.scan_object_in_place(object);
                }
            }
            collector.scavenge();
        }
        for (&object, &was_dead) in candidates.iter().zip(dead.iter()) {
            dispose(&shapes, object, was_dead);
        }
    }
}

/// An entry is dead when its space was drained by this collection and the
/// object was still not evacuated once scavenging reached steady state.
unsafe fn is_dead(object: Word) -> bool {
    if object.target_is_broken_heart() {
        return false;
    }
    !(*(*object.block()).space).destination.is_null()
}

/// Settles one candidate according to its snapshot verdict.
unsafe fn dispose(shapes: &ShapeTable, object: Word, was_dead: bool) {
    let current = if object.target_is_broken_heart() {
        object.forwarded()
    } else {
        object
    };
    if was_dead {
        let shape = shapes.shape_of(current);
        let finalize = shape
            .finalizer
            .callback()
            .expect("candidate list holds finalizable shapes only");
        finalize(NonNull::new_unchecked(current.untagged()));
    } else {
        let space = (*current.block()).space;
        (*space).finalizables.push_back(current);
    }
}
