//! The sharing engine.
//!
//! A share collection migrates the subgraph reachable from one tagged slot
//! into this heaplet's shared-own space, whose blocks carry the shared
//! generation and are ceded to the heap when the heaplet dies. Because a
//! share collection traces only that slot, every other root may still see
//! pre-share addresses afterwards; a follow-up minor or major collection runs
//! immediately to forward them before the mutator resumes.

use core::ptr::NonNull;

use crate::collect::CollectionKind;
use crate::heaplet::Heaplet;
use crate::space::Generation;
use crate::word::Word;

impl Heaplet {
    /// Shares the object referenced by `slot`, rewriting the slot to the
    /// shared copy. Slots holding immediates, shared or immortal references
    /// are left alone.
    pub fn share(&mut self, slot: NonNull<Word>) {
        assert!(
            self.collection_enabled,
            "hearth: share requested while collection is disabled"
        );
        // SAFETY: the caller hands us a live tagged slot.
        let w = unsafe { *slot.as_ptr() };
        if w.is_unboxed() {
            return;
        }
        // SAFETY: boxed words point into live blocks.
        let generation = unsafe { w.generation() };
        if generation != Generation::Young && generation != Generation::Old {
            return;
        }
        self.objects_being_shared.push(slot.as_ptr());
        self.collect(CollectionKind::Share);
        self.objects_being_shared.clear();
        // The fromspaces are full of broken hearts now; pick the cheapest
        // follow-up that covers every space the share actually drained.
        let follow_up = if self.old.was_scavenged_from() {
            CollectionKind::Major
        } else {
            CollectionKind::Minor
        };
        self.collect(follow_up);
    }

    /// Slow path of the share write barrier: a pointer to `new_pointed` is
    /// about to be stored into the shared object `updated`. Anything neither
    /// shared nor immortal must be shared first so shared objects never
    /// reference private memory. [`Heaplet::write_field`] calls this
    /// automatically; it is public for embedders that emit their own barrier.
    pub fn share_barrier_slow_path(&mut self, updated: Word, new_pointed: &mut Word) {
        debug_assert!(updated.is_boxed());
        let w = *new_pointed;
        if w.is_unboxed() {
            return;
        }
        // SAFETY: boxed words point into live blocks.
        let generation = unsafe { w.generation() };
        if generation == Generation::Shared || generation == Generation::Immortal {
            return;
        }
        self.share(NonNull::from(new_pointed));
    }
}
