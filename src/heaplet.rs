//! The heaplet: a per-mutator collector instance.
//!
//! A heaplet owns its spaces (nursery, ageing steps and their reserves, old
//! and old-reserve, the unused pool and, with sharing, a shared-own space),
//! the root registries, the remembered set, the SSB, finalization lists,
//! tuning state and statistics. Exactly one mutator thread drives a heaplet;
//! the only cross-thread traffic is global-collection coordination through
//! the owning [`Heap`](crate::Heap), always under the heap lock.

use core::fmt;
use core::ptr::NonNull;
use std::collections::LinkedList;
use std::io::{self, Write};
use std::sync::Arc;

use crate::block::{BlockHeader, PAYLOAD_SIZE};
use crate::collect::CollectionKind;
use crate::config::{HeapletConfig, BROKEN_HEART_TYPE_CODE, MIN_OBJECT_SIZE};
use crate::heap::Heap;
use crate::heuristics::SurvivalWindow;
use crate::remembered::RememberedSet;
use crate::roots::{GlobalRootHandle, GlobalRoots, RootRange, TemporaryRoots};
use crate::shape::ShapeTable;
use crate::space::{self, Generation, Space};
use crate::ssb::Ssb;
use crate::stats::Statistics;
use crate::word::Word;

/// What the allocation slow path has been asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationAction {
    /// Let the thresholds decide between a collection and a block change.
    Default,
    /// Procure a fresh nursery allocation block, collecting nothing.
    BlockChange,
    /// Perform a minor collection.
    ForceMinor,
    /// Perform a major collection.
    ForceMajor,
    /// Perform whichever of minor/major the thresholds indicate.
    ForceEither,
    /// Request a global collection across every heaplet of the heap.
    ForceGlobal,
    /// Reserved for the share entry point; rejected here.
    Share,
}

impl fmt::Display for AllocationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AllocationAction::Default => "default",
            AllocationAction::BlockChange => "block-change",
            AllocationAction::ForceMinor => "force-minor",
            AllocationAction::ForceMajor => "force-major",
            AllocationAction::ForceEither => "force-either",
            AllocationAction::ForceGlobal => "force-global",
            AllocationAction::Share => "share",
        })
    }
}

/// Coordination state of a heaplet, transitioned only under the heap lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsedState {
    /// Owned by a running mutator.
    InUse,
    /// Parked awaiting the end of a global collection.
    ToBeWokenUp,
    /// Voluntarily blocked (e.g. on I/O); not woken by the collector.
    NotToBeWokenUp,
    /// Currently performing a collection.
    Collecting,
}

impl fmt::Display for UsedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UsedState::InUse => "in-use",
            UsedState::ToBeWokenUp => "to-be-woken-up",
            UsedState::NotToBeWokenUp => "not-to-be-woken-up",
            UsedState::Collecting => "collecting",
        })
    }
}

/// Hook invoked around collections or SSB flushes; receives the kind.
pub type CollectionHook = Box<dyn Fn(CollectionKind) + Send>;

/// Opaque handle for hook deregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookHandle(usize);

#[derive(Default)]
pub(crate) struct HookRegistry {
    slots: Vec<Option<CollectionHook>>,
}

impl HookRegistry {
    fn register(&mut self, hook: CollectionHook) -> HookHandle {
        self.slots.push(Some(hook));
        HookHandle(self.slots.len() - 1)
    }

    fn deregister(&mut self, handle: HookHandle) {
        let slot = self
            .slots
            .get_mut(handle.0)
            .unwrap_or_else(|| panic!("hearth: unknown hook handle {handle:?}"));
        assert!(slot.is_some(), "hearth: hook {handle:?} already deregistered");
        *slot = None;
    }

    pub(crate) fn run(&self, kind: CollectionKind) {
        for hook in self.slots.iter().flatten() {
            hook(kind);
        }
    }
}

/// A per-mutator collector instance. See the module documentation.
pub struct Heaplet {
    pub(crate) heap: Arc<Heap>,
    pub(crate) shapes: Arc<ShapeTable>,
    pub(crate) config: HeapletConfig,

    pub(crate) nursery: Box<Space>,
    pub(crate) ageing: Vec<Box<Space>>,
    pub(crate) young_reserve: Vec<Box<Space>>,
    pub(crate) old: Box<Space>,
    pub(crate) old_reserve: Box<Space>,
    #[cfg(feature = "sharing")]
    pub(crate) shared_own: Box<Space>,
    pub(crate) unused: Box<Space>,

    pub(crate) global_roots: GlobalRoots,
    pub(crate) temporary_roots: TemporaryRoots,
    pub(crate) remembered: RememberedSet,
    pub(crate) ssb: Ssb,
    pub(crate) candidate_dead_finalizables: LinkedList<Word>,
    #[cfg(feature = "sharing")]
    pub(crate) objects_being_shared: Vec<*mut Word>,

    pub(crate) pre_collection_hooks: HookRegistry,
    pub(crate) post_collection_hooks: HookRegistry,
    pub(crate) pre_ssb_flush_hooks: HookRegistry,
    pub(crate) post_ssb_flush_hooks: HookRegistry,

    pub(crate) nursery_threshold: usize,
    pub(crate) oldspace_threshold: usize,
    pub(crate) minor_survival: SurvivalWindow,
    pub(crate) major_survival: SurvivalWindow,

    pub(crate) stats: Statistics,
    pub(crate) collection_enabled: bool,

    /// Convenience cache of the nursery allocation cursor, owned by the
    /// mutator between suspension points.
    allocation_pointer: *mut u8,
    allocation_limit: *mut u8,

    pub(crate) used_state: UsedState,
    #[cfg(feature = "sharing")]
    pub(crate) parker: Arc<crate::sync::CondvarCoordination>,
}

// SAFETY: a heaplet is driven by one mutator thread at a time; the only
// cross-thread accesses are performed by the global collector while the owner
// is parked, with every transition serialized by the heap lock.
unsafe impl Send for Heaplet {}

impl Heaplet {
    /// Creates a heaplet with default tuning and registers it with `heap`.
    pub fn new(heap: &Arc<Heap>) -> Box<Heaplet> {
        Self::with_config(heap, HeapletConfig::default())
    }

    /// Creates a heaplet with explicit tuning and registers it with `heap`.
    pub fn with_config(heap: &Arc<Heap>, config: HeapletConfig) -> Box<Heaplet> {
        config.validate();
        let ageing: Vec<Box<Space>> = (0..config.ageing_steps)
            .map(|i| Space::new(format!("ageing-a[{i}]"), Generation::Young))
            .collect();
        let young_reserve: Vec<Box<Space>> = (0..config.ageing_steps)
            .map(|i| Space::new(format!("ageing-b[{i}]"), Generation::Young))
            .collect();
        let nursery_threshold = config.nursery_initial;
        let oldspace_threshold = config.oldspace_initial;
        let ssb = Ssb::new(config.ssb_capacity_words);
        let mut heaplet = Box::new(Heaplet {
            heap: Arc::clone(heap),
            shapes: heap.shape_table(),
            nursery: Space::new("nursery".to_owned(), Generation::Young),
            ageing,
            young_reserve,
            old: Space::new("old-a".to_owned(), Generation::Old),
            old_reserve: Space::new("old-b".to_owned(), Generation::Old),
            #[cfg(feature = "sharing")]
            shared_own: Space::new("shared-own".to_owned(), Generation::Shared),
            unused: Space::new("unused".to_owned(), Generation::Unused),
            global_roots: GlobalRoots::default(),
            temporary_roots: TemporaryRoots::default(),
            remembered: RememberedSet::new(),
            ssb,
            candidate_dead_finalizables: LinkedList::new(),
            #[cfg(feature = "sharing")]
            objects_being_shared: Vec::new(),
            pre_collection_hooks: HookRegistry::default(),
            post_collection_hooks: HookRegistry::default(),
            pre_ssb_flush_hooks: HookRegistry::default(),
            post_ssb_flush_hooks: HookRegistry::default(),
            nursery_threshold,
            oldspace_threshold,
            minor_survival: SurvivalWindow::default(),
            major_survival: SurvivalWindow::default(),
            stats: Statistics::default(),
            collection_enabled: true,
            allocation_pointer: core::ptr::null_mut(),
            allocation_limit: core::ptr::null_mut(),
            used_state: UsedState::InUse,
            #[cfg(feature = "sharing")]
            parker: Arc::new(crate::sync::CondvarCoordination::new()),
            config,
        });
        // The nursery starts with one block so the fast path can run at once.
        unsafe {
            space::procure_allocation_block(&mut *heaplet.nursery, &mut *heaplet.unused);
        }
        heaplet.refresh_allocation_cache();
        heap.register_heaplet(&mut *heaplet);
        heaplet
    }

    // ------------------------------------------------------------------
    // Allocation.
    // ------------------------------------------------------------------

    /// Pointer-bumping fast path. Never suspends; `None` means the slow path
    /// must run.
    #[inline]
    pub fn try_allocate(&mut self, size_in_bytes: usize) -> Option<NonNull<u8>> {
        let p = self.allocation_pointer as usize;
        if p == 0 {
            return None;
        }
        let end = p + size_in_bytes;
        if end > self.allocation_limit as usize {
            return None;
        }
        self.allocation_pointer = end as *mut u8;
        NonNull::new(p as *mut u8)
    }

    /// Allocates `size_in_bytes` in the nursery, collecting as needed.
    pub fn allocate(&mut self, size_in_bytes: usize) -> NonNull<u8> {
        loop {
            if let Some(object) = self.try_allocate(size_in_bytes) {
                return object;
            }
            self.allocate_slow_path(size_in_bytes, AllocationAction::Default);
        }
    }

    /// Allocation slow path: validates the request, resolves `action` against
    /// the collection thresholds, and executes it. On return the fast path is
    /// guaranteed to succeed for the same size.
    pub fn allocate_slow_path(&mut self, size_in_bytes: usize, action: AllocationAction) {
        assert!(
            size_in_bytes <= PAYLOAD_SIZE,
            "hearth: allocation of {size_in_bytes} bytes exceeds the block payload ({PAYLOAD_SIZE})"
        );
        assert_eq!(
            size_in_bytes % MIN_OBJECT_SIZE,
            0,
            "hearth: allocation of {size_in_bytes} bytes is not object-aligned"
        );
        self.sync_allocation_cache();

        let user_forced = matches!(
            action,
            AllocationAction::ForceMinor
                | AllocationAction::ForceMajor
                | AllocationAction::ForceEither
                | AllocationAction::ForceGlobal
                | AllocationAction::Share
        );
        let resolved = match action {
            AllocationAction::Default => {
                if self.should_collect_old() {
                    AllocationAction::ForceMajor
                } else if self.should_collect_nursery() {
                    AllocationAction::ForceMinor
                } else {
                    AllocationAction::BlockChange
                }
            }
            AllocationAction::ForceEither => {
                if self.should_collect_old() {
                    AllocationAction::ForceMajor
                } else {
                    AllocationAction::ForceMinor
                }
            }
            other => other,
        };
        let resolved = if !self.collection_enabled
            && matches!(
                resolved,
                AllocationAction::ForceMinor
                    | AllocationAction::ForceMajor
                    | AllocationAction::ForceGlobal
            ) {
            assert!(
                !user_forced,
                "hearth: {action} requested while collection is disabled"
            );
            AllocationAction::BlockChange
        } else {
            resolved
        };

        match resolved {
            AllocationAction::BlockChange => unsafe {
                space::procure_allocation_block(&mut *self.nursery, &mut *self.unused);
            },
            AllocationAction::ForceMinor => self.collect(CollectionKind::Minor),
            AllocationAction::ForceMajor => self.collect(CollectionKind::Major),
            #[cfg(feature = "sharing")]
            AllocationAction::ForceGlobal => self.request_global_collection(),
            #[cfg(not(feature = "sharing"))]
            AllocationAction::ForceGlobal => self.collect(CollectionKind::Major),
            AllocationAction::Share => {
                panic!("hearth: share requests go through Heaplet::share, not the allocator")
            }
            AllocationAction::Default | AllocationAction::ForceEither => unreachable!(),
        }
        self.refresh_allocation_cache();
        debug_assert!(
            self.allocation_pointer as usize + size_in_bytes <= self.allocation_limit as usize,
            "hearth: slow path failed to make room for {size_in_bytes} bytes"
        );
    }

    /// Writes an object's first word, rejecting the reserved broken-heart
    /// pattern in debug builds.
    pub fn initialize_header(&self, object: NonNull<u8>, header: Word) {
        debug_assert_ne!(
            header.raw(),
            BROKEN_HEART_TYPE_CODE,
            "hearth: object constructed with the reserved broken-heart type code"
        );
        // SAFETY: `object` came out of this heaplet's allocator.
        unsafe { *(object.as_ptr() as *mut Word) = header };
    }

    /// Suspension point that drains the SSB and refreshes the cached
    /// allocation cursor.
    pub fn update_runtime_fields(&mut self) {
        self.sync_allocation_cache();
        self.ssb_flush();
        self.refresh_allocation_cache();
    }

    pub(crate) fn sync_allocation_cache(&mut self) {
        if !self.allocation_pointer.is_null() {
            self.nursery.allocation_pointer = self.allocation_pointer;
        }
    }

    pub(crate) fn refresh_allocation_cache(&mut self) {
        self.allocation_pointer = self.nursery.allocation_pointer;
        self.allocation_limit = self.nursery.limit;
    }

    pub(crate) fn should_collect_nursery(&self) -> bool {
        self.nursery.used_size_in_bytes() + self.ssb.byte_size() >= self.nursery_threshold
    }

    pub(crate) fn should_collect_old(&self) -> bool {
        self.old.used_size_in_bytes() >= self.oldspace_threshold
    }

    // ------------------------------------------------------------------
    // Write barrier.
    // ------------------------------------------------------------------

    /// Stores `value` into a tagged slot of `updated`, applying the
    /// generational and (with sharing) share write barriers.
    pub fn write_field(&mut self, updated: Word, slot: NonNull<Word>, value: Word) {
        #[cfg(feature = "sharing")]
        let value = {
            let mut value = value;
            // SAFETY: boxed words point into live blocks per the heap invariant.
            if updated.is_boxed() && unsafe { updated.generation() } == Generation::Shared {
                self.share_barrier_slow_path(updated, &mut value);
            }
            value
        };
        // SAFETY: the caller hands us a live slot of `updated`.
        unsafe { *slot.as_ptr() = value };
        if updated.is_boxed() && unsafe { updated.generation() } == Generation::Old {
            self.record_updated_object(updated);
        }
    }

    #[inline]
    fn record_updated_object(&mut self, updated: Word) {
        if !self.ssb.push(updated) {
            self.ssb_flush_with_overflow(Some(updated));
        }
    }

    /// Explicitly drains the SSB into the remembered set.
    pub fn ssb_flush(&mut self) {
        self.ssb_flush_with_overflow(None);
    }

    /// Drains the SSB, then handles the entry that did not fit, if any.
    /// Entries whose updated object no longer sits in the old generation are
    /// discarded: young ones are traced by the next minor collection anyway
    /// and shared ones are the share barrier's business.
    pub(crate) fn ssb_flush_with_overflow(&mut self, overflowed: Option<Word>) {
        self.pre_ssb_flush_hooks.run(CollectionKind::SsbFlush);
        let mut drained = 0usize;
        for updated in self.ssb.drain_newest_first() {
            drained += 1;
            // SAFETY: SSB entries are boxed words recorded by the barrier.
            if unsafe { updated.generation() } == Generation::Old {
                self.remembered.insert(updated);
            }
        }
        if let Some(updated) = overflowed {
            drained += 1;
            if unsafe { updated.generation() } == Generation::Old {
                self.remembered.insert(updated);
            }
        }
        self.stats.record_flush(drained);
        self.stats.record_remembered_set(self.remembered.len());
        self.post_ssb_flush_hooks.run(CollectionKind::SsbFlush);
    }

    // ------------------------------------------------------------------
    // Roots.
    // ------------------------------------------------------------------

    /// Registers a permanent range of tagged slots.
    pub fn register_global_root(&mut self, base: NonNull<Word>, bytes: usize) -> GlobalRootHandle {
        self.global_roots.register(RootRange::new(base, bytes))
    }

    /// Removes a permanent root by handle.
    pub fn deregister_global_root(&mut self, handle: GlobalRootHandle) {
        self.global_roots.deregister(handle);
    }

    /// Pushes a scoped range of tagged slots.
    pub fn push_temporary_root(&mut self, base: NonNull<Word>, bytes: usize) {
        self.temporary_roots.push(RootRange::new(base, bytes));
    }

    /// Pops the most recent temporary root.
    pub fn pop_temporary_root(&mut self) {
        assert!(
            self.temporary_roots.pop(),
            "hearth: temporary-root stack underflow"
        );
    }

    /// Current temporary-root stack height, for scoped save/restore.
    pub fn temporary_root_height(&self) -> usize {
        self.temporary_roots.height()
    }

    /// Restores a previously obtained stack height.
    pub fn set_temporary_root_height(&mut self, height: usize) {
        self.temporary_roots.set_height(height);
    }

    /// Drops every temporary root.
    pub fn remove_all_temporary_roots(&mut self) {
        self.temporary_roots.remove_all();
    }

    // ------------------------------------------------------------------
    // Finalization registry.
    // ------------------------------------------------------------------

    /// Registers `object` for finalization when it becomes unreachable. Its
    /// shape must carry a finalizer.
    pub fn register_finalizable(&mut self, object: Word) {
        assert!(object.is_boxed(), "hearth: only boxed objects are finalizable");
        debug_assert!(
            self.shapes.shape_of(object).finalizer.callback().is_some(),
            "hearth: shape of {object:?} has no finalizer"
        );
        // SAFETY: boxed words point into live blocks owned by some space.
        unsafe {
            let space = (*object.block()).space;
            (*space).finalizables.push_back(object);
        }
    }

    // ------------------------------------------------------------------
    // Collection control.
    // ------------------------------------------------------------------

    /// Re-enables collection after [`Heaplet::disable_collection`].
    pub fn enable_collection(&mut self) {
        self.collection_enabled = true;
    }

    /// Disables collection for a critical mutator section. Forced collections
    /// while disabled are fatal; threshold-driven ones degrade to block
    /// changes.
    pub fn disable_collection(&mut self) {
        self.collection_enabled = false;
    }

    /// `true` unless collection is disabled.
    pub fn collection_enabled(&self) -> bool {
        self.collection_enabled
    }

    // ------------------------------------------------------------------
    // Hooks.
    // ------------------------------------------------------------------

    /// Registers a hook to run before every actual collection.
    pub fn register_pre_collection_hook(&mut self, hook: CollectionHook) -> HookHandle {
        self.pre_collection_hooks.register(hook)
    }

    /// Registers a hook to run after every actual collection.
    pub fn register_post_collection_hook(&mut self, hook: CollectionHook) -> HookHandle {
        self.post_collection_hooks.register(hook)
    }

    /// Registers a hook to run before every SSB flush.
    pub fn register_pre_ssb_flush_hook(&mut self, hook: CollectionHook) -> HookHandle {
        self.pre_ssb_flush_hooks.register(hook)
    }

    /// Registers a hook to run after every SSB flush.
    pub fn register_post_ssb_flush_hook(&mut self, hook: CollectionHook) -> HookHandle {
        self.post_ssb_flush_hooks.register(hook)
    }

    /// Deregisters a pre-collection hook.
    pub fn deregister_pre_collection_hook(&mut self, handle: HookHandle) {
        self.pre_collection_hooks.deregister(handle);
    }

    /// Deregisters a post-collection hook.
    pub fn deregister_post_collection_hook(&mut self, handle: HookHandle) {
        self.post_collection_hooks.deregister(handle);
    }

    /// Deregisters a pre-SSB-flush hook.
    pub fn deregister_pre_ssb_flush_hook(&mut self, handle: HookHandle) {
        self.pre_ssb_flush_hooks.deregister(handle);
    }

    /// Deregisters a post-SSB-flush hook.
    pub fn deregister_post_ssb_flush_hook(&mut self, handle: HookHandle) {
        self.post_ssb_flush_hooks.deregister(handle);
    }

    // ------------------------------------------------------------------
    // Observability.
    // ------------------------------------------------------------------

    /// Statistics accumulated so far.
    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Current nursery threshold in bytes.
    pub fn nursery_threshold(&self) -> usize {
        self.nursery_threshold
    }

    /// Current oldspace threshold in bytes.
    pub fn oldspace_threshold(&self) -> usize {
        self.oldspace_threshold
    }

    /// Used bytes currently in the nursery.
    pub fn nursery_used_bytes(&self) -> usize {
        let mut used = self.nursery.used_size_in_bytes();
        // Account for fast-path bumps not yet synced back.
        if !self.allocation_pointer.is_null() {
            used += self.allocation_pointer as usize - self.nursery.allocation_pointer as usize;
        }
        used
    }

    /// Used bytes currently in the old generation.
    pub fn oldspace_used_bytes(&self) -> usize {
        self.old.used_size_in_bytes()
    }

    /// Block bytes parked in the unused pool.
    pub fn unused_pool_bytes(&self) -> usize {
        self.unused.allocated_size
    }

    /// Block bytes owned by every space except the unused pool.
    pub fn allocated_block_bytes(&self) -> usize {
        let mut total = self.nursery.allocated_size
            + self.old.allocated_size
            + self.old_reserve.allocated_size;
        for s in self.ageing.iter().chain(self.young_reserve.iter()) {
            total += s.allocated_size;
        }
        #[cfg(feature = "sharing")]
        {
            total += self.shared_own.allocated_size;
        }
        total
    }

    /// Entries queued in the SSB.
    pub fn ssb_queue_length(&self) -> usize {
        self.ssb.len()
    }

    /// Size of the remembered set.
    pub fn remembered_set_size(&self) -> usize {
        self.remembered.len()
    }

    /// Membership test on the remembered set.
    pub fn remembered_set_contains(&self, w: Word) -> bool {
        self.remembered.contains(w)
    }

    /// Generation of the block containing `w`'s target.
    ///
    /// # Safety
    /// `w` must be a boxed word pointing into a live block of this heap.
    pub unsafe fn generation_of(&self, w: Word) -> Generation {
        w.generation()
    }

    /// Writes a table of every space: generation, block count, used and
    /// allocated bytes.
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "heaplet {:p} ({})", self, self.used_state)?;
        writeln!(
            out,
            "  thresholds: nursery {} bytes, oldspace {} bytes",
            self.nursery_threshold, self.oldspace_threshold
        )?;
        writeln!(
            out,
            "  roots: {} global, {} temporary; remembered set: {} entries",
            self.global_roots.len(),
            self.temporary_roots.height(),
            self.remembered.len()
        )?;
        self.dump_space(out, &self.nursery)?;
        for s in self.ageing.iter().chain(self.young_reserve.iter()) {
            self.dump_space(out, s)?;
        }
        self.dump_space(out, &self.old)?;
        self.dump_space(out, &self.old_reserve)?;
        #[cfg(feature = "sharing")]
        self.dump_space(out, &self.shared_own)?;
        self.dump_space(out, &self.unused)
    }

    fn dump_space<W: Write>(&self, out: &mut W, s: &Space) -> io::Result<()> {
        let mut blocks = 0usize;
        let mut broken_hearts = 0usize;
        let mut b = s.head;
        while !b.is_null() {
            blocks += 1;
            // SAFETY: linked blocks are live; frozen blocks have a valid
            // used_limit delimiting initialized payload.
            unsafe {
                if cfg!(debug_assertions) && !(*b).used_limit.is_null() {
                    broken_hearts += count_broken_hearts(b);
                }
                b = (*b).next;
            }
        }
        write!(
            out,
            "  {:<12} {:<8} {:>3} blocks, {:>8} used / {:>8} allocated",
            s.name,
            s.generation.to_string(),
            blocks,
            s.used_size_in_bytes(),
            s.allocated_size
        )?;
        if cfg!(debug_assertions) && broken_hearts > 0 {
            write!(out, ", {broken_hearts} broken hearts")?;
        }
        writeln!(out)
    }

    #[cfg_attr(not(feature = "sharing"), allow(dead_code))]
    pub(crate) fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }
}

/// Counts broken-heart headers in a frozen block's payload.
unsafe fn count_broken_hearts(b: *mut BlockHeader) -> usize {
    let payload = BlockHeader::payload(b);
    let used = BlockHeader::used_bytes(b);
    let bytes = core::slice::from_raw_parts(payload as *const u8, used);
    let words: &[Word] = zerocopy::FromBytes::slice_from(bytes)
        .expect("block payloads are word-aligned");
    words
        .iter()
        .filter(|w| w.raw() == BROKEN_HEART_TYPE_CODE)
        .count()
}

impl Drop for Heaplet {
    fn drop(&mut self) {
        self.sync_allocation_cache();
        // Shared content outlives the heaplet: hand it to the heap first.
        #[cfg(feature = "sharing")]
        {
            let heap = Arc::clone(&self.heap);
            heap.adopt_shared_own(self);
        }
        // Finalize everything still registered in the private spaces. No
        // collection is running, so fields are consistent and no tracing is
        // needed.
        let mut doomed = std::mem::take(&mut self.candidate_dead_finalizables);
        doomed.append(&mut self.nursery.finalizables);
        for s in self.ageing.iter_mut().chain(self.young_reserve.iter_mut()) {
            doomed.append(&mut s.finalizables);
        }
        doomed.append(&mut self.old.finalizables);
        doomed.append(&mut self.old_reserve.finalizables);
        let shapes = Arc::clone(&self.shapes);
        for object in doomed {
            if let Some(finalize) = shapes.shape_of(object).finalizer.callback() {
                // SAFETY: registered finalizables stay valid until finalized.
                finalize(unsafe { NonNull::new_unchecked(object.untagged()) });
            }
        }
        let heap = Arc::clone(&self.heap);
        heap.deregister_heaplet(self);
        // SAFETY: nothing references this heaplet's blocks anymore.
        unsafe {
            self.nursery.release_all_blocks();
            for s in self.ageing.iter_mut().chain(self.young_reserve.iter_mut()) {
                s.release_all_blocks();
            }
            self.old.release_all_blocks();
            self.old_reserve.release_all_blocks();
            self.unused.release_all_blocks();
        }
    }
}
