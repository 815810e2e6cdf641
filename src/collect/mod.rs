//! The collection driver.
//!
//! One stop-the-world collection proceeds in fixed steps: drain the SSB, plan
//! the from/to space assignment for the requested kind, clean the spaces that
//! must start empty, reset scan fingers, harvest finalizable registrations,
//! trace roots, scavenge to steady state, finalize, refresh the remembered
//! set, clean the drained fromspaces, flip the survivor spaces into place,
//! and update the sizing heuristics and statistics.

pub(crate) mod finalize;
pub(crate) mod scavenge;
#[cfg(feature = "sharing")]
mod share;

use core::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::heaplet::Heaplet;
use crate::heuristics;
use crate::remembered::RememberedSet;
use crate::space::{self, Generation, Space};
use crate::word::Word;
use self::scavenge::Collector;

/// The kinds of collection, plus the pseudo-kind handed to SSB-flush hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Scavenge the young generation into the next step or the old space.
    Minor,
    /// Scavenge young and old generations into fresh reserves.
    Major,
    /// A major collection coordinated across every heaplet of the heap.
    Global,
    /// Migrate a reachable subgraph into the shared space.
    Share,
    /// Not a collection: identifies SSB-flush hook invocations.
    SsbFlush,
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CollectionKind::Minor => "minor",
            CollectionKind::Major => "major",
            CollectionKind::Global => "global",
            CollectionKind::Share => "share",
            CollectionKind::SsbFlush => "ssb-flush",
        })
    }
}

/// From/to assignment and cleaning schedule for one collection.
struct Plan {
    fromspaces: Vec<*mut Space>,
    tospaces: Vec<*mut Space>,
    /// (space, clean completely): spaces emptied before scavenging; unless
    /// cleaned completely they get one block back immediately.
    clean_before: Vec<(*mut Space, bool)>,
    /// (space, clean completely): drained fromspaces emptied afterwards.
    clean_after: Vec<(*mut Space, bool)>,
}

impl Heaplet {
    /// Performs one collection of the given kind.
    pub(crate) fn collect(&mut self, kind: CollectionKind) {
        debug_assert_ne!(kind, CollectionKind::SsbFlush);
        let start = Instant::now();
        self.sync_allocation_cache();
        // Mutation-time barrier entries must reach the remembered set before
        // it serves as a root source or gets rebuilt.
        self.ssb_flush();
        debug_assert!(self.ssb.is_empty());
        #[cfg(feature = "tracing")]
        tracing::debug!(kind = %kind, "collection begin");

        let plan = self.plan_spaces(kind);
        self.clean_spaces(&plan.clean_before);

        // Reset scan fingers: scanning starts exactly where allocation
        // stands, and the first scan block is the (unfrozen) current one.
        for &tospace in &plan.tospaces {
            // SAFETY: plan spaces are live boxed spaces of this heaplet.
            unsafe {
                if (*tospace).allocation_block.is_null() {
                    space::procure_allocation_block(tospace, &mut *self.unused);
                }
                let allocation_block = (*tospace).allocation_block;
                (*allocation_block).used_limit = core::ptr::null_mut();
                (*tospace).set_scan_block(allocation_block, true);
            }
        }

        // Harvest: every fromspace's registrations become candidates.
        for &fromspace in &plan.fromspaces {
            // SAFETY: as above.
            unsafe {
                let mut harvested = std::mem::take(&mut (*fromspace).finalizables);
                self.candidate_dead_finalizables.append(&mut harvested);
            }
        }

        let initial_remembered_set_size = self.remembered.len();
        self.stats.record_remembered_set(initial_remembered_set_size);
        let young_used_before = self.young_used_bytes(&plan);
        let total_used_before = young_used_before + self.old.used_size_in_bytes();

        let mut collector = Collector::new(
            Arc::clone(&self.shapes),
            plan.tospaces.clone(),
            &mut *self.unused,
        );
        self.handle_roots(kind, &mut collector);
        // SAFETY: spaces and roots are set up for this collection.
        unsafe {
            collector.scavenge();
            if kind != CollectionKind::Share {
                finalize::run(self, &mut collector);
            }
        }

        if matches!(kind, CollectionKind::Major | CollectionKind::Global) {
            self.rebuild_remembered_set();
        }

        let old_alive_after = match kind {
            CollectionKind::Minor => self.old.used_size_in_bytes(),
            CollectionKind::Major | CollectionKind::Global => {
                self.old_reserve.used_size_in_bytes()
            }
            _ => 0,
        };

        self.clean_spaces(&plan.clean_after);

        // Flip: survivors take over from the drained spaces.
        if kind != CollectionKind::Share {
            for i in 0..self.config.ageing_steps {
                std::mem::swap(&mut self.ageing[i], &mut self.young_reserve[i]);
            }
            if matches!(kind, CollectionKind::Major | CollectionKind::Global) {
                std::mem::swap(&mut self.old, &mut self.old_reserve);
            }
        }

        self.update_heuristics(kind, &collector, young_used_before, total_used_before, old_alive_after);

        self.stats.bytes_copied += collector.bytes_copied;
        self.stats.bytes_copied_young += collector.bytes_copied_young;
        #[cfg(feature = "expensive-stats")]
        {
            if self.stats.copies_per_shape.len() < collector.copies_per_shape.len() {
                self.stats.copies_per_shape.resize(collector.copies_per_shape.len(), 0);
            }
            for (total, count) in self
                .stats
                .copies_per_shape
                .iter_mut()
                .zip(collector.copies_per_shape.iter())
            {
                *total += count;
            }
        }
        drop(collector);

        if kind != CollectionKind::Share {
            self.post_collection_hooks.run(kind);
        }

        // Periodic cleanup.
        self.temporary_roots.compact();
        if matches!(kind, CollectionKind::Major | CollectionKind::Global) {
            self.trim_unused_pool();
        }

        self.stats.collections.bump(kind);
        self.stats.record_pause(start.elapsed());
        self.stats.record_remembered_set(self.remembered.len());
        self.refresh_allocation_cache();
        #[cfg(feature = "tracing")]
        tracing::debug!(
            kind = %kind,
            copied = self.stats.bytes_copied,
            pause = ?start.elapsed(),
            "collection end"
        );
    }

    /// Assigns from/to roles and cleaning schedules for `kind`. Also clears
    /// the transient per-space collection state left by the previous cycle.
    fn plan_spaces(&mut self, kind: CollectionKind) -> Plan {
        self.for_each_space(|s| {
            s.destination = core::ptr::null_mut();
            s.scavenged_from = false;
        });
        let steps = self.config.ageing_steps;
        let mut plan = Plan {
            fromspaces: Vec::new(),
            tospaces: Vec::new(),
            clean_before: Vec::new(),
            clean_after: Vec::new(),
        };
        match kind {
            CollectionKind::Minor | CollectionKind::Major | CollectionKind::Global => {
                let terminal: *mut Space = if kind == CollectionKind::Minor {
                    &mut *self.old
                } else {
                    &mut *self.old_reserve
                };
                // Young chain: nursery -> reserve[0] -> ... -> terminal.
                let nursery: *mut Space = &mut *self.nursery;
                plan.fromspaces.push(nursery);
                unsafe {
                    (*nursery).destination = if steps > 0 {
                        &mut *self.young_reserve[0]
                    } else {
                        terminal
                    };
                }
                for i in 0..steps {
                    let ageing: *mut Space = &mut *self.ageing[i];
                    plan.fromspaces.push(ageing);
                    unsafe {
                        (*ageing).destination = if i + 1 < steps {
                            &mut *self.young_reserve[i + 1]
                        } else {
                            terminal
                        };
                    }
                }
                for reserve in self.young_reserve.iter_mut() {
                    let reserve: *mut Space = &mut **reserve;
                    plan.tospaces.push(reserve);
                    plan.clean_before.push((reserve, false));
                }
                plan.tospaces.push(terminal);
                plan.clean_after.push((nursery, false));
                for ageing in self.ageing.iter_mut() {
                    let ageing: *mut Space = &mut **ageing;
                    plan.clean_after.push((ageing, true));
                }
                if kind != CollectionKind::Minor {
                    let old: *mut Space = &mut *self.old;
                    plan.fromspaces.push(old);
                    unsafe { (*old).destination = terminal };
                    plan.clean_before.push((terminal, false));
                    plan.clean_after.push((old, true));
                }
            }
            #[cfg(feature = "sharing")]
            CollectionKind::Share => {
                let shared: *mut Space = &mut *self.shared_own;
                let nursery: *mut Space = &mut *self.nursery;
                let old: *mut Space = &mut *self.old;
                plan.fromspaces.push(nursery);
                plan.fromspaces.push(old);
                unsafe {
                    (*nursery).destination = shared;
                    (*old).destination = shared;
                }
                for ageing in self.ageing.iter_mut() {
                    let ageing: *mut Space = &mut **ageing;
                    plan.fromspaces.push(ageing);
                    unsafe { (*ageing).destination = shared };
                }
                plan.tospaces.push(shared);
                // The reserves sit idle until the follow-up collection; park
                // their blocks entirely.
                for reserve in self.young_reserve.iter_mut() {
                    let reserve: *mut Space = &mut **reserve;
                    plan.clean_before.push((reserve, true));
                }
                let old_reserve: *mut Space = &mut *self.old_reserve;
                plan.clean_before.push((old_reserve, true));
                // Fromspaces keep their broken hearts: the follow-up minor or
                // major restores them before the mutator resumes.
            }
            #[cfg(not(feature = "sharing"))]
            CollectionKind::Share => unreachable!("sharing is disabled"),
            CollectionKind::SsbFlush => unreachable!("ssb-flush is not a collection"),
        }
        plan
    }

    fn clean_spaces(&mut self, schedule: &[(*mut Space, bool)]) {
        for &(s, completely) in schedule {
            // SAFETY: scheduled spaces are live boxed spaces of this heaplet,
            // distinct from the unused pool.
            unsafe {
                let unused: *mut Space = &mut *self.unused;
                space::move_all_blocks(unused, s);
                if !completely {
                    space::procure_allocation_block(s, unused);
                }
            }
        }
    }

    /// Traces the root sources appropriate for `kind`.
    fn handle_roots(&mut self, kind: CollectionKind, collector: &mut Collector) {
        if kind == CollectionKind::Share {
            #[cfg(feature = "sharing")]
            for &slot in &self.objects_being_shared {
                // SAFETY: the share entry point pushed live slot addresses.
                unsafe { collector.handle_word(slot) };
            }
            return;
        }
        self.pre_collection_hooks.run(kind);
        #[cfg(debug_assertions)]
        {
            let mut seen = std::collections::HashSet::new();
            for range in self.global_roots.iter().chain(self.temporary_roots.iter()) {
                assert!(
                    seen.insert(range.base.as_ptr() as usize),
                    "hearth: root range at {:p} registered twice",
                    range.base
                );
            }
        }
        for range in self.global_roots.iter() {
            // SAFETY: registered root ranges are live tagged-slot buffers.
            unsafe { collector.trace_range(range) };
        }
        for range in self.temporary_roots.iter() {
            unsafe { collector.trace_range(range) };
        }
        if kind == CollectionKind::Minor {
            // Old objects with young fields stay put; update them in place.
            let entries: Vec<Word> = self.remembered.iter().collect();
            for updated in entries {
                unsafe { collector.scan_object_in_place(updated) };
            }
        }
    }

    /// Rebuilds the remembered set after a major or global collection:
    /// forwarded entries survive under their new address, dead entries drop.
    fn rebuild_remembered_set(&mut self) {
        let old_set = std::mem::replace(&mut self.remembered, RememberedSet::new());
        for updated in old_set.iter() {
            // SAFETY: entries were valid old-generation objects whose blocks
            // are still intact until the fromspaces are cleaned.
            unsafe {
                if updated.target_is_broken_heart() {
                    let forwarded = updated.forwarded();
                    if forwarded.generation() == Generation::Old {
                        self.remembered.insert(forwarded);
                    }
                }
            }
        }
    }

    fn update_heuristics(
        &mut self,
        kind: CollectionKind,
        collector: &Collector,
        young_used_before: usize,
        total_used_before: usize,
        old_alive_after: usize,
    ) {
        match kind {
            CollectionKind::Minor => {
                if young_used_before > 0 {
                    let ratio = collector.bytes_copied_young as f64 / young_used_before as f64;
                    self.minor_survival.push(ratio.min(1.0));
                }
                let estimate = self.minor_survival.weighted_average(self.config.recent_bias);
                self.stats.minor_survival_estimate = estimate;
                let resized = heuristics::resized_nursery_threshold(
                    &self.config,
                    &self.minor_survival,
                    self.nursery_threshold,
                );
                #[cfg(feature = "tracing")]
                if resized != self.nursery_threshold {
                    tracing::debug!(from = self.nursery_threshold, to = resized, "nursery resized");
                }
                self.nursery_threshold = resized;
            }
            CollectionKind::Major | CollectionKind::Global => {
                if total_used_before > 0 {
                    let ratio = old_alive_after as f64 / total_used_before as f64;
                    self.major_survival.push(ratio.min(1.0));
                }
                let estimate = self.major_survival.weighted_average(self.config.recent_bias);
                self.stats.major_survival_estimate = estimate;
                let resized = heuristics::resized_oldspace_threshold(&self.config, old_alive_after);
                #[cfg(feature = "tracing")]
                if resized != self.oldspace_threshold {
                    tracing::debug!(from = self.oldspace_threshold, to = resized, "oldspace resized");
                }
                self.oldspace_threshold = resized;
            }
            _ => {}
        }
    }

    /// Frees unused-pool blocks beyond the estimated working set. Runs after
    /// major and global collections.
    fn trim_unused_pool(&mut self) {
        let keep = heuristics::unused_pool_keep_bytes(
            &self.config,
            self.nursery_threshold,
            self.oldspace_threshold,
            self.allocated_block_bytes(),
        );
        while self.unused.allocated_size > keep {
            // SAFETY: pool blocks are unlinked before release.
            unsafe {
                match self.unused.unlink_last_block() {
                    Some(b) => crate::block::release(b),
                    None => break,
                }
            }
        }
    }

    fn young_used_bytes(&self, plan: &Plan) -> usize {
        plan.fromspaces
            .iter()
            // SAFETY: plan spaces are live for the duration of the collection.
            .filter(|&&s| unsafe { (*s).generation } == Generation::Young)
            .map(|&s| unsafe { (*s).used_size_in_bytes() })
            .sum()
    }

    fn for_each_space(&mut self, mut f: impl FnMut(&mut Space)) {
        f(&mut self.nursery);
        for s in self.ageing.iter_mut().chain(self.young_reserve.iter_mut()) {
            f(s);
        }
        f(&mut self.old);
        f(&mut self.old_reserve);
        #[cfg(feature = "sharing")]
        f(&mut self.shared_own);
        f(&mut self.unused);
    }
}
