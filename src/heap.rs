//! The heap: a container of heaplets.
//!
//! The heap owns the shape table, the registry of live heaplets, and (with
//! sharing) the global shared space plus the request word that coordinates
//! global collections. One mutex guards all of it; heaplet `used_state`
//! transitions and list membership changes happen only under that lock. The
//! lock state sits behind a cache pad so parking traffic from one heaplet
//! does not false-share with its siblings' hot data.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_utils::CachePadded;

use crate::heaplet::Heaplet;
use crate::shape::ShapeTable;
use crate::stats::Statistics;

#[cfg(feature = "sharing")]
use crate::collect::CollectionKind;
#[cfg(feature = "sharing")]
use crate::heaplet::UsedState;
#[cfg(feature = "sharing")]
use crate::space::{self, Generation, Space};
#[cfg(feature = "sharing")]
use crate::sync::Coordination;

/// Pending coordination request, shared by every heaplet of a heap.
#[cfg(feature = "sharing")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    NoRequest,
    GlobalGc,
}

pub(crate) struct HeapState {
    in_use: Vec<*mut Heaplet>,
    not_in_use: Vec<*mut Heaplet>,
    #[cfg(feature = "sharing")]
    request: Request,
    #[cfg(feature = "sharing")]
    shared: Box<Space>,
}

// SAFETY: the raw heaplet pointers are only dereferenced by the thread
// performing a global collection, while every owner is parked; all accesses
// are serialized by the surrounding mutex.
unsafe impl Send for HeapState {}

/// A container of heaplets with a global shared space. Created once,
/// destroyed after every heaplet is gone.
pub struct Heap {
    shapes: Arc<ShapeTable>,
    state: CachePadded<Mutex<HeapState>>,
}

impl Heap {
    /// Creates a heap around a client-populated shape table.
    pub fn new(shapes: ShapeTable) -> Arc<Heap> {
        Arc::new(Heap {
            shapes: Arc::new(shapes),
            state: CachePadded::new(Mutex::new(HeapState {
                in_use: Vec::new(),
                not_in_use: Vec::new(),
                #[cfg(feature = "sharing")]
                request: Request::NoRequest,
                #[cfg(feature = "sharing")]
                shared: Space::new("shared".to_owned(), Generation::Shared),
            })),
        })
    }

    pub(crate) fn shape_table(&self) -> Arc<ShapeTable> {
        Arc::clone(&self.shapes)
    }

    fn lock_state(&self) -> MutexGuard<'_, HeapState> {
        self.state
            .lock()
            .unwrap_or_else(|_| panic!("hearth: heap lock poisoned"))
    }

    pub(crate) fn register_heaplet(&self, heaplet: *mut Heaplet) {
        self.lock_state().in_use.push(heaplet);
    }

    pub(crate) fn deregister_heaplet(&self, heaplet: *mut Heaplet) {
        let mut st = self.lock_state();
        if let Some(pos) = st.in_use.iter().position(|&p| p == heaplet) {
            st.in_use.swap_remove(pos);
        } else if let Some(pos) = st.not_in_use.iter().position(|&p| p == heaplet) {
            st.not_in_use.swap_remove(pos);
        }
    }

    /// Number of heaplets currently attached.
    pub fn heaplet_count(&self) -> usize {
        let st = self.lock_state();
        st.in_use.len() + st.not_in_use.len()
    }

    /// Used bytes in the heap-global shared space (excluding shared-own
    /// spaces still attached to live heaplets).
    #[cfg(feature = "sharing")]
    pub fn shared_used_bytes(&self) -> usize {
        self.lock_state().shared.used_size_in_bytes()
    }

    /// Splices a dying heaplet's shared-own blocks into the global shared
    /// space. Only the splice itself runs under the heap lock.
    #[cfg(feature = "sharing")]
    pub(crate) fn adopt_shared_own(&self, heaplet: &mut Heaplet) {
        let from: *mut Space = &mut *heaplet.shared_own;
        let to: *mut Space = {
            let mut st = self.lock_state();
            let shared: *mut Space = &mut *st.shared;
            shared
        };
        // SAFETY: `to` is pinned inside the heap state box; `from` belongs to
        // the dying heaplet, whose thread is the only one touching it. Phase
        // 1 and 3 touch only the source and the (stable) destination labels;
        // phase 2 mutates the shared list and runs under the lock.
        unsafe {
            let moved_used = space::move_phase_relabel(to, from);
            {
                let _st = self.lock_state();
                space::move_phase_splice(to, from, moved_used);
            }
            space::move_phase_reset(from);
        }
    }

    /// Visits the statistics of every attached heaplet.
    ///
    /// # Safety
    /// The caller must guarantee no mutator is concurrently driving any
    /// heaplet of this heap (e.g. during startup, shutdown, or a quiescent
    /// phase), since the statistics are read without synchronization.
    pub unsafe fn for_each_heaplet_statistics(&self, mut f: impl FnMut(&Statistics)) {
        let st = self.lock_state();
        for &p in st.in_use.iter().chain(st.not_in_use.iter()) {
            f((*p).statistics());
        }
    }

    /// Writes a summary of the heap: heaplet counts and the shared space.
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let st = self.lock_state();
        writeln!(
            out,
            "heap: {} heaplets in use, {} not in use",
            st.in_use.len(),
            st.not_in_use.len()
        )?;
        #[cfg(feature = "sharing")]
        writeln!(
            out,
            "  shared: {} used / {} allocated bytes",
            st.shared.used_size_in_bytes(),
            st.shared.allocated_size
        )?;
        Ok(())
    }

    /// Services a pending global-collection request, releasing the heap lock
    /// on every path. The caller must have moved `this` into the state it
    /// wants to keep; see the suspension-point entry points on [`Heaplet`].
    #[cfg(feature = "sharing")]
    fn global_gc_if_needed_and_unlock(&self, mut st: MutexGuard<'_, HeapState>, this: &mut Heaplet) {
        if st.request == Request::NoRequest {
            return;
        }
        let me = this as *mut Heaplet;
        let was_in_use = if let Some(pos) = st.in_use.iter().position(|&p| p == me) {
            st.in_use.swap_remove(pos);
            st.not_in_use.push(me);
            true
        } else {
            false
        };
        if was_in_use && !st.in_use.is_empty() {
            // Someone else still runs; park until the last mutator standing
            // has collected on our behalf. Lock released before blocking.
            this.used_state = UsedState::ToBeWokenUp;
            let parker = Arc::clone(&this.parker);
            drop(st);
            parker.park();
            return;
        }
        if !st.in_use.is_empty() {
            // A voluntary blocker saw the request but mutators remain; one of
            // them will perform the collection.
            return;
        }

        // Last mutator standing: collect every detached heaplet, then wake
        // the ones waiting on us.
        this.used_state = UsedState::Collecting;
        let victims: Vec<*mut Heaplet> = st.not_in_use.clone();
        for &p in &victims {
            if p == me {
                this.collect(CollectionKind::Global);
            } else {
                // SAFETY: p's owner is parked or voluntarily blocked; its
                // state transitions are serialized by the lock we hold.
                unsafe { (*p).collect(CollectionKind::Global) };
            }
        }
        st.request = Request::NoRequest;
        for &p in &victims {
            if p == me {
                continue;
            }
            // SAFETY: as above.
            unsafe {
                if (*p).used_state == UsedState::ToBeWokenUp {
                    (*p).used_state = UsedState::InUse;
                    let pos = st.not_in_use.iter().position(|&q| q == p).unwrap();
                    st.not_in_use.swap_remove(pos);
                    st.in_use.push(p);
                    (*p).parker.unpark();
                }
            }
        }
        if was_in_use {
            let pos = st.not_in_use.iter().position(|&q| q == me).unwrap();
            st.not_in_use.swap_remove(pos);
            st.in_use.push(me);
            this.used_state = UsedState::InUse;
        } else {
            this.used_state = UsedState::NotToBeWokenUp;
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        #[cfg(feature = "sharing")]
        {
            let shapes = Arc::clone(&self.shapes);
            let st = self
                .state
                .get_mut()
                .unwrap_or_else(|_| panic!("hearth: heap lock poisoned"));
            assert!(
                st.in_use.is_empty() && st.not_in_use.is_empty(),
                "hearth: heap destroyed before its heaplets"
            );
            let doomed = std::mem::take(&mut st.shared.finalizables);
            for object in doomed {
                if let Some(finalize) = shapes.shape_of(object).finalizer.callback() {
                    // SAFETY: shared finalizables stay valid until the heap dies.
                    finalize(unsafe { core::ptr::NonNull::new_unchecked(object.untagged()) });
                }
            }
            // SAFETY: no heaplet references the shared blocks anymore.
            unsafe { st.shared.release_all_blocks() };
        }
    }
}

/// Suspension-point entry points tying a heaplet to its heap's coordination.
#[cfg(feature = "sharing")]
impl Heaplet {
    /// Asks every heaplet of the heap to reach a safe point and performs (or
    /// waits out) a collection of all of them.
    pub fn request_global_collection(&mut self) {
        let heap = Arc::clone(self.heap());
        let mut st = heap.lock_state();
        st.request = Request::GlobalGc;
        heap.global_gc_if_needed_and_unlock(st, self);
    }

    /// Periodic suspension point honoring a pending global-collection
    /// request.
    pub fn safe_point(&mut self) {
        let heap = Arc::clone(self.heap());
        let st = heap.lock_state();
        heap.global_gc_if_needed_and_unlock(st, self);
    }

    /// Declares this heaplet parked for external reasons (e.g. blocking
    /// I/O): it remains collectable but will not be woken by the collector.
    pub fn before_blocking(&mut self) {
        let heap = Arc::clone(self.heap());
        let mut st = heap.lock_state();
        let me = self as *mut Heaplet;
        if let Some(pos) = st.in_use.iter().position(|&p| p == me) {
            st.in_use.swap_remove(pos);
            st.not_in_use.push(me);
        }
        self.used_state = UsedState::NotToBeWokenUp;
        heap.global_gc_if_needed_and_unlock(st, self);
    }

    /// Reattaches this heaplet after [`Heaplet::before_blocking`].
    pub fn after_blocking(&mut self) {
        let heap = Arc::clone(self.heap());
        let mut st = heap.lock_state();
        let me = self as *mut Heaplet;
        if let Some(pos) = st.not_in_use.iter().position(|&p| p == me) {
            st.not_in_use.swap_remove(pos);
            st.in_use.push(me);
        }
        self.used_state = UsedState::InUse;
        heap.global_gc_if_needed_and_unlock(st, self);
    }
}
