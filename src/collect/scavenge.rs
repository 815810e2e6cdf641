//! The scan engine: an extended Cheney scavenger with one (scan, allocation)
//! finger pair per tospace.
//!
//! All of the collector's unsafe pointer arithmetic is confined to this
//! module. The [`Collector`] owns raw pointers to the collection's tospaces
//! and the unused pool; it implements [`Tracer`] so client `update_fields`
//! closures drive [`Collector::handle_word`] on every tagged slot they know
//! about.

use core::ptr::NonNull;
use std::sync::Arc;

use crate::block::BlockHeader;
use crate::config::{BROKEN_HEART_TYPE_CODE, MIN_OBJECT_SIZE, MIN_OBJECT_SIZE_WORDS, WORD_SIZE};
use crate::roots::RootRange;
use crate::shape::{ShapeTable, Tracer};
use crate::space::{self, Generation, Space};
use crate::word::Word;

pub(crate) struct Collector {
    shapes: Arc<ShapeTable>,
    tospaces: Vec<*mut Space>,
    unused: *mut Space,
    pub bytes_copied: u64,
    pub bytes_copied_young: u64,
    #[cfg(feature = "expensive-stats")]
    pub copies_per_shape: Vec<u64>,
}

impl Collector {
    pub fn new(shapes: Arc<ShapeTable>, tospaces: Vec<*mut Space>, unused: *mut Space) -> Self {
        #[cfg(feature = "expensive-stats")]
        let shape_count = shapes.len();
        Collector {
            shapes,
            tospaces,
            unused,
            bytes_copied: 0,
            bytes_copied_young: 0,
            #[cfg(feature = "expensive-stats")]
            copies_per_shape: vec![0; shape_count],
        }
    }

    /// Handles every tagged slot of a root range.
    pub unsafe fn trace_range(&mut self, range: RootRange) {
        let base = range.base.as_ptr();
        for i in 0..range.word_count() {
            self.handle_word(base.add(i));
        }
    }

    /// Updates an object's fields in place, without copying the object
    /// itself. Serves remembered-set roots and dead-finalizable field repair.
    pub unsafe fn scan_object_in_place(&mut self, w: Word) {
        let shapes = Arc::clone(&self.shapes);
        let shape = shapes.shape_of(w);
        let object = NonNull::new_unchecked(w.untagged());
        if let Some(update_fields) = shape.update_fields.as_ref() {
            update_fields(self, object);
        } else {
            let size = (shape.size_in_bytes)(object);
            let base = object.as_ptr() as *mut Word;
            for i in 0..size / WORD_SIZE {
                self.handle_word(base.add(i));
            }
        }
    }

    /// Runs every tospace to steady state: each pass scans every tospace
    /// until its scan finger catches its allocation finger, and the loop ends
    /// once a full pass moves nothing.
    pub unsafe fn scavenge(&mut self) {
        loop {
            let mut moved = false;
            for i in 0..self.tospaces.len() {
                let s = self.tospaces[i];
                while (*s).scan_pointer != (*s).allocation_pointer {
                    self.scan_next(s);
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }
    }

    /// One scan step: advance past a finished block, or process the object
    /// (headerful) or word group (headerless) under the scan finger.
    unsafe fn scan_next(&mut self, s: *mut Space) {
        if (*s).scan_block != (*s).allocation_block
            && (*s).scan_pointer == (*(*s).scan_block).used_limit
        {
            let next = (*(*s).scan_block).next;
            debug_assert!(!next.is_null(), "scan finger ran off the block list");
            // Allocation already placed the next block; never create one here.
            (*s).set_scan_block(next, false);
            return;
        }
        let at = (*s).scan_pointer;
        let header = *(at as *const Word);
        debug_assert_ne!(
            header.raw(),
            BROKEN_HEART_TYPE_CODE,
            "hearth: broken heart under the scan finger of a live tospace"
        );
        let shapes = Arc::clone(&self.shapes);
        if let Some(shape) = shapes.headerful_matching(header) {
            let update_fields = shape
                .update_fields
                .as_ref()
                .expect("headerful shapes carry update_fields");
            let size = update_fields(self, NonNull::new_unchecked(at));
            debug_assert_eq!(size % MIN_OBJECT_SIZE, 0);
            (*s).scan_pointer = at.add(size);
        } else {
            // Headerless payload: every word is a potential boxed field.
            let step_words = if cfg!(debug_assertions) {
                1
            } else {
                MIN_OBJECT_SIZE_WORDS
            };
            for i in 0..step_words {
                self.handle_word((at as *mut Word).add(i));
            }
            (*s).scan_pointer = at.add(step_words * WORD_SIZE);
        }
    }

    /// Updates a single tagged slot: follows broken hearts, evacuates
    /// uncopied objects whose space has a destination, and leaves everything
    /// else alone.
    pub unsafe fn handle_word(&mut self, slot: *mut Word) {
        let w = *slot;
        if w.is_unboxed() {
            return;
        }
        let target = w.untagged();
        if w.target_is_broken_heart() {
            // Already evacuated; adopt the forwarding word, tag included.
            *slot = w.forwarded();
            return;
        }
        let source_block = BlockHeader::of(target);
        let source_space = (*source_block).space;
        let destination = (*source_space).destination;
        if destination.is_null() {
            // Not part of this collection (e.g. an old target during a
            // minor), or immortal. Leave the slot unchanged.
            return;
        }

        let shapes = Arc::clone(&self.shapes);
        let (shape_index, shape) = shapes.shape_of_indexed(w);
        let source = NonNull::new_unchecked(target);
        let old_size = (shape.size_in_bytes)(source);
        debug_assert!(
            old_size >= MIN_OBJECT_SIZE && old_size % MIN_OBJECT_SIZE == 0,
            "hearth: shape {:?} reports a misaligned size {old_size}",
            shape.name()
        );
        let copy_target = self.allocate_in(destination, old_size);
        let new_size = (shape.copy)(source, NonNull::new_unchecked(copy_target));
        assert!(
            new_size <= old_size && new_size % MIN_OBJECT_SIZE == 0,
            "hearth: shape {:?} copy violated the size contract ({old_size} -> {new_size})",
            shape.name()
        );
        if new_size < old_size {
            (*destination).allocation_pointer =
                (*destination).allocation_pointer.sub(old_size - new_size);
        }

        let forwarded = w.with_untagged(copy_target);
        *(target as *mut Word) = Word::from_raw(BROKEN_HEART_TYPE_CODE);
        *(target as *mut Word).add(1) = forwarded;
        *slot = forwarded;

        (*source_space).scavenged_from = true;
        self.bytes_copied += new_size as u64;
        if (*source_block).generation == Generation::Young {
            self.bytes_copied_young += new_size as u64;
        }
        #[cfg(feature = "expensive-stats")]
        {
            self.copies_per_shape[shape_index] += 1;
        }
        #[cfg(not(feature = "expensive-stats"))]
        let _ = shape_index;
    }

    /// Bump allocation inside a tospace, changing its allocation block when
    /// full. Collection-time only; never triggers a nested collection.
    unsafe fn allocate_in(&mut self, s: *mut Space, size: usize) -> *mut u8 {
        loop {
            let p = (*s).allocation_pointer as usize;
            if p != 0 && p + size <= (*s).limit as usize {
                (*s).allocation_pointer = (p + size) as *mut u8;
                return p as *mut u8;
            }
            space::change_allocation_block(s, self.unused);
        }
    }
}

impl Tracer for Collector {
    fn trace(&mut self, slot: NonNull<Word>) {
        // SAFETY: update_fields hands us live slots of the object under scan.
        unsafe { self.handle_word(slot.as_ptr()) }
    }
}
