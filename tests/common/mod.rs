//! Shared fixtures for the integration suite: a handful of object shapes in
//! the style a small interpreter would register, plus raw-word helpers.
#![allow(dead_code)]

use core::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hearth::config::{BROKEN_HEART_TYPE_CODE, WORD_SIZE};
use hearth::{Heaplet, ShapeTable, Word};

/// Pointer tag of the two-word headerless pair.
pub const TAG_PAIR: usize = 1;
/// Pointer tag of the four-word headerless graph node.
pub const TAG_QUAD: usize = 2;
/// Pointer tag of the headerful quickly-finalizable cell.
pub const TAG_QCELL: usize = 4;
/// Pointer tag of the headerful complete-object finalizable record.
pub const TAG_CRECORD: usize = 5;

/// Header type codes for the headerful shapes.
pub const QCELL_TYPE_CODE: usize = 0x9C_E110;
pub const CRECORD_TYPE_CODE: usize = 0xC0_4EC0;

pub const PAIR_SIZE: usize = 2 * WORD_SIZE;
pub const QUAD_SIZE: usize = 4 * WORD_SIZE;
pub const QCELL_SIZE: usize = 4 * WORD_SIZE;
pub const CRECORD_SIZE: usize = 4 * WORD_SIZE;

fn memcpy_shape(size: usize) -> hearth::shape::CopyFn {
    Box::new(move |src, dst| {
        unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), size) };
        size
    })
}

fn tag_predicate(tag: usize) -> hearth::shape::HasShapeFn {
    Box::new(move |w: Word| w.is_boxed() && w.tag() == tag)
}

/// Registers the headerless pair shape.
pub fn add_pair(shapes: &mut ShapeTable) {
    shapes.add_headerless(
        "pair",
        tag_predicate(TAG_PAIR),
        Box::new(|_| PAIR_SIZE),
        memcpy_shape(PAIR_SIZE),
    );
}

/// Registers the headerless four-word graph node shape.
pub fn add_quad(shapes: &mut ShapeTable) {
    shapes.add_headerless(
        "quad",
        tag_predicate(TAG_QUAD),
        Box::new(|_| QUAD_SIZE),
        memcpy_shape(QUAD_SIZE),
    );
}

/// Registers the quickly-finalizable cell; `deaths` counts finalizer runs.
pub fn add_quick_cell(shapes: &mut ShapeTable, deaths: Arc<AtomicUsize>) {
    shapes.add_quickly_finalizable(
        "quick-cell",
        tag_predicate(TAG_QCELL),
        Box::new(|_| QCELL_SIZE),
        Box::new(|header: Word| header.raw() == QCELL_TYPE_CODE),
        memcpy_shape(QCELL_SIZE),
        Box::new(|tracer, object| {
            // Slot 1 holds a tagged field; 2 and 3 are unboxed scratch.
            let slot = unsafe { NonNull::new_unchecked((object.as_ptr() as *mut Word).add(1)) };
            tracer.trace(slot);
            QCELL_SIZE
        }),
        Box::new(move |_object| {
            deaths.fetch_add(1, Ordering::SeqCst);
        }),
    );
}

/// Registers the complete-object finalizable record; its finalizer follows
/// the pointer field and records whether the target was consistent.
pub fn add_complete_record(
    shapes: &mut ShapeTable,
    deaths: Arc<AtomicUsize>,
    broken_fields_seen: Arc<AtomicUsize>,
) {
    shapes.add_complete_finalizable(
        "complete-record",
        tag_predicate(TAG_CRECORD),
        Box::new(|_| CRECORD_SIZE),
        Box::new(|header: Word| header.raw() == CRECORD_TYPE_CODE),
        memcpy_shape(CRECORD_SIZE),
        Box::new(|tracer, object| {
            let slot = unsafe { NonNull::new_unchecked((object.as_ptr() as *mut Word).add(1)) };
            tracer.trace(slot);
            CRECORD_SIZE
        }),
        Box::new(move |object| {
            deaths.fetch_add(1, Ordering::SeqCst);
            let field = unsafe { *(object.as_ptr() as *const Word).add(1) };
            if field.is_boxed() {
                let first = unsafe { *(field.untagged() as *const usize) };
                if first == BROKEN_HEART_TYPE_CODE {
                    broken_fields_seen.fetch_add(1, Ordering::SeqCst);
                }
            }
        }),
    );
}

/// A table holding just the pair shape.
pub fn pair_table() -> ShapeTable {
    let mut shapes = ShapeTable::new();
    add_pair(&mut shapes);
    shapes
}

/// A table holding just the quad shape.
pub fn quad_table() -> ShapeTable {
    let mut shapes = ShapeTable::new();
    add_quad(&mut shapes);
    shapes
}

/// Reads tagged word `index` of the object behind `w`.
pub unsafe fn object_word(w: Word, index: usize) -> Word {
    *(w.untagged() as *const Word).add(index)
}

/// Writes tagged word `index` of the object behind `w`, without any barrier.
/// Only valid for freshly allocated (young) objects.
pub unsafe fn set_object_word(w: Word, index: usize, value: Word) {
    *(w.untagged() as *mut Word).add(index) = value;
}

/// Address of tagged word `index` of the object behind `w`.
pub unsafe fn object_slot(w: Word, index: usize) -> NonNull<Word> {
    NonNull::new_unchecked((w.untagged() as *mut Word).add(index))
}

/// `true` when the object behind `w` has been overwritten by a forwarding
/// marker.
pub unsafe fn is_broken_heart(w: Word) -> bool {
    *(w.untagged() as *const usize) == BROKEN_HEART_TYPE_CODE
}

/// Allocates a pair `(first, second)` and returns its tagged word.
pub fn alloc_pair(heaplet: &mut Heaplet, first: Word, second: Word) -> Word {
    let object = heaplet.allocate(PAIR_SIZE);
    let w = Word::boxed(object.as_ptr(), TAG_PAIR);
    unsafe {
        set_object_word(w, 0, first);
        set_object_word(w, 1, second);
    }
    w
}

/// Allocates a quad `[id, edge, edge, spare]` and returns its tagged word.
pub fn alloc_quad(heaplet: &mut Heaplet, id: isize) -> Word {
    let object = heaplet.allocate(QUAD_SIZE);
    let w = Word::boxed(object.as_ptr(), TAG_QUAD);
    unsafe {
        set_object_word(w, 0, Word::immediate(id));
        set_object_word(w, 1, Word::ZERO);
        set_object_word(w, 2, Word::ZERO);
        set_object_word(w, 3, Word::immediate(id ^ 0x5A5A));
    }
    w
}

/// Allocates a quickly-finalizable cell holding `payload`.
pub fn alloc_quick_cell(heaplet: &mut Heaplet, payload: isize) -> Word {
    let object = heaplet.allocate(QCELL_SIZE);
    heaplet.initialize_header(object, Word::from_raw(QCELL_TYPE_CODE));
    let w = Word::boxed(object.as_ptr(), TAG_QCELL);
    unsafe {
        set_object_word(w, 1, Word::immediate(payload));
        set_object_word(w, 2, Word::ZERO);
        set_object_word(w, 3, Word::ZERO);
    }
    w
}

/// Allocates a complete-object record whose pointer field is `field`.
pub fn alloc_complete_record(heaplet: &mut Heaplet, field: Word) -> Word {
    let object = heaplet.allocate(CRECORD_SIZE);
    heaplet.initialize_header(object, Word::from_raw(CRECORD_TYPE_CODE));
    let w = Word::boxed(object.as_ptr(), TAG_CRECORD);
    unsafe {
        set_object_word(w, 1, field);
        set_object_word(w, 2, Word::ZERO);
        set_object_word(w, 3, Word::ZERO);
    }
    w
}
