//! # `hearth` - Generational Copying GC Core
//!
//! A precise, moving, generational, copying garbage collector intended to
//! serve a language runtime. Objects are tagged machine words whose layouts
//! the embedder describes through a shape table; live objects are evacuated
//! between semispaces by an extended Cheney scan, inter-generational pointers
//! flow through a sequential-store-buffer write barrier into a remembered
//! set, and heaplets can optionally migrate object graphs into a shared
//! space visible from sibling execution contexts.
//!
//! ## Architecture
//!
//! - **Blocks** are fixed-size, naturally aligned regions; any tagged pointer
//!   masks down to its block header, which names its space and generation.
//! - **Spaces** chain blocks into logical regions: one nursery, N ageing
//!   steps with reserves, an old space with its reserve, an unused pool and
//!   (with the `sharing` feature) a shared-own space per heaplet.
//! - **Heaplets** are per-mutator collector instances; a **heap** groups
//!   heaplets, owns the global shared space and coordinates global
//!   collections under one lock.
//! - **Shapes** supply size/copy/trace/finalize behavior per object kind;
//!   the collector itself never interprets payloads.
//!
//! ## Example
//!
//! ```rust
//! use hearth::{Heap, Heaplet, ShapeTable, Word};
//!
//! // A two-word headerless cons cell, recognized by pointer tag 1.
//! let mut shapes = ShapeTable::new();
//! shapes.add_headerless(
//!     "pair",
//!     Box::new(|w: Word| w.is_boxed() && w.tag() == 1),
//!     Box::new(|_| 16),
//!     Box::new(|src, dst| {
//!         unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), 16) };
//!         16
//!     }),
//! );
//!
//! let heap = Heap::new(shapes);
//! let mut heaplet = Heaplet::new(&heap);
//! let pair = heaplet.allocate(16);
//! let word = Word::boxed(pair.as_ptr(), 1);
//! # let _ = word;
//! ```
//!
//! ## Contract
//!
//! The collector either succeeds or aborts: contract violations (oversized
//! allocations, forced collections while disabled, malformed shapes) and
//! platform failures panic with a diagnostic, and the release profile builds
//! with `panic = "abort"`. No recoverable errors surface to the mutator.

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod block;
pub mod collect;
pub mod config;
mod heap;
mod heaplet;
mod heuristics;
mod remembered;
mod roots;
pub mod shape;
mod space;
mod ssb;
pub mod stats;
mod sync;
mod sys;
pub mod word;

pub use collect::CollectionKind;
pub use config::HeapletConfig;
pub use heap::Heap;
pub use heaplet::{AllocationAction, CollectionHook, Heaplet, HookHandle, UsedState};
pub use roots::GlobalRootHandle;
pub use shape::{Finalizer, Shape, ShapeTable, Tracer};
pub use space::Generation;
pub use stats::Statistics;
pub use word::Word;

// Compile-time geometry claims the pointer masking relies on.
const _: () = {
    use core::mem;

    // A tagged word is exactly one machine word.
    assert!(mem::size_of::<Word>() == mem::size_of::<usize>());
    assert!(mem::align_of::<Word>() == mem::align_of::<usize>());

    // Two words always fit in the smallest object, so a broken heart
    // (reserved header + forwarding word) can overwrite any dead object.
    assert!(config::MIN_OBJECT_SIZE >= 2 * config::WORD_SIZE);

    // The reserved pattern must never collide with the null word.
    assert!(config::BROKEN_HEART_TYPE_CODE != 0);
};
