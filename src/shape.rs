//! Client-supplied object shapes.
//!
//! The collector is precise but knows nothing about object layouts: the
//! embedder registers one [`Shape`] per object kind, supplying closures for
//! size, copy, field updating and finalization. Headerless shapes are
//! recognized purely by their tagged-pointer predicate; headerful shapes also
//! carry a header-word discriminator so the scan engine can identify them in
//! tospace. Resolution is a linear walk over a small table, which beats a
//! hash for the expected shape counts.

use core::fmt;
use core::ptr::NonNull;

use crate::config::BROKEN_HEART_TYPE_CODE;
use crate::word::Word;

/// Visitor handed to `update_fields` closures; `trace` must be called exactly
/// once for every tagged slot of the object. The same closure serves
/// scavenging, in-place remembered-set scanning and pre-finalization field
/// repair, so it must not assume the object itself is being moved.
pub trait Tracer {
    /// Processes one tagged slot in place.
    fn trace(&mut self, slot: NonNull<Word>);
}

/// Predicate deciding whether a tagged word has this shape.
pub type HasShapeFn = Box<dyn Fn(Word) -> bool + Send + Sync>;
/// Size in bytes of the object at the given untagged address. Always a
/// multiple of the minimum object size.
pub type SizeFn = Box<dyn Fn(NonNull<u8>) -> usize + Send + Sync>;
/// Header-word discriminator for headerful shapes.
pub type IsTypeCodeFn = Box<dyn Fn(Word) -> bool + Send + Sync>;
/// Copies the object from source to destination, returning the (possibly
/// smaller, never larger) new size in bytes.
pub type CopyFn = Box<dyn Fn(NonNull<u8>, NonNull<u8>) -> usize + Send + Sync>;
/// Traces every tagged slot of a headerful object and returns its size.
pub type UpdateFieldsFn = Box<dyn Fn(&mut dyn Tracer, NonNull<u8>) -> usize + Send + Sync>;
/// Finalizer invoked once when the object is found dead.
pub type FinalizeFn = Box<dyn Fn(NonNull<u8>) + Send + Sync>;

/// Finalization contract of a shape.
pub enum Finalizer {
    /// No finalization.
    None,
    /// The finalizer reads only the object's own unboxed fields.
    Quick(FinalizeFn),
    /// The finalizer may follow pointer fields, which the collector therefore
    /// repairs before invoking it.
    CompleteObject(FinalizeFn),
}

impl Finalizer {
    pub(crate) fn callback(&self) -> Option<&FinalizeFn> {
        match self {
            Finalizer::None => None,
            Finalizer::Quick(f) | Finalizer::CompleteObject(f) => Some(f),
        }
    }
}

/// Per-kind object metadata registered with the collector.
///
/// The four registration entry points on [`ShapeTable`] encode the structural
/// rules in their signatures: headerless shapes cannot carry a discriminator,
/// a field updater or a finalizer; finalizable shapes are necessarily
/// headerful; a shape holds at most one finalizer.
pub struct Shape {
    pub(crate) name: &'static str,
    pub(crate) has_shape: HasShapeFn,
    pub(crate) size_in_bytes: SizeFn,
    pub(crate) is_type_code: Option<IsTypeCodeFn>,
    pub(crate) copy: CopyFn,
    pub(crate) update_fields: Option<UpdateFieldsFn>,
    pub(crate) finalizer: Finalizer,
}

impl Shape {
    /// Shape name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn is_headerful(&self) -> bool {
        self.is_type_code.is_some()
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shape")
            .field("name", &self.name)
            .field("headerful", &self.is_headerful())
            .finish()
    }
}

/// Registry of every shape the embedder's runtime allocates.
///
/// Derived index buffers group shapes by category so the scan and
/// finalization engines iterate only what they need.
#[derive(Default)]
pub struct ShapeTable {
    shapes: Vec<Shape>,
    headerful: Vec<usize>,
    finalizable: Vec<usize>,
    quickly_finalizable: Vec<usize>,
    complete_finalizable: Vec<usize>,
}

impl ShapeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a headerless shape: recognized by predicate alone, scanned
    /// word-by-word, never finalizable.
    pub fn add_headerless(
        &mut self,
        name: &'static str,
        has_shape: HasShapeFn,
        size_in_bytes: SizeFn,
        copy: CopyFn,
    ) {
        self.push(Shape {
            name,
            has_shape,
            size_in_bytes,
            is_type_code: None,
            copy,
            update_fields: None,
            finalizer: Finalizer::None,
        });
    }

    /// Registers a headerful, non-finalizable shape.
    pub fn add_headerful(
        &mut self,
        name: &'static str,
        has_shape: HasShapeFn,
        size_in_bytes: SizeFn,
        is_type_code: IsTypeCodeFn,
        copy: CopyFn,
        update_fields: UpdateFieldsFn,
    ) {
        self.push(Shape {
            name,
            has_shape,
            size_in_bytes,
            is_type_code: Some(is_type_code),
            copy,
            update_fields: Some(update_fields),
            finalizer: Finalizer::None,
        });
    }

    /// Registers a headerful shape with a quick finalizer (unboxed fields
    /// only).
    #[allow(clippy::too_many_arguments)]
    pub fn add_quickly_finalizable(
        &mut self,
        name: &'static str,
        has_shape: HasShapeFn,
        size_in_bytes: SizeFn,
        is_type_code: IsTypeCodeFn,
        copy: CopyFn,
        update_fields: UpdateFieldsFn,
        finalize: FinalizeFn,
    ) {
        self.push(Shape {
            name,
            has_shape,
            size_in_bytes,
            is_type_code: Some(is_type_code),
            copy,
            update_fields: Some(update_fields),
            finalizer: Finalizer::Quick(finalize),
        });
    }

    /// Registers a headerful shape with a complete-object finalizer (may
    /// follow pointer fields).
    #[allow(clippy::too_many_arguments)]
    pub fn add_complete_finalizable(
        &mut self,
        name: &'static str,
        has_shape: HasShapeFn,
        size_in_bytes: SizeFn,
        is_type_code: IsTypeCodeFn,
        copy: CopyFn,
        update_fields: UpdateFieldsFn,
        finalize: FinalizeFn,
    ) {
        self.push(Shape {
            name,
            has_shape,
            size_in_bytes,
            is_type_code: Some(is_type_code),
            copy,
            update_fields: Some(update_fields),
            finalizer: Finalizer::CompleteObject(finalize),
        });
    }

    fn push(&mut self, shape: Shape) {
        if let Some(is_type_code) = &shape.is_type_code {
            assert!(
                !is_type_code(Word::from_raw(BROKEN_HEART_TYPE_CODE)),
                "shape {:?} claims the reserved broken-heart type code",
                shape.name
            );
        }
        let index = self.shapes.len();
        if shape.is_headerful() {
            self.headerful.push(index);
        }
        match shape.finalizer {
            Finalizer::None => {}
            Finalizer::Quick(_) => {
                self.finalizable.push(index);
                self.quickly_finalizable.push(index);
            }
            Finalizer::CompleteObject(_) => {
                self.finalizable.push(index);
                self.complete_finalizable.push(index);
            }
        }
        self.shapes.push(shape);
    }

    /// Number of registered shapes.
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// `true` when no shape has been registered.
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Resolves the shape of a boxed word. An unknown shape is a structural
    /// invariant violation and fatal.
    pub(crate) fn shape_of(&self, w: Word) -> &Shape {
        self.shape_of_indexed(w).1
    }

    /// As [`ShapeTable::shape_of`], also yielding the registration index.
    pub(crate) fn shape_of_indexed(&self, w: Word) -> (usize, &Shape) {
        self.shapes
            .iter()
            .enumerate()
            .find(|(_, s)| (s.has_shape)(w))
            .unwrap_or_else(|| panic!("hearth: no registered shape matches {w:?}"))
    }

    /// Finds the headerful shape whose discriminator accepts `header`, if any.
    pub(crate) fn headerful_matching(&self, header: Word) -> Option<&Shape> {
        self.headerful.iter().map(|&i| &self.shapes[i]).find(|s| {
            s.is_type_code
                .as_ref()
                .map(|p| p(header))
                .unwrap_or(false)
        })
    }

    /// `true` when any complete-object finalizable shape is registered, which
    /// forces the general finalization pipeline.
    pub(crate) fn has_complete_finalizable(&self) -> bool {
        !self.complete_finalizable.is_empty()
    }

    /// `true` when any finalizable shape is registered.
    pub(crate) fn has_finalizable(&self) -> bool {
        !self.finalizable.is_empty()
    }
}

impl fmt::Debug for ShapeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapeTable")
            .field("shapes", &self.shapes)
            .field("headerful", &self.headerful.len())
            .field("finalizable", &self.finalizable.len())
            .finish()
    }
}
