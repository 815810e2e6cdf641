//! Root registration.
//!
//! Global roots are permanent ranges of tagged slots, deregistered by opaque
//! handle; slots are never reused so iteration preserves insertion order.
//! Temporary roots form a stack of ranges with scoped height save/restore,
//! which is how interpreter frames protect their in-flight values.

use core::ptr::NonNull;

use crate::config::WORD_SIZE;
use crate::word::Word;

/// A contiguous range of tagged slots treated as always live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RootRange {
    pub base: NonNull<Word>,
    pub bytes: usize,
}

impl RootRange {
    pub fn new(base: NonNull<Word>, bytes: usize) -> Self {
        assert_eq!(bytes % WORD_SIZE, 0, "root range must cover whole words");
        Self { base, bytes }
    }

    pub fn word_count(&self) -> usize {
        self.bytes / WORD_SIZE
    }
}

/// Opaque handle returned by global-root registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalRootHandle(usize);

/// Insertion-ordered registry of permanent roots.
#[derive(Default)]
pub(crate) struct GlobalRoots {
    slots: Vec<Option<RootRange>>,
}

impl GlobalRoots {
    pub fn register(&mut self, range: RootRange) -> GlobalRootHandle {
        self.slots.push(Some(range));
        GlobalRootHandle(self.slots.len() - 1)
    }

    pub fn deregister(&mut self, handle: GlobalRootHandle) {
        let slot = self
            .slots
            .get_mut(handle.0)
            .unwrap_or_else(|| panic!("hearth: unknown global root handle {handle:?}"));
        assert!(slot.is_some(), "hearth: global root {handle:?} already deregistered");
        *slot = None;
    }

    pub fn iter(&self) -> impl Iterator<Item = RootRange> + '_ {
        self.slots.iter().filter_map(|s| *s)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

/// Capacity above which an underpopulated temporary-root stack gives memory
/// back after intensive growth.
const COMPACT_THRESHOLD: usize = 256;

/// Stack of scoped root ranges.
#[derive(Default)]
pub(crate) struct TemporaryRoots {
    stack: Vec<RootRange>,
}

impl TemporaryRoots {
    pub fn push(&mut self, range: RootRange) {
        self.stack.push(range);
    }

    pub fn pop(&mut self) -> bool {
        self.stack.pop().is_some()
    }

    /// Current stack height, for scoped save/restore.
    pub fn height(&self) -> usize {
        self.stack.len()
    }

    /// Restores a height previously obtained from [`TemporaryRoots::height`].
    pub fn set_height(&mut self, height: usize) {
        assert!(
            height <= self.stack.len(),
            "hearth: temporary-root height {height} exceeds current {}",
            self.stack.len()
        );
        self.stack.truncate(height);
    }

    pub fn remove_all(&mut self) {
        self.stack.clear();
    }

    /// Reclaims backing storage after a burst of growth.
    pub fn compact(&mut self) {
        if self.stack.capacity() > COMPACT_THRESHOLD && self.stack.capacity() > 4 * self.stack.len()
        {
            self.stack.shrink_to_fit();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = RootRange> + '_ {
        self.stack.iter().copied()
    }
}
