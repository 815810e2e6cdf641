//! Fixed-size, naturally aligned heap blocks.
//!
//! A block is one `BLOCK_SIZE`-aligned region whose base holds a
//! [`BlockHeader`]; the payload starts at the header size rounded up to the
//! minimum object size, so objects inside stay object-aligned. Because blocks
//! are naturally aligned, any interior pointer can be masked down to its
//! header without consulting any table.

use core::mem;

use crate::config::{BLOCK_SIZE, MIN_OBJECT_SIZE};
use crate::space::{Generation, Space};
use crate::sys;

/// Header at the base of every block.
///
/// `used_limit` is valid only for blocks that are not their space's current
/// allocation block; it marks where scavenging must stop. The current
/// allocation block always carries a null `used_limit`.
#[repr(C)]
pub(crate) struct BlockHeader {
    pub space: *mut Space,
    pub generation: Generation,
    pub prev: *mut BlockHeader,
    pub next: *mut BlockHeader,
    pub used_limit: *mut u8,
}

/// Byte offset of the payload within a block.
pub(crate) const PAYLOAD_OFFSET: usize =
    (mem::size_of::<BlockHeader>() + MIN_OBJECT_SIZE - 1) & !(MIN_OBJECT_SIZE - 1);

/// Usable payload bytes per block; the upper bound for a single allocation.
pub(crate) const PAYLOAD_SIZE: usize = BLOCK_SIZE - PAYLOAD_OFFSET;

const _: () = assert!(PAYLOAD_SIZE >= 2 * MIN_OBJECT_SIZE);

impl BlockHeader {
    /// Recovers the block header owning `ptr` by masking block-alignment bits.
    #[inline]
    pub fn of(ptr: *const u8) -> *mut BlockHeader {
        (ptr as usize & !(BLOCK_SIZE - 1)) as *mut BlockHeader
    }

    /// First payload byte of `block`.
    #[inline]
    pub unsafe fn payload(block: *mut BlockHeader) -> *mut u8 {
        (block as *mut u8).add(PAYLOAD_OFFSET)
    }

    /// One past the last payload byte of `block`.
    #[inline]
    pub unsafe fn payload_limit(block: *mut BlockHeader) -> *mut u8 {
        (block as *mut u8).add(BLOCK_SIZE)
    }

    /// Bytes in use inside `block`, honoring `used_limit` when frozen.
    ///
    /// # Safety
    /// `block` must be a live block that is not its space's current
    /// allocation block (its `used_limit` must be set).
    #[inline]
    pub unsafe fn used_bytes(block: *mut BlockHeader) -> usize {
        debug_assert!(!(*block).used_limit.is_null());
        (*block).used_limit as usize - Self::payload(block) as usize
    }
}

/// Obtains a fresh block from the platform allocator. The mapping base is the
/// release token; it equals the header address. Mapping failure is fatal.
pub(crate) fn acquire() -> *mut BlockHeader {
    // SAFETY: requesting a whole block; the region is zero-filled.
    let base = unsafe { sys::allocate_region(BLOCK_SIZE) }
        .unwrap_or_else(|| panic!("hearth: platform allocator failed to map a {BLOCK_SIZE}-byte block"));
    assert_eq!(
        base as usize & (BLOCK_SIZE - 1),
        0,
        "hearth: platform allocator returned a misaligned block"
    );
    let block = base as *mut BlockHeader;
    // SAFETY: base points at a fresh writable region large enough for a header.
    unsafe {
        (*block).space = core::ptr::null_mut();
        (*block).generation = Generation::Unused;
        (*block).prev = core::ptr::null_mut();
        (*block).next = core::ptr::null_mut();
        (*block).used_limit = core::ptr::null_mut();
    }
    block
}

/// Returns `block` to the platform.
///
/// # Safety
/// `block` must have come from [`acquire`] and must be unlinked from every
/// space list.
pub(crate) unsafe fn release(block: *mut BlockHeader) {
    sys::free_region(block as *mut u8, BLOCK_SIZE);
}
