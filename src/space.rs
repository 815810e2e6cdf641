//! Spaces: logical heap regions backed by intrusive block lists.
//!
//! A space owns a doubly-linked list of blocks, an allocation cursor, a scan
//! cursor (live only during collection), and the list of finalizable objects
//! registered inside it. Spaces never move once created; block headers point
//! back at their owning space, so every space is boxed and pinned for the
//! lifetime of its heaplet.

use core::fmt;
use std::collections::LinkedList;

use crate::block::{self, BlockHeader};
use crate::word::Word;

/// Lifetime class of a space. An object's generation is always the generation
/// tag of its containing space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Generation {
    /// Nursery and ageing steps; collected by every collection kind.
    Young,
    /// Tenured objects; collected by major and global collections.
    Old,
    /// Objects visible to every heaplet of a heap; never collected here.
    Shared,
    /// Detached blocks parked in a heaplet's unused pool.
    Unused,
    /// Values that never move or die.
    Immortal,
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Generation::Young => "young",
            Generation::Old => "old",
            Generation::Shared => "shared",
            Generation::Unused => "unused",
            Generation::Immortal => "immortal",
        })
    }
}

/// A logical heap region.
pub(crate) struct Space {
    pub name: String,
    pub generation: Generation,

    /// Intrusive doubly-linked block list.
    pub head: *mut BlockHeader,
    pub tail: *mut BlockHeader,

    pub allocation_block: *mut BlockHeader,
    pub allocation_pointer: *mut u8,
    pub limit: *mut u8,

    pub scan_block: *mut BlockHeader,
    pub scan_pointer: *mut u8,

    /// Used bytes accumulated from non-current blocks.
    pub used_size: usize,
    /// Total block bytes owned by this space.
    pub allocated_size: usize,

    /// Objects registered for finalization that live in this space.
    pub finalizables: LinkedList<Word>,

    // Transient collection state.
    pub destination: *mut Space,
    pub scavenged_from: bool,
}

impl Space {
    pub fn new(name: String, generation: Generation) -> Box<Space> {
        Box::new(Space {
            name,
            generation,
            head: core::ptr::null_mut(),
            tail: core::ptr::null_mut(),
            allocation_block: core::ptr::null_mut(),
            allocation_pointer: core::ptr::null_mut(),
            limit: core::ptr::null_mut(),
            scan_block: core::ptr::null_mut(),
            scan_pointer: core::ptr::null_mut(),
            used_size: 0,
            allocated_size: 0,
            finalizables: LinkedList::new(),
            destination: core::ptr::null_mut(),
            scavenged_from: false,
        })
    }

    /// Links `b` at the tail of the block list and labels it as ours.
    pub unsafe fn append_block(&mut self, b: *mut BlockHeader) {
        (*b).space = self;
        (*b).generation = self.generation;
        (*b).prev = self.tail;
        (*b).next = core::ptr::null_mut();
        (*b).used_limit = core::ptr::null_mut();
        if self.tail.is_null() {
            self.head = b;
        } else {
            (*self.tail).next = b;
        }
        self.tail = b;
        self.allocated_size += crate::config::BLOCK_SIZE;
    }

    /// Unlinks and returns the first block, if any.
    pub unsafe fn unlink_first_block(&mut self) -> Option<*mut BlockHeader> {
        let b = self.head;
        if b.is_null() {
            return None;
        }
        self.head = (*b).next;
        if self.head.is_null() {
            self.tail = core::ptr::null_mut();
        } else {
            (*self.head).prev = core::ptr::null_mut();
        }
        (*b).prev = core::ptr::null_mut();
        (*b).next = core::ptr::null_mut();
        self.allocated_size -= crate::config::BLOCK_SIZE;
        if self.allocation_block == b {
            self.allocation_block = core::ptr::null_mut();
            self.allocation_pointer = core::ptr::null_mut();
            self.limit = core::ptr::null_mut();
        }
        Some(b)
    }

    /// Unlinks and returns the last block, if any. Used when trimming the
    /// unused pool.
    pub unsafe fn unlink_last_block(&mut self) -> Option<*mut BlockHeader> {
        let b = self.tail;
        if b.is_null() {
            return None;
        }
        self.tail = (*b).prev;
        if self.tail.is_null() {
            self.head = core::ptr::null_mut();
        } else {
            (*self.tail).next = core::ptr::null_mut();
        }
        (*b).prev = core::ptr::null_mut();
        (*b).next = core::ptr::null_mut();
        self.allocated_size -= crate::config::BLOCK_SIZE;
        if self.allocation_block == b {
            self.allocation_block = core::ptr::null_mut();
            self.allocation_pointer = core::ptr::null_mut();
            self.limit = core::ptr::null_mut();
        }
        Some(b)
    }

    /// Installs `b` as the current allocation block. The outgoing block, if
    /// any, is frozen: its `used_limit` is fixed at the current allocation
    /// pointer and its used bytes are folded into `used_size`.
    pub unsafe fn set_allocation_block(&mut self, b: *mut BlockHeader) {
        let outgoing = self.allocation_block;
        if !outgoing.is_null() && outgoing != b {
            (*outgoing).used_limit = self.allocation_pointer;
            self.used_size +=
                self.allocation_pointer as usize - BlockHeader::payload(outgoing) as usize;
        }
        self.allocation_block = b;
        (*b).used_limit = core::ptr::null_mut();
        self.allocation_pointer = BlockHeader::payload(b);
        self.limit = BlockHeader::payload_limit(b);
    }

    /// Installs `b` as the scan block. The scan pointer starts at the current
    /// allocation pointer when resuming inside the allocation block, at the
    /// payload base when advancing into a filled block.
    pub unsafe fn set_scan_block(&mut self, b: *mut BlockHeader, at_allocation_pointer: bool) {
        self.scan_block = b;
        self.scan_pointer = if at_allocation_pointer {
            debug_assert_eq!(b, self.allocation_block);
            self.allocation_pointer
        } else {
            BlockHeader::payload(b)
        };
    }

    /// Total used bytes: frozen blocks plus the partially filled current one.
    pub fn used_size_in_bytes(&self) -> usize {
        let mut used = self.used_size;
        if !self.allocation_block.is_null() {
            // SAFETY: the allocation block is live while linked.
            used += self.allocation_pointer as usize
                - unsafe { BlockHeader::payload(self.allocation_block) } as usize;
        }
        used
    }

    /// `true` once any live object has been copied out of this space during
    /// the current collection.
    #[cfg_attr(not(feature = "sharing"), allow(dead_code))]
    pub fn was_scavenged_from(&self) -> bool {
        self.scavenged_from
    }

    /// Releases every block of this space back to the platform. Only used on
    /// teardown paths; counters are reset.
    pub unsafe fn release_all_blocks(&mut self) {
        while let Some(b) = self.unlink_first_block() {
            block::release(b);
        }
        self.used_size = 0;
        self.allocation_block = core::ptr::null_mut();
        self.allocation_pointer = core::ptr::null_mut();
        self.limit = core::ptr::null_mut();
        self.scan_block = core::ptr::null_mut();
        self.scan_pointer = core::ptr::null_mut();
    }
}

/// Installs a block procured from `unused` (or freshly mapped) as the current
/// allocation block of `s`, appending it to `s`'s block list.
pub(crate) unsafe fn procure_allocation_block(s: *mut Space, unused: *mut Space) {
    let b = match (*unused).unlink_first_block() {
        Some(b) => b,
        None => block::acquire(),
    };
    (*s).append_block(b);
    (*s).set_allocation_block(b);
}

/// Advances `s` to the next block in its list, procuring one when absent.
/// Collection-time only: never triggers a nested collection.
pub(crate) unsafe fn change_allocation_block(s: *mut Space, unused: *mut Space) {
    let current = (*s).allocation_block;
    let next = if current.is_null() {
        core::ptr::null_mut()
    } else {
        (*current).next
    };
    if next.is_null() {
        procure_allocation_block(s, unused);
    } else {
        (*s).set_allocation_block(next);
    }
}

/// Moves every block of `from` into `to` as one O(1) splice.
///
/// Blocks are relabeled with `to`'s identity and generation. When `to` is the
/// unused pool the moved bytes are forgotten and finalizable registrations are
/// dropped; for any other destination both are inherited. The three phases
/// (relabel, splice, reset) are kept separate so the splice alone can run
/// inside a lock-held critical section when migrating into a heap's shared
/// space.
pub(crate) unsafe fn move_all_blocks(to: *mut Space, from: *mut Space) {
    let moved_used = move_phase_relabel(to, from);
    move_phase_splice(to, from, moved_used);
    move_phase_reset(from);
}

/// Phase 1 (no lock needed): freeze the source's allocation block, relabel
/// every block with the destination's identity, and report the moved used
/// bytes.
pub(crate) unsafe fn move_phase_relabel(to: *mut Space, from: *mut Space) -> usize {
    let moved_used = (*from).used_size_in_bytes();
    if !(*from).allocation_block.is_null() {
        let b = (*from).allocation_block;
        (*b).used_limit = (*from).allocation_pointer;
    }
    let mut b = (*from).head;
    while !b.is_null() {
        (*b).space = to;
        (*b).generation = (*to).generation;
        b = (*b).next;
    }
    moved_used
}

/// Phase 2 (run under the owning lock when the destination is shared): splice
/// the lists and update counters.
pub(crate) unsafe fn move_phase_splice(to: *mut Space, from: *mut Space, moved_used: usize) {
    if (*from).head.is_null() {
        return;
    }
    if (*to).tail.is_null() {
        (*to).head = (*from).head;
    } else {
        (*(*to).tail).next = (*from).head;
        (*(*from).head).prev = (*to).tail;
    }
    (*to).tail = (*from).tail;
    (*to).allocated_size += (*from).allocated_size;
    if (*to).generation != Generation::Unused {
        (*to).used_size += moved_used;
        let mut finalizables = std::mem::take(&mut (*from).finalizables);
        (*to).finalizables.append(&mut finalizables);
    } else {
        (*from).finalizables.clear();
    }
}

/// Phase 3 (no lock needed): reset the drained source.
pub(crate) unsafe fn move_phase_reset(from: *mut Space) {
    (*from).head = core::ptr::null_mut();
    (*from).tail = core::ptr::null_mut();
    (*from).allocation_block = core::ptr::null_mut();
    (*from).allocation_pointer = core::ptr::null_mut();
    (*from).limit = core::ptr::null_mut();
    (*from).scan_block = core::ptr::null_mut();
    (*from).scan_pointer = core::ptr::null_mut();
    (*from).used_size = 0;
    (*from).allocated_size = 0;
    (*from).finalizables.clear();
}
