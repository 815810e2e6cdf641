#![cfg(windows)]

use std::ptr;
use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};

/// Reserves and commits a zero-filled region of `size` bytes. Allocation
/// granularity guarantees block alignment. Returns `None` on failure.
pub unsafe fn allocate_region(size: usize) -> Option<*mut u8> {
    let ptr = VirtualAlloc(ptr::null_mut(), size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE);
    if ptr.is_null() {
        None
    } else {
        Some(ptr as *mut u8)
    }
}

/// Releases a region previously returned by [`allocate_region`].
pub unsafe fn free_region(ptr: *mut u8, _size: usize) {
    // MEM_RELEASE frees the entire reservation. Size must be 0.
    VirtualFree(ptr as *mut _, 0, MEM_RELEASE);
}
