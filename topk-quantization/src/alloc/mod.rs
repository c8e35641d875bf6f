/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Memory sources for packed top-K buffers.
//!
//! Buffers are either allocated through the device path (see [`crate::device`]) or
//! borrowed from a pooled allocator implementing [`AllocatorCore`]. The pooled allocator
//! shipped with this crate is the [`BumpAllocator`], an arena over a single pre-reserved
//! region.

use std::{alloc::Layout, ptr::NonNull};

mod aligned;
mod bump;
mod traits;

pub use aligned::AlignedAllocator;
pub use bump::BumpAllocator;
pub use traits::{AllocatorCore, AllocatorError};

/// A handle to Rust's global allocator. This type does not support allocations of size 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalAllocator;

// SAFETY: This is a simple wrapper around Rust's built-in zeroed allocation and
// deallocation methods. Zero sized layouts are rejected.
//
// The returned slice from `allocate` always has the exact size and alignment as `layout`.
unsafe impl AllocatorCore for GlobalAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocatorError> {
        if layout.size() == 0 {
            return Err(AllocatorError);
        }

        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = std::ptr::slice_from_raw_parts_mut(ptr, layout.size());
        NonNull::new(ptr).ok_or(AllocatorError)
    }

    unsafe fn deallocate(&self, ptr: NonNull<[u8]>, layout: Layout) {
        // SAFETY: The caller has the responsibility to ensure that `ptr` and `layout`
        // came from a previous allocation.
        unsafe { std::alloc::dealloc(ptr.as_ptr().cast::<u8>(), layout) }
    }
}

////////////
// Scoped //
////////////

trait DebugAllocator: AllocatorCore + std::fmt::Debug {}
impl<T> DebugAllocator for T where T: AllocatorCore + std::fmt::Debug {}

/// A type-erased reference to a shared pool.
///
/// Matrices constructed with a `ScopedAllocator` borrow the pool for their whole lifetime,
/// so the pool is statically guaranteed to outlive every buffer it handed out.
#[derive(Debug, Clone, Copy)]
pub struct ScopedAllocator<'a> {
    allocator: &'a dyn DebugAllocator,
}

impl<'a> ScopedAllocator<'a> {
    /// Construct a new `ScopedAllocator` around the provided `allocator`.
    pub const fn new<T>(allocator: &'a T) -> Self
    where
        T: AllocatorCore + std::fmt::Debug,
    {
        Self { allocator }
    }
}

impl ScopedAllocator<'static> {
    /// A convenience method for construcing a `ScopedAllocator` around the
    /// [`GlobalAllocator`].
    pub const fn global() -> Self {
        Self {
            allocator: &GlobalAllocator,
        }
    }
}

// SAFETY: This allocator simply delegates to the underlying allocator.
unsafe impl AllocatorCore for ScopedAllocator<'_> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocatorError> {
        self.allocator.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<[u8]>, layout: Layout) {
        // SAFETY: Inherited from the caller.
        unsafe { self.allocator.deallocate(ptr, layout) }
    }
}

///////////
// Tests //
///////////
