/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{
    alloc::Layout,
    ptr::NonNull,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use super::{AlignedAllocator, AllocatorCore, AllocatorError};
use crate::num::PowerOfTwo;

/// A pooled [`AllocatorCore`] that reserves one large region up front and carves packed
/// buffers out of it.
///
/// Individual deallocations are no-ops: the region is returned to the system when the
/// last clone of the allocator is dropped. This makes it a good fit for per-iteration
/// staging areas where every buffer has the same lifetime.
///
/// Memory allocation through this type is thread safe.
#[derive(Debug, Clone)]
pub struct BumpAllocator {
    inner: Arc<Arena>,
}

#[derive(Debug)]
struct Arena {
    base: NonNull<[u8]>,
    layout: Layout,
    capacity: usize,
    allocator: AlignedAllocator,
    head: AtomicUsize,
}

// SAFETY: The arena only hands out disjoint sub-regions via an atomic head, so it can be
// sent between threads.
unsafe impl Send for Arena {}

// SAFETY: See above. Concurrent `allocate` calls race only on `head`.
unsafe impl Sync for Arena {}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: `base` was obtained from `allocator` with `layout` in `BumpAllocator::new`.
        unsafe { self.allocator.deallocate(self.base, self.layout) }
    }
}

impl BumpAllocator {
    /// Construct a new [`BumpAllocator`] with room for `capacity` bytes. The base pointer
    /// of the region will be aligned to at least `alignment` bytes.
    ///
    /// Returns an error if the region cannot be reserved.
    pub fn new(capacity: usize, alignment: PowerOfTwo) -> Result<Self, AllocatorError> {
        let allocator = AlignedAllocator::new(alignment);
        // The global allocator rejects empty layouts, so reserve at least one byte.
        let layout = Layout::from_size_align(capacity.max(1), 1).map_err(|_| AllocatorError)?;
        let base = allocator.allocate(layout)?;

        tracing::trace!(capacity, alignment = alignment.raw(), "reserved bump arena");
        Ok(Self {
            inner: Arc::new(Arena {
                base,
                layout,
                capacity,
                allocator,
                head: AtomicUsize::new(0),
            }),
        })
    }

    /// Return the capacity this allocator was created with.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Return the number of bytes consumed so far, including alignment padding.
    pub fn used(&self) -> usize {
        self.inner.head.load(Ordering::Relaxed)
    }

    /// Return a pointer to the base of the region behind this allocator.
    pub fn as_ptr(&self) -> *const u8 {
        self.inner.base.cast::<u8>().as_ptr().cast_const()
    }
}

/// Given a `base` address and a current `offset` from that base, compute a `new_offset`
/// such that the range spanned by `[base + offset, base + new_offset)` has sufficient room
/// to fulfill the allocation request in `layout`.
fn next(base: usize, offset: usize, layout: Layout) -> Option<usize> {
    let p = PowerOfTwo::from_align(&layout);
    p.arg_checked_next_multiple_of(base + offset)
        .map(|x| x - base)
        .and_then(|x| x.checked_add(layout.size()))
}

// SAFETY: The implementation ensures that upon success
//
// 1. Allocations provided from the region are properly aligned, regardless of the current
//    state of the `head` offset.
// 2. The allocation is always of the requested size.
//
// If both of these cannot be satisfied without running off the end of the region, an
// error is returned.
unsafe impl AllocatorCore for BumpAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocatorError> {
        let base = self.as_ptr() as usize;

        let compute_next = |head: usize| -> Result<usize, AllocatorError> {
            let new_head = next(base, head, layout).ok_or(AllocatorError)?;
            if new_head > self.capacity() {
                Err(AllocatorError)
            } else {
                Ok(new_head)
            }
        };

        // Spin until we successfully update `head`. Success means we own the span between
        // `old_head` and `new_head`.
        let mut old_head = self.inner.head.load(Ordering::Relaxed);
        let mut new_head = compute_next(old_head)?;
        while let Err(h) = self.inner.head.compare_exchange(
            old_head,
            new_head,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            old_head = h;
            new_head = compute_next(h)?;
        }

        // SAFETY: `old_head` is guaranteed to be within the region.
        let ptr = unsafe { self.as_ptr().add(old_head) };

        // SAFETY: The computation of `new_head` ensures that we have space to do this
        // alignment.
        let ptr =
            unsafe { ptr.add(PowerOfTwo::from_align(&layout).arg_align_offset(ptr as usize)) };

        NonNull::new(std::ptr::slice_from_raw_parts_mut(
            ptr.cast_mut(),
            layout.size(),
        ))
        .ok_or(AllocatorError)
    }

    // No work to do: the region is released with the last clone.
    unsafe fn deallocate(&self, _ptr: NonNull<[u8]>, _layout: Layout) {}
}

///////////
// Tests //
///////////
