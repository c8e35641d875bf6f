/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{
    alloc::Layout,
    ptr::NonNull,
    sync::{Arc, Mutex},
};

use crate::alloc::{AllocatorCore, AllocatorError, GlobalAllocator};

/// An allocator that always fails.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AlwaysFails;

// SAFETY: This always fails.
unsafe impl AllocatorCore for AlwaysFails {
    fn allocate(&self, _layout: Layout) -> Result<NonNull<[u8]>, AllocatorError> {
        Err(AllocatorError)
    }

    unsafe fn deallocate(&self, _ptr: NonNull<[u8]>, _layout: Layout) {}
}

#[derive(Debug, Default)]
struct Log {
    allocations: Vec<(usize, Layout)>,
    deallocations: Vec<(usize, Layout)>,
}

/// An allocator that forwards to the [`GlobalAllocator`] and records the address and
/// layout of every `allocate` and `deallocate` call.
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub(crate) struct CountingAllocator {
    log: Arc<Mutex<Log>>,
}

impl CountingAllocator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with_log<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Log) -> R,
    {
        let mut guard = self.log.lock().unwrap();
        f(&mut guard)
    }

    /// Every successful allocation, in order.
    pub(crate) fn allocations(&self) -> Vec<(usize, Layout)> {
        self.with_log(|log| log.allocations.clone())
    }

    /// Every deallocation, in order.
    pub(crate) fn deallocations(&self) -> Vec<(usize, Layout)> {
        self.with_log(|log| log.deallocations.clone())
    }

    /// The number of allocations not yet returned.
    pub(crate) fn outstanding(&self) -> usize {
        self.with_log(|log| log.allocations.len() - log.deallocations.len())
    }
}

// SAFETY: Forwards to the global allocator.
unsafe impl AllocatorCore for CountingAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocatorError> {
        let ptr = GlobalAllocator.allocate(layout)?;
        self.with_log(|log| {
            log.allocations
                .push((ptr.cast::<u8>().as_ptr() as usize, layout))
        });
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<[u8]>, layout: Layout) {
        let addr = ptr.cast::<u8>().as_ptr() as usize;
        self.with_log(|log| {
            let count = |records: &[(usize, Layout)]| {
                records
                    .iter()
                    .filter(|(a, l)| *a == addr && *l == layout)
                    .count()
            };
            assert!(
                count(&log.allocations) > count(&log.deallocations),
                "deallocating {:#x} with {:?}, which is not currently allocated",
                addr,
                layout
            );
            log.deallocations.push((addr, layout));
        });

        // SAFETY: Inherited from caller.
        unsafe { GlobalAllocator.deallocate(ptr, layout) }
    }
}
