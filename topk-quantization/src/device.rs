/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Device-tagged raw byte buffers.
//!
//! A [`DeviceBuffer`] is the flat storage behind every packed top-K matrix. It either owns
//! its memory (allocated on construction and released on drop) or wraps memory owned by
//! somebody else, in which case dropping it releases nothing.
//!
//! All memory handed out here is host addressable. The [`DeviceId`] records where the
//! buffer is meant to live so that a transport layer can route transfers; migrating the
//! bytes between devices is not the job of this crate.

use std::{alloc::Layout, fmt, ops::Range, ptr::NonNull};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    alloc::{AlignedAllocator, AllocatorCore, AllocatorError},
    num::PowerOfTwo,
};

//////////////
// DeviceId //
//////////////

/// The device a buffer resides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceId {
    /// Host memory.
    Cpu,
    /// An accelerator, identified by its ordinal.
    Gpu(u16),
}

/// The integer used to denote the host in the legacy integer device encoding.
pub const CPU_DEVICE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid device id {0}: expected -1 (cpu) or an accelerator ordinal")]
pub struct DeviceIdError(i32);

impl DeviceId {
    /// Return `true` if this is the host.
    pub const fn is_cpu(self) -> bool {
        matches!(self, Self::Cpu)
    }

    /// Return the legacy integer encoding: [`CPU_DEVICE`] for the host and the ordinal for
    /// accelerators.
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Cpu => CPU_DEVICE,
            Self::Gpu(ordinal) => ordinal as i32,
        }
    }
}

impl TryFrom<i32> for DeviceId {
    type Error = DeviceIdError;
    fn try_from(value: i32) -> Result<Self, Self::Error> {
        if value == CPU_DEVICE {
            Ok(Self::Cpu)
        } else {
            u16::try_from(value)
                .map(Self::Gpu)
                .map_err(|_| DeviceIdError(value))
        }
    }
}

impl From<DeviceId> for i32 {
    fn from(device: DeviceId) -> Self {
        device.as_i32()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu(ordinal) => write!(f, "gpu:{}", ordinal),
        }
    }
}

//////////////////
// DeviceBuffer //
//////////////////

#[derive(Debug, Clone, Copy)]
enum Residency {
    /// Memory was allocated by this buffer and is released on drop.
    Allocated {
        allocator: AlignedAllocator,
        layout: Layout,
    },
    /// A zero-length owning buffer. Nothing was allocated, so nothing is released.
    Unallocated,
    /// Memory belongs to someone else.
    Borrowed,
}

/// A contiguous run of bytes on a device.
#[derive(Debug)]
pub struct DeviceBuffer {
    ptr: NonNull<u8>,
    len: usize,
    device: DeviceId,
    residency: Residency,
}

// SAFETY: `DeviceBuffer` behaves like a `Box<[u8]>` (when owning) or a `&mut [u8]` (when
// borrowing). Both are `Send`.
unsafe impl Send for DeviceBuffer {}

// SAFETY: Shared access only permits reads.
unsafe impl Sync for DeviceBuffer {}

impl DeviceBuffer {
    /// Allocate `len` zeroed bytes for `device`, aligned to at least `alignment`.
    ///
    /// Zero-length buffers do not allocate.
    pub fn new(
        len: usize,
        device: DeviceId,
        alignment: PowerOfTwo,
    ) -> Result<Self, AllocatorError> {
        if len == 0 {
            return Ok(Self {
                ptr: dangling(),
                len,
                device,
                residency: Residency::Unallocated,
            });
        }

        let allocator = AlignedAllocator::new(alignment);
        let layout = Layout::from_size_align(len, 1).map_err(|_| AllocatorError)?;
        let ptr = allocator.allocate(layout)?;

        tracing::trace!(len, %device, alignment = alignment.raw(), "allocated device buffer");
        Ok(Self {
            ptr: ptr.cast::<u8>(),
            len,
            device,
            residency: Residency::Allocated { allocator, layout },
        })
    }

    /// Wrap `len` bytes starting at `ptr` without taking ownership.
    ///
    /// Dropping the returned buffer never frees `ptr`.
    ///
    /// # Safety
    ///
    /// * `ptr` must be valid for reads and writes of `len` bytes for as long as the
    ///   returned buffer (or anything derived from it) is used.
    /// * The memory must not be accessed through any other pointer during that time.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize, device: DeviceId) -> Self {
        Self {
            ptr,
            len,
            device,
            residency: Residency::Borrowed,
        }
    }

    /// The number of bytes in the buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Return `true` if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The device this buffer resides on.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Return `true` if dropping this buffer releases its memory.
    pub fn owns_buffer(&self) -> bool {
        !matches!(self.residency, Residency::Borrowed)
    }

    /// Return the base pointer of the buffer.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr().cast_const()
    }

    /// Return the mutable base pointer of the buffer.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn as_nonnull(&self) -> NonNull<u8> {
        self.ptr
    }

    /// View the whole buffer as bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: By construction `ptr` is valid for `len` bytes.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    /// View the whole buffer as mutable bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: By construction `ptr` is valid for `len` bytes and `&mut self` gives us
        // exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.len) }
    }

    /// Return the bytes in `range`, or `None` if it extends past the end of the buffer.
    pub fn bytes(&self, range: Range<usize>) -> Option<&[u8]> {
        self.as_slice().get(range)
    }

    /// Return the bytes in `range` mutably, or `None` if it extends past the end of the
    /// buffer.
    pub fn bytes_mut(&mut self, range: Range<usize>) -> Option<&mut [u8]> {
        self.as_mut_slice().get_mut(range)
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if let Residency::Allocated { allocator, layout } = self.residency {
            tracing::trace!(len = self.len, device = %self.device, "releasing device buffer");

            let ptr = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
            // SAFETY: `ptr` and `layout` are exactly what was obtained from `allocator`
            // in `DeviceBuffer::new`, and this is the only place they are released.
            unsafe { allocator.deallocate(NonNull::new_unchecked(ptr), layout) };
        }
    }
}

/// A dangling pointer aligned for `u64` so that empty buffers can still be viewed as words.
pub(crate) fn dangling() -> NonNull<u8> {
    NonNull::<u64>::dangling().cast::<u8>()
}

///////////
// Tests //
///////////
