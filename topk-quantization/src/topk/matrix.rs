/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{alloc::Layout, marker::PhantomData, ptr::NonNull};

use thiserror::Error;

use super::{
    column::{TopKColumnMut, TopKColumnRef, Word, WORD_SIZE},
    layout::Shape,
    view::{Columns, ColumnsMut, FromBytesError, SliceError, TopKMatrixMut, TopKMatrixRef},
    Config, TopKElement,
};
use crate::{
    alloc::{AllocatorCore, AllocatorError, GlobalAllocator},
    device::{self, DeviceBuffer, DeviceId},
};

/// Errors that can occur when constructing a [`TopKMatrix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TopKError {
    #[error("failed to allocate {bytes} bytes on {device}")]
    Allocation {
        bytes: usize,
        device: DeviceId,
        #[source]
        source: AllocatorError,
    },
    #[error(
        "a matrix with {ncols} columns, top-k {topk} and group size {group_size} is too large"
    )]
    Overflow {
        ncols: usize,
        topk: usize,
        group_size: usize,
    },
}

/// Where the memory of a [`TopKMatrix`] came from, and therefore where it goes back to.
#[derive(Debug)]
enum Ownership<A> {
    /// The device buffer owns its memory and frees it when dropped.
    Device,
    /// The device buffer is non-owning. Memory is returned to `allocator` with `layout`.
    Pool { allocator: A, layout: Layout },
}

/// A packed top-K column-group matrix.
///
/// The matrix stores `ceil(ncols / group_size)` encoded groups of `topk` words each in a
/// single flat buffer. Memory comes either from the device ([`TopKMatrix::new`]) or from a
/// pooled allocator ([`TopKMatrix::new_in`]), which receives it back exactly once when the
/// matrix is dropped.
///
/// ```
/// use topk_quantization::{device::DeviceId, topk::{Builder, TopKMatrix}};
///
/// let config = Builder::new(8).group_size(128).build().unwrap();
/// let mut matrix = TopKMatrix::<f32>::new(100, 257, &config, DeviceId::Cpu).unwrap();
/// assert_eq!(matrix.num_groups(), 3);
/// assert_eq!(matrix.column_bytes(), 64);
/// assert_eq!(matrix.byte_size(), 192);
///
/// matrix.column_mut(1).unwrap().set(0, 42);
/// let slice = matrix.slice(128, 128).unwrap();
/// assert_eq!(slice.num_groups(), 1);
/// assert_eq!(slice.column(0).unwrap()[0], 42);
/// ```
///
/// Matrices are move-only:
///
/// ```compile_fail
/// use topk_quantization::{device::DeviceId, topk::{Builder, TopKMatrix}};
///
/// let config = Builder::new(8).build().unwrap();
/// let matrix = TopKMatrix::<f32>::new(1, 128, &config, DeviceId::Cpu).unwrap();
/// let copy = matrix.clone();
/// ```
#[derive(Debug)]
pub struct TopKMatrix<T, A = GlobalAllocator>
where
    T: TopKElement,
    A: AllocatorCore,
{
    buffer: DeviceBuffer,
    ownership: Ownership<A>,
    shape: Shape,
    _elem: PhantomData<T>,
}

/// Compute the shape and buffer layout for a matrix.
fn plan(nrows: usize, ncols: usize, config: &Config) -> Result<(Shape, Layout), TopKError> {
    let shape = Shape::with_config(nrows, ncols, config);
    let overflow = || TopKError::Overflow {
        ncols,
        topk: config.topk(),
        group_size: config.group_size(),
    };

    let bytes = shape.checked_byte_size().ok_or_else(overflow)?;
    let layout =
        Layout::from_size_align(bytes, config.alignment().raw()).map_err(|_| overflow())?;
    Ok((shape, layout))
}

impl<T> TopKMatrix<T>
where
    T: TopKElement,
{
    /// Allocate a zeroed matrix for `nrows x ncols` logical elements on `device`.
    ///
    /// The buffer is aligned to [`Config::alignment`] and freed when the matrix is dropped.
    pub fn new(
        nrows: usize,
        ncols: usize,
        config: &Config,
        device: DeviceId,
    ) -> Result<Self, TopKError> {
        let (shape, layout) = plan(nrows, ncols, config)?;
        let buffer = DeviceBuffer::new(layout.size(), device, config.alignment()).map_err(
            |source| TopKError::Allocation {
                bytes: layout.size(),
                device,
                source,
            },
        )?;

        tracing::debug!(
            nrows,
            ncols,
            topk = config.topk(),
            bytes = layout.size(),
            %device,
            "allocated packed matrix"
        );

        Ok(Self {
            buffer,
            ownership: Ownership::Device,
            shape,
            _elem: PhantomData,
        })
    }
}

impl<T, A> TopKMatrix<T, A>
where
    T: TopKElement,
    A: AllocatorCore,
{
    /// Construct a zeroed matrix whose buffer is borrowed from `allocator`.
    ///
    /// The allocator is called once here and once more when the matrix is dropped, with the
    /// same pointer and layout. A matrix with no groups never calls the allocator.
    ///
    /// ```
    /// use topk_quantization::{
    ///     alloc::BumpAllocator,
    ///     device::DeviceId,
    ///     num::PowerOfTwo,
    ///     topk::{Builder, TopKMatrix},
    /// };
    ///
    /// let pool = BumpAllocator::new(4096, PowerOfTwo::new(64).unwrap()).unwrap();
    /// let config = Builder::new(4).group_size(16).build().unwrap();
    /// let matrix = TopKMatrix::<f32, _>::new_in(8, 40, &config, DeviceId::Gpu(0), pool.clone()).unwrap();
    ///
    /// assert!(matrix.is_pooled());
    /// assert_eq!(matrix.as_ptr(), pool.as_ptr());
    /// assert_eq!(pool.used(), matrix.byte_size());
    /// ```
    pub fn new_in(
        nrows: usize,
        ncols: usize,
        config: &Config,
        device: DeviceId,
        allocator: A,
    ) -> Result<Self, TopKError> {
        let (shape, layout) = plan(nrows, ncols, config)?;
        let bytes = layout.size();

        let buffer = if bytes == 0 {
            // SAFETY: A dangling, aligned pointer is valid for zero bytes.
            unsafe { DeviceBuffer::from_raw_parts(device::dangling(), 0, device) }
        } else {
            let ptr = allocator
                .allocate(layout)
                .map_err(|source| TopKError::Allocation {
                    bytes,
                    device,
                    source,
                })?;
            let base = ptr.cast::<u8>();

            // SAFETY: `allocate` returned at least `bytes` writable bytes at `base`.
            unsafe { std::ptr::write_bytes(base.as_ptr(), 0, bytes) };

            // SAFETY: The memory stays valid until it is returned to `allocator` in `drop`,
            // and nothing else has access to it.
            unsafe { DeviceBuffer::from_raw_parts(base, bytes, device) }
        };

        tracing::debug!(
            nrows,
            ncols,
            topk = config.topk(),
            bytes,
            %device,
            "borrowed packed matrix from pool"
        );

        Ok(Self {
            buffer,
            ownership: Ownership::Pool { allocator, layout },
            shape,
            _elem: PhantomData,
        })
    }

    /// Return `true` if the buffer was borrowed from a pooled allocator.
    pub fn is_pooled(&self) -> bool {
        matches!(self.ownership, Ownership::Pool { .. })
    }

    /// Return the pooled allocator the buffer was borrowed from, if any.
    pub fn allocator(&self) -> Option<&A> {
        match &self.ownership {
            Ownership::Device => None,
            Ownership::Pool { allocator, .. } => Some(allocator),
        }
    }

    //---------//
    // Queries //
    //---------//

    /// The number of logical rows supplied at construction.
    pub fn nrows(&self) -> usize {
        self.shape.nrows()
    }

    /// The number of logical columns supplied at construction.
    pub fn ncols(&self) -> usize {
        self.shape.ncols()
    }

    pub fn topk(&self) -> usize {
        self.shape.topk()
    }

    pub fn group_size(&self) -> usize {
        self.shape.group_size()
    }

    /// The number of physically stored groups: `ceil(ncols / group_size)`.
    pub fn num_groups(&self) -> usize {
        self.shape.num_groups()
    }

    /// The encoded size in bytes of one group.
    pub fn column_bytes(&self) -> usize {
        self.shape.layout().column_bytes()
    }

    /// The total size of the packed buffer in bytes.
    pub fn byte_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn device(&self) -> DeviceId {
        self.buffer.device()
    }

    /// The out-of-band description a receiver needs to reinterpret the buffer.
    pub fn shape(&self) -> Shape {
        self.shape
    }

    //------------//
    // Raw Access //
    //------------//

    /// The base of the packed buffer. Valid for [`Self::byte_size`] bytes.
    pub fn as_ptr(&self) -> *const u8 {
        self.buffer.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.buffer.as_mut_ptr()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    /// Overwrite the packed buffer with `bytes`, which must be exactly
    /// [`Self::byte_size`] long.
    pub fn copy_from_bytes(&mut self, bytes: &[u8]) -> Result<(), FromBytesError> {
        self.as_view_mut().copy_from_bytes(bytes)
    }

    fn words(&self) -> &[Word] {
        let len = self.buffer.len() / WORD_SIZE;
        // SAFETY: The buffer base is aligned to at least `align_of::<Word>()` on both the
        // device path (`Config::alignment`) and the pool path (layout alignment), and
        // empty buffers use a word-aligned dangling pointer. The buffer holds exactly
        // `len` words, all initialized at construction.
        unsafe { std::slice::from_raw_parts(self.buffer.as_ptr().cast::<Word>(), len) }
    }

    fn words_mut(&mut self) -> &mut [Word] {
        let len = self.buffer.len() / WORD_SIZE;
        // SAFETY: See `words`. `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.buffer.as_mut_ptr().cast::<Word>(), len) }
    }

    //-------//
    // Views //
    //-------//

    /// A shared view over the whole matrix.
    pub fn as_view(&self) -> TopKMatrixRef<'_, T> {
        TopKMatrixRef::from_words(self.words(), self.shape, self.device())
    }

    /// An exclusive view over the whole matrix.
    pub fn as_view_mut(&mut self) -> TopKMatrixMut<'_, T> {
        let (shape, device) = (self.shape, self.device());
        TopKMatrixMut::from_words(self.words_mut(), shape, device)
    }

    /// Return the descriptor for group `i`, or `None` if `i >= self.num_groups()`.
    pub fn column(&self, i: usize) -> Option<TopKColumnRef<'_>> {
        self.as_view().column(i)
    }

    /// Return the mutable descriptor for group `i`, or `None` if `i >= self.num_groups()`.
    pub fn column_mut(&mut self, i: usize) -> Option<TopKColumnMut<'_>> {
        self.as_view_mut().into_column(i)
    }

    /// # Safety
    ///
    /// `i` must be less than `self.num_groups()`.
    pub unsafe fn column_unchecked(&self, i: usize) -> TopKColumnRef<'_> {
        // SAFETY: Inherited from caller.
        unsafe { self.as_view().column_unchecked(i) }
    }

    /// # Safety
    ///
    /// `i` must be less than `self.num_groups()`.
    pub unsafe fn column_unchecked_mut(&mut self, i: usize) -> TopKColumnMut<'_> {
        // SAFETY: Inherited from caller.
        unsafe { self.as_view_mut().into_column_unchecked(i) }
    }

    pub fn columns(&self) -> Columns<'_> {
        self.as_view().columns()
    }

    pub fn columns_mut(&mut self) -> ColumnsMut<'_> {
        self.as_view_mut().into_columns_mut()
    }

    /// Return a non-owning view of the `len` logical columns starting at `start`.
    ///
    /// See [`TopKMatrixRef::slice`].
    pub fn slice(&self, start: usize, len: usize) -> Result<TopKMatrixRef<'_, T>, SliceError> {
        self.as_view().slice(start, len)
    }

    pub fn slice_mut(
        &mut self,
        start: usize,
        len: usize,
    ) -> Result<TopKMatrixMut<'_, T>, SliceError> {
        self.as_view_mut().into_slice(start, len)
    }

    /// # Safety
    ///
    /// `start` must be a multiple of the group size and `start + len <= self.ncols()`.
    pub unsafe fn slice_unchecked(&self, start: usize, len: usize) -> TopKMatrixRef<'_, T> {
        // SAFETY: Inherited from caller.
        unsafe { self.as_view().slice_unchecked(start, len) }
    }
}

impl<T, A> Drop for TopKMatrix<T, A>
where
    T: TopKElement,
    A: AllocatorCore,
{
    fn drop(&mut self) {
        if let Ownership::Pool { allocator, layout } = &self.ownership {
            debug_assert!(
                !self.buffer.owns_buffer(),
                "pooled buffers must not free themselves"
            );
            if layout.size() == 0 {
                return;
            }

            tracing::debug!(
                bytes = layout.size(),
                device = %self.buffer.device(),
                "returning packed matrix to pool"
            );

            let ptr = NonNull::slice_from_raw_parts(self.buffer.as_nonnull(), layout.size());
            // SAFETY: `ptr` is the base pointer returned by `allocator.allocate(layout)` in
            // `new_in`. Ownership cannot be duplicated, so this is the only release.
            unsafe { allocator.deallocate(ptr, *layout) };
        }
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::{
        alloc::{BumpAllocator, ScopedAllocator},
        test_util::{AlwaysFails, CountingAllocator},
        topk::{Builder, TopKColumn},
    };

    fn config(topk: usize, group_size: usize) -> Config {
        Builder::new(topk).group_size(group_size).build().unwrap()
    }

    #[test]
    fn test_sizes() {
        let config = config(8, 128);
        let matrix = TopKMatrix::<f32>::new(100, 257, &config, DeviceId::Cpu).unwrap();
        assert_eq!(matrix.nrows(), 100);
        assert_eq!(matrix.ncols(), 257);
        assert_eq!(matrix.topk(), 8);
        assert_eq!(matrix.group_size(), 128);
        assert_eq!(matrix.num_groups(), 3);
        assert_eq!(matrix.column_bytes(), TopKColumn::encoded_size(8));
        assert_eq!(matrix.byte_size(), 192);
        assert_eq!(matrix.device(), DeviceId::Cpu);
        assert!(!matrix.is_pooled());
        assert!(matrix.allocator().is_none());
        assert_eq!(matrix.shape(), Shape::with_config(100, 257, &config));
        assert_eq!((matrix.as_ptr() as usize) % config.alignment().raw(), 0);
        assert!(matrix.as_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_random_sizes() {
        let mut rng = StdRng::seed_from_u64(0x7a3c_15e2_9b04_d6f1);
        for _ in 0..50 {
            let topk = rng.random_range(1..=16);
            let group_size = rng.random_range(1..=300);
            let ncols = rng.random_range(0..=2000);
            let nrows = rng.random_range(0..=64);

            let config = config(topk, group_size);
            let matrix = TopKMatrix::<f64>::new(nrows, ncols, &config, DeviceId::Gpu(3)).unwrap();

            let groups = ncols.div_ceil(group_size);
            assert_eq!(matrix.num_groups(), groups);
            assert_eq!(matrix.byte_size(), groups * topk * WORD_SIZE);
            assert_eq!(matrix.columns().len(), groups);
            assert_eq!(matrix.nrows(), nrows);
        }
    }

    #[test]
    fn test_group_boundaries() {
        let g = 16;
        let config = config(2, g);
        for (ncols, groups) in [(g - 1, 1), (g, 1), (g + 1, 2)] {
            let matrix = TopKMatrix::<f32>::new(1, ncols, &config, DeviceId::Cpu).unwrap();
            assert_eq!(matrix.num_groups(), groups, "ncols = {}", ncols);
            assert_eq!(matrix.byte_size(), groups * matrix.column_bytes());
        }
    }

    #[test]
    fn test_columns() {
        let mut matrix = TopKMatrix::<f32>::new(4, 50, &config(3, 10), DeviceId::Cpu).unwrap();
        assert_eq!(matrix.num_groups(), 5);

        for (i, mut column) in matrix.columns_mut().enumerate() {
            for j in 0..column.len() {
                column.set(j, (10 * i + j) as u64);
            }
        }

        assert_eq!(matrix.column(0).unwrap().words(), &[0, 1, 2]);
        assert_eq!(matrix.column(4).unwrap().words(), &[40, 41, 42]);
        assert!(matrix.column(5).is_none());
        assert!(matrix.column_mut(5).is_none());

        // SAFETY: 2 < num_groups.
        unsafe { matrix.column_unchecked_mut(2) }.set(1, 99);
        // SAFETY: 2 < num_groups.
        assert_eq!(unsafe { matrix.column_unchecked(2) }.get(1), Some(99));

        // The group descriptor addresses bytes `[i * column_bytes, (i + 1) * column_bytes)`.
        let column_bytes = matrix.column_bytes();
        let expected = matrix.as_bytes()[2 * column_bytes..3 * column_bytes].to_vec();
        assert_eq!(matrix.column(2).unwrap().as_bytes(), expected.as_slice());
    }

    #[test]
    fn test_slices() {
        let mut matrix =
            TopKMatrix::<f32>::new(100, 257, &config(8, 128), DeviceId::Gpu(1)).unwrap();
        matrix.column_mut(1).unwrap().fill(0x1111);

        let base = matrix.as_ptr();
        let slice = matrix.slice(128, 128).unwrap();
        assert_eq!(slice.num_groups(), 1);
        assert_eq!(slice.ncols(), 128);
        assert_eq!(slice.nrows(), 100);
        assert_eq!(slice.device(), DeviceId::Gpu(1));
        assert_eq!(slice.column(0), matrix.column(1));
        // SAFETY: `base` is valid for `byte_size` bytes and 64 is in bounds.
        assert_eq!(slice.as_ptr(), unsafe { base.add(64) });

        assert!(matches!(
            matrix.slice(100, 28),
            Err(SliceError::Unaligned { .. })
        ));
        assert!(matches!(
            matrix.slice(256, 2),
            Err(SliceError::OutOfBounds { .. })
        ));

        // SAFETY: 256 is group aligned and 256 + 1 <= 257.
        let tail = unsafe { matrix.slice_unchecked(256, 1) };
        assert_eq!(tail.num_groups(), 1);
        assert_eq!(tail.as_ptr(), matrix.column(2).unwrap().as_bytes().as_ptr());

        {
            let mut slice = matrix.slice_mut(128, 129).unwrap();
            assert_eq!(slice.num_groups(), 2);
            slice.column_mut(1).unwrap().set(7, 5);
        }
        assert_eq!(matrix.column(2).unwrap()[7], 5);

        // Dropping views never frees the source.
        assert_eq!(matrix.column(1).unwrap()[0], 0x1111);
    }

    #[test]
    fn test_copy_from_bytes() {
        let mut source = TopKMatrix::<f32>::new(2, 6, &config(2, 4), DeviceId::Cpu).unwrap();
        for (i, mut column) in source.columns_mut().enumerate() {
            column.fill(i as u64 + 100);
        }

        let mut receiver = TopKMatrix::<f32>::new(2, 6, &config(2, 4), DeviceId::Gpu(0)).unwrap();
        receiver.copy_from_bytes(source.as_bytes()).unwrap();
        assert_eq!(receiver.as_bytes(), source.as_bytes());

        assert!(receiver.copy_from_bytes(&[0; 8]).is_err());
        receiver.as_bytes_mut().fill(0);
        assert!(receiver.columns().all(|c| c.iter().all(|w| w == 0)));
    }

    #[test]
    fn test_move() {
        let counting = CountingAllocator::new();
        let config = config(4, 32);

        let a = TopKMatrix::<f32, _>::new_in(3, 100, &config, DeviceId::Gpu(2), counting.clone())
            .unwrap();
        let ptr = a.as_ptr();
        let byte_size = a.byte_size();

        let b = a;
        assert_eq!(b.as_ptr(), ptr);
        assert_eq!(b.byte_size(), byte_size);
        assert_eq!(b.device(), DeviceId::Gpu(2));
        assert_eq!(b.nrows(), 3);
        assert_eq!(counting.deallocations().len(), 0);

        // Move-assignment releases the previous value exactly once.
        let mut c = TopKMatrix::<f32, _>::new_in(1, 32, &config, DeviceId::Cpu, counting.clone())
            .unwrap();
        let replaced = c.as_ptr();
        assert_eq!(counting.allocations().len(), 2);
        c = b;
        assert_eq!(counting.deallocations().len(), 1);
        assert_eq!(counting.deallocations()[0].0, replaced as usize);

        drop(c);
        let deallocations = counting.deallocations();
        assert_eq!(deallocations.len(), 2);
        assert_eq!(deallocations[1].0, ptr as usize);
        assert_eq!(counting.outstanding(), 0);
    }

    #[test]
    fn test_pooled() {
        let counting = CountingAllocator::new();
        let config = Builder::new(8).group_size(128).alignment(16).build().unwrap();

        {
            let mut matrix =
                TopKMatrix::<half::f16, _>::new_in(10, 300, &config, DeviceId::Cpu, &counting)
                    .unwrap();
            assert!(matrix.is_pooled());
            assert!(matrix.allocator().is_some());
            assert_eq!(matrix.byte_size(), 3 * 64);
            assert!(matrix.as_bytes().iter().all(|b| *b == 0));
            matrix.column_mut(0).unwrap().set(0, 1);

            let allocations = counting.allocations();
            assert_eq!(allocations.len(), 1);
            assert_eq!(allocations[0].0, matrix.as_ptr() as usize);
            assert_eq!(allocations[0].1, Layout::from_size_align(192, 16).unwrap());
            assert!(counting.deallocations().is_empty());

            // Views never release pooled memory.
            let _ = matrix.slice(128, 128).unwrap();
            assert!(counting.deallocations().is_empty());
        }

        assert_eq!(counting.allocations(), counting.deallocations());
        assert_eq!(counting.outstanding(), 0);

        // The device path never touches a pool.
        let matrix = TopKMatrix::<f32>::new(10, 300, &config, DeviceId::Cpu).unwrap();
        drop(matrix);
        assert_eq!(counting.allocations().len(), 1);
    }

    #[test]
    fn test_empty_pooled() {
        let config = config(8, 128);
        let matrix =
            TopKMatrix::<f32, _>::new_in(10, 0, &config, DeviceId::Cpu, AlwaysFails).unwrap();
        assert!(matrix.is_pooled());
        assert_eq!(matrix.num_groups(), 0);
        assert_eq!(matrix.byte_size(), 0);
        assert!(matrix.columns().next().is_none());
        assert!(matrix.slice(0, 0).unwrap().as_bytes().is_empty());
        drop(matrix);

        let counting = CountingAllocator::new();
        drop(TopKMatrix::<f32, _>::new_in(0, 0, &config, DeviceId::Cpu, &counting).unwrap());
        assert!(counting.allocations().is_empty());
        assert!(counting.deallocations().is_empty());
    }

    #[test]
    fn test_errors() {
        let config = config(8, 128);
        let err = TopKMatrix::<f32, _>::new_in(10, 10, &config, DeviceId::Gpu(4), AlwaysFails)
            .unwrap_err();
        assert_eq!(
            err,
            TopKError::Allocation {
                bytes: 64,
                device: DeviceId::Gpu(4),
                source: AllocatorError
            }
        );
        assert_eq!(
            crate::error::format(&err),
            "failed to allocate 64 bytes on gpu:4\n    caused by: unknown allocation error"
        );

        let config = Builder::new(u32::MAX as usize).group_size(1).build().unwrap();
        let err = TopKMatrix::<f32>::new(1, usize::MAX, &config, DeviceId::Cpu).unwrap_err();
        assert!(matches!(err, TopKError::Overflow { .. }), "{:?}", err);
    }

    #[test]
    fn test_bump_pool() {
        let pool = BumpAllocator::new(1024, crate::num::PowerOfTwo::new(64).unwrap()).unwrap();
        let config = config(4, 8);

        let first =
            TopKMatrix::<f32, _>::new_in(1, 64, &config, DeviceId::Cpu, pool.clone()).unwrap();
        let second =
            TopKMatrix::<f32, _>::new_in(1, 64, &config, DeviceId::Cpu, pool.clone()).unwrap();
        assert_eq!(first.byte_size(), 256);
        // SAFETY: Both pointers lie in the same arena.
        assert_eq!(unsafe { second.as_ptr().offset_from(first.as_ptr()) }, 256);

        // The arena is full after four matrices of this size.
        let _third =
            TopKMatrix::<f32, _>::new_in(1, 64, &config, DeviceId::Cpu, pool.clone()).unwrap();
        let _fourth =
            TopKMatrix::<f32, _>::new_in(1, 64, &config, DeviceId::Cpu, pool.clone()).unwrap();
        assert!(matches!(
            TopKMatrix::<f32, _>::new_in(1, 64, &config, DeviceId::Cpu, pool.clone()),
            Err(TopKError::Allocation { .. })
        ));

        // A scoped handle borrows the pool without cloning it.
        let scoped = ScopedAllocator::new(&pool);
        assert!(TopKMatrix::<f32, _>::new_in(1, 0, &config, DeviceId::Cpu, scoped).is_ok());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "group 3 is out of bounds for 3 groups")]
    fn test_column_unchecked_out_of_bounds() {
        let mut matrix = TopKMatrix::<f32>::new(2, 257, &config(4, 128), DeviceId::Cpu).unwrap();
        let groups = matrix.num_groups();
        // SAFETY: Deliberately violated. Debug builds panic before the access.
        let _ = unsafe { matrix.column_unchecked_mut(groups) };
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "slice start 100 is not group aligned")]
    fn test_slice_unchecked_unaligned() {
        let matrix = TopKMatrix::<f32>::new(2, 257, &config(4, 128), DeviceId::Cpu).unwrap();
        // SAFETY: Deliberately violated. Debug builds panic before the access.
        let _ = unsafe { matrix.slice_unchecked(100, 28) };
    }
}
