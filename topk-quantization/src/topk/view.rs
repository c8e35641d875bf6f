/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{marker::PhantomData, ops::Range, slice::ChunksExact, slice::ChunksExactMut};

use thiserror::Error;

use super::{
    column::{TopKColumnMut, TopKColumnRef, Word},
    layout::Shape,
    TopKElement,
};
use crate::device::DeviceId;

////////////
// Errors //
////////////

/// Errors from a checked column-range slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SliceError {
    #[error("slice start {start} is not a multiple of the group size {group_size}")]
    Unaligned { start: usize, group_size: usize },
    #[error("columns {start}..{start}+{len} are out of bounds for a matrix with {ncols} columns")]
    OutOfBounds {
        start: usize,
        len: usize,
        ncols: usize,
    },
}

/// Errors from reinterpreting a received byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FromBytesError {
    #[error("expected a buffer of {expected} bytes, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("buffer is not aligned to a word boundary")]
    Misaligned,
    #[error("the shape describes a buffer larger than the address space")]
    Unaddressable,
}

fn expected_len(shape: &Shape, found: usize) -> Result<usize, FromBytesError> {
    let expected = shape
        .checked_byte_size()
        .ok_or(FromBytesError::Unaddressable)?;
    if expected != found {
        return Err(FromBytesError::LengthMismatch { expected, found });
    }
    Ok(expected)
}

/// Validate a slice of `len` columns starting at `start`, returning the word range it
/// aliases.
fn slice_words(shape: &Shape, start: usize, len: usize) -> Result<Range<usize>, SliceError> {
    let layout = shape.layout();
    if !layout.is_group_aligned(start) {
        return Err(SliceError::Unaligned {
            start,
            group_size: layout.group_size(),
        });
    }

    let ncols = shape.ncols();
    match start.checked_add(len) {
        Some(end) if end <= ncols => {}
        _ => return Err(SliceError::OutOfBounds { start, len, ncols }),
    }

    let groups = layout.column_groups(start, len);
    tracing::debug!(start, len, ?groups, "slicing packed matrix");
    Ok(layout.word_range(groups))
}

/// Like `slice_words` but without validation. Debug builds still assert.
fn slice_words_unchecked(shape: &Shape, start: usize, len: usize) -> Range<usize> {
    let layout = shape.layout();
    debug_assert!(
        layout.is_group_aligned(start),
        "slice start {} is not group aligned",
        start
    );
    debug_assert!(
        start.checked_add(len).is_some_and(|end| end <= shape.ncols()),
        "slice {}..{}+{} is out of bounds of {:?}",
        start,
        start,
        len,
        shape
    );
    layout.word_range(layout.column_groups(start, len))
}

////////////////////
// TopKMatrixRef //
////////////////////

/// A shared view of a packed top-K matrix or of a group-aligned column range of one.
///
/// Views alias the storage of their source and never free it.
#[derive(Debug)]
pub struct TopKMatrixRef<'a, T> {
    words: &'a [Word],
    shape: Shape,
    device: DeviceId,
    _elem: PhantomData<T>,
}

impl<T> Clone for TopKMatrixRef<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TopKMatrixRef<'_, T> {}

impl<'a, T> TopKMatrixRef<'a, T>
where
    T: TopKElement,
{
    pub(crate) fn from_words(words: &'a [Word], shape: Shape, device: DeviceId) -> Self {
        debug_assert_eq!(Some(words.len()), shape.checked_num_words());
        Self {
            words,
            shape,
            device,
            _elem: PhantomData,
        }
    }

    /// Reinterpret a received buffer as a packed matrix described by `shape`.
    ///
    /// The buffer must hold exactly the bytes `shape` calls for and be aligned to a word
    /// boundary. The view is tagged as residing on the host.
    ///
    /// ```
    /// use topk_quantization::topk::{Builder, Shape, TopKMatrixRef};
    ///
    /// let config = Builder::new(2).group_size(4).build().unwrap();
    /// let shape = Shape::with_config(1, 6, &config);
    ///
    /// let received: Vec<u64> = vec![1, 2, 3, 4];
    /// let view = TopKMatrixRef::<f32>::from_bytes(shape, bytemuck::cast_slice(&received)).unwrap();
    /// assert_eq!(view.num_groups(), 2);
    /// assert_eq!(view.column(1).unwrap().words(), &[3, 4]);
    /// ```
    pub fn from_bytes(shape: Shape, bytes: &'a [u8]) -> Result<Self, FromBytesError> {
        // Empty buffers may come from anywhere and carry no alignment guarantee.
        if expected_len(&shape, bytes.len())? == 0 {
            return Ok(Self::from_words(&[], shape, DeviceId::Cpu));
        }
        let words = bytemuck::try_cast_slice(bytes).map_err(|_| FromBytesError::Misaligned)?;
        Ok(Self::from_words(words, shape, DeviceId::Cpu))
    }

    pub fn nrows(&self) -> usize {
        self.shape.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.shape.ncols()
    }

    pub fn topk(&self) -> usize {
        self.shape.topk()
    }

    pub fn group_size(&self) -> usize {
        self.shape.group_size()
    }

    /// The number of encoded groups, `ceil(ncols / group_size)`.
    pub fn num_groups(&self) -> usize {
        self.shape.num_groups()
    }

    /// The size in bytes of one encoded group.
    pub fn column_bytes(&self) -> usize {
        self.shape.layout().column_bytes()
    }

    /// The total size in bytes of the viewed storage.
    pub fn byte_size(&self) -> usize {
        std::mem::size_of_val(self.words)
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr().cast::<u8>()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        bytemuck::cast_slice(self.words)
    }

    pub fn words(&self) -> &'a [Word] {
        self.words
    }

    /// Return the descriptor for group `i`, or `None` if `i >= self.num_groups()`.
    pub fn column(&self, i: usize) -> Option<TopKColumnRef<'a>> {
        if i >= self.num_groups() {
            return None;
        }
        let words = self.shape.layout().group_words(i);
        self.words.get(words).map(TopKColumnRef::from_words)
    }

    /// Return the descriptor for group `i` without bounds checking.
    ///
    /// # Safety
    ///
    /// `i` must be less than `self.num_groups()`.
    pub unsafe fn column_unchecked(&self, i: usize) -> TopKColumnRef<'a> {
        debug_assert!(
            i < self.num_groups(),
            "group {} is out of bounds for {} groups",
            i,
            self.num_groups()
        );
        let words = self.shape.layout().group_words(i);
        // SAFETY: Inherited from caller.
        TopKColumnRef::from_words(unsafe { self.words.get_unchecked(words) })
    }

    /// Iterate over the descriptors of every group in order.
    pub fn columns(&self) -> Columns<'a> {
        Columns {
            chunks: self.words.chunks_exact(self.shape.layout().words_per_group()),
        }
    }

    /// Return a view of the `len` logical columns starting at `start`.
    ///
    /// `start` must be a multiple of the group size and the range must lie within the
    /// matrix. The view covers whole groups: if `len` is not a multiple of the group size,
    /// its last group is shared with columns beyond the requested range.
    pub fn slice(&self, start: usize, len: usize) -> Result<TopKMatrixRef<'a, T>, SliceError> {
        let words = slice_words(&self.shape, start, len)?;
        Ok(Self::from_words(
            &self.words[words],
            self.shape.with_columns(len),
            self.device,
        ))
    }

    /// Like [`Self::slice`] but without validation.
    ///
    /// # Safety
    ///
    /// `start` must be a multiple of the group size and `start + len <= self.ncols()`.
    pub unsafe fn slice_unchecked(&self, start: usize, len: usize) -> TopKMatrixRef<'a, T> {
        let words = slice_words_unchecked(&self.shape, start, len);
        Self::from_words(
            // SAFETY: Inherited from caller.
            unsafe { self.words.get_unchecked(words) },
            self.shape.with_columns(len),
            self.device,
        )
    }
}

////////////////////
// TopKMatrixMut //
////////////////////

/// An exclusive view of a packed top-K matrix or of a group-aligned column range of one.
#[derive(Debug)]
pub struct TopKMatrixMut<'a, T> {
    words: &'a mut [Word],
    shape: Shape,
    device: DeviceId,
    _elem: PhantomData<T>,
}

impl<'a, T> TopKMatrixMut<'a, T>
where
    T: TopKElement,
{
    pub(crate) fn from_words(words: &'a mut [Word], shape: Shape, device: DeviceId) -> Self {
        debug_assert_eq!(Some(words.len()), shape.checked_num_words());
        Self {
            words,
            shape,
            device,
            _elem: PhantomData,
        }
    }

    /// Reinterpret a mutable byte buffer as a packed matrix described by `shape`.
    ///
    /// See [`TopKMatrixRef::from_bytes`].
    pub fn from_bytes(shape: Shape, bytes: &'a mut [u8]) -> Result<Self, FromBytesError> {
        if expected_len(&shape, bytes.len())? == 0 {
            return Ok(Self::from_words(&mut [], shape, DeviceId::Cpu));
        }
        let words =
            bytemuck::try_cast_slice_mut(bytes).map_err(|_| FromBytesError::Misaligned)?;
        Ok(Self::from_words(words, shape, DeviceId::Cpu))
    }

    /// Reborrow as a shared view.
    pub fn as_view(&self) -> TopKMatrixRef<'_, T> {
        TopKMatrixRef::from_words(&*self.words, self.shape, self.device)
    }

    /// Reborrow as a shorter-lived exclusive view.
    pub fn reborrow_mut(&mut self) -> TopKMatrixMut<'_, T> {
        TopKMatrixMut::from_words(&mut *self.words, self.shape, self.device)
    }

    /// Convert into a shared view with the full lifetime of the source.
    pub fn into_view(self) -> TopKMatrixRef<'a, T> {
        TopKMatrixRef::from_words(self.words, self.shape, self.device)
    }

    pub fn nrows(&self) -> usize {
        self.shape.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.shape.ncols()
    }

    pub fn topk(&self) -> usize {
        self.shape.topk()
    }

    pub fn group_size(&self) -> usize {
        self.shape.group_size()
    }

    pub fn num_groups(&self) -> usize {
        self.as_view().num_groups()
    }

    pub fn column_bytes(&self) -> usize {
        self.as_view().column_bytes()
    }

    pub fn byte_size(&self) -> usize {
        self.as_view().byte_size()
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr().cast::<u8>()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.words.as_mut_ptr().cast::<u8>()
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&*self.words)
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut *self.words)
    }

    pub fn words(&self) -> &[Word] {
        &*self.words
    }

    pub fn words_mut(&mut self) -> &mut [Word] {
        &mut *self.words
    }

    /// Overwrite the whole packed buffer with `bytes`, for example after receiving it
    /// from a peer.
    pub fn copy_from_bytes(&mut self, bytes: &[u8]) -> Result<(), FromBytesError> {
        let expected = self.byte_size();
        if bytes.len() != expected {
            return Err(FromBytesError::LengthMismatch {
                expected,
                found: bytes.len(),
            });
        }
        self.as_bytes_mut().copy_from_slice(bytes);
        Ok(())
    }

    pub fn column(&self, i: usize) -> Option<TopKColumnRef<'_>> {
        self.as_view().column(i)
    }

    /// Return the mutable descriptor for group `i`, or `None` if `i >= self.num_groups()`.
    pub fn column_mut(&mut self, i: usize) -> Option<TopKColumnMut<'_>> {
        self.reborrow_mut().into_column(i)
    }

    /// Consume the view, returning the mutable descriptor for group `i` with the full
    /// lifetime of the source.
    pub fn into_column(self, i: usize) -> Option<TopKColumnMut<'a>> {
        if i >= self.num_groups() {
            return None;
        }
        let range = self.shape.layout().group_words(i);
        let words = self.words;
        words.get_mut(range).map(TopKColumnMut::from_words)
    }

    /// # Safety
    ///
    /// `i` must be less than `self.num_groups()`.
    pub unsafe fn column_unchecked(&self, i: usize) -> TopKColumnRef<'_> {
        // SAFETY: Inherited from caller.
        unsafe { self.as_view().column_unchecked(i) }
    }

    /// Return the mutable descriptor for group `i` without bounds checking.
    ///
    /// # Safety
    ///
    /// `i` must be less than `self.num_groups()`.
    pub unsafe fn column_unchecked_mut(&mut self, i: usize) -> TopKColumnMut<'_> {
        // SAFETY: Inherited from caller.
        unsafe { self.reborrow_mut().into_column_unchecked(i) }
    }

    /// Consume the view, returning the mutable descriptor for group `i` without bounds
    /// checking.
    ///
    /// # Safety
    ///
    /// `i` must be less than `self.num_groups()`.
    pub unsafe fn into_column_unchecked(self, i: usize) -> TopKColumnMut<'a> {
        debug_assert!(
            i < self.num_groups(),
            "group {} is out of bounds for {} groups",
            i,
            self.num_groups()
        );
        let range = self.shape.layout().group_words(i);
        let words = self.words;
        // SAFETY: Inherited from caller.
        TopKColumnMut::from_words(unsafe { words.get_unchecked_mut(range) })
    }

    pub fn columns(&self) -> Columns<'_> {
        self.as_view().columns()
    }

    /// Iterate mutably over the descriptors of every group in order.
    pub fn columns_mut(&mut self) -> ColumnsMut<'_> {
        self.reborrow_mut().into_columns_mut()
    }

    /// Consume the view, returning a mutable iterator with the full lifetime of the source.
    pub fn into_columns_mut(self) -> ColumnsMut<'a> {
        let k = self.shape.layout().words_per_group();
        let words = self.words;
        ColumnsMut {
            chunks: words.chunks_exact_mut(k),
        }
    }

    pub fn slice(&self, start: usize, len: usize) -> Result<TopKMatrixRef<'_, T>, SliceError> {
        self.as_view().slice(start, len)
    }

    /// Return an exclusive view of the `len` logical columns starting at `start`.
    ///
    /// See [`TopKMatrixRef::slice`] for the requirements on `start` and `len`.
    pub fn slice_mut(
        &mut self,
        start: usize,
        len: usize,
    ) -> Result<TopKMatrixMut<'_, T>, SliceError> {
        self.reborrow_mut().into_slice(start, len)
    }

    /// Consume the view, returning a column-range view with the full lifetime of the
    /// source.
    pub fn into_slice(self, start: usize, len: usize) -> Result<TopKMatrixMut<'a, T>, SliceError> {
        let Self {
            words,
            shape,
            device,
            ..
        } = self;
        let range = slice_words(&shape, start, len)?;
        Ok(Self::from_words(
            &mut words[range],
            shape.with_columns(len),
            device,
        ))
    }

    /// # Safety
    ///
    /// `start` must be a multiple of the group size and `start + len <= self.ncols()`.
    pub unsafe fn slice_unchecked(&self, start: usize, len: usize) -> TopKMatrixRef<'_, T> {
        // SAFETY: Inherited from caller.
        unsafe { self.as_view().slice_unchecked(start, len) }
    }

    /// # Safety
    ///
    /// `start` must be a multiple of the group size and `start + len <= self.ncols()`.
    pub unsafe fn slice_unchecked_mut(
        &mut self,
        start: usize,
        len: usize,
    ) -> TopKMatrixMut<'_, T> {
        let words = slice_words_unchecked(&self.shape, start, len);
        TopKMatrixMut::from_words(
            // SAFETY: Inherited from caller.
            unsafe { self.words.get_unchecked_mut(words) },
            self.shape.with_columns(len),
            self.device,
        )
    }
}

///////////////
// Iterators //
///////////////

/// Iterator over the group descriptors of a packed matrix.
#[derive(Debug, Clone)]
pub struct Columns<'a> {
    chunks: ChunksExact<'a, Word>,
}

impl<'a> Iterator for Columns<'a> {
    type Item = TopKColumnRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.chunks.next().map(TopKColumnRef::from_words)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl DoubleEndedIterator for Columns<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.chunks.next_back().map(TopKColumnRef::from_words)
    }
}

impl ExactSizeIterator for Columns<'_> {}

/// Mutable iterator over the group descriptors of a packed matrix.
#[derive(Debug)]
pub struct ColumnsMut<'a> {
    chunks: ChunksExactMut<'a, Word>,
}

impl<'a> Iterator for ColumnsMut<'a> {
    type Item = TopKColumnMut<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.chunks.next().map(TopKColumnMut::from_words)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl DoubleEndedIterator for ColumnsMut<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.chunks.next_back().map(TopKColumnMut::from_words)
    }
}

impl ExactSizeIterator for ColumnsMut<'_> {}

///////////
// Tests //
///////////
