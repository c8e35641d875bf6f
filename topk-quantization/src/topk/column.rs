/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::ops::{Deref, DerefMut, Index, IndexMut};

/// A single encoded entry of a column group.
pub type Word = u64;

/// The size in bytes of one [`Word`].
pub const WORD_SIZE: usize = std::mem::size_of::<Word>();

/// The encoded representation of one column group: exactly `K` consecutive words.
///
/// The representation is generic over its storage so that owned, shared and exclusive
/// columns all share one API:
///
/// * [`TopKColumn`]: an owned, boxed group. Used for staging data before it is written
///   into a matrix.
/// * [`TopKColumnRef`]: a shared view into a matrix.
/// * [`TopKColumnMut`]: an exclusive view into a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct TopKColumnBase<T> {
    words: T,
}

pub type TopKColumn = TopKColumnBase<Box<[Word]>>;
pub type TopKColumnRef<'a> = TopKColumnBase<&'a [Word]>;
pub type TopKColumnMut<'a> = TopKColumnBase<&'a mut [Word]>;

impl TopKColumn {
    /// Allocate a zeroed column group holding `topk` words.
    pub fn new(topk: usize) -> Self {
        Self {
            words: vec![0; topk].into_boxed_slice(),
        }
    }

    /// The number of bytes needed to encode a group retaining `topk` entries.
    pub const fn encoded_size(topk: usize) -> usize {
        topk * WORD_SIZE
    }

    /// Reborrow as a [`TopKColumnRef`].
    pub fn reborrow(&self) -> TopKColumnRef<'_> {
        TopKColumnBase { words: &self.words }
    }

    /// Reborrow as a [`TopKColumnMut`].
    pub fn reborrow_mut(&mut self) -> TopKColumnMut<'_> {
        TopKColumnBase {
            words: &mut self.words,
        }
    }
}

impl From<Vec<Word>> for TopKColumn {
    fn from(words: Vec<Word>) -> Self {
        Self {
            words: words.into_boxed_slice(),
        }
    }
}

impl<'a> TopKColumnRef<'a> {
    pub(crate) fn from_words(words: &'a [Word]) -> Self {
        Self { words }
    }

    /// Return the words with the full lifetime of the underlying matrix.
    pub fn into_words(self) -> &'a [Word] {
        self.words
    }
}

impl<'a> TopKColumnMut<'a> {
    pub(crate) fn from_words(words: &'a mut [Word]) -> Self {
        Self { words }
    }

    /// Reborrow as a shorter-lived [`TopKColumnMut`].
    pub fn reborrow_mut(&mut self) -> TopKColumnMut<'_> {
        TopKColumnBase {
            words: &mut *self.words,
        }
    }

    /// Return the words with the full lifetime of the underlying matrix.
    pub fn into_words(self) -> &'a mut [Word] {
        self.words
    }
}

impl<T> TopKColumnBase<T>
where
    T: Deref<Target = [Word]>,
{
    /// The number of words in the group. Always equal to `K`.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Return `true` if the group holds no words.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Return word `i`, or `None` if `i >= K`.
    pub fn get(&self, i: usize) -> Option<Word> {
        self.words.get(i).copied()
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    /// View the group as raw bytes in native byte order.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    pub fn iter(&self) -> std::iter::Copied<std::slice::Iter<'_, Word>> {
        self.words.iter().copied()
    }
}

impl<T> TopKColumnBase<T>
where
    T: DerefMut<Target = [Word]>,
{
    /// Overwrite word `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= K`.
    pub fn set(&mut self, i: usize, word: Word) {
        self.words[i] = word;
    }

    pub fn words_mut(&mut self) -> &mut [Word] {
        &mut self.words
    }

    /// View the group as mutable raw bytes in native byte order.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words)
    }

    pub fn fill(&mut self, word: Word) {
        self.words.fill(word)
    }

    /// Copy all words of `other` into `self`.
    ///
    /// # Panics
    ///
    /// Panics if `other` does not have exactly `K` words.
    pub fn copy_from<U>(&mut self, other: &TopKColumnBase<U>)
    where
        U: Deref<Target = [Word]>,
    {
        self.words.copy_from_slice(other.words())
    }
}

impl<T> Index<usize> for TopKColumnBase<T>
where
    T: Deref<Target = [Word]>,
{
    type Output = Word;
    fn index(&self, i: usize) -> &Word {
        &self.words[i]
    }
}

impl<T> IndexMut<usize> for TopKColumnBase<T>
where
    T: DerefMut<Target = [Word]>,
{
    fn index_mut(&mut self, i: usize) -> &mut Word {
        &mut self.words[i]
    }
}

///////////
// Tests //
///////////
