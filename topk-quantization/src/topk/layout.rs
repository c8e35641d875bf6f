/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{
    num::{NonZeroU32, NonZeroUsize},
    ops::Range,
};

use serde::{Deserialize, Serialize};

use super::{
    column::{TopKColumn, WORD_SIZE},
    Config,
};
use crate::utils::div_round_up;

/////////////////
// GroupLayout //
/////////////////

/// Maps logical columns onto encoded groups.
///
/// Column `c` lives in group `c / G`, and group `g` occupies words `[g * K, (g + 1) * K)`
/// of the packed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupLayout {
    group_size: NonZeroUsize,
    topk: NonZeroU32,
}

impl GroupLayout {
    pub fn new(group_size: NonZeroUsize, topk: NonZeroU32) -> Self {
        Self { group_size, topk }
    }

    pub fn group_size(&self) -> usize {
        self.group_size.get()
    }

    /// The number of words in one group (`K`).
    pub fn words_per_group(&self) -> usize {
        self.topk.get() as usize
    }

    /// The number of bytes in one encoded group.
    pub fn column_bytes(&self) -> usize {
        TopKColumn::encoded_size(self.words_per_group())
    }

    /// The group holding logical column `col`.
    pub fn group_of(&self, col: usize) -> usize {
        col / self.group_size
    }

    /// The number of groups needed for `ncols` logical columns: `ceil(ncols / G)`.
    pub fn num_groups(&self, ncols: usize) -> usize {
        div_round_up(ncols, self.group_size.get())
    }

    /// Return `true` if `col` is the first column of a group.
    pub fn is_group_aligned(&self, col: usize) -> bool {
        col % self.group_size == 0
    }

    /// The groups touched by the logical columns `[start, start + n)`.
    ///
    /// For a group-aligned `start`, this is exactly the set of groups a slice of `n`
    /// columns starting at `start` spans.
    pub fn column_groups(&self, start: usize, n: usize) -> Range<usize> {
        let first = self.group_of(start);
        first..first + self.num_groups(n)
    }

    /// The word offsets occupied by `groups`.
    pub fn word_range(&self, groups: Range<usize>) -> Range<usize> {
        let k = self.words_per_group();
        groups.start * k..groups.end * k
    }

    /// The word offsets occupied by the single group `group`.
    pub fn group_words(&self, group: usize) -> Range<usize> {
        self.word_range(group..group + 1)
    }

    /// The byte offsets occupied by `groups`.
    pub fn byte_range(&self, groups: Range<usize>) -> Range<usize> {
        let words = self.word_range(groups);
        words.start * WORD_SIZE..words.end * WORD_SIZE
    }
}

///////////
// Shape //
///////////

/// The out-of-band description of a packed buffer.
///
/// A packed buffer carries no header, so anything that receives one (a peer process, a
/// file on disk) also needs the [`Shape`] it was produced with.
///
/// ```
/// use std::num::{NonZeroU32, NonZeroUsize};
/// use topk_quantization::topk::Shape;
///
/// let shape = Shape::new(
///     100,
///     257,
///     NonZeroU32::new(8).unwrap(),
///     NonZeroUsize::new(128).unwrap(),
/// );
/// assert_eq!(shape.num_groups(), 3);
/// assert_eq!(shape.checked_byte_size(), Some(192));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    nrows: usize,
    ncols: usize,
    topk: NonZeroU32,
    group_size: NonZeroUsize,
}

impl Shape {
    pub fn new(nrows: usize, ncols: usize, topk: NonZeroU32, group_size: NonZeroUsize) -> Self {
        Self {
            nrows,
            ncols,
            topk,
            group_size,
        }
    }

    /// Construct a shape for an `nrows x ncols` matrix compressed with `config`.
    pub fn with_config(nrows: usize, ncols: usize, config: &Config) -> Self {
        Self::new(
            nrows,
            ncols,
            config.topk_u32(),
            config.group_size_nonzero(),
        )
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn topk(&self) -> usize {
        self.topk.get() as usize
    }

    pub fn group_size(&self) -> usize {
        self.group_size.get()
    }

    pub fn layout(&self) -> GroupLayout {
        GroupLayout::new(self.group_size, self.topk)
    }

    pub fn num_groups(&self) -> usize {
        self.layout().num_groups(self.ncols)
    }

    /// The number of words in the packed buffer, or `None` on overflow.
    pub fn checked_num_words(&self) -> Option<usize> {
        self.num_groups().checked_mul(self.topk())
    }

    /// The size of the packed buffer in bytes, or `None` on overflow.
    pub fn checked_byte_size(&self) -> Option<usize> {
        self.checked_num_words()?.checked_mul(WORD_SIZE)
    }

    /// Return a copy of `self` with `ncols` logical columns.
    pub(crate) fn with_columns(&self, ncols: usize) -> Self {
        Self { ncols, ..*self }
    }
}

///////////
// Tests //
///////////
