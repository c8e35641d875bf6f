/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{fmt, ops::RangeInclusive};

use thiserror::Error;

use super::{TopKElement, TopKMatrix, TopKMatrixRef};
use crate::alloc::AllocatorCore;

/// Errors from [`TopKMatrixRef::inspect`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InspectError {
    #[error("cannot inspect an empty matrix ({nrows} rows, {ncols} columns)")]
    Empty { nrows: usize, ncols: usize },
    #[error("{axis} range {start}..={end} is out of bounds for a matrix with {len} {axis}")]
    OutOfRange {
        axis: &'static str,
        start: usize,
        end: usize,
        len: usize,
    },
}

fn check_range(
    axis: &'static str,
    range: &RangeInclusive<usize>,
    len: usize,
) -> Result<(), InspectError> {
    let (start, end) = (*range.start(), *range.end());
    if start > end || end >= len {
        Err(InspectError::OutOfRange {
            axis,
            start,
            end,
            len,
        })
    } else {
        Ok(())
    }
}

/// A printable dump of the packed words behind a rectangular region of a matrix.
///
/// Words are printed as raw hexadecimal. Interpreting them is up to the codec that
/// produced them.
#[derive(Debug, Clone, Copy)]
pub struct Inspect<'a, T> {
    view: TopKMatrixRef<'a, T>,
    name: &'a str,
    rows: (usize, usize),
    cols: (usize, usize),
}

impl<'a, T> TopKMatrixRef<'a, T>
where
    T: TopKElement,
{
    /// Prepare a dump of the inclusive `rows x cols` region under the label `name`.
    ///
    /// Fails if the matrix has no rows or no columns, or if either range does not lie
    /// within the matrix.
    ///
    /// ```
    /// use topk_quantization::{device::DeviceId, topk::{Builder, TopKMatrix}};
    ///
    /// let config = Builder::new(1).group_size(2).build().unwrap();
    /// let mut matrix = TopKMatrix::<f32>::new(1, 3, &config, DeviceId::Cpu).unwrap();
    /// matrix.column_mut(1).unwrap().set(0, 0xff);
    ///
    /// let dump = matrix.inspect("m", 0..=0, 1..=2).unwrap().to_string();
    /// assert_eq!(
    ///     dump,
    ///     "###### m (1, 3) ######\n\
    ///      ------ Print Range (0:0, 1:2) ------\n\
    ///      group 0 [0, 2): 0x0000000000000000\n\
    ///      group 1 [2, 3): 0x00000000000000ff\n"
    /// );
    /// ```
    pub fn inspect(
        &self,
        name: &'a str,
        rows: RangeInclusive<usize>,
        cols: RangeInclusive<usize>,
    ) -> Result<Inspect<'a, T>, InspectError> {
        let (nrows, ncols) = (self.nrows(), self.ncols());
        if nrows == 0 || ncols == 0 {
            return Err(InspectError::Empty { nrows, ncols });
        }
        check_range("rows", &rows, nrows)?;
        check_range("columns", &cols, ncols)?;

        Ok(Inspect {
            view: *self,
            name,
            rows: rows.into_inner(),
            cols: cols.into_inner(),
        })
    }
}

impl<T, A> TopKMatrix<T, A>
where
    T: TopKElement,
    A: AllocatorCore,
{
    /// Prepare a dump of the inclusive `rows x cols` region under the label `name`.
    ///
    /// See [`TopKMatrixRef::inspect`].
    pub fn inspect<'a>(
        &'a self,
        name: &'a str,
        rows: RangeInclusive<usize>,
        cols: RangeInclusive<usize>,
    ) -> Result<Inspect<'a, T>, InspectError> {
        self.as_view().inspect(name, rows, cols)
    }
}

impl<T> fmt::Display for Inspect<'_, T>
where
    T: TopKElement,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let view = &self.view;
        writeln!(
            f,
            "###### {} ({}, {}) ######",
            self.name,
            view.nrows(),
            view.ncols()
        )?;
        writeln!(
            f,
            "------ Print Range ({}:{}, {}:{}) ------",
            self.rows.0, self.rows.1, self.cols.0, self.cols.1
        )?;

        let layout = view.shape().layout();
        let first = layout.group_of(self.cols.0);
        let last = layout.group_of(self.cols.1);
        for (offset, column) in view.columns().skip(first).take(last - first + 1).enumerate() {
            let group = first + offset;
            let start = group * layout.group_size();
            let end = (start + layout.group_size()).min(view.ncols());
            write!(f, "group {} [{}, {}):", group, start, end)?;
            for word in column.iter() {
                write!(f, " {:#018x}", word)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

///////////
// Tests //
///////////
