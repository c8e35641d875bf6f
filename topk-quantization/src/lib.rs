/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */
#![cfg_attr(
    not(test),
    warn(clippy::panic, clippy::unwrap_used, clippy::expect_used)
)]

//! Packed top-K column-group encoding for moving dense matrices off a compute device.
//!
//! Instead of transferring every element of an `R x C` matrix, a codec keeps only the `K`
//! most significant entries of every group of `G` consecutive columns. This crate owns the
//! container those entries are written into: a flat, headerless buffer of
//! `ceil(C / G)` groups, each `K` 64-bit words wide.
//!
//! * [`topk::TopKMatrix`]: the owning container. Its buffer comes either from a device
//!   ([`device::DeviceBuffer`]) or from a pooled allocator ([`alloc::AllocatorCore`]).
//! * [`topk::TopKMatrixRef`] / [`topk::TopKMatrixMut`]: zero-copy views over a
//!   group-aligned column range.
//! * [`topk::TopKColumnRef`] / [`topk::TopKColumnMut`]: the `K` words of a single group.
//! * [`topk::Shape`]: the out-of-band metadata a receiver needs to reinterpret a buffer.
//! * [`topk::AnyTopKMatrix`]: a type-erased handle for collections of matrices with mixed
//!   element types.
//!
//! Choosing which entries to keep and reconstructing a dense matrix from the words are the
//! job of companion codecs. This crate treats words as opaque.
//!
//! ```
//! use topk_quantization::{device::DeviceId, topk::{Builder, TopKMatrix}};
//!
//! let config = Builder::new(8).group_size(128).build().unwrap();
//! let mut matrix = TopKMatrix::<f32>::new(100, 257, &config, DeviceId::Gpu(0)).unwrap();
//!
//! for mut group in matrix.columns_mut() {
//!     group.fill(0);
//! }
//!
//! // Ship the second group on its own.
//! let slice = matrix.slice(128, 128).unwrap();
//! assert_eq!(slice.byte_size(), 64);
//! ```

mod utils;

pub mod alloc;
pub mod device;
pub mod error;
pub mod num;
pub mod topk;

#[cfg(test)]
mod test_util;
