/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Packed top-K column-group matrices.
//!
//! A dense `R x C` matrix is compressed by keeping only the `K` most significant entries
//! for every group of `G` consecutive columns. Each group is encoded as `K` 64-bit words
//! (see [`TopKColumn`]) and the groups are stored back to back in one flat buffer:
//!
//! ```text
//!            group 0              group 1                   group N-1
//!   |--------- K words ---------|--------- K words ---------| ... |--- K words ---|
//!   columns [0, G)              columns [G, 2G)                   columns [(N-1)G, C)
//! ```
//!
//! where `N = ceil(C / G)`. The buffer has no header: the row count, `K` and `G` travel
//! out-of-band as a [`Shape`].
//!
//! # Ownership
//!
//! A [`TopKMatrix`] either owns its buffer (allocated on a [`crate::device::DeviceId`]) or
//! borrows it from a pooled [`crate::alloc::AllocatorCore`], returning it exactly once
//! when dropped. Matrices are move-only; there is no implicit copy of a packed buffer.
//!
//! Column-range views ([`TopKMatrixRef`], [`TopKMatrixMut`]) alias the parent buffer and
//! borrow the parent, so they can never outlive it:
//!
//! ```compile_fail
//! use topk_quantization::{device::DeviceId, topk::{Builder, TopKMatrix}};
//!
//! let config = Builder::new(8).group_size(128).build().unwrap();
//! let view = {
//!     let matrix = TopKMatrix::<f32>::new(100, 256, &config, DeviceId::Cpu).unwrap();
//!     matrix.slice(128, 128).unwrap()
//! };
//! ```
//!
//! # Word Format
//!
//! How a word splits between a retained value and its position inside the group is
//! decided by the codec that fills the buffer. This module never interprets word contents.

mod column;
mod config;
mod erased;
mod inspect;
mod layout;
mod matrix;
mod view;

pub mod defaults;

pub use column::{TopKColumn, TopKColumnBase, TopKColumnMut, TopKColumnRef, Word, WORD_SIZE};
pub use config::{Builder, Config, ConfigError};
pub use erased::AnyTopKMatrix;
pub use inspect::{Inspect, InspectError};
pub use layout::{GroupLayout, Shape};
pub use matrix::{TopKError, TopKMatrix};
pub use view::{Columns, ColumnsMut, FromBytesError, SliceError, TopKMatrixMut, TopKMatrixRef};

use serde::{Deserialize, Serialize};

/// The dense element types a packed matrix can stand in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    F16,
    F32,
    F64,
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::F16 => "f16",
            Self::F32 => "f32",
            Self::F64 => "f64",
        };
        write!(f, "{}", name)
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for half::f16 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Marker for the dense element type a [`TopKMatrix`] was compressed from.
///
/// The element type does not change the packed layout. It only keeps matrices compressed
/// from different dense types from being mixed up.
pub trait TopKElement: sealed::Sealed + Copy + Send + Sync + std::fmt::Debug + 'static {
    const ELEMENT_TYPE: ElementType;
}

impl TopKElement for half::f16 {
    const ELEMENT_TYPE: ElementType = ElementType::F16;
}

impl TopKElement for f32 {
    const ELEMENT_TYPE: ElementType = ElementType::F32;
}

impl TopKElement for f64 {
    const ELEMENT_TYPE: ElementType = ElementType::F64;
}
