/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use super::{ElementType, Shape, TopKElement, TopKMatrix};
use crate::{alloc::AllocatorCore, device::DeviceId};

/// An object-safe handle over packed matrices of any element type and allocator.
///
/// Only sizing and placement queries are available through this trait. Descriptor access
/// goes through the concrete [`TopKMatrix`] so that it never pays for dynamic dispatch.
///
/// ```
/// use std::collections::HashMap;
/// use topk_quantization::{
///     device::DeviceId,
///     topk::{AnyTopKMatrix, Builder, ElementType, TopKMatrix},
/// };
///
/// let config = Builder::new(4).group_size(64).build().unwrap();
/// let mut gradients: HashMap<String, Box<dyn AnyTopKMatrix>> = HashMap::new();
/// gradients.insert(
///     "weights".into(),
///     Box::new(TopKMatrix::<f32>::new(32, 256, &config, DeviceId::Gpu(0)).unwrap()),
/// );
/// gradients.insert(
///     "bias".into(),
///     Box::new(TopKMatrix::<half::f16>::new(1, 256, &config, DeviceId::Cpu).unwrap()),
/// );
///
/// let total: usize = gradients.values().map(|m| m.byte_size()).sum();
/// assert_eq!(total, 2 * 4 * 4 * 8);
/// assert_eq!(gradients["bias"].element_type(), ElementType::F16);
/// ```
pub trait AnyTopKMatrix: std::fmt::Debug + Send + Sync {
    /// The dense element type the matrix was compressed from.
    fn element_type(&self) -> ElementType;

    fn shape(&self) -> Shape;

    fn device(&self) -> DeviceId;

    /// The total size of the packed buffer in bytes.
    fn byte_size(&self) -> usize;

    fn nrows(&self) -> usize {
        self.shape().nrows()
    }

    fn ncols(&self) -> usize {
        self.shape().ncols()
    }

    fn topk(&self) -> usize {
        self.shape().topk()
    }

    fn num_groups(&self) -> usize {
        self.shape().num_groups()
    }
}

impl<T, A> AnyTopKMatrix for TopKMatrix<T, A>
where
    T: TopKElement,
    A: AllocatorCore + std::fmt::Debug + Send + Sync,
{
    fn element_type(&self) -> ElementType {
        T::ELEMENT_TYPE
    }

    fn shape(&self) -> Shape {
        TopKMatrix::shape(self)
    }

    fn device(&self) -> DeviceId {
        TopKMatrix::device(self)
    }

    fn byte_size(&self) -> usize {
        TopKMatrix::byte_size(self)
    }

    fn num_groups(&self) -> usize {
        TopKMatrix::num_groups(self)
    }
}

///////////
// Tests //
///////////
