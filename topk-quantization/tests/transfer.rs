/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{
    alloc::Layout,
    collections::HashMap,
    ptr::NonNull,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use topk_quantization::{
    alloc::{AllocatorCore, AllocatorError, BumpAllocator, GlobalAllocator},
    device::DeviceId,
    num::PowerOfTwo,
    topk::{
        AnyTopKMatrix, Builder, InspectError, Shape, TopKColumn, TopKMatrix, TopKMatrixRef,
        WORD_SIZE,
    },
};

/// A pool that counts calls and remembers the last pointer it handed out.
#[derive(Debug, Clone, Default)]
struct Pool {
    mallocs: Arc<AtomicUsize>,
    frees: Arc<AtomicUsize>,
    last: Arc<AtomicUsize>,
}

// SAFETY: Forwards to the global allocator.
unsafe impl AllocatorCore for Pool {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocatorError> {
        let ptr = GlobalAllocator.allocate(layout)?;
        self.mallocs.fetch_add(1, Ordering::Relaxed);
        self.last
            .store(ptr.cast::<u8>().as_ptr() as usize, Ordering::Relaxed);
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<[u8]>, layout: Layout) {
        assert_eq!(
            ptr.cast::<u8>().as_ptr() as usize,
            self.last.load(Ordering::Relaxed)
        );
        self.frees.fetch_add(1, Ordering::Relaxed);
        // SAFETY: Inherited from caller.
        unsafe { GlobalAllocator.deallocate(ptr, layout) }
    }
}

impl Pool {
    fn counts(&self) -> (usize, usize) {
        (
            self.mallocs.load(Ordering::Relaxed),
            self.frees.load(Ordering::Relaxed),
        )
    }
}

#[test]
fn end_to_end_scenario() {
    let config = Builder::new(8).group_size(128).build().unwrap();
    let mut matrix = TopKMatrix::<f32>::new(100, 257, &config, DeviceId::Cpu).unwrap();

    assert_eq!(TopKColumn::encoded_size(8), 8 * WORD_SIZE);
    assert_eq!(matrix.nrows(), 100);
    assert_eq!(matrix.ncols(), 257);
    assert_eq!(matrix.num_groups(), 3);
    assert_eq!(matrix.column_bytes(), 64);
    assert_eq!(matrix.byte_size(), 192);

    for (g, mut column) in matrix.columns_mut().enumerate() {
        for k in 0..column.len() {
            column[k] = ((g as u64) << 32) | k as u64;
        }
    }

    let slice = matrix.slice(128, 128).unwrap();
    assert_eq!(slice.num_groups(), 1);
    assert_eq!(slice.column(0), matrix.column(1));
    assert_eq!(
        slice.as_ptr(),
        matrix.column(1).unwrap().as_bytes().as_ptr()
    );
}

#[test]
fn sender_and_receiver() {
    let config = Builder::new(4).group_size(32).build().unwrap();
    let mut sender = TopKMatrix::<f64>::new(16, 100, &config, DeviceId::Gpu(0)).unwrap();
    for (g, mut column) in sender.columns_mut().enumerate() {
        column.fill(g as u64 + 1);
    }

    // The shape travels out of band.
    let shape_json = serde_json::to_string(&sender.shape()).unwrap();
    let wire: Vec<u8> = sender.as_bytes().to_vec();

    let shape: Shape = serde_json::from_str(&shape_json).unwrap();
    assert_eq!(shape.checked_byte_size(), Some(wire.len()));

    // `Vec<u8>` gives no alignment guarantee, so receive into words.
    let mut received = vec![0u64; wire.len() / WORD_SIZE];
    bytemuck::cast_slice_mut::<u64, u8>(&mut received).copy_from_slice(&wire);
    let view =
        TopKMatrixRef::<f64>::from_bytes(shape, bytemuck::cast_slice(&received)).unwrap();
    assert_eq!(view.nrows(), 16);
    assert_eq!(view.num_groups(), 4);
    assert_eq!(view.column(3).unwrap().words(), &[4, 4, 4, 4]);

    let mut receiver = TopKMatrix::<f64>::new(16, 100, &config, DeviceId::Cpu).unwrap();
    receiver.copy_from_bytes(&wire).unwrap();
    assert_eq!(receiver.as_bytes(), sender.as_bytes());
}

#[test]
fn pool_round_trip() {
    let pool = Pool::default();
    let config = Builder::new(8).build().unwrap();

    {
        let matrix =
            TopKMatrix::<f32, _>::new_in(10, 1000, &config, DeviceId::Gpu(1), pool.clone())
                .unwrap();
        assert_eq!(pool.counts(), (1, 0));
        assert_eq!(matrix.as_ptr() as usize, pool.last.load(Ordering::Relaxed));

        let moved = matrix;
        let _view = moved.slice(0, 128).unwrap();
        assert_eq!(pool.counts(), (1, 0));
    }
    assert_eq!(pool.counts(), (1, 1));

    // No pool, no calls.
    drop(TopKMatrix::<f32>::new(10, 1000, &config, DeviceId::Gpu(1)).unwrap());
    assert_eq!(pool.counts(), (1, 1));
}

#[test]
fn shared_bump_pool() {
    let pool = BumpAllocator::new(1 << 16, PowerOfTwo::new(64).unwrap()).unwrap();
    let config = Builder::new(16).group_size(64).build().unwrap();

    let mut layers: HashMap<String, Box<dyn AnyTopKMatrix>> = HashMap::new();
    for (i, ncols) in [64, 200, 1024].into_iter().enumerate() {
        let matrix =
            TopKMatrix::<f32, _>::new_in(8, ncols, &config, DeviceId::Gpu(0), pool.clone())
                .unwrap();
        layers.insert(format!("layer{}", i), Box::new(matrix));
    }

    let total: usize = layers.values().map(|m| m.byte_size()).sum();
    assert_eq!(total, (1 + 4 + 16) * 16 * WORD_SIZE);
    assert_eq!(pool.used(), total);
    assert_eq!(layers["layer1"].num_groups(), 4);
}

#[test]
fn empty_matrices() {
    let config = Builder::new(8).build().unwrap();
    for (nrows, ncols) in [(0, 10), (10, 0)] {
        let matrix = TopKMatrix::<f32>::new(nrows, ncols, &config, DeviceId::Cpu).unwrap();
        assert_eq!(
            matrix.inspect("empty", 0..=0, 0..=0).unwrap_err(),
            InspectError::Empty { nrows, ncols }
        );
        assert_eq!(matrix.byte_size(), if ncols == 0 { 0 } else { 64 });
    }

    // An empty matrix still travels: the receiver gets an empty buffer and the shape.
    let sender = TopKMatrix::<f32>::new(10, 0, &config, DeviceId::Gpu(0)).unwrap();
    let wire = sender.as_bytes().to_vec();
    let view = TopKMatrixRef::<f32>::from_bytes(sender.shape(), &wire).unwrap();
    assert_eq!(view.nrows(), 10);
    assert_eq!(view.ncols(), 0);
    assert_eq!(view.num_groups(), 0);
    assert!(view.column(0).is_none());
}
