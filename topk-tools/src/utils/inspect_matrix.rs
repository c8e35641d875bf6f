/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{
    fs::File,
    io::{BufWriter, Write},
    ops::RangeInclusive,
    path::PathBuf,
};

use anyhow::{Context, Result};
use topk_quantization::{
    alloc::{AllocatorCore, BumpAllocator},
    device::DeviceId,
    error::format,
    topk::{Builder, Config, TopKElement, TopKMatrix},
};

use super::DataType;

/// Everything needed to build a packed matrix and report on it.
#[derive(Debug, Clone)]
pub struct InspectMatrixParameters {
    pub name: String,
    pub nrows: usize,
    pub ncols: usize,
    pub builder: Builder,
    pub device: DeviceId,
    pub data_type: DataType,
    /// Carve the buffer out of a bump arena of this many bytes instead of allocating it
    /// on the device.
    pub pool_capacity: Option<usize>,
    /// Fill every group with a recognizable pattern before dumping it.
    pub pattern: bool,
    pub rows: RangeInclusive<usize>,
    pub cols: RangeInclusive<usize>,
    /// Write the out-of-band shape here as JSON.
    pub shape_output: Option<PathBuf>,
}

/// The word written at position `k` of group `group` by the fill pattern.
pub fn pattern_word(group: usize, k: usize) -> u64 {
    ((group as u64) << 32) | k as u64
}

/// Build the matrix described by `params`, log its sizing, optionally write its shape and
/// return the inspection dump.
///
/// An empty matrix is not an error: its shape is still written and the dump is skipped.
pub fn inspect_matrix(params: &InspectMatrixParameters) -> Result<Option<String>> {
    let config = params
        .builder
        .clone()
        .build()
        .context("invalid top-k configuration")?;

    match params.data_type {
        DataType::F16 => dispatch::<half::f16>(params, &config),
        DataType::F32 => dispatch::<f32>(params, &config),
        DataType::F64 => dispatch::<f64>(params, &config),
    }
}

fn dispatch<T>(params: &InspectMatrixParameters, config: &Config) -> Result<Option<String>>
where
    T: TopKElement,
{
    match params.pool_capacity {
        Some(capacity) => {
            let pool = BumpAllocator::new(capacity, config.alignment()).with_context(|| {
                format!("failed to reserve a pool of {} bytes", capacity)
            })?;
            let matrix = TopKMatrix::<T, _>::new_in(
                params.nrows,
                params.ncols,
                config,
                params.device,
                pool.clone(),
            )
            .context("failed to borrow the packed matrix from the pool")?;
            tracing::info!(
                used = pool.used(),
                capacity = pool.capacity(),
                "pool usage after construction"
            );
            report(matrix, params)
        }
        None => {
            let matrix =
                TopKMatrix::<T>::new(params.nrows, params.ncols, config, params.device)
                    .context("failed to allocate the packed matrix")?;
            report(matrix, params)
        }
    }
}

fn report<T, A>(
    mut matrix: TopKMatrix<T, A>,
    params: &InspectMatrixParameters,
) -> Result<Option<String>>
where
    T: TopKElement,
    A: AllocatorCore,
{
    tracing::info!(
        name = %params.name,
        element_type = %T::ELEMENT_TYPE,
        nrows = matrix.nrows(),
        ncols = matrix.ncols(),
        topk = matrix.topk(),
        group_size = matrix.group_size(),
        groups = matrix.num_groups(),
        column_bytes = matrix.column_bytes(),
        bytes = matrix.byte_size(),
        device = %matrix.device(),
        pooled = matrix.is_pooled(),
        "constructed packed matrix"
    );

    if params.pattern {
        for (group, mut column) in matrix.columns_mut().enumerate() {
            for k in 0..column.len() {
                column.set(k, pattern_word(group, k));
            }
        }
    }

    if let Some(path) = &params.shape_output {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &matrix.shape())?;
        writer.flush()?;
        tracing::info!(path = %path.display(), "wrote shape");
    }

    match matrix.inspect(&params.name, params.rows.clone(), params.cols.clone()) {
        Ok(dump) => Ok(Some(dump.to_string())),
        Err(err) => {
            tracing::warn!("skipping inspection: {}", format(&err));
            Ok(None)
        }
    }
}
