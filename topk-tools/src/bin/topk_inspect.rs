/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{fs::File, io::BufReader, ops::RangeInclusive, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use topk_quantization::{device::DeviceId, topk::Builder};
use topk_tools::utils::{init_subscriber, inspect_matrix, DataType, InspectMatrixParameters};

/// Build a packed top-K matrix, report its sizing and dump a region of its words.
///
/// Example Command:
/// cargo run --bin topk-inspect -- --rows 100 --cols 257 --topk 8 --device 0
/// --pattern --print-cols 120:140
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of logical rows.
    #[arg(long)]
    rows: usize,

    /// Number of logical columns.
    #[arg(long)]
    cols: usize,

    /// Entries retained per column group.
    #[arg(long, required_unless_present = "config")]
    topk: Option<usize>,

    /// Logical columns per group.
    #[arg(long)]
    group_size: Option<usize>,

    /// Base alignment of the packed buffer in bytes.
    #[arg(long)]
    alignment: Option<usize>,

    /// JSON file holding the top-K configuration. Overrides the individual options.
    #[arg(long, conflicts_with_all = ["topk", "group_size", "alignment"])]
    config: Option<PathBuf>,

    /// Device id: -1 for the host, otherwise an accelerator ordinal.
    #[arg(long, default_value = "-1", allow_negative_numbers = true)]
    device: i32,

    #[arg(long, value_enum, default_value = "f32")]
    data_type: DataType,

    /// Borrow the buffer from a bump pool of this many bytes.
    #[arg(long)]
    pool_capacity: Option<usize>,

    /// Fill every group with a recognizable pattern before dumping.
    #[arg(long)]
    pattern: bool,

    /// Inclusive row range to print, as `first:last`. Defaults to every row.
    #[arg(long, value_parser = parse_range)]
    print_rows: Option<RangeInclusive<usize>>,

    /// Inclusive column range to print, as `first:last`. Defaults to every column.
    #[arg(long, value_parser = parse_range)]
    print_cols: Option<RangeInclusive<usize>>,

    /// Write the out-of-band shape to this path as JSON.
    #[arg(long)]
    shape_output: Option<PathBuf>,

    /// Label printed in the dump header.
    #[arg(long, default_value = "matrix")]
    name: String,
}

fn parse_range(s: &str) -> Result<RangeInclusive<usize>> {
    let (first, last) = s
        .split_once(':')
        .with_context(|| format!("expected `first:last`, found \"{}\"", s))?;
    Ok(first.trim().parse()?..=last.trim().parse()?)
}

/// An inclusive range covering `len` items. Empty extents map to `0..=0` and are rejected
/// later by the inspection itself.
fn full_range(len: usize) -> RangeInclusive<usize> {
    0..=len.saturating_sub(1)
}

impl Args {
    fn builder(&self) -> Result<Builder> {
        if let Some(path) = &self.config {
            let file =
                File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
            return serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("failed to parse {}", path.display()));
        }

        // `clap` guarantees `topk` is present when `config` is not.
        let mut builder = Builder::new(self.topk.unwrap_or_default());
        if let Some(group_size) = self.group_size {
            builder = builder.group_size(group_size);
        }
        if let Some(alignment) = self.alignment {
            builder = builder.alignment(alignment);
        }
        Ok(builder)
    }

    fn into_parameters(self) -> Result<InspectMatrixParameters> {
        let builder = self.builder()?;
        let device = DeviceId::try_from(self.device)?;
        Ok(InspectMatrixParameters {
            name: self.name,
            nrows: self.rows,
            ncols: self.cols,
            builder,
            device,
            data_type: self.data_type,
            pool_capacity: self.pool_capacity,
            pattern: self.pattern,
            rows: self.print_rows.unwrap_or_else(|| full_range(self.rows)),
            cols: self.print_cols.unwrap_or_else(|| full_range(self.cols)),
            shape_output: self.shape_output,
        })
    }
}

fn main() -> Result<()> {
    init_subscriber();

    let params = Args::parse().into_parameters()?;
    if let Some(dump) = inspect_matrix(&params)? {
        print!("{}", dump);
    }
    Ok(())
}
