/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

fn filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Install a global subscriber logging to `stdout` that honors `RUST_LOG`, falling back
/// to the "info" level when it is unset.
///
/// Library crates only emit events through `tracing`; binaries call this once at startup.
pub fn init_subscriber() {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_target(true))
        .init();
}

/// Install a subscriber for the current test thread only.
///
/// The returned guard removes the subscriber when dropped, so tests running in parallel do
/// not conflict.
pub fn init_test_subscriber() -> tracing::subscriber::DefaultGuard {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_target(true).with_test_writer())
        .set_default()
}
