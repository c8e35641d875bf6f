/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */
pub mod data_type;
pub use data_type::*;

pub mod inspect_matrix;
pub use inspect_matrix::*;

pub mod tracing;
pub use tracing::{init_subscriber, init_test_subscriber};
