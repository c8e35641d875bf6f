/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::num::NonZeroUsize;

use crate::num::PowerOfTwo;

/// Number of logical columns that share one encoded group. Senders and receivers must
/// agree on this value, so it is rarely changed from the default.
pub const GROUP_SIZE: NonZeroUsize = NonZeroUsize::new(128).unwrap();

/// Base alignment of device buffers. A cache line keeps group boundaries from straddling
/// lines for common values of `K`.
pub const ALIGNMENT: PowerOfTwo = match PowerOfTwo::new(64) {
    Ok(p) => p,
    Err(_) => panic!("64 is a power of two"),
};
