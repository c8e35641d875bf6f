/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::num::{NonZeroU32, NonZeroUsize};

use serde::Deserialize;
use thiserror::Error;

use super::{
    column::{TopKColumn, WORD_SIZE},
    defaults,
};
use crate::num::{NotPowerOfTwo, PowerOfTwo};

////////////
// Config //
////////////

/// Validated parameters for packed top-K matrices.
///
/// ```
/// use topk_quantization::topk::Builder;
///
/// let config = Builder::new(8).group_size(128).build().unwrap();
/// assert_eq!(config.topk(), 8);
/// assert_eq!(config.column_bytes(), 64);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// The number of retained entries per column group.
    topk: NonZeroU32,

    /// The number of logical columns per group.
    group_size: NonZeroUsize,

    /// Base alignment of device buffers. Never less than the word alignment.
    alignment: PowerOfTwo,
}

impl Config {
    /// Attempt to construct a [`Config`] from a builder.
    ///
    /// See: [`Builder::build`].
    pub fn try_from_builder(builder: Builder) -> Result<Self, ConfigError> {
        let topk = try_nonzero_u32(builder.topk)
            .map_err(|err| ConfigErrorInner::Parameter("topk", err))?;

        // The encoded size of a single group must be addressable.
        if (topk.get() as usize).checked_mul(WORD_SIZE).is_none() {
            return Err(ConfigErrorInner::ColumnSize(topk.get()).into());
        }

        let group_size = match builder.group_size {
            Some(g) => NonZeroUsize::new(g)
                .ok_or(ConfigErrorInner::Parameter("group_size", NotNonZeroU32(g)))?,
            None => defaults::GROUP_SIZE,
        };

        let alignment = match builder.alignment {
            Some(a) => PowerOfTwo::new(a).map_err(ConfigErrorInner::Alignment)?,
            None => defaults::ALIGNMENT,
        };

        Ok(Self {
            topk,
            group_size,
            alignment: alignment.max(PowerOfTwo::alignment_of::<u64>()),
        })
    }

    /// A configuration with the given `K` and default values for everything else.
    pub fn with_topk(topk: NonZeroU32) -> Self {
        Self {
            topk,
            group_size: defaults::GROUP_SIZE,
            alignment: defaults::ALIGNMENT.max(PowerOfTwo::alignment_of::<u64>()),
        }
    }

    //-----------//
    // Accessors //
    //-----------//

    pub fn topk(&self) -> usize {
        self.topk.get() as usize
    }

    pub fn topk_u32(&self) -> NonZeroU32 {
        self.topk
    }

    pub fn group_size(&self) -> usize {
        self.group_size.get()
    }

    pub fn group_size_nonzero(&self) -> NonZeroUsize {
        self.group_size
    }

    pub fn alignment(&self) -> PowerOfTwo {
        self.alignment
    }

    /// The encoded size in bytes of one column group.
    pub fn column_bytes(&self) -> usize {
        // Checked in `try_from_builder`.
        TopKColumn::encoded_size(self.topk())
    }
}

/// Errors that can occur when building a [`Config`].
///
/// See [`Builder::build`] for possible failure modes.
#[derive(Debug, Clone, Error)]
#[error(transparent)]
pub struct ConfigError {
    #[from]
    inner: ConfigErrorInner,
}

#[derive(Debug, Clone, Error)]
enum ConfigErrorInner {
    #[error("parameter \"{0}\" invalid because {1}")]
    Parameter(&'static str, NotNonZeroU32),
    #[error("parameter \"topk\" ({0}) is too large for the encoded group to be addressable")]
    ColumnSize(u32),
    #[error("parameter \"alignment\" invalid")]
    Alignment(#[source] NotPowerOfTwo),
}

fn try_nonzero_u32(x: usize) -> Result<NonZeroU32, NotNonZeroU32> {
    let y: u32 = x.try_into().map_err(|_| NotNonZeroU32(x))?;
    NonZeroU32::new(y).ok_or(NotNonZeroU32(x))
}

#[derive(Debug, Clone)]
struct NotNonZeroU32(usize);

impl std::fmt::Display for NotNonZeroU32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 == 0 {
            write!(f, "it cannot be zero")
        } else {
            write!(f, "its value ({}) exceeds u32::MAX", self.0)
        }
    }
}

/////////////
// Builder //
/////////////

/// Builder for [`Config`].
///
/// Can be deserialized, so configurations may live next to the rest of a job description:
///
/// ```
/// use topk_quantization::topk::Builder;
///
/// let builder: Builder = serde_json::from_str(r#"{ "topk": 4, "group_size": 32 }"#).unwrap();
/// let config = builder.build().unwrap();
/// assert_eq!(config.group_size(), 32);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Builder {
    topk: usize,
    #[serde(default)]
    group_size: Option<usize>,
    #[serde(default)]
    alignment: Option<usize>,
}

impl Builder {
    /// Start a new builder retaining `topk` entries per column group.
    pub fn new(topk: usize) -> Self {
        Self {
            topk,
            group_size: None,
            alignment: None,
        }
    }

    /// Set the number of logical columns per group. Defaults to [`defaults::GROUP_SIZE`].
    pub fn group_size(mut self, group_size: usize) -> Self {
        self.group_size = Some(group_size);
        self
    }

    /// Set the base alignment of device buffers. Defaults to [`defaults::ALIGNMENT`].
    pub fn alignment(mut self, alignment: usize) -> Self {
        self.alignment = Some(alignment);
        self
    }

    /// Validate the builder, returning a [`Config`].
    ///
    /// Fails if:
    ///
    /// * `topk` is zero or exceeds `u32::MAX`.
    /// * `group_size` is zero.
    /// * `alignment` is not a power of two.
    pub fn build(self) -> Result<Config, ConfigError> {
        Config::try_from_builder(self)
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::format;

    #[test]
    fn test_defaults() {
        let config = Builder::new(8).build().unwrap();
        assert_eq!(config.topk(), 8);
        assert_eq!(config.topk_u32().get(), 8);
        assert_eq!(config.group_size(), defaults::GROUP_SIZE.get());
        assert_eq!(config.alignment(), defaults::ALIGNMENT);
        assert_eq!(config.column_bytes(), 64);

        assert_eq!(Config::with_topk(NonZeroU32::new(8).unwrap()), config);
    }

    #[test]
    fn test_overrides() {
        let config = Builder::new(3).group_size(5).alignment(2).build().unwrap();
        assert_eq!(config.group_size(), 5);
        assert_eq!(config.group_size_nonzero().get(), 5);
        assert_eq!(config.column_bytes(), 24);

        // Alignment never drops below the word alignment.
        assert_eq!(config.alignment().raw(), std::mem::align_of::<u64>());

        let config = Builder::new(3).alignment(4096).build().unwrap();
        assert_eq!(config.alignment().raw(), 4096);
    }

    #[test]
    fn test_errors() {
        let err = Builder::new(0).build().unwrap_err();
        assert_eq!(
            err.to_string(),
            "parameter \"topk\" invalid because it cannot be zero"
        );

        let too_big = (u32::MAX as usize).checked_add(1);
        if let Some(too_big) = too_big {
            let err = Builder::new(too_big).build().unwrap_err();
            assert_eq!(
                err.to_string(),
                format!(
                    "parameter \"topk\" invalid because its value ({}) exceeds u32::MAX",
                    too_big
                )
            );
        }

        let err = Builder::new(1).group_size(0).build().unwrap_err();
        assert_eq!(
            err.to_string(),
            "parameter \"group_size\" invalid because it cannot be zero"
        );

        let err = Builder::new(1).alignment(48).build().unwrap_err();
        assert_eq!(
            format(&err),
            "parameter \"alignment\" invalid\n    caused by: value 48 must be a power of two"
        );
    }

    #[test]
    fn test_deserialize() {
        let builder: Builder = serde_json::from_str(r#"{ "topk": 16 }"#).unwrap();
        assert_eq!(builder, Builder::new(16));

        let builder: Builder =
            serde_json::from_str(r#"{ "topk": 16, "group_size": 64, "alignment": 128 }"#)
                .unwrap();
        assert_eq!(builder, Builder::new(16).group_size(64).alignment(128));

        assert!(serde_json::from_str::<Builder>(r#"{ "topk": 1, "bits": 4 }"#).is_err());
    }
}
