/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use topk_quantization::topk::ElementType;

/// Dense element type the packed matrix stands in for.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Half precision float.
    F16,

    /// 32 bit float.
    F32,

    /// 64 bit float.
    F64,
}

impl From<DataType> for ElementType {
    fn from(data_type: DataType) -> Self {
        match data_type {
            DataType::F16 => ElementType::F16,
            DataType::F32 => ElementType::F32,
            DataType::F64 => ElementType::F64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_type() {
        assert_eq!(ElementType::from(DataType::F16), ElementType::F16);
        assert_eq!(ElementType::from(DataType::F32), ElementType::F32);
        assert_eq!(ElementType::from(DataType::F64), ElementType::F64);
    }

    #[test]
    fn test_value_enum() {
        assert_eq!(DataType::from_str("f16", true).unwrap(), DataType::F16);
        assert_eq!(DataType::from_str("F64", true).unwrap(), DataType::F64);
        assert!(DataType::from_str("u8", true).is_err());
    }
}
