use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{QuantizeError, Result};
use crate::ir::ElementType;

/// Quantized storage type.
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
pub enum QuantType {
    /// 8-bit signed integer.
    QInt8,
    /// 8-bit unsigned integer.
    QUInt8,
    /// 16-bit signed integer.
    QInt16,
    /// 16-bit unsigned integer.
    QUInt16,
    /// 8-bit float, 4 exponent bits and 3 mantissa bits, finite values only.
    #[serde(rename = "QFLOAT8E4M3FN")]
    #[strum(serialize = "QFLOAT8E4M3FN")]
    QFloat8E4M3FN,
}

impl QuantType {
    /// Element type used to store values of this type.
    pub fn tensor_type(&self) -> ElementType {
        match self {
            QuantType::QInt8 => ElementType::Int8,
            QuantType::QUInt8 => ElementType::Uint8,
            QuantType::QInt16 => ElementType::Int16,
            QuantType::QUInt16 => ElementType::Uint16,
            QuantType::QFloat8E4M3FN => ElementType::Float8E4M3FN,
        }
    }

    /// Inverse of [`QuantType::tensor_type`].
    pub fn from_tensor_type(elem_type: ElementType) -> Result<Self> {
        match elem_type {
            ElementType::Int8 => Ok(QuantType::QInt8),
            ElementType::Uint8 => Ok(QuantType::QUInt8),
            ElementType::Int16 => Ok(QuantType::QInt16),
            ElementType::Uint16 => Ok(QuantType::QUInt16),
            ElementType::Float8E4M3FN => Ok(QuantType::QFloat8E4M3FN),
            other => Err(QuantizeError::UnsupportedType(format!(
                "{other:?} is not a quantized element type"
            ))),
        }
    }

    pub fn is_float8(&self) -> bool {
        matches!(self, QuantType::QFloat8E4M3FN)
    }

    /// Quantized range `[qmin, qmax]` of an integer type.
    ///
    /// `reduce_range` takes precedence over `symmetric`. Float8 has no integer range.
    pub fn qrange(&self, reduce_range: bool, symmetric: bool) -> Result<(i32, i32)> {
        let range = match (self, reduce_range, symmetric) {
            (QuantType::QFloat8E4M3FN, _, _) => {
                return Err(QuantizeError::UnsupportedType(format!(
                    "{self} has no integer quantization range"
                )));
            }
            (QuantType::QUInt8, true, _) => (0, 127),
            (QuantType::QInt8, true, _) => (-64, 64),
            (QuantType::QUInt16, true, _) => (0, 32767),
            (QuantType::QInt16, true, _) => (-16384, 16384),
            (QuantType::QUInt8, false, true) => (0, 254),
            (QuantType::QInt8, false, true) => (-127, 127),
            (QuantType::QUInt16, false, true) => (0, 65534),
            (QuantType::QInt16, false, true) => (-32767, 32767),
            (QuantType::QUInt8, false, false) => (0, 255),
            (QuantType::QInt8, false, false) => (-128, 127),
            (QuantType::QUInt16, false, false) => (0, 65535),
            (QuantType::QInt16, false, false) => (-32768, 32767),
        };
        Ok(range)
    }
}
