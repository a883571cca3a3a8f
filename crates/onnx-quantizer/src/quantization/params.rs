use std::collections::BTreeMap;

use crate::error::{QuantizeError, Result};
use crate::ir::TensorData;

/// A value stored in [`QuantizationParams`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Str(String),
    Array(TensorData),
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<TensorData> for ParamValue {
    fn from(value: TensorData) -> Self {
        ParamValue::Array(value)
    }
}

/// Finalized quantization parameters of one tensor (`scale`, `zero_point`, and `axis`
/// for per-channel quantization).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuantizationParams {
    data: BTreeMap<String, ParamValue>,
}

impl QuantizationParams {
    /// Build a parameter bag; a `scale` entry must be a float32 or float16 array.
    pub fn new<I, K>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, ParamValue)>,
        K: Into<String>,
    {
        let data: BTreeMap<String, ParamValue> = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect();

        if let Some(scale) = data.get("scale") {
            match scale {
                ParamValue::Array(values) if values.elem_type().is_scale_type() => {}
                ParamValue::Array(values) => {
                    return Err(QuantizeError::Validation(format!(
                        "Unexpected element type {:?} for key 'scale', it should be float32 or float16",
                        values.elem_type()
                    )));
                }
                other => {
                    return Err(QuantizeError::Validation(format!(
                        "Unexpected value {other:?} for key 'scale', it should be a float array"
                    )));
                }
            }
        }

        Ok(Self { data })
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.data.get(key)
    }

    pub fn scale(&self) -> Option<&TensorData> {
        match self.data.get("scale") {
            Some(ParamValue::Array(values)) => Some(values),
            _ => None,
        }
    }

    pub fn zero_point(&self) -> Option<&TensorData> {
        match self.data.get("zero_point") {
            Some(ParamValue::Array(values)) => Some(values),
            _ => None,
        }
    }

    pub fn axis(&self) -> Option<i64> {
        match self.data.get("axis") {
            Some(ParamValue::Int(axis)) => Some(*axis),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.data.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    #[test]
    fn float_scales_are_accepted() {
        let params = QuantizationParams::new([
            ("scale", ParamValue::from(TensorData::Float16(vec![f16::from_f32(0.5)]))),
            ("zero_point", ParamValue::from(TensorData::Int8(vec![0]))),
            ("axis", ParamValue::from(0i64)),
        ])
        .unwrap();

        assert_eq!(params.len(), 3);
        assert_eq!(params.axis(), Some(0));
        assert_eq!(params.zero_point(), Some(&TensorData::Int8(vec![0])));
        assert!(params.scale().is_some());
    }

    #[test]
    fn integer_scale_is_rejected() {
        let result = QuantizationParams::new([("scale", ParamValue::from(TensorData::Int32(vec![1])))]);
        assert!(matches!(result, Err(QuantizeError::Validation(_))));
    }

    #[test]
    fn string_scale_is_rejected() {
        let result = QuantizationParams::new([("scale", ParamValue::from("0.5"))]);
        assert!(matches!(result, Err(QuantizeError::Validation(_))));
    }

    #[test]
    fn other_keys_accept_any_value() {
        let params = QuantizationParams::new([("mode", ParamValue::from("symmetric"))]).unwrap();
        assert_eq!(params.get("mode"), Some(&ParamValue::Str("symmetric".into())));
        assert!(params.scale().is_none());
    }
}
