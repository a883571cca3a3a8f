//! User-specified quantization overrides, keyed by tensor name.
//!
//! The JSON form matches the `TensorQuantOverrides` extra option: every tensor maps to a
//! list of override objects, one for per-tensor quantization or one per channel.
//!
//! ```json
//! {
//!     "conv.weight": [{"quant_type": "QInt8", "symmetric": true}],
//!     "fc.weight": [{"scale": 0.5, "zero_point": 0}, {"scale": 0.25, "zero_point": 0}]
//! }
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{QuantizeError, Result};

use super::QuantType;

/// Quantization directives for one tensor or one channel of a tensor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quant_type: Option<QuantType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zero_point: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symmetric: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_range: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rmin: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rmax: Option<f32>,
}

impl QuantOverride {
    /// Explicit `(scale, zero_point)` pair, when both are given.
    pub fn scale_zero_point(&self) -> Option<(f32, i32)> {
        self.scale.zip(self.zero_point)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Names of set fields that would be ignored next to an explicit scale and zero-point.
    fn fields_unsupported_with_scale(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.symmetric.is_some() {
            fields.push("symmetric");
        }
        if self.reduce_range.is_some() {
            fields.push("reduce_range");
        }
        if self.rmin.is_some() {
            fields.push("rmin");
        }
        if self.rmax.is_some() {
            fields.push("rmax");
        }
        fields
    }
}

/// Reject explicit parameters that the storage type cannot carry.
fn check_scale_zero_point(
    tensor_name: &str,
    index: usize,
    quant_type: QuantType,
    scale: f32,
    zero_point: i32,
) -> Result<()> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(QuantizeError::Validation(format!(
            "Override {index} of tensor '{tensor_name}': 'scale' must be finite and positive, got {scale}"
        )));
    }

    let (qmin, qmax) = if quant_type.is_float8() {
        (0, 0)
    } else {
        quant_type.qrange(false, false)?
    };
    if zero_point < qmin || zero_point > qmax {
        return Err(QuantizeError::Validation(format!(
            "Override {index} of tensor '{tensor_name}': 'zero_point' {zero_point} is outside the range [{qmin}, {qmax}] of {quant_type}"
        )));
    }

    Ok(())
}

/// Overrides for every tensor the user configured.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TensorQuantOverrides {
    overrides: HashMap<String, Vec<QuantOverride>>,
}

impl TensorQuantOverrides {
    pub fn new(overrides: HashMap<String, Vec<QuantOverride>>) -> Self {
        Self { overrides }
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    pub fn contains(&self, tensor_name: &str) -> bool {
        self.overrides.contains_key(tensor_name)
    }

    /// Check every override against the model before any tensor is quantized.
    ///
    /// A target must be an initializer or a tensor with type information; only
    /// initializers may carry a per-channel list; `scale` and `zero_point` come as a pair
    /// and exclude `symmetric`, `reduce_range`, `rmin` and `rmax`. An explicit `scale` must
    /// be finite and positive and an explicit `zero_point` must be representable by the
    /// quant type it is stored in: the override's own, or the default weight or
    /// activation type.
    pub fn validate(
        &self,
        initializers: &HashSet<String>,
        activation_names: &HashSet<String>,
        default_weight_qtype: QuantType,
        default_activation_qtype: QuantType,
    ) -> Result<()> {
        for (tensor_name, overrides) in self.overrides.iter() {
            let is_initializer = initializers.contains(tensor_name);
            if !is_initializer && !activation_names.contains(tensor_name) {
                return Err(QuantizeError::Validation(format!(
                    "Tensor '{tensor_name}' in TensorQuantOverrides is not present in the model"
                )));
            }

            if !is_initializer && overrides.len() > 1 {
                return Err(QuantizeError::Validation(format!(
                    "Tensor '{tensor_name}' has a list of per-channel overrides, but is not an initializer"
                )));
            }

            for (index, quant_override) in overrides.iter().enumerate() {
                let has_scale = quant_override.scale.is_some();
                let has_zero_point = quant_override.zero_point.is_some();
                if has_scale != has_zero_point {
                    return Err(QuantizeError::Validation(format!(
                        "Override {index} of tensor '{tensor_name}' must provide both 'scale' and 'zero_point' if one of them is provided"
                    )));
                }

                if has_scale {
                    if let Some(field) = quant_override.fields_unsupported_with_scale().first() {
                        return Err(QuantizeError::Validation(format!(
                            "Override {index} of tensor '{tensor_name}': option '{field}' is invalid with 'scale' and 'zero_point'"
                        )));
                    }
                }

                let quant_type = quant_override.quant_type.unwrap_or(if is_initializer {
                    default_weight_qtype
                } else {
                    default_activation_qtype
                });
                if let Some((scale, zero_point)) = quant_override.scale_zero_point() {
                    check_scale_zero_point(tensor_name, index, quant_type, scale, zero_point)?;
                }

                if !is_initializer {
                    if let Some(quant_type) = quant_override.quant_type {
                        if quant_type != default_activation_qtype {
                            log::debug!(
                                "Activation '{tensor_name}' overrides quant type {default_activation_qtype} with {quant_type}"
                            );
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// The override of a tensor quantized as a whole, empty when none was configured.
    pub fn per_tensor(&self, tensor_name: &str) -> Result<QuantOverride> {
        match self.overrides.get(tensor_name).map(Vec::as_slice) {
            None | Some([]) => Ok(QuantOverride::default()),
            Some([quant_override]) => Ok(quant_override.clone()),
            Some(list) => Err(QuantizeError::Validation(format!(
                "Expected tensor '{tensor_name}' to use per-tensor quantization overrides, but found {} per-channel overrides",
                list.len()
            ))),
        }
    }

    /// One override per channel, empty overrides when none was configured.
    pub fn per_channel(&self, tensor_name: &str, num_channels: usize) -> Result<Vec<QuantOverride>> {
        match self.overrides.get(tensor_name) {
            None => Ok(vec![QuantOverride::default(); num_channels]),
            Some(list) if list.len() == num_channels => Ok(list.clone()),
            Some(list) => Err(QuantizeError::Validation(format!(
                "Expected tensor '{tensor_name}' to have {num_channels} per-channel quantization overrides, but found {} instead",
                list.len()
            ))),
        }
    }

    /// Distinct quant types named by any override.
    pub fn quant_types(&self) -> BTreeSet<QuantType> {
        self.overrides
            .values()
            .flatten()
            .filter_map(|quant_override| quant_override.quant_type)
            .collect()
    }
}
