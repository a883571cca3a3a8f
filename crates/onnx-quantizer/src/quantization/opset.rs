use crate::error::{QuantizeError, Result};
use crate::model::ModelGraph;

use super::QuantType;

/// Lowest opset defining the quantization operators.
pub const MIN_QUANTIZATION_OPSET: i64 = 11;
/// Lowest opset defining float8 element types.
pub const MIN_FLOAT8_OPSET: i64 = 19;
/// IR version introduced alongside float8 element types.
pub const FLOAT8_IR_VERSION: i64 = 9;

/// Make the model's default-domain opset legal for quantization and return it.
///
/// Opsets below 11 are raised to 11. Float8 weights additionally raise the opset to 19
/// and the IR version to 9. Both upgrades are logged as warnings.
pub fn check_opset_version<M: ModelGraph>(model: &mut M, weight_qtype: QuantType) -> Result<i64> {
    let mut default_domains = model
        .opset_import_mut()
        .iter_mut()
        .filter(|opset| opset.is_default_domain());

    let opset = match (default_domains.next(), default_domains.next()) {
        (Some(opset), None) => opset,
        (None, _) => {
            return Err(QuantizeError::Config(
                "Failed to find the ai.onnx domain in the model opset imports".to_string(),
            ));
        }
        (Some(_), Some(_)) => {
            return Err(QuantizeError::Config(
                "The model declares more than one ai.onnx domain opset".to_string(),
            ));
        }
    };

    if opset.version == 10 {
        log::warn!(
            "The original model opset version is 10, which does not support node fusions. Updating the model automatically to opset {MIN_QUANTIZATION_OPSET}. Please verify the quantized model."
        );
        opset.version = MIN_QUANTIZATION_OPSET;
    } else if opset.version < MIN_QUANTIZATION_OPSET {
        log::warn!(
            "The original model opset version is {}, which does not support quantization. Updating the model automatically to opset {MIN_QUANTIZATION_OPSET}. Please verify the quantized model.",
            opset.version
        );
        opset.version = MIN_QUANTIZATION_OPSET;
    }

    if opset.version < MIN_FLOAT8_OPSET && weight_qtype.is_float8() {
        log::warn!(
            "The original model opset version is {}, which does not support quantization to float 8. Updating the model automatically to opset {MIN_FLOAT8_OPSET}. Please verify the quantized model.",
            opset.version
        );
        opset.version = MIN_FLOAT8_OPSET;
        let version = opset.version;
        model.set_ir_version(FLOAT8_IR_VERSION);
        return Ok(version);
    }

    Ok(opset.version)
}
