use half::f16;

use crate::error::{QuantizeError, Result};
use crate::ir::{ElementType, NodeType, Tensor, TensorData};
use crate::model::ModelGraph;

use super::{BaseQuantizer, TENSOR_NAME_QUANT_SUFFIX};

/// Initializers emitted for a quantized bias and the node that must consume them.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedBias {
    pub quantized_name: String,
    pub scale_name: String,
    pub zero_point_name: String,
    /// Flattened bias scale.
    pub scale: TensorData,
    /// `Cast` for float8 weights, `DequantizeLinear` otherwise.
    pub node_type: NodeType,
    /// Element type the consuming node works with.
    pub node_qtype: ElementType,
}

impl<M: ModelGraph> BaseQuantizer<M> {
    /// Quantize the bias initializer `bias_name` feeding an operator whose input and
    /// weight have already been quantized.
    ///
    /// The bias scale is derived as `input_scale * weight_scale * beta`, one element per
    /// weight scale, and the zero-point is zero. With float8 weights the bias stays in
    /// its float type behind a unit scale. The bias dtype stands in for the activation
    /// dtype there: the unit scale and the zero are emitted as float16 or float32 to
    /// match the bias, whatever the activations are quantized to.
    pub fn quantize_bias_static_impl(
        &mut self,
        bias_name: &str,
        input_scale: f32,
        weight_scale: &[f32],
        beta: f32,
    ) -> Result<QuantizedBias> {
        let bias = self
            .model
            .find_initializer_by_name(bias_name)
            .ok_or_else(|| QuantizeError::NotFound(format!("{bias_name} is not an initializer")))?;

        let quantized_name = format!("{bias_name}{TENSOR_NAME_QUANT_SUFFIX}");
        let scale_name = format!("{quantized_name}_scale");
        let zero_point_name = format!("{quantized_name}_zero_point");

        let (tensors, scale, node_type, node_qtype) = if self.weight_qtype.is_float8() {
            let (unit, zero) = match &bias.data {
                TensorData::Float16(_) => (
                    TensorData::Float16(vec![f16::ONE]),
                    TensorData::Float16(vec![f16::ZERO]),
                ),
                TensorData::Float32(_) => (
                    TensorData::Float32(vec![1.0]),
                    TensorData::Float32(vec![0.0]),
                ),
                other => {
                    return Err(QuantizeError::UnsupportedType(format!(
                        "Only float16 or float32 are supported with float 8 but bias dtype is {:?}",
                        other.elem_type()
                    )));
                }
            };
            let node_qtype = bias.elem_type();

            let tensors = vec![
                Tensor::new(quantized_name.clone(), bias.dims.clone(), bias.data.clone()),
                Tensor::new(scale_name.clone(), vec![1], unit.clone()),
                Tensor::new(zero_point_name.clone(), vec![1], zero),
            ];
            (tensors, unit, NodeType::Cast, node_qtype)
        } else {
            if !bias.elem_type().is_float() {
                return Err(QuantizeError::UnsupportedType(format!(
                    "Bias '{bias_name}' has element type {:?}, expected a float type",
                    bias.elem_type()
                )));
            }

            let values = bias.data.to_f32_vec();
            if weight_scale.is_empty()
                || (weight_scale.len() != 1 && weight_scale.len() != values.len())
            {
                return Err(QuantizeError::Validation(format!(
                    "Bias '{bias_name}' has {} elements but {} weight scales",
                    values.len(),
                    weight_scale.len()
                )));
            }

            let bias_scale: Vec<f32> = weight_scale
                .iter()
                .map(|scale| input_scale * scale * beta)
                .collect();
            let quantized: Vec<i32> = values
                .iter()
                .enumerate()
                .map(|(i, value)| {
                    let scale = bias_scale[i % bias_scale.len()];
                    (value / scale).round_ties_even() as i32
                })
                .collect();

            let channels = bias_scale.len();
            let zero_point = if channels > 1 {
                Tensor::new(
                    zero_point_name.clone(),
                    vec![channels],
                    TensorData::Int32(vec![0; channels]),
                )
            } else {
                Tensor::new(zero_point_name.clone(), vec![], TensorData::Int32(vec![0]))
            };
            let scale = TensorData::Float32(bias_scale);

            let tensors = vec![
                Tensor::new(
                    quantized_name.clone(),
                    bias.dims.clone(),
                    TensorData::Int32(quantized),
                ),
                Tensor::new(scale_name.clone(), vec![channels], scale.clone()),
                zero_point,
            ];
            (
                tensors,
                scale,
                NodeType::DequantizeLinear,
                self.weight_qtype.tensor_type(),
            )
        };

        log::debug!("Quantized bias '{bias_name}' with scale {scale:?}");
        self.model.append_initializers(tensors);

        Ok(QuantizedBias {
            quantized_name,
            scale_name,
            zero_point_name,
            scale,
            node_type,
            node_qtype,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Graph, OnnxModel, OperatorSetId};
    use crate::quantization::{QuantType, QuantizerConfig};

    fn quantizer(weight_qtype: QuantType, bias: Tensor) -> BaseQuantizer {
        let graph = Graph {
            initializers: vec![bias],
            ..Default::default()
        };
        let model = OnnxModel::new(graph, vec![OperatorSetId::new("", 19)], 9);
        let config = QuantizerConfig::new(weight_qtype, QuantType::QUInt8);
        BaseQuantizer::new(model, config, None).unwrap()
    }

    fn initializer<'a>(quantizer: &'a BaseQuantizer, name: &str) -> &'a Tensor {
        quantizer.model().find_initializer_by_name(name).unwrap()
    }

    #[test]
    fn bias_scale_is_the_product_of_input_and_weight_scales() {
        let bias = Tensor::new("b", vec![1], TensorData::Float32(vec![2.0]));
        let mut quantizer = quantizer(QuantType::QInt8, bias);

        let result = quantizer
            .quantize_bias_static_impl("b", 0.1, &[0.05], 1.0)
            .unwrap();

        assert_eq!(result.scale, TensorData::Float32(vec![0.1f32 * 0.05f32 * 1.0]));
        assert_eq!(result.node_type, NodeType::DequantizeLinear);
        assert_eq!(result.node_qtype, ElementType::Int8);
        assert_eq!(result.quantized_name, "b_quantized");
        assert_eq!(result.scale_name, "b_quantized_scale");
        assert_eq!(result.zero_point_name, "b_quantized_zero_point");

        assert_eq!(
            initializer(&quantizer, "b_quantized").data,
            TensorData::Int32(vec![400])
        );
        let zero_point = initializer(&quantizer, "b_quantized_zero_point");
        assert!(zero_point.dims.is_empty());
        assert_eq!(zero_point.data, TensorData::Int32(vec![0]));
    }

    #[test]
    fn per_channel_bias_has_one_scale_and_zero_point_per_channel() {
        let bias = Tensor::new("b", vec![2], TensorData::Float32(vec![1.0, -3.0]));
        let mut quantizer = quantizer(QuantType::QUInt8, bias);

        let result = quantizer
            .quantize_bias_static_impl("b", 0.5, &[0.25, 0.125], 2.0)
            .unwrap();

        assert_eq!(result.scale, TensorData::Float32(vec![0.25, 0.125]));
        assert_eq!(result.node_qtype, ElementType::Uint8);
        assert_eq!(
            initializer(&quantizer, "b_quantized").data,
            TensorData::Int32(vec![4, -24])
        );
        let zero_point = initializer(&quantizer, "b_quantized_zero_point");
        assert_eq!(zero_point.dims, vec![2]);
        assert_eq!(zero_point.data, TensorData::Int32(vec![0, 0]));
    }

    #[test]
    fn mismatched_weight_scales_are_rejected() {
        let bias = Tensor::new("b", vec![3], TensorData::Float32(vec![1.0, 2.0, 3.0]));
        let mut quantizer = quantizer(QuantType::QInt8, bias);

        let result = quantizer.quantize_bias_static_impl("b", 0.5, &[0.1, 0.2], 1.0);
        assert!(matches!(result, Err(QuantizeError::Validation(_))));
    }

    #[test]
    fn float8_bias_is_cast_with_unit_scale() {
        let bias = Tensor::new(
            "b",
            vec![2],
            TensorData::Float16(vec![f16::from_f32(0.3), f16::from_f32(-1.5)]),
        );
        let mut quantizer = quantizer(QuantType::QFloat8E4M3FN, bias.clone());

        let result = quantizer
            .quantize_bias_static_impl("b", 0.1, &[0.2], 1.0)
            .unwrap();

        assert_eq!(result.node_type, NodeType::Cast);
        assert_eq!(result.node_qtype, ElementType::Float16);
        assert_eq!(result.scale, TensorData::Float16(vec![f16::ONE]));
        assert_eq!(initializer(&quantizer, "b_quantized").data, bias.data);
        assert_eq!(
            initializer(&quantizer, "b_quantized_zero_point").data,
            TensorData::Float16(vec![f16::ZERO])
        );
    }

    #[test]
    fn float8_rejects_non_float_bias() {
        let bias = Tensor::new("b", vec![1], TensorData::Int32(vec![3]));
        let mut quantizer = quantizer(QuantType::QFloat8E4M3FN, bias);

        let result = quantizer.quantize_bias_static_impl("b", 0.1, &[0.2], 1.0);
        assert!(matches!(result, Err(QuantizeError::UnsupportedType(_))));
    }

    #[test]
    fn missing_bias_is_not_found() {
        let bias = Tensor::new("b", vec![1], TensorData::Float32(vec![1.0]));
        let mut quantizer = quantizer(QuantType::QInt8, bias);

        let result = quantizer.quantize_bias_static_impl("c", 0.1, &[0.2], 1.0);
        assert!(matches!(result, Err(QuantizeError::NotFound(_))));
    }
}
