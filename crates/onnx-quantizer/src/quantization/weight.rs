use half::f16;

use crate::error::{QuantizeError, Result};
use crate::ir::{ElementType, NodeType, Shape, Tensor, TensorData};
use crate::model::ModelGraph;

use super::{
    BaseQuantizer, ParamValue, QuantOverride, QuantType, QuantizationParams, quantize_data,
    quantize_values, zero_point_data,
};

/// Suffix of the initializer holding quantized data.
pub const TENSOR_NAME_QUANT_SUFFIX: &str = "_quantized";

/// Names of the initializers emitted for one quantized weight.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedWeight {
    pub quantized_name: String,
    pub zero_point_name: String,
    pub scale_name: String,
    /// Node consuming the quantized weight: `Cast` for float8, `DequantizeLinear` otherwise.
    pub node_type: NodeType,
    pub params: QuantizationParams,
}

/// A float weight read out of the graph.
struct WeightData {
    dims: Shape,
    /// Element type of the original weight, also used for its scales.
    scale_type: ElementType,
    values: Vec<f32>,
}

/// Quantized values and parameters of one tensor or channel.
struct QuantizedSlice {
    zero_point: i32,
    scale: f32,
    data: TensorData,
}

impl<M: ModelGraph> BaseQuantizer<M> {
    /// Quantize the weight initializer `weight_name` as a whole.
    ///
    /// Appends `<name>_scale` and `<name>_zero_point` scalars and, unless
    /// `keep_float_weight`, `<name>_quantized` with the shape of the weight. An override
    /// may replace `qtype`; an override with both `scale` and `zero_point` is used as is.
    pub fn quantize_initializer_impl(
        &mut self,
        weight_name: &str,
        qtype: QuantType,
        reduce_range: bool,
        keep_float_weight: bool,
    ) -> Result<QuantizedWeight> {
        let weight = self.weight_data(weight_name)?;
        let quant_override = self.tensor_quant_overrides.per_tensor(weight_name)?;
        let qtype = quant_override.quant_type.unwrap_or(qtype);

        let symmetric = quant_override.symmetric.unwrap_or(self.is_weight_symmetric);
        let reduce_range = quant_override
            .reduce_range
            .unwrap_or(self.reduce_range && reduce_range);
        let quantized = self.quantize_slice(
            &weight.values,
            qtype,
            &quant_override,
            symmetric,
            reduce_range,
        )?;

        let names = WeightNames::new(weight_name);
        let scale_data = scale_data(weight.scale_type, &[quantized.scale]);
        let zero_point_data = zero_point_data(qtype, &[quantized.zero_point]);

        let mut tensors = vec![
            Tensor::new(names.scale.clone(), vec![], scale_data.clone()),
            Tensor::new(names.zero_point.clone(), vec![], zero_point_data.clone()),
        ];
        if !keep_float_weight {
            let data = checked_packing(qtype, quantized.data, &weight.dims)?;
            tensors.push(Tensor::new(names.quantized.clone(), weight.dims, data));
        }

        log::debug!(
            "Quantized weight '{weight_name}' to {qtype}: scale={}, zero_point={}",
            quantized.scale,
            quantized.zero_point
        );
        self.model.append_initializers(tensors);

        let params = QuantizationParams::new([
            ("scale", ParamValue::from(scale_data)),
            ("zero_point", ParamValue::from(zero_point_data)),
        ])?;

        Ok(names.into_weight(qtype, params))
    }

    /// Quantize the weight initializer `weight_name` with one scale and zero-point per
    /// slice along `channel_axis`.
    ///
    /// The quant type of the first channel override governs every channel; differing
    /// quant types on later channels are ignored. Scales and zero-points have one element
    /// per channel and the quantized tensor keeps the shape of the weight.
    pub fn quantize_weight_per_channel_impl(
        &mut self,
        weight_name: &str,
        qtype: QuantType,
        channel_axis: usize,
        reduce_range: bool,
        keep_float_weight: bool,
    ) -> Result<QuantizedWeight> {
        let weight = self.weight_data(weight_name)?;
        let Some(&channel_count) = weight.dims.get(channel_axis) else {
            return Err(QuantizeError::Validation(format!(
                "Channel axis {channel_axis} is out of range for weight '{weight_name}' of shape {:?}",
                weight.dims
            )));
        };

        let overrides = self
            .tensor_quant_overrides
            .per_channel(weight_name, channel_count)?;
        let qtype = overrides
            .first()
            .and_then(|quant_override| quant_override.quant_type)
            .unwrap_or(qtype);
        if overrides
            .iter()
            .any(|quant_override| quant_override.quant_type.is_some_and(|other| other != qtype))
        {
            log::warn!(
                "Weight '{weight_name}' has per-channel overrides with different quant types, using {qtype} for all channels"
            );
        }

        let layout = ChannelLayout::new(&weight.dims, channel_axis);
        let mut zero_points = Vec::with_capacity(channel_count);
        let mut scales = Vec::with_capacity(channel_count);
        let mut channels = Vec::with_capacity(channel_count);

        for (channel, quant_override) in overrides.iter().enumerate() {
            let values = layout.channel(&weight.values, channel);
            let symmetric = quant_override.symmetric.unwrap_or(
                self.is_weight_symmetric
                    || matches!(qtype, QuantType::QInt8 | QuantType::QFloat8E4M3FN),
            );
            let reduce_range = quant_override
                .reduce_range
                .unwrap_or(self.reduce_range && reduce_range);

            let quantized =
                self.quantize_slice(&values, qtype, quant_override, symmetric, reduce_range)?;
            zero_points.push(quantized.zero_point);
            scales.push(quantized.scale);
            channels.push(quantized.data);
        }

        let names = WeightNames::new(weight_name);
        let scale_data = scale_data(weight.scale_type, &scales);
        let zero_point_data = zero_point_data(qtype, &zero_points);

        let mut tensors = vec![
            Tensor::new(names.scale.clone(), vec![channel_count], scale_data.clone()),
            Tensor::new(
                names.zero_point.clone(),
                vec![channel_count],
                zero_point_data.clone(),
            ),
        ];
        if !keep_float_weight {
            let data = layout.assemble(qtype, &channels)?;
            let data = checked_packing(qtype, data, &weight.dims)?;
            tensors.push(Tensor::new(names.quantized.clone(), weight.dims, data));
        }

        log::debug!(
            "Quantized weight '{weight_name}' to {qtype} along axis {channel_axis}: {channel_count} channels"
        );
        self.model.append_initializers(tensors);

        let params = QuantizationParams::new([
            ("scale", ParamValue::from(scale_data)),
            ("zero_point", ParamValue::from(zero_point_data)),
            ("axis", ParamValue::from(channel_axis as i64)),
        ])?;

        Ok(names.into_weight(qtype, params))
    }

    fn weight_data(&self, weight_name: &str) -> Result<WeightData> {
        let weight = self
            .model
            .find_initializer_by_name(weight_name)
            .ok_or_else(|| {
                QuantizeError::NotFound(format!("{weight_name} is not an initializer"))
            })?;

        let scale_type = weight.elem_type();
        if !scale_type.is_scale_type() {
            return Err(QuantizeError::UnsupportedType(format!(
                "Weight '{weight_name}' has element type {scale_type:?}, expected float32 or float16"
            )));
        }

        let values = weight.data.to_f32_vec();
        if values.len() != weight.num_elements() {
            return Err(QuantizeError::Validation(format!(
                "Weight '{weight_name}' has {} elements but shape {:?}",
                values.len(),
                weight.dims
            )));
        }

        Ok(WeightData {
            dims: weight.dims.clone(),
            scale_type,
            values,
        })
    }

    fn quantize_slice(
        &self,
        values: &[f32],
        qtype: QuantType,
        quant_override: &QuantOverride,
        symmetric: bool,
        reduce_range: bool,
    ) -> Result<QuantizedSlice> {
        if let Some((scale, zero_point)) = quant_override.scale_zero_point() {
            let data = quantize_values(qtype, values, scale, zero_point, None)?;
            return Ok(QuantizedSlice {
                zero_point,
                scale,
                data,
            });
        }

        let quantized = quantize_data(
            values,
            qtype,
            symmetric,
            reduce_range,
            self.min_real_range,
            quant_override.rmin,
            quant_override.rmax,
        )?;

        Ok(QuantizedSlice {
            zero_point: quantized.zero_point,
            scale: quantized.scale,
            data: quantized.data,
        })
    }
}

struct WeightNames {
    quantized: String,
    zero_point: String,
    scale: String,
}

impl WeightNames {
    fn new(weight_name: &str) -> Self {
        Self {
            quantized: format!("{weight_name}{TENSOR_NAME_QUANT_SUFFIX}"),
            zero_point: format!("{weight_name}_zero_point"),
            scale: format!("{weight_name}_scale"),
        }
    }

    fn into_weight(self, qtype: QuantType, params: QuantizationParams) -> QuantizedWeight {
        let node_type = if qtype.is_float8() {
            NodeType::Cast
        } else {
            NodeType::DequantizeLinear
        };

        QuantizedWeight {
            quantized_name: self.quantized,
            zero_point_name: self.zero_point,
            scale_name: self.scale,
            node_type,
            params,
        }
    }
}

/// Row-major view of a tensor as `outer x channels x inner` around a channel axis.
struct ChannelLayout {
    outer: usize,
    channels: usize,
    inner: usize,
}

impl ChannelLayout {
    fn new(dims: &[usize], axis: usize) -> Self {
        Self {
            outer: dims[..axis].iter().product(),
            channels: dims[axis],
            inner: dims[axis + 1..].iter().product(),
        }
    }

    /// Values of one channel, in row-major order of the remaining axes.
    fn channel(&self, values: &[f32], channel: usize) -> Vec<f32> {
        (0..self.outer)
            .flat_map(|outer| {
                let start = (outer * self.channels + channel) * self.inner;
                values[start..start + self.inner].iter().copied()
            })
            .collect()
    }

    /// Interleave quantized channels back into the layout of the original tensor.
    fn assemble(&self, qtype: QuantType, channels: &[TensorData]) -> Result<TensorData> {
        let elem_type = qtype.tensor_type();
        let chunk = self.inner * elem_type.size();
        let channel_bytes: Vec<Vec<u8>> = channels.iter().map(TensorData::to_raw_bytes).collect();

        let mut bytes = Vec::with_capacity(self.outer * self.channels * chunk);
        for outer in 0..self.outer {
            for channel in &channel_bytes {
                bytes.extend_from_slice(&channel[outer * chunk..(outer + 1) * chunk]);
            }
        }

        TensorData::from_raw_bytes(elem_type, &bytes)
    }
}

/// Scale values stored in the float type of the weight.
fn scale_data(scale_type: ElementType, scales: &[f32]) -> TensorData {
    match scale_type {
        ElementType::Float16 => TensorData::Float16(scales.iter().map(|s| f16::from_f32(*s)).collect()),
        _ => TensorData::Float32(scales.to_vec()),
    }
}

/// Verify that float8 data survives encoding to raw bytes unchanged.
fn checked_packing(qtype: QuantType, data: TensorData, dims: &[usize]) -> Result<TensorData> {
    if !qtype.is_float8() {
        return Ok(data);
    }

    let bytes = data.to_raw_bytes();
    let check = TensorData::from_raw_bytes(qtype.tensor_type(), &bytes)?;
    let expected: usize = dims.iter().product();

    if check.len() != expected || check.to_raw_bytes() != bytes {
        return Err(QuantizeError::UnsupportedType(format!(
            "The initializer of shape {dims:?} could not be created, expected {expected} elements, got {}",
            check.len()
        )));
    }

    Ok(check)
}
