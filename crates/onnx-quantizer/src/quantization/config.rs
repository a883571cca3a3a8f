use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::{QuantType, TensorQuantOverrides};

/// Keys recognized in the extra options object.
const EXTRA_OPTION_KEYS: [&str; 6] = [
    "EnableSubgraph",
    "ForceQuantizeNoInputCheck",
    "WeightSymmetric",
    "ActivationSymmetric",
    "MinimumRealRange",
    "TensorQuantOverrides",
];

/// Operators eligible for quantization when no explicit list is configured.
const DEFAULT_OP_TYPES: [&str; 27] = [
    "ArgMax",
    "AveragePool",
    "Clip",
    "Concat",
    "Conv",
    "ConvTranspose",
    "Gather",
    "Gemm",
    "GlobalAveragePool",
    "InstanceNormalization",
    "LayerNormalization",
    "LeakyRelu",
    "MatMul",
    "MaxPool",
    "Add",
    "Mul",
    "Pad",
    "Relu",
    "Reshape",
    "Resize",
    "Sigmoid",
    "Softmax",
    "Split",
    "Squeeze",
    "Transpose",
    "Unsqueeze",
    "Where",
];

/// Optional behaviors, keyed as in the toolkit's extra options mapping.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ExtraOptions {
    /// Quantize subgraphs of control-flow nodes, resolving outer-scope initializers
    /// through the parent quantizer.
    pub enable_subgraph: bool,
    /// Quantize supported operators even when their inputs are not quantized.
    pub force_quantize_no_input_check: bool,
    /// Defaults to true for signed weight types and float8.
    pub weight_symmetric: Option<bool>,
    pub activation_symmetric: bool,
    /// Smallest allowed width of a real range; narrower ranges are widened.
    pub minimum_real_range: Option<f32>,
    pub tensor_quant_overrides: TensorQuantOverrides,
}

impl ExtraOptions {
    /// Parse a flat JSON object. Unrecognized keys are ignored with a warning.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;

        if let Some(object) = value.as_object() {
            for key in object.keys() {
                if !EXTRA_OPTION_KEYS.contains(&key.as_str()) {
                    log::warn!("Ignoring unknown extra option '{key}'");
                }
            }
        }

        Ok(serde_json::from_value(value)?)
    }

    /// Whether weights of `weight_qtype` are quantized symmetrically.
    pub fn is_weight_symmetric(&self, weight_qtype: QuantType) -> bool {
        self.weight_symmetric.unwrap_or(matches!(
            weight_qtype,
            QuantType::QInt8 | QuantType::QInt16 | QuantType::QFloat8E4M3FN
        ))
    }
}

/// Policy of a quantization run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizerConfig {
    pub per_channel: bool,
    pub reduce_range: bool,
    pub weight_qtype: QuantType,
    pub activation_qtype: QuantType,
    /// Names of the only nodes to quantize; empty means every eligible node.
    pub nodes_to_quantize: Vec<String>,
    pub nodes_to_exclude: Vec<String>,
    pub op_types_to_quantize: Vec<String>,
    pub extra_options: ExtraOptions,
}

impl Default for QuantizerConfig {
    fn default() -> Self {
        Self {
            per_channel: false,
            reduce_range: false,
            weight_qtype: QuantType::QInt8,
            activation_qtype: QuantType::QUInt8,
            nodes_to_quantize: Vec::new(),
            nodes_to_exclude: Vec::new(),
            op_types_to_quantize: DEFAULT_OP_TYPES.iter().map(|op| op.to_string()).collect(),
            extra_options: ExtraOptions::default(),
        }
    }
}

impl QuantizerConfig {
    pub fn new(weight_qtype: QuantType, activation_qtype: QuantType) -> Self {
        Self {
            weight_qtype,
            activation_qtype,
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_per_channel(mut self, per_channel: bool) -> Self {
        self.per_channel = per_channel;
        self
    }

    pub fn with_reduce_range(mut self, reduce_range: bool) -> Self {
        self.reduce_range = reduce_range;
        self
    }

    pub fn with_nodes_to_quantize(mut self, nodes: Vec<String>) -> Self {
        self.nodes_to_quantize = nodes;
        self
    }

    pub fn with_nodes_to_exclude(mut self, nodes: Vec<String>) -> Self {
        self.nodes_to_exclude = nodes;
        self
    }

    pub fn with_op_types_to_quantize(mut self, op_types: Vec<String>) -> Self {
        self.op_types_to_quantize = op_types;
        self
    }

    pub fn with_extra_options(mut self, extra_options: ExtraOptions) -> Self {
        self.extra_options = extra_options;
        self
    }
}
