use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet};
use std::rc::{Rc, Weak};

use crate::error::{QuantizeError, Result};
use crate::ir::{Node, OnnxModel};
use crate::model::ModelGraph;

use super::{QuantType, QuantizerConfig, TensorQuantOverrides, TensorsRange, check_opset_version};

/// Shared state of a static quantization run over one graph.
///
/// Operator-specific quantizers drive it: they ask which nodes are eligible, call the
/// weight and bias rewriters per tensor and read the calibrated ranges. A quantizer
/// created for a control-flow subgraph keeps a weak link to the quantizer of the
/// enclosing graph to resolve outer-scope initializers.
#[derive(Debug)]
pub struct BaseQuantizer<M: ModelGraph = OnnxModel> {
    pub(crate) model: M,
    value_infos: HashSet<String>,
    pub(crate) per_channel: bool,
    pub(crate) reduce_range: bool,
    pub(crate) weight_qtype: QuantType,
    activation_qtype: QuantType,
    enable_subgraph_quantization: bool,
    force_quantize_no_input_check: bool,
    pub(crate) is_weight_symmetric: bool,
    is_activation_symmetric: bool,
    pub(crate) min_real_range: Option<f32>,
    tensors_range: Option<TensorsRange>,
    nodes_to_quantize: Vec<String>,
    nodes_to_exclude: Vec<String>,
    op_types_to_quantize: HashSet<String>,
    opset_version: i64,
    pub(crate) tensor_quant_overrides: TensorQuantOverrides,
    tensor_quant_override_qtypes: BTreeSet<QuantType>,
    parent: Option<Weak<RefCell<BaseQuantizer<M>>>>,
}

impl<M: ModelGraph> BaseQuantizer<M> {
    /// Create a quantizer over `model`.
    ///
    /// Upgrades the model opset when needed, then validates the calibrated ranges and
    /// the tensor overrides. Any failure aborts construction.
    pub fn new(
        mut model: M,
        config: QuantizerConfig,
        tensors_range: Option<TensorsRange>,
    ) -> Result<Self> {
        let QuantizerConfig {
            per_channel,
            reduce_range,
            weight_qtype,
            activation_qtype,
            nodes_to_quantize,
            nodes_to_exclude,
            op_types_to_quantize,
            extra_options,
        } = config;

        if let Some(ranges) = &tensors_range {
            validate_ranges(ranges)?;
        }

        let value_infos = model.value_info_names();
        let opset_version = check_opset_version(&mut model, weight_qtype)?;

        let initializer_names: HashSet<String> = model
            .initializers()
            .iter()
            .map(|init| init.name.clone())
            .collect();
        let is_weight_symmetric = extra_options.is_weight_symmetric(weight_qtype);
        let tensor_quant_overrides = extra_options.tensor_quant_overrides;
        tensor_quant_overrides.validate(
            &initializer_names,
            &value_infos,
            weight_qtype,
            activation_qtype,
        )?;
        let tensor_quant_override_qtypes = tensor_quant_overrides.quant_types();

        Ok(Self {
            model,
            value_infos,
            per_channel,
            reduce_range,
            weight_qtype,
            activation_qtype,
            enable_subgraph_quantization: extra_options.enable_subgraph,
            force_quantize_no_input_check: extra_options.force_quantize_no_input_check,
            is_weight_symmetric,
            is_activation_symmetric: extra_options.activation_symmetric,
            min_real_range: extra_options.minimum_real_range,
            tensors_range,
            nodes_to_quantize,
            nodes_to_exclude,
            op_types_to_quantize: op_types_to_quantize.into_iter().collect(),
            opset_version,
            tensor_quant_overrides,
            tensor_quant_override_qtypes,
            parent: None,
        })
    }

    /// Link this quantizer to the quantizer of the enclosing graph.
    pub fn set_parent(&mut self, parent: &Rc<RefCell<BaseQuantizer<M>>>) {
        self.parent = Some(Rc::downgrade(parent));
    }

    /// The quantizer of the enclosing graph, while it is alive.
    pub fn parent(&self) -> Option<Rc<RefCell<BaseQuantizer<M>>>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_input_a_initializer(&self, input_name: &str) -> bool {
        self.model.find_initializer_by_name(input_name).is_some()
    }

    pub fn is_per_channel(&self) -> bool {
        self.per_channel
    }

    /// True when `weight_name` is a float32 or float16 initializer of this graph or, with
    /// subgraph quantization enabled, of an enclosing graph.
    pub fn is_valid_quantize_weight(&self, weight_name: &str) -> bool {
        if let Some(weight) = self.model.find_initializer_by_name(weight_name) {
            return weight.elem_type().is_scale_type();
        }

        if !self.enable_subgraph_quantization {
            return false;
        }

        let Some(parent) = self.parent() else {
            return false;
        };
        match parent.try_borrow() {
            Ok(parent) => parent.is_valid_quantize_weight(weight_name),
            Err(_) => {
                log::warn!(
                    "Parent quantizer is being modified, cannot resolve weight '{weight_name}'"
                );
                false
            }
        }
    }

    /// Whether `node` is selected for quantization by the configured inclusion list,
    /// operator types and exclusion list.
    pub fn should_quantize_node(&self, node: &Node) -> bool {
        if !self.nodes_to_quantize.is_empty() && !self.nodes_to_quantize.contains(&node.name) {
            return false;
        }

        if !self
            .op_types_to_quantize
            .contains(node.node_type.to_string().as_str())
        {
            return false;
        }

        !self.nodes_to_exclude.contains(&node.name)
    }

    /// Run the range adjustment pass over the graph nodes.
    ///
    /// See [`TensorsRange::adjust`]. Does nothing without calibrated ranges.
    pub fn adjust_tensor_ranges(&mut self) {
        let Some(mut ranges) = self.tensors_range.take() else {
            return;
        };

        let consumers = self.model.input_name_to_nodes();
        ranges.adjust(
            self.model.nodes(),
            &consumers,
            self.is_activation_symmetric,
            |node| self.should_quantize_node(node),
        );

        self.tensors_range = Some(ranges);
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Consume the quantizer and return the rewritten model.
    pub fn into_model(self) -> M {
        self.model
    }

    pub fn opset_version(&self) -> i64 {
        self.opset_version
    }

    pub fn tensors_range(&self) -> Option<&TensorsRange> {
        self.tensors_range.as_ref()
    }

    pub fn tensor_quant_overrides(&self) -> &TensorQuantOverrides {
        &self.tensor_quant_overrides
    }

    /// Quant types introduced by any tensor override.
    pub fn tensor_quant_override_qtypes(&self) -> &BTreeSet<QuantType> {
        &self.tensor_quant_override_qtypes
    }

    pub fn weight_qtype(&self) -> QuantType {
        self.weight_qtype
    }

    pub fn activation_qtype(&self) -> QuantType {
        self.activation_qtype
    }

    pub fn is_weight_symmetric(&self) -> bool {
        self.is_weight_symmetric
    }

    pub fn is_activation_symmetric(&self) -> bool {
        self.is_activation_symmetric
    }

    pub fn min_real_range(&self) -> Option<f32> {
        self.min_real_range
    }

    pub fn enable_subgraph_quantization(&self) -> bool {
        self.enable_subgraph_quantization
    }

    pub fn force_quantize_no_input_check(&self) -> bool {
        self.force_quantize_no_input_check
    }

    /// Whether `name` has type information (graph input, output or value info).
    pub fn has_value_info(&self, name: &str) -> bool {
        self.value_infos.contains(name)
    }
}

fn validate_ranges(ranges: &TensorsRange) -> Result<()> {
    for (name, range) in ranges.iter() {
        if !range.lowest.is_finite() || !range.highest.is_finite() {
            return Err(QuantizeError::Validation(format!(
                "Range of tensor '{name}' is not finite: [{}, {}]",
                range.lowest, range.highest
            )));
        }
        if range.lowest > range.highest {
            return Err(QuantizeError::Validation(format!(
                "Range of tensor '{name}' is inverted: [{}, {}]",
                range.lowest, range.highest
            )));
        }
    }
    Ok(())
}
