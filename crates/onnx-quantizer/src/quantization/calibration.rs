use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ir::{Node, NodeType};

/// Observed real range of one tensor, as produced by calibration.
#[derive(new, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorRange {
    pub lowest: f32,
    pub highest: f32,
}

/// Calibrated ranges keyed by tensor name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TensorsRange {
    ranges: HashMap<String, TensorRange>,
}

impl TensorsRange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&TensorRange> {
        self.ranges.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ranges.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, range: TensorRange) -> Option<TensorRange> {
        self.ranges.insert(name.into(), range)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TensorRange)> {
        self.ranges.iter()
    }

    /// Fix up ranges around operators whose output range is known better than their input's.
    ///
    /// Nodes are visited in graph order:
    /// - `Clip`/`Relu`: when the node is eligible for quantization, activations are
    ///   asymmetric, its input feeds no other node and both tensors have a range, the
    ///   output range is copied onto the input. This assumes the activation is fused
    ///   into its producer downstream; it is an approximation, not an exact bound.
    /// - `Softmax`: the output range becomes exactly `[0, 1]`.
    pub fn adjust<F>(
        &mut self,
        nodes: &[Node],
        consumers: &HashMap<&str, Vec<&Node>>,
        is_activation_symmetric: bool,
        should_quantize_node: F,
    ) where
        F: Fn(&Node) -> bool,
    {
        for node in nodes {
            match node.node_type {
                NodeType::Clip | NodeType::Relu => {
                    if is_activation_symmetric || !should_quantize_node(node) {
                        continue;
                    }
                    let (Some(input), Some(output)) = (node.inputs.first(), node.outputs.first())
                    else {
                        continue;
                    };
                    if consumers.get(input.as_str()).map_or(0, Vec::len) != 1 {
                        continue;
                    }
                    if !self.contains(input) {
                        continue;
                    }
                    let Some(range) = self.get(output).copied() else {
                        continue;
                    };
                    log::debug!(
                        "{} {}: narrowing range of '{input}' to that of '{output}'",
                        node.node_type,
                        node.name
                    );
                    self.insert(input.clone(), range);
                }
                NodeType::Softmax => {
                    if let Some(output) = node.outputs.first() {
                        self.insert(output.clone(), TensorRange::new(0.0, 1.0));
                    }
                }
                _ => {}
            }
        }
    }
}

impl FromIterator<(String, TensorRange)> for TensorsRange {
    fn from_iter<T: IntoIterator<Item = (String, TensorRange)>>(iter: T) -> Self {
        Self {
            ranges: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(node_type: NodeType, name: &str, input: &str, output: &str) -> Node {
        Node::new(node_type, name, vec![input.into()], vec![output.into()])
    }

    fn consumers(nodes: &[Node]) -> HashMap<&str, Vec<&Node>> {
        let mut map: HashMap<&str, Vec<&Node>> = HashMap::new();
        for node in nodes {
            for input in &node.inputs {
                map.entry(input.as_str()).or_default().push(node);
            }
        }
        map
    }

    fn ranges() -> TensorsRange {
        [
            ("conv_out".to_string(), TensorRange::new(-3.0, 5.0)),
            ("relu_out".to_string(), TensorRange::new(0.0, 5.0)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn relu_output_range_is_copied_to_single_consumer_input() {
        let nodes = vec![node(NodeType::Relu, "relu", "conv_out", "relu_out")];
        let mut ranges = ranges();

        ranges.adjust(&nodes, &consumers(&nodes), false, |_| true);

        assert_eq!(ranges.get("conv_out"), Some(&TensorRange::new(0.0, 5.0)));
    }

    #[test]
    fn relu_input_with_two_consumers_is_untouched() {
        let nodes = vec![
            node(NodeType::Relu, "relu", "conv_out", "relu_out"),
            node(NodeType::Sigmoid, "sigmoid", "conv_out", "sig_out"),
        ];
        let mut ranges = ranges();

        ranges.adjust(&nodes, &consumers(&nodes), false, |_| true);

        assert_eq!(ranges.get("conv_out"), Some(&TensorRange::new(-3.0, 5.0)));
    }

    #[test]
    fn symmetric_activations_or_ineligible_nodes_skip_clip() {
        let nodes = vec![node(NodeType::Clip, "clip", "conv_out", "relu_out")];

        let mut symmetric = ranges();
        symmetric.adjust(&nodes, &consumers(&nodes), true, |_| true);
        assert_eq!(symmetric.get("conv_out"), Some(&TensorRange::new(-3.0, 5.0)));

        let mut excluded = ranges();
        excluded.adjust(&nodes, &consumers(&nodes), false, |_| false);
        assert_eq!(excluded.get("conv_out"), Some(&TensorRange::new(-3.0, 5.0)));
    }

    #[test]
    fn softmax_output_is_forced_to_unit_range() {
        let nodes = vec![node(NodeType::Softmax, "softmax", "logits", "probs")];
        let mut ranges = TensorsRange::new();
        ranges.insert("probs", TensorRange::new(-0.2, 1.7));

        // Softmax ranges are forced even for nodes excluded from quantization.
        ranges.adjust(&nodes, &consumers(&nodes), true, |_| false);

        assert_eq!(ranges.get("probs"), Some(&TensorRange::new(0.0, 1.0)));
    }
}
