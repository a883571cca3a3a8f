//! Graph adapter consumed by the quantizer.
//!
//! The quantizer never owns tensors it did not create: it reads initializers by name,
//! appends new ones, and leaves removal of the float originals to the caller.

use std::collections::{HashMap, HashSet};

use crate::ir::{Node, OnnxModel, OperatorSetId, Tensor};

/// Read/append access to a model graph.
pub trait ModelGraph {
    /// All initializers, in graph order.
    fn initializers(&self) -> &[Tensor];

    /// Append initializers to the graph, replacing any initializer with the same name.
    fn append_initializers(&mut self, tensors: Vec<Tensor>);

    /// All nodes, in graph order.
    fn nodes(&self) -> &[Node];

    /// Names of every tensor with type information (value info, graph inputs and outputs).
    fn value_info_names(&self) -> HashSet<String>;

    /// Declared operator sets.
    fn opset_import(&self) -> &[OperatorSetId];

    /// Mutable access to the declared operator sets.
    fn opset_import_mut(&mut self) -> &mut Vec<OperatorSetId>;

    /// File-format version.
    fn ir_version(&self) -> i64;

    fn set_ir_version(&mut self, version: i64);

    fn find_initializer_by_name(&self, name: &str) -> Option<&Tensor> {
        self.initializers().iter().find(|init| init.name == name)
    }

    /// Map every tensor name to the nodes consuming it.
    fn input_name_to_nodes(&self) -> HashMap<&str, Vec<&Node>> {
        let mut consumers: HashMap<&str, Vec<&Node>> = HashMap::new();
        for node in self.nodes() {
            for input in node.inputs.iter().filter(|name| !name.is_empty()) {
                consumers.entry(input.as_str()).or_default().push(node);
            }
        }
        consumers
    }
}

impl ModelGraph for OnnxModel {
    fn initializers(&self) -> &[Tensor] {
        &self.graph.initializers
    }

    fn append_initializers(&mut self, tensors: Vec<Tensor>) {
        let initializers = &mut self.graph.initializers;
        for tensor in tensors {
            match initializers.iter_mut().find(|init| init.name == tensor.name) {
                Some(existing) => *existing = tensor,
                None => initializers.push(tensor),
            }
        }
    }

    fn nodes(&self) -> &[Node] {
        &self.graph.nodes
    }

    fn value_info_names(&self) -> HashSet<String> {
        self.graph
            .value_info
            .iter()
            .chain(self.graph.outputs.iter())
            .chain(self.graph.inputs.iter())
            .map(|vi| vi.name.clone())
            .collect()
    }

    fn opset_import(&self) -> &[OperatorSetId] {
        &self.opset_import
    }

    fn opset_import_mut(&mut self) -> &mut Vec<OperatorSetId> {
        &mut self.opset_import
    }

    fn ir_version(&self) -> i64 {
        self.ir_version
    }

    fn set_ir_version(&mut self, version: i64) {
        self.ir_version = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Graph, NodeType, TensorData, ValueInfo};

    fn model() -> OnnxModel {
        let graph = Graph {
            nodes: vec![
                Node::new(
                    NodeType::Relu,
                    "relu",
                    vec!["x".into()],
                    vec!["y".into()],
                ),
                Node::new(
                    NodeType::Add,
                    "add",
                    vec!["x".into(), "y".into()],
                    vec!["z".into()],
                ),
            ],
            inputs: vec![ValueInfo::new("x")],
            outputs: vec![ValueInfo::new("z")],
            value_info: vec![ValueInfo::new("y")],
            initializers: vec![Tensor::new("w", vec![1], TensorData::Float32(vec![1.0]))],
        };
        OnnxModel::new(graph, vec![OperatorSetId::new("", 13)], 7)
    }

    #[test]
    fn consumers_are_grouped_by_input_name() {
        let model = model();
        let consumers = model.input_name_to_nodes();

        assert_eq!(consumers["x"].len(), 2);
        assert_eq!(consumers["y"].len(), 1);
        assert_eq!(consumers["y"][0].name, "add");
        assert!(!consumers.contains_key("z"));
    }

    #[test]
    fn value_info_names_cover_inputs_outputs_and_intermediates() {
        let names = model().value_info_names();
        assert!(names.contains("x") && names.contains("y") && names.contains("z"));
        assert!(!names.contains("w"));
    }

    #[test]
    fn appended_initializers_are_found_by_name() {
        let mut model = model();
        assert!(model.find_initializer_by_name("b").is_none());

        model.append_initializers(vec![Tensor::new(
            "b",
            vec![],
            TensorData::Int32(vec![0]),
        )]);

        assert_eq!(model.initializers().len(), 2);
        assert!(model.find_initializer_by_name("b").is_some());
    }

    #[test]
    fn appending_an_existing_name_replaces_the_initializer() {
        let mut model = model();
        let count = model.initializers().len();

        for value in [1, 2] {
            model.append_initializers(vec![Tensor::new(
                "b",
                vec![],
                TensorData::Int32(vec![value]),
            )]);
        }

        assert_eq!(model.initializers().len(), count + 1);
        assert_eq!(
            model.find_initializer_by_name("b").unwrap().data,
            TensorData::Int32(vec![2])
        );
    }
}
