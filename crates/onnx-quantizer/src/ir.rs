use core::fmt;
use half::f16;
use std::fmt::Formatter;
use strum::EnumString;

use crate::error::{QuantizeError, Result};
use crate::float8::F8E4M3;

pub type Shape = Vec<usize>;

/// The type of an element, numbered as in `TensorProto.DataType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Float32 = 1,
    Uint8 = 2,
    Int8 = 3,
    Uint16 = 4,
    Int16 = 5,
    Int32 = 6,
    Int64 = 7,
    Float16 = 10,
    Float64 = 11,
    Float8E4M3FN = 17,
}

impl ElementType {
    /// True for float32 and float16, the two element types a scale may use.
    pub fn is_scale_type(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float16)
    }

    /// True for all floating point element types, float8 included.
    pub fn is_float(&self) -> bool {
        matches!(
            self,
            Self::Float32 | Self::Float16 | Self::Float64 | Self::Float8E4M3FN
        )
    }

    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::Uint8 | Self::Int8 | Self::Float8E4M3FN => 1,
            Self::Uint16 | Self::Int16 | Self::Float16 => 2,
            Self::Float32 | Self::Int32 => 4,
            Self::Int64 | Self::Float64 => 8,
        }
    }
}

/// Typed element buffer of a tensor.
#[derive(Clone, PartialEq)]
pub enum TensorData {
    Float16(Vec<f16>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Uint8(Vec<u8>),
    Int8(Vec<i8>),
    Uint16(Vec<u16>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float8E4M3FN(Vec<F8E4M3>),
}

impl TensorData {
    /// Element type of the buffer.
    pub fn elem_type(&self) -> ElementType {
        match self {
            TensorData::Float16(_) => ElementType::Float16,
            TensorData::Float32(_) => ElementType::Float32,
            TensorData::Float64(_) => ElementType::Float64,
            TensorData::Uint8(_) => ElementType::Uint8,
            TensorData::Int8(_) => ElementType::Int8,
            TensorData::Uint16(_) => ElementType::Uint16,
            TensorData::Int16(_) => ElementType::Int16,
            TensorData::Int32(_) => ElementType::Int32,
            TensorData::Int64(_) => ElementType::Int64,
            TensorData::Float8E4M3FN(_) => ElementType::Float8E4M3FN,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            TensorData::Float16(v) => v.len(),
            TensorData::Float32(v) => v.len(),
            TensorData::Float64(v) => v.len(),
            TensorData::Uint8(v) => v.len(),
            TensorData::Int8(v) => v.len(),
            TensorData::Uint16(v) => v.len(),
            TensorData::Int16(v) => v.len(),
            TensorData::Int32(v) => v.len(),
            TensorData::Int64(v) => v.len(),
            TensorData::Float8E4M3FN(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert to `Vec<f32>`, widening or narrowing every numeric type.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            TensorData::Float16(v) => v.iter().map(|x| x.to_f32()).collect(),
            TensorData::Float32(v) => v.clone(),
            TensorData::Float64(v) => v.iter().map(|x| *x as f32).collect(),
            TensorData::Uint8(v) => v.iter().map(|x| *x as f32).collect(),
            TensorData::Int8(v) => v.iter().map(|x| *x as f32).collect(),
            TensorData::Uint16(v) => v.iter().map(|x| *x as f32).collect(),
            TensorData::Int16(v) => v.iter().map(|x| *x as f32).collect(),
            TensorData::Int32(v) => v.iter().map(|x| *x as f32).collect(),
            TensorData::Int64(v) => v.iter().map(|x| *x as f32).collect(),
            TensorData::Float8E4M3FN(v) => v.iter().map(|x| x.to_f32()).collect(),
        }
    }

    /// Little-endian raw bytes, the layout of `TensorProto.raw_data`.
    pub fn to_raw_bytes(&self) -> Vec<u8> {
        match self {
            TensorData::Float16(v) => bytemuck::cast_slice(v).to_vec(),
            TensorData::Float32(v) => bytemuck::cast_slice(v).to_vec(),
            TensorData::Float64(v) => bytemuck::cast_slice(v).to_vec(),
            TensorData::Uint8(v) => v.clone(),
            TensorData::Int8(v) => bytemuck::cast_slice(v).to_vec(),
            TensorData::Uint16(v) => bytemuck::cast_slice(v).to_vec(),
            TensorData::Int16(v) => bytemuck::cast_slice(v).to_vec(),
            TensorData::Int32(v) => bytemuck::cast_slice(v).to_vec(),
            TensorData::Int64(v) => bytemuck::cast_slice(v).to_vec(),
            TensorData::Float8E4M3FN(v) => bytemuck::cast_slice(v).to_vec(),
        }
    }

    /// Decode little-endian raw bytes of the given element type.
    pub fn from_raw_bytes(elem_type: ElementType, bytes: &[u8]) -> Result<Self> {
        if bytes.len() % elem_type.size() != 0 {
            return Err(QuantizeError::UnsupportedType(format!(
                "{} bytes is not a whole number of {:?} elements",
                bytes.len(),
                elem_type
            )));
        }

        let data = match elem_type {
            ElementType::Float16 => TensorData::Float16(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::Float32 => TensorData::Float32(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::Float64 => TensorData::Float64(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::Uint8 => TensorData::Uint8(bytes.to_vec()),
            ElementType::Int8 => TensorData::Int8(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::Uint16 => TensorData::Uint16(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::Int16 => TensorData::Int16(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::Int32 => TensorData::Int32(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::Int64 => TensorData::Int64(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::Float8E4M3FN => {
                TensorData::Float8E4M3FN(bytemuck::pod_collect_to_vec(bytes))
            }
        };

        Ok(data)
    }
}

/// A named tensor with data, as stored in the graph initializer list.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub name: String,
    /// Dimensions, empty for a scalar.
    pub dims: Shape,
    pub data: TensorData,
}

impl Tensor {
    pub fn new(name: impl Into<String>, dims: Shape, data: TensorData) -> Self {
        Self {
            name: name.into(),
            dims,
            data,
        }
    }

    pub fn elem_type(&self) -> ElementType {
        self.data.elem_type()
    }

    /// Number of elements implied by `dims`.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }
}

/// Type information of a graph value (input, output or intermediate).
#[derive(Debug, Clone, PartialEq)]
pub struct ValueInfo {
    pub name: String,
    pub elem_type: Option<ElementType>,
    pub shape: Option<Shape>,
}

impl ValueInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            elem_type: None,
            shape: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub node_type: NodeType,
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl Node {
    pub fn new(
        node_type: NodeType,
        name: impl Into<String>,
        inputs: Vec<String>,
        outputs: Vec<String>,
    ) -> Self {
        Self {
            node_type,
            name: name.into(),
            inputs,
            outputs,
        }
    }
}

/// ONNX operators the quantizer inspects or emits. Any other operator parses to
/// [`NodeType::Custom`].
///
/// See: <https://github.com/onnx/onnx/blob/main/docs/Operators.md>
#[derive(Debug, Hash, Eq, PartialEq, EnumString, Clone)]
pub enum NodeType {
    Add,
    ArgMax,
    AveragePool,
    BatchNormalization,
    Cast,
    Clip,
    Concat,
    Conv,
    ConvTranspose,
    DequantizeLinear,
    Gather,
    Gemm,
    GlobalAveragePool,
    If,
    InstanceNormalization,
    LayerNormalization,
    LeakyRelu,
    Loop,
    LSTM,
    MatMul,
    MaxPool,
    Mul,
    Pad,
    QLinearConv,
    QLinearMatMul,
    QuantizeLinear,
    Relu,
    Reshape,
    Resize,
    Scan,
    Sigmoid,
    Softmax,
    Split,
    Squeeze,
    Transpose,
    Unsqueeze,
    Where,
    #[strum(default)]
    Custom(String),
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Custom(op_type) => f.write_str(op_type),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Operator set identifier; an empty domain denotes the default `ai.onnx` domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSetId {
    pub domain: String,
    pub version: i64,
}

impl OperatorSetId {
    pub fn new(domain: impl Into<String>, version: i64) -> Self {
        Self {
            domain: domain.into(),
            version,
        }
    }

    /// True for the default operator domain (`""` or `"ai.onnx"`).
    pub fn is_default_domain(&self) -> bool {
        self.domain.is_empty() || self.domain == "ai.onnx"
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub inputs: Vec<ValueInfo>,
    pub outputs: Vec<ValueInfo>,
    pub value_info: Vec<ValueInfo>,
    pub initializers: Vec<Tensor>,
}

/// An ONNX model: a graph plus the model-level version fields the quantizer may upgrade.
#[derive(Debug, Clone, PartialEq)]
pub struct OnnxModel {
    pub graph: Graph,
    pub opset_import: Vec<OperatorSetId>,
    /// File-format (IR) version.
    pub ir_version: i64,
}

impl OnnxModel {
    pub fn new(graph: Graph, opset_import: Vec<OperatorSetId>, ir_version: i64) -> Self {
        Self {
            graph,
            opset_import,
            ir_version,
        }
    }
}

/// Truncate the vector display for debug display
fn trunc<T: fmt::Display>(v: &[T]) -> String {
    const BEGIN_INDEX: usize = 0;
    const MAX_LEN: usize = 5;
    let mut s = String::new();
    s.push('[');
    for (i, item) in v.iter().enumerate() {
        if i > BEGIN_INDEX {
            s.push_str(", ");
        }
        s.push_str(&format!("{item}"));
        if i > MAX_LEN {
            s.push_str(", ...");
            break;
        }
    }
    s.push(']');
    s
}

/// Shorten the tensor data for debug display
impl fmt::Debug for TensorData {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TensorData::Float16(v) => write!(f, "Float16({})", trunc(v)),
            TensorData::Float32(v) => write!(f, "Float32({})", trunc(v)),
            TensorData::Float64(v) => write!(f, "Float64({})", trunc(v)),
            TensorData::Uint8(v) => write!(f, "Uint8({})", trunc(v)),
            TensorData::Int8(v) => write!(f, "Int8({})", trunc(v)),
            TensorData::Uint16(v) => write!(f, "Uint16({})", trunc(v)),
            TensorData::Int16(v) => write!(f, "Int16({})", trunc(v)),
            TensorData::Int32(v) => write!(f, "Int32({})", trunc(v)),
            TensorData::Int64(v) => write!(f, "Int64({})", trunc(v)),
            TensorData::Float8E4M3FN(v) => write!(f, "Float8E4M3FN({})", trunc(v)),
        }
    }
}
