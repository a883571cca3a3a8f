#![cfg_attr(docsrs, feature(doc_cfg))]

//! Static quantization of ONNX model initializers.
//!
//! Computes scales and zero-points from calibrated ranges or tensor data, rewrites float
//! weights and biases into integer or float8 initializers, and keeps the model opset
//! legal for the quantization operators. Which nodes to quantize and which operators to
//! emit is left to operator-specific callers driving a [`BaseQuantizer`].

#[macro_use]
extern crate derive_new;

/// Error types.
pub mod error;

/// Float8 element type.
pub mod float8;

/// In-memory model representation.
pub mod ir;

/// Graph adapter.
pub mod model;

/// Quantization parameters and initializer rewriting.
pub mod quantization;

pub use error::{QuantizeError, Result};
pub use model::ModelGraph;
pub use quantization::{BaseQuantizer, QuantType, QuantizerConfig};
