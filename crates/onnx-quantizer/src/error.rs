/// Errors raised while computing quantization parameters or rewriting initializers.
#[derive(thiserror::Error, Debug)]
pub enum QuantizeError {
    /// Invalid tensor overrides, range store contents or quantization parameters.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The model declares an ambiguous or missing default-domain opset.
    #[error("Config error: {0}")]
    Config(String),

    /// The referenced weight or bias is not an initializer of the graph.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unsupported element type, or a float8 packing self-check failure.
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// Malformed JSON configuration.
    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, QuantizeError>;
