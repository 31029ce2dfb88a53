use thiserror::Error;

/// Errors raised while planning, building or querying a stacked autoencoder.
///
/// Every variant is a synchronous validation failure. Configuration errors are
/// raised before the first parameter is allocated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    /// Height, width or channels of the input were not statically known
    #[error("the last three input dimensions must be known, got {dims:?}")]
    UnknownShape { dims: [Option<usize>; 4] },

    /// Inconsistent model configuration
    #[error("configuration mismatch: {0}")]
    ConfigMismatch(String),

    /// Codec mode outside {encode, decode}
    #[error("invalid codec mode `{0}`, expected `encode` or `decode`")]
    InvalidMode(String),

    /// A required argument was not supplied
    #[error("missing required argument `{0}`")]
    MissingArgument(&'static str),

    /// Encoded output index beyond the stack depth
    #[error("encoded index {index} is out of range, the stack has {layer_num} layers")]
    IndexOutOfRange { index: usize, layer_num: usize },

    /// An output was requested before any pass produced one
    #[error("no forward pass has been built yet")]
    NotBuilt,

    /// A forward input does not match the planned input shape
    #[error("input shape mismatch: expected [_, {expected:?}], got {actual:?}")]
    InputMismatch { expected: [usize; 3], actual: [usize; 4] },
}

/// Result alias for model construction and queries
pub type Result<T> = std::result::Result<T, StackError>;
