//! Validation errors for reward specifications.

use thiserror::Error;

/// Errors raised while compiling a client-supplied reward specification.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RewardError {
    /// `name` does not match any registered primitive.
    #[error("unknown reward primitive: {0}")]
    UnknownPrimitive(String),
    /// A primitive's parameters failed to deserialize into its typed form.
    #[error("invalid parameters for '{name}': {message}")]
    InvalidParams {
        /// Primitive name the parameters were meant for.
        name: String,
        /// Human-readable deserialization failure.
        message: String,
    },
    /// `len(primitives) != len(weights)`.
    #[error("primitive/weight length mismatch: {primitives} primitives, {weights} weights")]
    LengthMismatch {
        /// Number of primitives in the specification.
        primitives: usize,
        /// Number of weights in the specification.
        weights: usize,
    },
}
