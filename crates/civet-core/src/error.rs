use crate::shape::Shape;

/// All errors that can occur within civet.
///
/// This enum captures every failure mode: malformed topologies, name
/// resolution failures, shape conflicts, and topology-text syntax errors.
/// Using a single error type across the workspace simplifies propagation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The layer graph is malformed or inconsistent (build time).
    #[error("invalid topology: {reason}")]
    InvalidTopology { reason: String },

    /// A buffer name did not resolve (build or query time).
    #[error("unknown buffer: {name:?}")]
    UnknownBuffer { name: String },

    /// A layer name did not resolve (build or query time).
    #[error("unknown layer: {name:?}")]
    UnknownLayer { name: String },

    /// Shape conflict between a buffer and a new requirement (build or reshape time).
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Dimension index out of range for a shape's rank.
    #[error("dimension out of range: dim {dim} for shape with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Element count mismatch when writing a flat slice into a buffer.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// The topology text failed to parse.
    #[error("syntax error at line {line}: {msg}")]
    Syntax { line: usize, msg: String },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Create an `InvalidTopology` error from any string message.
    pub fn topology(reason: impl Into<String>) -> Self {
        Error::InvalidTopology {
            reason: reason.into(),
        }
    }
}

/// Convenience Result type used throughout civet.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}

/// Macro for early return with a formatted `InvalidTopology` error.
/// Usage: `bail_topology!("layer {} listed twice", name)`
#[macro_export]
macro_rules! bail_topology {
    ($($arg:tt)*) => {
        return Err($crate::Error::InvalidTopology {
            reason: format!($($arg)*),
        })
    };
}
