//! Error types for acceleration structure construction.

use thiserror::Error;

use crate::core::AcceleratorType;

/// Main error type for accelerator operations.
///
/// Only construction and configuration can fail. Ray traversal never
/// returns an error; the worst outcome of a query is a miss.
#[derive(Error, Debug)]
pub enum Error {
    /// `init` called on an accelerator that was already built
    #[error("{0} accelerator is already initialized")]
    AlreadyInitialized(AcceleratorType),

    /// `update` called before `init`
    #[error("{0} accelerator is not initialized")]
    NotInitialized(AcceleratorType),

    /// `update` called on an accelerator without update support
    #[error("{0} accelerator does not support update")]
    UpdateNotSupported(AcceleratorType),

    /// Mesh type tag outside the closed set of mesh kinds
    #[error("Unknown mesh type: {0}")]
    UnknownMeshType(u32),

    /// Accelerator name that does not parse
    #[error("Unknown accelerator type: {0}")]
    UnknownAccelerator(String),

    /// Declared totals disagree with the mesh list
    #[error("{what} count mismatch: declared {expected}, meshes hold {actual}")]
    CountMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Triangle references a vertex outside the mesh
    #[error("Triangle {triangle} references vertex {vertex} (vertex count: {vertex_count})")]
    InvalidTriangle {
        triangle: usize,
        vertex: u32,
        vertex_count: usize,
    },

    /// Transform cannot be inverted or decomposed
    #[error("Singular transformation matrix")]
    SingularTransform,

    /// Bad motion keyframes
    #[error("Invalid motion system: {0}")]
    InvalidMotion(String),

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Count does not fit in a bit-packed field
    #[error("Too many {what} (limit: {limit})")]
    CapacityExceeded { what: &'static str, limit: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// Result type alias for accelerator operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::AlreadyInitialized(AcceleratorType::Qbvh);
        assert!(e.to_string().contains("QBVH"));
        assert!(e.to_string().contains("already"));

        let e = Error::CountMismatch {
            what: "triangle",
            expected: 5,
            actual: 3,
        };
        assert!(e.to_string().contains("5"));
        assert!(e.to_string().contains("3"));

        let e = Error::UnknownMeshType(42);
        assert!(e.to_string().contains("42"));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
