//! Error Handling Module
//!
//! Defines the error type shared by the data supplier, the model factory,
//! the training orchestrator and the ensemble composer.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for ensemble training operations
#[derive(Error, Debug)]
pub enum EnsembleError {
    /// An image could not be opened or decoded
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Problem with the image folders or batch streams
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Input tensor does not match the declared model input
    #[error("Shape mismatch: expected [N, {}, {}, {}], found {found:?}", expected[0], expected[1], expected[2])]
    ShapeMismatch {
        /// Expected (channels, height, width)
        expected: [usize; 3],
        /// Dimensions of the offending tensor
        found: Vec<usize>,
    },

    /// A layer table that cannot be built
    #[error("Invalid classifier spec '{name}': {reason}")]
    InvalidSpec { name: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error raised while training
    #[error("Training error: {0}")]
    Training(String),

    /// Saving or loading a model record failed
    #[error("Recorder error: {0}")]
    Recorder(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EnsembleError {
    /// Build an [`EnsembleError::InvalidSpec`] for the named spec
    pub fn invalid_spec(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for EnsembleError {
    fn from(err: serde_json::Error) -> Self {
        EnsembleError::Serialization(err.to_string())
    }
}

/// Convenience Result type for ensemble operations
pub type Result<T> = std::result::Result<T, EnsembleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EnsembleError::Dataset("no class directories".to_string());
        assert_eq!(format!("{}", err), "Dataset error: no class directories");
    }

    #[test]
    fn test_shape_mismatch_display() {
        let err = EnsembleError::ShapeMismatch {
            expected: [3, 150, 150],
            found: vec![1, 3, 100, 100],
        };
        let msg = err.to_string();
        assert!(msg.contains("[N, 3, 150, 150]"));
        assert!(msg.contains("[1, 3, 100, 100]"));
    }

    #[test]
    fn test_image_load_error() {
        let path = PathBuf::from("/data/train/cats/cat.1.jpg");
        let err = EnsembleError::ImageLoad(path, "unexpected EOF".to_string());
        assert!(format!("{}", err).contains("cat.1.jpg"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: EnsembleError = io_err.into();
        assert!(matches!(err, EnsembleError::Io(_)));
    }
}
