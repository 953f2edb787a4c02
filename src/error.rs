//! Error types for the evaluation and model-selection core

use thiserror::Error;

use crate::training::Phase;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid monitor, optimizer or other configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Class names, model outputs or batch tensors disagree in shape
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A phase ended without producing any step outputs
    #[error("No step outputs to aggregate")]
    EmptyPhase,

    /// A failure inside a phase, tagged with where it happened
    #[error("{split} phase failed at epoch {epoch}: {source}")]
    Phase {
        /// Split the failure happened in
        split: Phase,
        /// Epoch the failure happened in
        epoch: usize,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// Controller used out of order (e.g. a step with no active phase)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Tensor operation error
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Figure encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Result type alias for crate operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Attach the split and epoch a failure happened in
    pub fn in_phase(self, split: Phase, epoch: usize) -> Self {
        match self {
            // config errors abort before any phase runs; keep them unwrapped
            err @ (Self::Config(_) | Self::Phase { .. }) => err,
            err => Self::Phase {
                split,
                epoch,
                source: Box::new(err),
            },
        }
    }

    /// The innermost error, looking through phase context
    pub fn root(&self) -> &Error {
        match self {
            Self::Phase { source, .. } => source.root(),
            err => err,
        }
    }

    /// Whether this is (or wraps) a shape mismatch
    pub fn is_shape_mismatch(&self) -> bool {
        matches!(self.root(), Self::ShapeMismatch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_context_wraps_and_unwraps() {
        let err = Error::shape_mismatch("3 class names for 4 outputs").in_phase(Phase::Validate, 2);
        assert!(err.is_shape_mismatch());
        let msg = err.to_string();
        assert!(msg.contains("val phase failed at epoch 2"));
        assert!(msg.contains("3 class names for 4 outputs"));
    }

    #[test]
    fn test_phase_context_is_not_nested_twice() {
        let err = Error::EmptyPhase
            .in_phase(Phase::Test, 0)
            .in_phase(Phase::Train, 5);
        match err {
            Error::Phase { split, epoch, .. } => {
                assert_eq!(split, Phase::Test);
                assert_eq!(epoch, 0);
            }
            other => panic!("expected phase error, got {other:?}"),
        }
    }

    #[test]
    fn test_config_errors_stay_unwrapped() {
        let err = Error::config("bad monitor").in_phase(Phase::Train, 0);
        assert!(matches!(err, Error::Config(_)));
    }
}
