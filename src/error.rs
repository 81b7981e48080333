//! Error types for the face attribute training project.

use thiserror::Error;

/// Main error type for face attribute training operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image processing error
    #[error("Image processing error: {0}")]
    Image(String),

    /// Annotation file error
    #[error("Annotation error: {0}")]
    Annotation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dataset error
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Model error
    #[error("Model error: {0}")]
    Model(String),

    /// Training error
    #[error("Training error: {0}")]
    Training(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A hyperparameter trial was stopped early by the pruner.
    ///
    /// This is a control signal rather than a failure; the study catches it
    /// and records the trial as pruned.
    #[error("trial pruned after epoch {epoch}")]
    TrialPruned { epoch: usize },
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Annotation(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Specialized Result type for face attribute training operations.
pub type Result<T> = std::result::Result<T, Error>;
