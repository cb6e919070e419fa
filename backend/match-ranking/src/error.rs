use match_features::FeatureError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchingError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Model inference failed: {0}")]
    Inference(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Feature(#[from] FeatureError),
}

pub type Result<T> = std::result::Result<T, MatchingError>;

impl From<std::io::Error> for MatchingError {
    fn from(err: std::io::Error) -> Self {
        MatchingError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MatchingError {
    fn from(err: serde_json::Error) -> Self {
        MatchingError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for MatchingError {
    fn from(err: csv::Error) -> Self {
        MatchingError::Serialization(err.to_string())
    }
}

impl From<ndarray::ShapeError> for MatchingError {
    fn from(err: ndarray::ShapeError) -> Self {
        MatchingError::InvalidInput(err.to_string())
    }
}
