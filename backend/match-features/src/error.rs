use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeatureError>;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ndarray::ShapeError> for FeatureError {
    fn from(err: ndarray::ShapeError) -> Self {
        FeatureError::Internal(err.to_string())
    }
}
