// file: error.rs
// desc: failure taxonomy for model loading and prediction

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecognizerError {
    /// The model artifact could not be fetched or decoded.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("model did not finish loading within {0} ms")]
    LoadTimeout(u32),

    /// The loaded model does not produce one score per digit.
    #[error("model produced {0} classes, expected 10")]
    ModelShape(usize),

    #[error("preprocessing failed: {0}")]
    Preprocess(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("invalid class scores: {0}")]
    InvalidScores(String),
}

pub type Result<T> = std::result::Result<T, RecognizerError>;
