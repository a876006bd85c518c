use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LandmarkError {
    #[error("expected 21 hand landmarks, got {got}")]
    WrongCount { got: usize },
    #[error("hand landmark {index} has a non-finite coordinate")]
    NonFinite { index: usize },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty frame payload")]
    Empty,
    #[error("JPEG decode failed: {0}")]
    Jpeg(String),
    #[error("decoded buffer too small: got {got}, expected {expected}")]
    Size { got: usize, expected: usize },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker connection is not available")]
    Disconnected,
    #[error("broker rejected publish: {0}")]
    Rejected(String),
}
