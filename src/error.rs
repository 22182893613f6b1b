// src/error.rs

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("checkpoint is missing state for component `{0}`")]
    MissingComponent(String),

    #[error("checkpoint state for component `{component}` is incompatible: {reason}")]
    IncompatibleComponent { component: String, reason: String },

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error(transparent)]
    Torch(#[from] tch::TchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde_json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

pub(crate) fn shape<S: Into<String>>(msg: S) -> Error {
    Error::ShapeMismatch(msg.into())
}
