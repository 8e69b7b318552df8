use thiserror::Error;

pub type Result<T> = std::result::Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed safetensors header: {0}")]
    Header(String),

    #[error("key '{0}' not found in data source")]
    MissingKey(String),

    #[error("'{key}' has shape {shape:?}, expected rank {expected}")]
    InvalidShape {
        key: String,
        shape: Vec<usize>,
        expected: usize,
    },

    #[error("'{key}' has unsupported dtype {dtype}")]
    UnsupportedDtype { key: String, dtype: String },

    #[error("{labels} labels given for {samples} samples")]
    LabelCount { samples: usize, labels: usize },

    #[error("index {index} out of bounds for dataset of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("tensor data conversion failed: {0}")]
    Data(String),
}

impl From<burn::tensor::DataError> for DatasetError {
    fn from(err: burn::tensor::DataError) -> Self {
        Self::Data(format!("{err:?}"))
    }
}
