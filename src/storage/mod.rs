//! Where the original series come from: arrays held in memory, or a
//! safetensors container read lazily one sample at a time.

mod file;
mod memory;

pub use file::{FileSource, write_safetensors};
pub use memory::InMemorySource;

use std::path::PathBuf;

use burn::tensor::TensorData;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Key of the series tensor, shape `[samples, steps, features]`.
pub const SERIES_KEY: &str = "X";
/// Key of the optional label tensor, shape `[samples]`.
pub const LABEL_KEY: &str = "y";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    SafeTensors,
}

/// Series (NaN marks a missing value) with optional classification labels.
#[derive(Debug, Clone)]
pub struct TimeSeriesData {
    pub x: TensorData,
    pub y: Option<TensorData>,
}

impl TimeSeriesData {
    pub fn new(x: TensorData, y: Option<TensorData>) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone)]
pub enum DataInput {
    Arrays(TimeSeriesData),
    File(PathBuf),
}

impl From<TimeSeriesData> for DataInput {
    fn from(data: TimeSeriesData) -> Self {
        Self::Arrays(data)
    }
}

impl From<PathBuf> for DataInput {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<&std::path::Path> for DataInput {
    fn from(path: &std::path::Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

pub trait SeriesSource: std::fmt::Debug + Send + Sync {
    fn len(&self) -> usize;

    /// `[steps, features]` of every sample.
    fn series_shape(&self) -> [usize; 2];

    fn has_labels(&self) -> bool;

    /// Flattened row-major `[steps, features]` values of sample `index`.
    fn fetch_series(&self, index: usize) -> Result<Vec<f32>>;

    /// `None` when the source carries no labels.
    fn fetch_label(&self, index: usize) -> Result<Option<i64>>;
}

fn check_index(index: usize, len: usize) -> Result<()> {
    if index >= len {
        return Err(crate::error::DatasetError::IndexOutOfBounds { index, len });
    }

    Ok(())
}

/// `y` must hold exactly one label per sample.
fn check_labels(shape: &[usize], samples: usize) -> Result<()> {
    match shape {
        [labels] if *labels == samples => Ok(()),
        [labels] => Err(crate::error::DatasetError::LabelCount {
            samples,
            labels: *labels,
        }),
        _ => Err(crate::error::DatasetError::InvalidShape {
            key: LABEL_KEY.to_string(),
            shape: shape.to_vec(),
            expected: 1,
        }),
    }
}
