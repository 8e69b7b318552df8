//! Time-series dataset for masked-imputation training (SAITS and friends).
//!
//! Every sample read through [`SaitsDataset`] hides a fresh random share of
//! the observed values and reports both the remaining observed positions and
//! the artificially hidden ones, the latter being the imputation loss target.

pub mod dataset;
pub mod error;
pub mod masking;
pub mod storage;

pub use dataset::{MaskedSample, SaitsDataset, SaitsDatasetConfig};
pub use error::{DatasetError, Result};
pub use masking::{Corrupted, Corruptor, Mcar};
pub use storage::{
    DataInput, FileSource, FileType, InMemorySource, SeriesSource, TimeSeriesData,
    write_safetensors,
};
