use std::sync::{Mutex, PoisonError};

use burn::{config::Config, data::dataset::Dataset, tensor::TensorData};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    error::{self, DatasetError},
    masking::{Corruptor, Mcar},
    storage::{DataInput, FileSource, FileType, InMemorySource, SeriesSource},
};

/// One training sample for the masked imputation task.
///
/// All series are `[steps, features]` f32 with missing values zeroed.
#[derive(Debug, Clone)]
pub struct MaskedSample {
    pub index: usize,
    /// Series before artificial masking, target of the imputation loss.
    pub original: TensorData,
    /// Series after artificial masking, model input.
    pub corrupted: TensorData,
    /// 1 where `corrupted` is observed.
    pub observed_mask: TensorData,
    /// 1 where a value was hidden on purpose.
    pub artificial_mask: TensorData,
    pub label: Option<i64>,
}

impl MaskedSample {
    /// 6 with a label, 5 without.
    pub fn num_fields(&self) -> usize {
        5 + usize::from(self.label.is_some())
    }
}

#[derive(Debug, Config)]
pub struct SaitsDatasetConfig {
    /// Share of the observed values hidden on every access.
    #[config(default = 0.2)]
    pub rate: f64,
    #[config(default = true)]
    pub return_labels: bool,
    #[config(default = "FileType::SafeTensors")]
    pub file_type: FileType,
    #[config(default = "None")]
    pub seed: Option<u64>,
}

impl SaitsDatasetConfig {
    pub fn init(&self, input: impl Into<DataInput>) -> error::Result<SaitsDataset<Mcar>> {
        self.init_with_corruptor(input, Mcar)
    }

    pub fn init_with_corruptor<C: Corruptor>(
        &self,
        input: impl Into<DataInput>,
        corruptor: C,
    ) -> error::Result<SaitsDataset<C>> {
        let source: Box<dyn SeriesSource> = match input.into() {
            DataInput::Arrays(data) => Box::new(InMemorySource::new(data)?),
            DataInput::File(path) => Box::new(FileSource::open(path, self.file_type)?),
        };

        Ok(SaitsDataset::from_source(source, corruptor, self))
    }
}

/// Serves [`MaskedSample`]s, corrupting the original series afresh on every
/// access. Nothing corrupted is cached, so two reads of one index differ.
#[derive(Debug)]
pub struct SaitsDataset<C = Mcar> {
    source: Box<dyn SeriesSource>,
    corruptor: C,
    rate: f64,
    return_labels: bool,
    rng: Mutex<StdRng>,
}

impl<C: Corruptor> SaitsDataset<C> {
    pub fn from_source(
        source: Box<dyn SeriesSource>,
        corruptor: C,
        config: &SaitsDatasetConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            source,
            corruptor,
            rate: config.rate,
            return_labels: config.return_labels,
            rng: Mutex::new(rng),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn series_shape(&self) -> [usize; 2] {
        self.source.series_shape()
    }

    /// Whether samples carry a label: the source has labels and they were asked for.
    pub fn returns_labels(&self) -> bool {
        self.return_labels && self.source.has_labels()
    }

    pub fn fetch(&self, index: usize) -> error::Result<MaskedSample> {
        let series = self.source.fetch_series(index)?;

        let out = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            self.corruptor.corrupt(&series, self.rate, &mut *rng)
        };

        let label = if self.returns_labels() {
            self.source.fetch_label(index)?
        } else {
            None
        };

        let shape = self.source.series_shape();

        Ok(MaskedSample {
            index,
            original: TensorData::new(out.original, shape),
            corrupted: TensorData::new(out.corrupted, shape),
            observed_mask: TensorData::new(out.observed_mask, shape),
            artificial_mask: TensorData::new(out.artificial_mask, shape),
            label,
        })
    }
}

impl<C: Corruptor> Dataset<MaskedSample> for SaitsDataset<C> {
    fn get(&self, index: usize) -> Option<MaskedSample> {
        match self.fetch(index) {
            Ok(sample) => Some(sample),
            Err(DatasetError::IndexOutOfBounds { .. }) => None,
            Err(err) => {
                tracing::warn!(index, error = %err, "failed to fetch sample");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.source.len()
    }
}

#[cfg(test)]
mod tests {
    use burn::{config::Config, data::dataset::Dataset, tensor::TensorData};
    use tempfile::NamedTempFile;

    use crate::{
        dataset::{MaskedSample, SaitsDatasetConfig},
        storage::{FileType, TimeSeriesData, write_safetensors},
    };

    fn series(samples: usize, steps: usize, features: usize) -> TensorData {
        let values = (0..samples * steps * features)
            .map(|v| (v as f32 * 0.1).sin())
            .collect::<Vec<_>>();
        TensorData::new(values, [samples, steps, features])
    }

    fn labelled(samples: usize, steps: usize, features: usize) -> TimeSeriesData {
        let labels = (0..samples as i64).map(|v| v % 3).collect::<Vec<_>>();
        TimeSeriesData::new(
            series(samples, steps, features),
            Some(TensorData::new(labels, [samples])),
        )
    }

    fn floats(data: &TensorData) -> Vec<f32> {
        data.to_vec::<f32>().unwrap()
    }

    fn ones(data: &TensorData) -> usize {
        floats(data).iter().filter(|&&v| v == 1.0).count()
    }

    #[test]
    pub fn test_defaults() {
        let config = SaitsDatasetConfig::new();

        assert_eq!(config.rate, 0.2);
        assert!(config.return_labels);
        assert_eq!(config.file_type, FileType::SafeTensors);
        assert_eq!(config.seed, None);
    }

    #[test]
    pub fn test_sample_with_labels() {
        let dataset = SaitsDatasetConfig::new()
            .with_seed(Some(0))
            .init(labelled(4, 10, 3))
            .unwrap();

        assert_eq!(dataset.len(), 4);

        let sample = dataset.get(2).unwrap();
        assert_eq!(sample.index, 2);
        assert_eq!(sample.num_fields(), 6);
        assert_eq!(sample.label, Some(2));
        for part in [
            &sample.original,
            &sample.corrupted,
            &sample.observed_mask,
            &sample.artificial_mask,
        ] {
            assert_eq!(part.shape, vec![10, 3]);
        }

        // fully observed input, 30 values at rate 0.2
        assert_eq!(ones(&sample.artificial_mask), 6);
        assert_eq!(ones(&sample.observed_mask), 24);
    }

    #[test]
    pub fn test_labels_disabled_or_absent() {
        let disabled = SaitsDatasetConfig::new()
            .with_return_labels(false)
            .init(labelled(3, 5, 2))
            .unwrap();
        let sample = disabled.get(0).unwrap();
        assert_eq!(sample.num_fields(), 5);
        assert_eq!(sample.label, None);

        let absent = SaitsDatasetConfig::new()
            .init(TimeSeriesData::new(series(3, 5, 2), None))
            .unwrap();
        assert!(!absent.returns_labels());
        assert_eq!(absent.get(1).unwrap().num_fields(), 5);
    }

    #[test]
    pub fn test_masks_are_consistent() {
        let mut values = floats(&series(1, 12, 4));
        for i in [0, 5, 17, 33] {
            values[i] = f32::NAN;
        }
        let data = TimeSeriesData::new(TensorData::new(values.clone(), [1, 12, 4]), None);
        let dataset = SaitsDatasetConfig::new().with_rate(0.5).init(data).unwrap();

        let MaskedSample {
            original,
            corrupted,
            observed_mask,
            artificial_mask,
            ..
        } = dataset.get(0).unwrap();

        let original = floats(&original);
        let corrupted = floats(&corrupted);
        let observed_mask = floats(&observed_mask);
        let artificial_mask = floats(&artificial_mask);

        for i in 0..values.len() {
            if artificial_mask[i] == 1.0 {
                assert!(!values[i].is_nan());
                assert_eq!(observed_mask[i], 0.0);
                assert_eq!(corrupted[i], 0.0);
            }
            if observed_mask[i] == 1.0 {
                assert_eq!(corrupted[i], original[i]);
            }
            if values[i].is_nan() {
                assert_eq!(original[i], 0.0);
                assert_eq!(artificial_mask[i], 0.0);
            }
        }
        // 44 observed, half hidden
        assert_eq!(artificial_mask.iter().filter(|&&v| v == 1.0).count(), 22);
    }

    #[test]
    pub fn test_recorrupts_on_every_access() {
        let dataset = SaitsDatasetConfig::new()
            .with_seed(Some(11))
            .init(labelled(2, 50, 8))
            .unwrap();

        let first = dataset.get(1).unwrap();
        let second = dataset.get(1).unwrap();

        assert_eq!(floats(&first.original), floats(&second.original));
        assert_ne!(
            floats(&first.artificial_mask),
            floats(&second.artificial_mask)
        );
    }

    #[test]
    pub fn test_seed_reproducible() {
        let config = SaitsDatasetConfig::new().with_seed(Some(5));
        let a = config.init(labelled(3, 6, 2)).unwrap();
        let b = config.init(labelled(3, 6, 2)).unwrap();

        for index in 0..3 {
            assert_eq!(
                floats(&a.get(index).unwrap().corrupted),
                floats(&b.get(index).unwrap().corrupted)
            );
        }
    }

    #[test]
    pub fn test_file_matches_memory() {
        let file = NamedTempFile::new().unwrap();
        write_safetensors(file.path(), &labelled(5, 7, 3)).unwrap();

        let config = SaitsDatasetConfig::new();
        let on_disk = config.init(file.path()).unwrap();
        let in_memory = config.init(labelled(5, 7, 3)).unwrap();

        assert_eq!(on_disk.len(), in_memory.len());
        assert_eq!(on_disk.series_shape(), [7, 3]);

        for index in 0..5 {
            let a = on_disk.get(index).unwrap();
            let b = in_memory.get(index).unwrap();

            assert_eq!(floats(&a.original), floats(&b.original));
            assert_eq!(a.label, b.label);
            assert_eq!(a.num_fields(), 6);
        }
    }

    #[test]
    pub fn test_out_of_bounds_is_none() {
        let dataset = SaitsDatasetConfig::new().init(labelled(3, 4, 2)).unwrap();

        assert!(dataset.get(3).is_none());
        assert!(dataset.fetch(3).is_err());
        assert_eq!(dataset.iter().count(), 3);
    }

    #[test]
    pub fn test_shared_across_threads() {
        let file = NamedTempFile::new().unwrap();
        write_safetensors(file.path(), &labelled(8, 6, 2)).unwrap();
        let dataset = SaitsDatasetConfig::new().init(file.path()).unwrap();
        let expected = (0..8)
            .map(|index| floats(&dataset.get(index).unwrap().original))
            .collect::<Vec<_>>();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for index in 0..8 {
                        let sample = dataset.get(index).unwrap();
                        assert_eq!(floats(&sample.original), expected[index]);
                        assert_eq!(sample.label, Some(index as i64 % 3));
                        assert_eq!(ones(&sample.artificial_mask), 2);
                    }
                });
            }
        });
    }

    #[test]
    pub fn test_config_save_load() {
        let file = NamedTempFile::new().unwrap();
        let config = SaitsDatasetConfig::new()
            .with_rate(0.35)
            .with_return_labels(false)
            .with_seed(Some(9));

        config.save(file.path()).unwrap();
        let loaded = SaitsDatasetConfig::load(file.path()).unwrap();

        assert_eq!(loaded.rate, 0.35);
        assert!(!loaded.return_labels);
        assert_eq!(loaded.seed, Some(9));
    }
}
