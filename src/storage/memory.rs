use crate::{
    error::{DatasetError, Result},
    storage::{SERIES_KEY, SeriesSource, TimeSeriesData, check_index, check_labels},
};

#[derive(Debug)]
pub struct InMemorySource {
    values: Vec<f32>,
    labels: Option<Vec<i64>>,
    samples: usize,
    steps: usize,
    features: usize,
}

impl InMemorySource {
    pub fn new(data: TimeSeriesData) -> Result<Self> {
        let [samples, steps, features] = match data.x.shape[..] {
            [n, t, f] => [n, t, f],
            _ => {
                return Err(DatasetError::InvalidShape {
                    key: SERIES_KEY.to_string(),
                    shape: data.x.shape.clone(),
                    expected: 3,
                });
            }
        };

        let values = data.x.convert::<f32>().to_vec::<f32>()?;

        let labels = match data.y {
            Some(y) => {
                check_labels(&y.shape, samples)?;
                Some(y.convert::<i64>().to_vec::<i64>()?)
            }
            None => None,
        };

        Ok(Self {
            values,
            labels,
            samples,
            steps,
            features,
        })
    }
}

impl SeriesSource for InMemorySource {
    fn len(&self) -> usize {
        self.samples
    }

    fn series_shape(&self) -> [usize; 2] {
        [self.steps, self.features]
    }

    fn has_labels(&self) -> bool {
        self.labels.is_some()
    }

    fn fetch_series(&self, index: usize) -> Result<Vec<f32>> {
        check_index(index, self.samples)?;

        let stride = self.steps * self.features;
        Ok(self.values[index * stride..(index + 1) * stride].to_vec())
    }

    fn fetch_label(&self, index: usize) -> Result<Option<i64>> {
        check_index(index, self.samples)?;

        Ok(self.labels.as_ref().map(|labels| labels[index]))
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::TensorData;

    use crate::{
        error::DatasetError,
        storage::{InMemorySource, SeriesSource, TimeSeriesData},
    };

    fn series(samples: usize) -> TensorData {
        let values = (0..samples * 4 * 2).map(|v| v as f64).collect::<Vec<_>>();
        TensorData::new(values, [samples, 4, 2])
    }

    #[test]
    pub fn test_fetch_ok() {
        let labels = TensorData::new(vec![0_i32, 1, 2], [3]);
        let source = InMemorySource::new(TimeSeriesData::new(series(3), Some(labels))).unwrap();

        assert_eq!(source.len(), 3);
        assert_eq!(source.series_shape(), [4, 2]);
        assert_eq!(
            source.fetch_series(1).unwrap(),
            vec![8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0]
        );
        assert_eq!(source.fetch_label(2).unwrap(), Some(2));
    }

    #[test]
    pub fn test_without_labels() {
        let source = InMemorySource::new(TimeSeriesData::new(series(2), None)).unwrap();

        assert!(!source.has_labels());
        assert_eq!(source.fetch_label(0).unwrap(), None);
    }

    #[test]
    pub fn test_out_of_bounds() {
        let source = InMemorySource::new(TimeSeriesData::new(series(2), None)).unwrap();

        let err = source.fetch_series(2).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::IndexOutOfBounds { index: 2, len: 2 }
        ));
    }

    #[test]
    pub fn test_rejects_bad_input() {
        let flat = TensorData::new(vec![1.0_f32; 6], [2, 3]);
        let err = InMemorySource::new(TimeSeriesData::new(flat, None)).unwrap_err();
        assert!(matches!(err, DatasetError::InvalidShape { expected: 3, .. }));

        let labels = TensorData::new(vec![0_i64; 5], [5]);
        let err = InMemorySource::new(TimeSeriesData::new(series(2), Some(labels))).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::LabelCount {
                samples: 2,
                labels: 5
            }
        ));
    }
}
