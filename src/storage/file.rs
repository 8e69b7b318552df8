use std::{
    collections::HashMap,
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use safetensors::tensor::{Dtype, Metadata, TensorInfo, TensorView};

use crate::{
    error::{DatasetError, Result},
    storage::{
        FileType, LABEL_KEY, SERIES_KEY, SeriesSource, TimeSeriesData, check_index, check_labels,
    },
};

const HEADER_LEN_BYTES: u64 = 8;
const MAX_HEADER_LEN: u64 = 100_000_000;

#[derive(Debug, Clone, Copy)]
enum SeriesDtype {
    F32,
    F64,
}

#[derive(Debug, Clone, Copy)]
enum LabelDtype {
    U8,
    I32,
    I64,
}

#[derive(Debug, Clone, Copy)]
struct LabelLayout {
    offset: u64,
    dtype: LabelDtype,
}

/// Byte layout of a container, read from its header once.
#[derive(Debug, Clone, Copy)]
struct FileLayout {
    x_offset: u64,
    x_dtype: SeriesDtype,
    samples: usize,
    steps: usize,
    features: usize,
    y: Option<LabelLayout>,
}

/// Reads samples straight from a safetensors file.
///
/// Only the header is read at construction. The data handle is opened on the
/// first fetch, kept for later fetches, and closed when the source is dropped;
/// each fetch reads just the bytes of the requested sample.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    layout: FileLayout,
    handle: Mutex<Option<File>>,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>, file_type: FileType) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let layout = match file_type {
            FileType::SafeTensors => read_layout(&path)?,
        };

        tracing::debug!(
            path = %path.display(),
            samples = layout.samples,
            steps = layout.steps,
            features = layout.features,
            labels = layout.y.is_some(),
            "read dataset header"
        );

        Ok(Self {
            path,
            layout,
            handle: Mutex::new(None),
        })
    }

    /// Whether the data handle has been acquired yet.
    pub fn is_open(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut guard = self.handle.lock().unwrap_or_else(PoisonError::into_inner);

        let file = match &mut *guard {
            Some(file) => file,
            slot @ None => {
                tracing::debug!(path = %self.path.display(), "opening dataset file handle");
                slot.insert(File::open(&self.path)?)
            }
        };

        let mut buf = vec![0; len];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;

        Ok(buf)
    }
}

impl SeriesSource for FileSource {
    fn len(&self) -> usize {
        self.layout.samples
    }

    fn series_shape(&self) -> [usize; 2] {
        [self.layout.steps, self.layout.features]
    }

    fn has_labels(&self) -> bool {
        self.layout.y.is_some()
    }

    fn fetch_series(&self, index: usize) -> Result<Vec<f32>> {
        let layout = &self.layout;
        check_index(index, layout.samples)?;

        let count = layout.steps * layout.features;
        let width = match layout.x_dtype {
            SeriesDtype::F32 => 4,
            SeriesDtype::F64 => 8,
        };
        let offset = layout.x_offset + (index * count * width) as u64;
        let bytes = self.read_at(offset, count * width)?;

        let values: Vec<f32> = match layout.x_dtype {
            SeriesDtype::F32 => bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            SeriesDtype::F64 => bytes
                .chunks_exact(8)
                .map(|b| {
                    let mut raw = [0; 8];
                    raw.copy_from_slice(b);
                    f64::from_le_bytes(raw) as f32
                })
                .collect(),
        };

        Ok(values)
    }

    fn fetch_label(&self, index: usize) -> Result<Option<i64>> {
        check_index(index, self.layout.samples)?;

        let Some(y) = self.layout.y else {
            return Ok(None);
        };

        let width = label_width(y.dtype);
        let bytes = self.read_at(y.offset + (index * width) as u64, width)?;

        let label = match y.dtype {
            LabelDtype::U8 => bytes[0] as i64,
            LabelDtype::I32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
            LabelDtype::I64 => {
                let mut raw = [0; 8];
                raw.copy_from_slice(&bytes);
                i64::from_le_bytes(raw)
            }
        };

        Ok(Some(label))
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        let handle = self.handle.get_mut().unwrap_or_else(PoisonError::into_inner);
        if handle.take().is_some() {
            tracing::debug!(path = %self.path.display(), "closed dataset file handle");
        }
    }
}

fn label_width(dtype: LabelDtype) -> usize {
    match dtype {
        LabelDtype::U8 => 1,
        LabelDtype::I32 => 4,
        LabelDtype::I64 => 8,
    }
}

fn read_layout(path: &Path) -> Result<FileLayout> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let mut raw_len = [0; HEADER_LEN_BYTES as usize];
    file.read_exact(&mut raw_len)?;
    let header_len = u64::from_le_bytes(raw_len);
    if header_len > MAX_HEADER_LEN || HEADER_LEN_BYTES + header_len > file_len {
        return Err(DatasetError::Header(format!(
            "header length {header_len} does not fit a file of {file_len} bytes"
        )));
    }

    let mut header = vec![0; header_len as usize];
    file.read_exact(&mut header)?;
    let metadata = serde_json::from_slice::<Metadata>(&header)
        .map_err(|e| DatasetError::Header(e.to_string()))?;

    let data_start = HEADER_LEN_BYTES + header_len;
    let data_len = file_len - data_start;

    let x = metadata
        .info(SERIES_KEY)
        .ok_or_else(|| DatasetError::MissingKey(SERIES_KEY.to_string()))?;
    let [samples, steps, features] = match x.shape[..] {
        [n, t, f] => [n, t, f],
        _ => {
            return Err(DatasetError::InvalidShape {
                key: SERIES_KEY.to_string(),
                shape: x.shape.clone(),
                expected: 3,
            });
        }
    };
    let (x_dtype, x_width) = match x.dtype {
        Dtype::F32 => (SeriesDtype::F32, 4),
        Dtype::F64 => (SeriesDtype::F64, 8),
        other => {
            return Err(DatasetError::UnsupportedDtype {
                key: SERIES_KEY.to_string(),
                dtype: format!("{other:?}"),
            });
        }
    };
    check_extent(SERIES_KEY, x, samples * steps * features * x_width, data_len)?;

    let y = match metadata.info(LABEL_KEY) {
        Some(y) => {
            check_labels(&y.shape, samples)?;

            let dtype = match y.dtype {
                Dtype::U8 => LabelDtype::U8,
                Dtype::I32 => LabelDtype::I32,
                Dtype::I64 => LabelDtype::I64,
                other => {
                    return Err(DatasetError::UnsupportedDtype {
                        key: LABEL_KEY.to_string(),
                        dtype: format!("{other:?}"),
                    });
                }
            };
            check_extent(LABEL_KEY, y, samples * label_width(dtype), data_len)?;

            Some(LabelLayout {
                offset: data_start + y.data_offsets.0 as u64,
                dtype,
            })
        }
        None => None,
    };

    Ok(FileLayout {
        x_offset: data_start + x.data_offsets.0 as u64,
        x_dtype,
        samples,
        steps,
        features,
        y,
    })
}

fn check_extent(key: &str, info: &TensorInfo, expected: usize, data_len: u64) -> Result<()> {
    let (start, end) = info.data_offsets;
    if end < start || end - start != expected || end as u64 > data_len {
        return Err(DatasetError::Header(format!(
            "'{key}' spans bytes {start}..{end}, expected {expected} bytes within {data_len}"
        )));
    }

    Ok(())
}

/// Writes `data` as a container `FileSource` can read: series as F32 under
/// `"X"`, labels as I64 under `"y"`.
pub fn write_safetensors(path: impl AsRef<Path>, data: &TimeSeriesData) -> Result<()> {
    let samples = match data.x.shape[..] {
        [n, _, _] => n,
        _ => {
            return Err(DatasetError::InvalidShape {
                key: SERIES_KEY.to_string(),
                shape: data.x.shape.clone(),
                expected: 3,
            });
        }
    };
    if let Some(y) = &data.y {
        check_labels(&y.shape, samples)?;
    }

    let mut tensors = vec![(
        SERIES_KEY,
        Dtype::F32,
        data.x.shape.clone(),
        data.x
            .clone()
            .convert::<f32>()
            .to_vec::<f32>()?
            .into_iter()
            .flat_map(f32::to_le_bytes)
            .collect::<Vec<u8>>(),
    )];

    if let Some(y) = &data.y {
        tensors.push((
            LABEL_KEY,
            Dtype::I64,
            y.shape.clone(),
            y.clone()
                .convert::<i64>()
                .to_vec::<i64>()?
                .into_iter()
                .flat_map(i64::to_le_bytes)
                .collect(),
        ));
    }

    let views = tensors
        .iter()
        .map(|(name, dtype, shape, bytes)| {
            TensorView::new(*dtype, shape.clone(), bytes)
                .map(|view| (*name, view))
                .map_err(|e| DatasetError::Data(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut info = HashMap::new();
    info.insert("format".to_string(), "saits-data".to_string());

    let bytes =
        safetensors::serialize(views, Some(info)).map_err(|e| DatasetError::Data(e.to_string()))?;
    std::fs::write(path, bytes)?;

    Ok(())
}
