//! Structured binary container
//!
//! A single self-describing file holding named n-dimensional datasets:
//!
//! ```text
//! ┌──────┬─────────┬────────────┬──────────────────┬─────────────────────────┐
//! │ ESCN │ version │ header len │ JSON header      │ little-endian payloads  │
//! │ 4 B  │ u32 LE  │ u64 LE     │ datasets + attrs │ (offsets are relative)  │
//! └──────┴─────────┴────────────┴──────────────────┴─────────────────────────┘
//! ```
//!
//! The header lists every dataset as `{name, dtype, shape, offset, len}`
//! with `len` in bytes. Writes go to a sibling temporary file that is renamed
//! over the target once complete, so a failed write never leaves a partial
//! file behind.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File magic
pub const MAGIC: &[u8; 4] = b"ESCN";

/// Current format version
pub const VERSION: u32 = 1;

/// Result type for container operations
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors raised while reading or writing containers
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid container: {0}")]
    Format(String),

    #[error("Missing dataset: {0}")]
    MissingDataset(String),

    #[error("Header error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Element type of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F64,
    I32,
}

impl DType {
    pub fn size(&self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F64 => 8,
        }
    }
}

/// Header entry describing one dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    /// Byte offset into the payload section
    pub offset: u64,
    /// Payload length in bytes
    pub len: u64,
}

impl DatasetInfo {
    /// Product of the shape, `None` if it overflows `usize`.
    pub fn num_elements(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    fn expected_len(&self) -> Option<u64> {
        self.num_elements()
            .and_then(|n| n.checked_mul(self.dtype.size()))
            .and_then(|bytes| u64::try_from(bytes).ok())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Header {
    datasets: Vec<DatasetInfo>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

/// Typed dataset contents
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
}

impl Data {
    pub fn dtype(&self) -> DType {
        match self {
            Data::F32(_) => DType::F32,
            Data::F64(_) => DType::F64,
            Data::I32(_) => DType::I32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Data::F32(v) => v.len(),
            Data::F64(v) => v.len(),
            Data::I32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builder collecting datasets for one container file
#[derive(Debug, Default)]
pub struct ContainerWriter {
    datasets: Vec<(String, Vec<usize>, Data)>,
    attributes: BTreeMap<String, String>,
}

impl ContainerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dataset; the element count must match the shape.
    pub fn add(&mut self, name: &str, shape: &[usize], data: Data) -> ContainerResult<&mut Self> {
        let expected = shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d));
        if expected != Some(data.len()) {
            return Err(ContainerError::Format(format!(
                "dataset '{}' has {} elements, which does not fit shape {:?}",
                name,
                data.len(),
                shape
            )));
        }
        if self.datasets.iter().any(|(n, _, _)| n == name) {
            return Err(ContainerError::Format(format!("duplicate dataset '{}'", name)));
        }
        self.datasets.push((name.to_string(), shape.to_vec(), data));
        Ok(self)
    }

    pub fn add_f32(&mut self, name: &str, shape: &[usize], data: Vec<f32>) -> ContainerResult<&mut Self> {
        self.add(name, shape, Data::F32(data))
    }

    pub fn add_f64(&mut self, name: &str, shape: &[usize], data: Vec<f64>) -> ContainerResult<&mut Self> {
        self.add(name, shape, Data::F64(data))
    }

    pub fn add_i32(&mut self, name: &str, shape: &[usize], data: Vec<i32>) -> ContainerResult<&mut Self> {
        self.add(name, shape, Data::I32(data))
    }

    pub fn set_attribute(&mut self, key: &str, value: &str) -> &mut Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    fn header(&self) -> Header {
        let mut offset = 0u64;
        let datasets = self
            .datasets
            .iter()
            .map(|(name, shape, data)| {
                let len = (data.len() * data.dtype().size()) as u64;
                let info = DatasetInfo {
                    name: name.clone(),
                    dtype: data.dtype(),
                    shape: shape.clone(),
                    offset,
                    len,
                };
                offset += len;
                info
            })
            .collect();
        Header {
            datasets,
            attributes: self.attributes.clone(),
        }
    }

    fn write_to<W: Write>(&self, w: &mut W) -> ContainerResult<()> {
        let header = serde_json::to_vec(&self.header())?;
        w.write_all(MAGIC)?;
        w.write_u32::<LittleEndian>(VERSION)?;
        w.write_u64::<LittleEndian>(header.len() as u64)?;
        w.write_all(&header)?;
        for (_, _, data) in &self.datasets {
            match data {
                Data::F32(v) => v.iter().try_for_each(|&x| w.write_f32::<LittleEndian>(x))?,
                Data::F64(v) => v.iter().try_for_each(|&x| w.write_f64::<LittleEndian>(x))?,
                Data::I32(v) => v.iter().try_for_each(|&x| w.write_i32::<LittleEndian>(x))?,
            }
        }
        Ok(())
    }

    /// Write the container to `path`, replacing any existing file.
    pub fn write(&self, path: &Path) -> ContainerResult<()> {
        let tmp = temp_path(path);
        let result = (|| -> ContainerResult<()> {
            let file = File::create(&tmp)?;
            let mut w = BufWriter::new(file);
            self.write_to(&mut w)?;
            let file = w.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            std::fs::rename(&tmp, path)?;
            Ok(())
        })();
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        debug!(path = %path.display(), datasets = self.datasets.len(), ok = result.is_ok(), "Container write");
        result
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "container".to_string());
    path.with_file_name(format!(".{}.tmp-{}", name, std::process::id()))
}

/// A container loaded into memory
#[derive(Debug, Clone)]
pub struct Container {
    header: Header,
    payload: Vec<u8>,
}

impl Container {
    /// Read and validate a container file.
    pub fn open(path: &Path) -> ContainerResult<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read>(mut r: R) -> ContainerResult<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)
            .map_err(|_| ContainerError::Format("file too short".to_string()))?;
        if &magic != MAGIC {
            return Err(ContainerError::Format("bad magic".to_string()));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(ContainerError::Format(format!("unsupported version {}", version)));
        }
        let header_len = r.read_u64::<LittleEndian>()?;
        let mut header_bytes = Vec::new();
        (&mut r).take(header_len).read_to_end(&mut header_bytes)?;
        if header_bytes.len() as u64 != header_len {
            return Err(ContainerError::Format("truncated header".to_string()));
        }
        let header: Header = serde_json::from_slice(&header_bytes)?;

        let mut payload = Vec::new();
        r.read_to_end(&mut payload)?;

        for ds in &header.datasets {
            if ds.expected_len() != Some(ds.len) {
                return Err(ContainerError::Format(format!(
                    "dataset '{}' length {} does not match shape {:?}",
                    ds.name, ds.len, ds.shape
                )));
            }
            if ds.offset.checked_add(ds.len).map_or(true, |end| end > payload.len() as u64) {
                return Err(ContainerError::Format(format!(
                    "dataset '{}' extends past end of file",
                    ds.name
                )));
            }
        }
        Ok(Self { header, payload })
    }

    pub fn datasets(&self) -> &[DatasetInfo] {
        &self.header.datasets
    }

    pub fn contains(&self, name: &str) -> bool {
        self.info(name).is_some()
    }

    pub fn info(&self, name: &str) -> Option<&DatasetInfo> {
        self.header.datasets.iter().find(|d| d.name == name)
    }

    pub fn shape(&self, name: &str) -> ContainerResult<&[usize]> {
        self.info(name)
            .map(|d| d.shape.as_slice())
            .ok_or_else(|| ContainerError::MissingDataset(name.to_string()))
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.header.attributes.get(key).map(String::as_str)
    }

    /// Decode a dataset in its stored type.
    pub fn read(&self, name: &str) -> ContainerResult<Data> {
        let info = self
            .info(name)
            .ok_or_else(|| ContainerError::MissingDataset(name.to_string()))?;
        let start = info.offset as usize;
        let mut bytes = &self.payload[start..start + info.len as usize];
        let n = info.len as usize / info.dtype.size();
        let data = match info.dtype {
            DType::F32 => {
                let mut v = vec![0f32; n];
                bytes.read_f32_into::<LittleEndian>(&mut v)?;
                Data::F32(v)
            }
            DType::F64 => {
                let mut v = vec![0f64; n];
                bytes.read_f64_into::<LittleEndian>(&mut v)?;
                Data::F64(v)
            }
            DType::I32 => {
                let mut v = vec![0i32; n];
                bytes.read_i32_into::<LittleEndian>(&mut v)?;
                Data::I32(v)
            }
        };
        Ok(data)
    }

    /// Read a dataset as `f32`, narrowing `f64` and `i32` data.
    pub fn read_f32(&self, name: &str) -> ContainerResult<Vec<f32>> {
        Ok(match self.read(name)? {
            Data::F32(v) => v,
            Data::F64(v) => v.into_iter().map(|x| x as f32).collect(),
            Data::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        })
    }

    /// Read a dataset as `f64`.
    pub fn read_f64(&self, name: &str) -> ContainerResult<Vec<f64>> {
        Ok(match self.read(name)? {
            Data::F32(v) => v.into_iter().map(f64::from).collect(),
            Data::F64(v) => v,
            Data::I32(v) => v.into_iter().map(f64::from).collect(),
        })
    }

    /// Read an integer dataset.
    pub fn read_i32(&self, name: &str) -> ContainerResult<Vec<i32>> {
        match self.read(name)? {
            Data::I32(v) => Ok(v),
            other => Err(ContainerError::Format(format!(
                "dataset '{}' is {:?}, expected i32",
                name,
                other.dtype()
            ))),
        }
    }

    /// First element of a dataset as `f64`, for scalar parameters.
    pub fn read_scalar(&self, name: &str) -> ContainerResult<f64> {
        self.read_f64(name)?
            .first()
            .copied()
            .ok_or_else(|| ContainerError::Format(format!("dataset '{}' is empty", name)))
    }
}
