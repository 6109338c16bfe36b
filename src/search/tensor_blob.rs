//! Safetensors blob holding the dense matrix, the COO lexical matrix and
//! every passage's multi-vector.
//!
//! Writing goes through a temporary file in the target directory that is
//! then persisted over the final path, so readers never observe a torn file. Reading memory-maps the blob and parses only
//! the header: tensors are decoded on demand, which is what lets phase-2
//! reranking touch just the candidates' multi-vectors.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use half::f16;
use memmap2::Mmap;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

use super::vector_index::IndexError;

#[cfg(target_endian = "big")]
compile_error!("the tensor blob is written with native byte order and requires a little-endian target");

/// One tensor queued for writing.
#[derive(Debug)]
pub struct TensorEntry<'a> {
    pub name: String,
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub bytes: Cow<'a, [u8]>,
}

impl<'a> TensorEntry<'a> {
    pub fn f32(name: impl Into<String>, shape: Vec<usize>, data: &'a [f32]) -> Self {
        Self {
            name: name.into(),
            dtype: Dtype::F32,
            shape,
            bytes: Cow::Borrowed(bytemuck::cast_slice(data)),
        }
    }

    pub fn i64(name: impl Into<String>, shape: Vec<usize>, data: &'a [i64]) -> Self {
        Self {
            name: name.into(),
            dtype: Dtype::I64,
            shape,
            bytes: Cow::Borrowed(bytemuck::cast_slice(data)),
        }
    }

    pub fn f16(name: impl Into<String>, shape: Vec<usize>, data: &'a [f16]) -> Self {
        Self {
            name: name.into(),
            dtype: Dtype::F16,
            shape,
            bytes: Cow::Borrowed(bytemuck::cast_slice(data)),
        }
    }
}

/// Write `entries` to `path` atomically. Returns the file size in bytes.
pub fn write_blob(
    path: &Path,
    entries: &[TensorEntry<'_>],
    metadata: HashMap<String, String>,
) -> Result<u64, IndexError> {
    let views = entries
        .iter()
        .map(|e| {
            TensorView::new(e.dtype, e.shape.clone(), e.bytes.as_ref())
                .map(|view| (e.name.clone(), view))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    safetensors::serialize_to_file(
        views.iter().map(|(name, view)| (name, view)),
        &Some(metadata),
        tmp.path(),
    )?;
    tmp.persist(path).map_err(|e| IndexError::Io(e.error))?;
    Ok(std::fs::metadata(path)?.len())
}

/// Location and type of one tensor inside the mapped blob.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSlot {
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    start: usize,
    end: usize,
}

impl TensorSlot {
    pub fn byte_len(&self) -> usize {
        self.end - self.start
    }
}

/// Read-only, memory-mapped safetensors file.
pub struct TensorBlob {
    mmap: Mmap,
    slots: HashMap<String, TensorSlot>,
    metadata: HashMap<String, String>,
    path: PathBuf,
}

impl TensorBlob {
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let file = File::open(path)?;
        // SAFETY: persisted blobs are never modified in place. Rebuilds write
        // a new file and rename it over the old path, which leaves this
        // mapping's inode untouched.
        let mmap = unsafe { Mmap::map(&file)? };

        let (header_len, meta) = SafeTensors::read_metadata(&mmap)?;
        let data_start = 8 + header_len;

        let mut slots = HashMap::new();
        for (name, info) in meta.tensors() {
            let (begin, end) = info.data_offsets;
            let span = data_start
                .checked_add(begin)
                .zip(data_start.checked_add(end))
                .filter(|&(start, end)| start <= end && end <= mmap.len());
            let Some((start, end)) = span else {
                return Err(IndexError::Inconsistent(format!(
                    "tensor {name:?} spans bytes {begin}..{end} past the data section of a {}-byte blob",
                    mmap.len()
                )));
            };
            slots.insert(
                name,
                TensorSlot {
                    dtype: info.dtype,
                    shape: info.shape.clone(),
                    start,
                    end,
                },
            );
        }

        Ok(Self {
            metadata: meta.metadata().clone().unwrap_or_default(),
            mmap,
            slots,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn slot(&self, name: &str) -> Option<&TensorSlot> {
        self.slots.get(name)
    }

    /// The `__metadata__` map written alongside the tensors.
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    fn raw(&self, name: &str, dtype: Dtype) -> Result<(&TensorSlot, &[u8]), IndexError> {
        let slot = self
            .slots
            .get(name)
            .ok_or_else(|| IndexError::MissingTensor(name.to_string()))?;
        if slot.dtype != dtype {
            return Err(IndexError::TensorDtype {
                name: name.to_string(),
                expected: format!("{dtype:?}"),
                actual: format!("{:?}", slot.dtype),
            });
        }
        Ok((slot, &self.mmap[slot.start..slot.end]))
    }

    /// Decode an F32 tensor. Returns its shape and values.
    pub fn read_f32(&self, name: &str) -> Result<(Vec<usize>, Vec<f32>), IndexError> {
        let (slot, bytes) = self.raw(name, Dtype::F32)?;
        Ok((slot.shape.clone(), bytemuck::pod_collect_to_vec(bytes)))
    }

    /// Decode an I64 tensor. Returns its shape and values.
    pub fn read_i64(&self, name: &str) -> Result<(Vec<usize>, Vec<i64>), IndexError> {
        let (slot, bytes) = self.raw(name, Dtype::I64)?;
        Ok((slot.shape.clone(), bytemuck::pod_collect_to_vec(bytes)))
    }

    /// Decode an F16 tensor. Returns its shape and values.
    pub fn read_f16(&self, name: &str) -> Result<(Vec<usize>, Vec<f16>), IndexError> {
        let (slot, bytes) = self.raw(name, Dtype::F16)?;
        Ok((slot.shape.clone(), bytemuck::pod_collect_to_vec(bytes)))
    }
}

impl std::fmt::Debug for TensorBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorBlob")
            .field("path", &self.path)
            .field("tensors", &self.slots.len())
            .field("bytes", &self.mmap.len())
            .finish()
    }
}
