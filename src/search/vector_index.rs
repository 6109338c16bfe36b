//! Hybrid vector index: build mode, persistence, load, and the two-phase
//! retrieval cascade.
//!
//! The index has two states, each its own type:
//!
//! - [`IndexBuilder`] (build mode) accumulates passages with [`IndexBuilder::save`]
//!   and writes them out with [`IndexBuilder::persist`].
//! - [`VectorIndex`] (query mode) is produced only by [`VectorIndex::load`]
//!   and serves [`VectorIndex::retrieve`]. It is read-only.
//!
//! # On-disk layout
//!
//! ```text
//! <dir>/vectors.json          {"ids": [...], "tokens": {token: column}}
//! <dir>/vectors.safetensors   dense      F32 [N, D]
//!                             bm25_index I64 [2, M]   (rows; columns)
//!                             bm25_value F32 [M]
//!                             <id>       F16 [T, D]   one per passage
//! ```
//!
//! Each file is replaced atomically via rename, but the pair is not: a crash
//! between the two renames leaves a blob newer than its side file. `load`
//! detects the resulting row-count mismatch and refuses the pair.
//!
//! # Retrieval
//!
//! ```text
//! query ──► phase 1: dense·q + w·(COO·q_lex) over all N rows ──► top pool
//!                                                                  │
//!           phase 2: MaxSim on pool multi-vectors (lazy, cached) ◄─┘
//!                    hybrid = wc·colbert + wd·dense + wb·bm25 ──► ranked
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::embedder::{EncodedBatch, PassageEmbedding};
use super::fusion::{FusionWeights, HybridScore};
use super::matrix::{CooMatrix, DenseMatrix};
use super::multivector::{CacheStats, MultiVector, MultiVectorCache, maxsim};
use super::tensor_blob::{TensorBlob, TensorEntry, write_blob};
use super::vocabulary::{Vocabulary, VocabularyBuilder};
use crate::config::SearchConfig;

/// Side file with ids and vocabulary.
pub const SIDE_FILE_NAME: &str = "vectors.json";
/// Safetensors blob with all numeric data.
pub const TENSOR_FILE_NAME: &str = "vectors.safetensors";

pub const DENSE_KEY: &str = "dense";
pub const BM25_INDEX_KEY: &str = "bm25_index";
pub const BM25_VALUE_KEY: &str = "bm25_value";

/// Header key safetensors reserves for string metadata.
pub const METADATA_KEY: &str = "__metadata__";

/// Tensor names that passage ids may not take.
pub const RESERVED_KEYS: [&str; 4] = [DENSE_KEY, BM25_INDEX_KEY, BM25_VALUE_KEY, METADATA_KEY];

/// Written to the blob's `__metadata__` as `format_version`.
pub const FORMAT_VERSION: &str = "1";

pub fn side_file_path(dir: &Path) -> PathBuf {
    dir.join(SIDE_FILE_NAME)
}

pub fn tensor_blob_path(dir: &Path) -> PathBuf {
    dir.join(TENSOR_FILE_NAME)
}

/// Whether both index files are present in `dir`.
pub fn index_exists(dir: &Path) -> bool {
    side_file_path(dir).is_file() && tensor_blob_path(dir).is_file()
}

/// Errors from building, persisting, loading or querying an index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("side file error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tensor blob error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("tensor {0:?} missing from blob")]
    MissingTensor(String),

    #[error("tensor {name:?} has shape {actual:?}, expected {expected}")]
    TensorShape {
        name: String,
        expected: String,
        actual: Vec<usize>,
    },

    #[error("tensor {name:?} has dtype {actual}, expected {expected}")]
    TensorDtype {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("{id}: vector width {actual}, index dimension {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("passage id {0:?} is empty or collides with a reserved tensor or header name")]
    ReservedId(String),

    #[error("passage {id:?}: lexical weight for {token:?} is {weight}")]
    InvalidWeight {
        id: String,
        token: String,
        weight: f32,
    },

    #[error("batch has {embeddings} embeddings for {ids} ids")]
    BatchMismatch { ids: usize, embeddings: usize },

    #[error("inconsistent index: {0}")]
    Inconsistent(String),
}

#[derive(Serialize)]
struct SideFileRef<'a> {
    ids: &'a [String],
    tokens: &'a HashMap<String, u32>,
}

#[derive(Deserialize)]
struct SideFile {
    ids: Vec<String>,
    tokens: HashMap<String, u32>,
}

/// Counts reported by `persist` and `load`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub passages: usize,
    pub dimension: usize,
    pub vocabulary: usize,
    /// Nonzero entries of the lexical matrix.
    pub nonzeros: usize,
    /// Size of the tensor blob on disk.
    pub blob_bytes: u64,
}

// -------------------------------------------------------------------------
// Build mode
// -------------------------------------------------------------------------

/// Build-mode index: an append-only arena of passages plus the vocabulary.
///
/// Re-saving an id overwrites that passage in place (last write wins) and
/// keeps its original row.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    dimension: usize,
    ids: Vec<String>,
    positions: HashMap<String, usize>,
    dense: Vec<Vec<f32>>,
    sparse: Vec<Vec<(u32, f32)>>,
    multivectors: HashMap<String, MultiVector>,
    vocabulary: VocabularyBuilder,
}

impl IndexBuilder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            positions: HashMap::new(),
            dense: Vec::new(),
            sparse: Vec::new(),
            multivectors: HashMap::new(),
            vocabulary: VocabularyBuilder::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Distinct passages accumulated so far.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn vocabulary(&self) -> &VocabularyBuilder {
        &self.vocabulary
    }

    pub fn dense_row(&self, id: &str) -> Option<&[f32]> {
        self.positions.get(id).map(|&i| self.dense[i].as_slice())
    }

    pub fn multivector(&self, id: &str) -> Option<&MultiVector> {
        self.multivectors.get(id)
    }

    /// Check one passage and quantize its multi-vector.
    fn validate(&self, id: &str, embedding: &PassageEmbedding) -> Result<MultiVector, IndexError> {
        if id.is_empty() || RESERVED_KEYS.contains(&id) {
            return Err(IndexError::ReservedId(id.to_string()));
        }
        if embedding.dense.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                id: id.to_string(),
                expected: self.dimension,
                actual: embedding.dense.len(),
            });
        }
        if let Some((token, weight)) = embedding
            .lexical
            .iter()
            .find(|(_, w)| !w.is_finite() || *w < 0.0)
        {
            return Err(IndexError::InvalidWeight {
                id: id.to_string(),
                token: token.clone(),
                weight: *weight,
            });
        }
        MultiVector::from_rows(&embedding.multivector, self.dimension).ok_or_else(|| {
            let actual = embedding
                .multivector
                .iter()
                .map(Vec::len)
                .find(|&w| w != self.dimension)
                .unwrap_or_default();
            IndexError::DimensionMismatch {
                id: id.to_string(),
                expected: self.dimension,
                actual,
            }
        })
    }

    /// Register a batch of embedded passages. `ids[i]` names `batch` row *i*.
    ///
    /// The whole batch is validated before anything is recorded, so a
    /// rejected batch leaves the builder unchanged.
    pub fn save<S: AsRef<str>>(&mut self, ids: &[S], batch: EncodedBatch) -> Result<(), IndexError> {
        let embeddings = batch.consistent_len().unwrap_or(usize::MAX);
        if embeddings != ids.len() {
            return Err(IndexError::BatchMismatch {
                ids: ids.len(),
                embeddings: batch.len(),
            });
        }
        let embeddings = batch.into_embeddings();
        let quantized = ids
            .iter()
            .zip(&embeddings)
            .map(|(id, embedding)| self.validate(id.as_ref(), embedding))
            .collect::<Result<Vec<_>, _>>()?;
        for ((id, embedding), mv) in ids.iter().zip(embeddings).zip(quantized) {
            self.insert(id.as_ref(), embedding, mv);
        }
        Ok(())
    }

    fn insert(&mut self, id: &str, embedding: PassageEmbedding, mv: MultiVector) {
        let sparse: Vec<(u32, f32)> = embedding
            .lexical
            .iter()
            .map(|(token, w)| (self.vocabulary.intern(token), *w))
            .collect();

        match self.positions.get(id) {
            Some(&row) => {
                debug!(id, row, "overwriting passage saved earlier in this session");
                self.dense[row] = embedding.dense;
                self.sparse[row] = sparse;
            }
            None => {
                self.positions.insert(id.to_string(), self.ids.len());
                self.ids.push(id.to_string());
                self.dense.push(embedding.dense);
                self.sparse.push(sparse);
            }
        }
        self.multivectors.insert(id.to_string(), mv);
    }

    /// Lexical matrix in COO form, rows in insertion order.
    pub fn lexical_matrix(&self) -> CooMatrix {
        let mut coo = CooMatrix::new((self.ids.len(), self.vocabulary.len()));
        for (row, pairs) in self.sparse.iter().enumerate() {
            for &(col, w) in pairs {
                coo.push(row as u32, col, w);
            }
        }
        coo
    }

    /// Write the side file and tensor blob into `dir`.
    ///
    /// The blob is renamed into place first, then the side file.
    pub fn persist(&self, dir: &Path) -> Result<IndexStats, IndexError> {
        let start = Instant::now();
        std::fs::create_dir_all(dir)?;

        let coo = self.lexical_matrix();
        let mut bm25_index: Vec<i64> = Vec::with_capacity(coo.nnz() * 2);
        bm25_index.extend(coo.rows.iter().map(|&r| i64::from(r)));
        bm25_index.extend(coo.cols.iter().map(|&c| i64::from(c)));

        let n = self.ids.len();
        let dense = DenseMatrix::from_rows(&self.dense, self.dimension).ok_or_else(|| {
            IndexError::Inconsistent("dense rows disagree with builder dimension".into())
        })?;

        let mut entries = Vec::with_capacity(n + 3);
        entries.push(TensorEntry::f32(
            DENSE_KEY,
            vec![n, self.dimension],
            dense.as_slice(),
        ));
        entries.push(TensorEntry::i64(
            BM25_INDEX_KEY,
            vec![2, coo.nnz()],
            &bm25_index,
        ));
        entries.push(TensorEntry::f32(BM25_VALUE_KEY, vec![coo.nnz()], &coo.values));
        for id in &self.ids {
            let mv = self.multivectors.get(id).ok_or_else(|| {
                IndexError::Inconsistent(format!("passage {id:?} has no multi-vector"))
            })?;
            entries.push(TensorEntry::f16(
                id.clone(),
                vec![mv.len(), self.dimension],
                mv.as_f16(),
            ));
        }

        let mut metadata = HashMap::new();
        metadata.insert("format_version".to_string(), FORMAT_VERSION.to_string());
        metadata.insert("dimension".to_string(), self.dimension.to_string());
        metadata.insert("passages".to_string(), n.to_string());

        let blob_path = tensor_blob_path(dir);
        let blob_bytes = write_blob(&blob_path, &entries, metadata)?;

        let mut side_tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(side_tmp.as_file_mut());
            serde_json::to_writer(
                &mut writer,
                &SideFileRef {
                    ids: &self.ids,
                    tokens: self.vocabulary.as_map(),
                },
            )?;
            writer.flush()?;
        }
        side_tmp
            .persist(side_file_path(dir))
            .map_err(|e| IndexError::Io(e.error))?;

        let stats = IndexStats {
            passages: n,
            dimension: self.dimension,
            vocabulary: self.vocabulary.len(),
            nonzeros: coo.nnz(),
            blob_bytes,
        };
        info!(
            dir = %dir.display(),
            passages = stats.passages,
            vocabulary = stats.vocabulary,
            nonzeros = stats.nonzeros,
            blob_bytes = stats.blob_bytes,
            elapsed_ms = start.elapsed().as_millis(),
            "persisted vector index"
        );
        Ok(stats)
    }
}

// -------------------------------------------------------------------------
// Query mode
// -------------------------------------------------------------------------

/// Query-time knobs for [`VectorIndex::retrieve`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieveParams {
    /// Phase-1 survivors reranked with MaxSim.
    pub candidate_pool: usize,
    pub weights: FusionWeights,
}

impl Default for RetrieveParams {
    fn default() -> Self {
        Self {
            candidate_pool: 1000,
            weights: FusionWeights::default(),
        }
    }
}

impl From<&SearchConfig> for RetrieveParams {
    fn from(cfg: &SearchConfig) -> Self {
        Self {
            candidate_pool: cfg.candidate_pool,
            weights: cfg.fusion.clone(),
        }
    }
}

/// A phase-1 survivor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Row in the dense matrix (and index into `ids`).
    pub row: usize,
    pub dense_score: f32,
    pub bm25_score: f32,
    pub coarse_score: f32,
}

/// Highest score first; equal scores fall back to ascending row so the
/// order is total and reproducible.
fn by_score_desc(a_score: f32, a_row: usize, b_score: f32, b_row: usize) -> Ordering {
    b_score.total_cmp(&a_score).then(a_row.cmp(&b_row))
}

/// Query-mode index loaded from disk.
///
/// Dense and lexical matrices are resident; multi-vectors stay in the
/// memory-mapped blob and are decoded per query through an LRU cache.
pub struct VectorIndex {
    dir: PathBuf,
    ids: Vec<String>,
    positions: HashMap<String, usize>,
    vocabulary: Vocabulary,
    dense: DenseMatrix,
    lexical: CooMatrix,
    blob: TensorBlob,
    cache: MultiVectorCache,
}

impl VectorIndex {
    /// Load the index persisted in `dir`.
    pub fn load(dir: &Path, cache_capacity: usize) -> Result<Self, IndexError> {
        let start = Instant::now();

        let side: SideFile = {
            let file = std::fs::File::open(side_file_path(dir))?;
            serde_json::from_reader(BufReader::new(file))?
        };
        let blob = TensorBlob::open(&tensor_blob_path(dir))?;

        let mut positions = HashMap::with_capacity(side.ids.len());
        for (i, id) in side.ids.iter().enumerate() {
            if id.is_empty() || RESERVED_KEYS.contains(&id.as_str()) {
                return Err(IndexError::ReservedId(id.clone()));
            }
            if positions.insert(id.clone(), i).is_some() {
                return Err(IndexError::Inconsistent(format!(
                    "duplicate id {id:?} in side file"
                )));
            }
        }

        let (shape, dense_data) = blob.read_f32(DENSE_KEY)?;
        let [rows, dim] = shape[..] else {
            return Err(IndexError::TensorShape {
                name: DENSE_KEY.into(),
                expected: "[N, D]".into(),
                actual: shape.clone(),
            });
        };
        if rows != side.ids.len() {
            return Err(IndexError::Inconsistent(format!(
                "side file lists {} ids but dense matrix has {rows} rows",
                side.ids.len()
            )));
        }
        let dense = DenseMatrix::from_flat(dense_data, rows, dim)
            .ok_or_else(|| IndexError::Inconsistent("dense byte count disagrees with shape".into()))?;

        let vocabulary = Vocabulary::from_map(side.tokens);
        if let Some(max) = vocabulary.max_index()
            && max as usize >= vocabulary.len()
        {
            return Err(IndexError::Inconsistent(format!(
                "token column {max} outside a vocabulary of {} tokens",
                vocabulary.len()
            )));
        }
        let lexical = Self::load_lexical(&blob, rows, &vocabulary)?;

        if let Some(missing) = side.ids.iter().find(|id| !blob.contains(id)) {
            return Err(IndexError::MissingTensor(missing.clone()));
        }

        info!(
            dir = %dir.display(),
            passages = rows,
            dimension = dim,
            vocabulary = vocabulary.len(),
            nonzeros = lexical.nnz(),
            elapsed_ms = start.elapsed().as_millis(),
            "loaded vector index"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            ids: side.ids,
            positions,
            vocabulary,
            dense,
            lexical,
            blob,
            cache: MultiVectorCache::new(cache_capacity),
        })
    }

    fn load_lexical(
        blob: &TensorBlob,
        rows: usize,
        vocabulary: &Vocabulary,
    ) -> Result<CooMatrix, IndexError> {
        let (idx_shape, idx) = blob.read_i64(BM25_INDEX_KEY)?;
        let (val_shape, values) = blob.read_f32(BM25_VALUE_KEY)?;
        let nnz = values.len();
        if idx_shape != [2, nnz] || val_shape != [nnz] || idx.len() != 2 * nnz {
            return Err(IndexError::TensorShape {
                name: BM25_INDEX_KEY.into(),
                expected: format!("[2, {nnz}] alongside {BM25_VALUE_KEY} [{nnz}]"),
                actual: idx_shape,
            });
        }

        let width = vocabulary.max_index().map_or(0, |m| m as usize + 1);
        let mut coo = CooMatrix::new((rows, width));
        for ((&r, &c), &v) in idx[..nnz].iter().zip(&idx[nnz..]).zip(&values) {
            let in_bounds = (0..rows as i64).contains(&r) && (0..width as i64).contains(&c);
            if !in_bounds {
                return Err(IndexError::Inconsistent(format!(
                    "lexical entry ({r}, {c}) outside {rows} x {width}"
                )));
            }
            coo.push(r as u32, c as u32, v);
        }
        Ok(coo)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dense.dim()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn cache_stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            passages: self.ids.len(),
            dimension: self.dense.dim(),
            vocabulary: self.vocabulary.len(),
            nonzeros: self.lexical.nnz(),
            blob_bytes: std::fs::metadata(self.blob.path()).map_or(0, |m| m.len()),
        }
    }

    pub fn dense_row(&self, id: &str) -> Option<&[f32]> {
        self.positions.get(id).and_then(|&i| self.dense.row(i))
    }

    /// Multi-vector of `id`, decoded from the blob on a cache miss.
    pub fn multivector(&self, id: &str) -> Result<Arc<MultiVector>, IndexError> {
        self.cache.get_or_try_insert(id, || {
            let (shape, data) = self.blob.read_f16(id)?;
            let dim = self.dense.dim();
            match shape[..] {
                [_, d] if d == dim => MultiVector::from_f16(data, dim).ok_or_else(|| {
                    IndexError::Inconsistent(format!("multi-vector {id:?} byte count"))
                }),
                _ => Err(IndexError::TensorShape {
                    name: id.to_string(),
                    expected: format!("[T, {dim}]"),
                    actual: shape.clone(),
                }),
            }
        })
    }

    fn check_query(&self, query: &PassageEmbedding) -> Result<(), IndexError> {
        let dim = self.dense.dim();
        let widths = std::iter::once(query.dense.len())
            .chain(query.multivector.iter().map(Vec::len));
        for width in widths {
            if width != dim {
                return Err(IndexError::DimensionMismatch {
                    id: "query".into(),
                    expected: dim,
                    actual: width,
                });
            }
        }
        Ok(())
    }

    /// Phase 1: exact dense + lexical scoring over the whole corpus, keeping
    /// the best `pool` rows.
    pub fn coarse_candidates(
        &self,
        query: &PassageEmbedding,
        pool: usize,
        weights: &FusionWeights,
    ) -> Result<Vec<Candidate>, IndexError> {
        self.check_query(query)?;
        if self.is_empty() || pool == 0 {
            return Ok(Vec::new());
        }

        let dense_scores = self.dense.matvec(&query.dense);
        let (q_lex, dropped) = self.vocabulary.query_weights(&query.lexical);
        if dropped > 0 {
            debug!(
                dropped,
                query_tokens = query.lexical.len(),
                "query tokens missing from vocabulary"
            );
        }
        let lexical_scores = self.lexical.matvec(&q_lex);

        let mut candidates: Vec<Candidate> = dense_scores
            .into_iter()
            .zip(lexical_scores)
            .enumerate()
            .map(|(row, (dense_score, bm25_score))| Candidate {
                row,
                dense_score,
                bm25_score,
                coarse_score: weights.coarse(dense_score, bm25_score),
            })
            .collect();

        let cmp = |a: &Candidate, b: &Candidate| {
            by_score_desc(a.coarse_score, a.row, b.coarse_score, b.row)
        };
        if pool < candidates.len() {
            candidates.select_nth_unstable_by(pool - 1, cmp);
            candidates.truncate(pool);
        }
        candidates.sort_unstable_by(cmp);
        Ok(candidates)
    }

    /// Two-phase retrieval. Returns every phase-1 survivor, best first.
    pub fn retrieve(
        &self,
        query: &PassageEmbedding,
        params: &RetrieveParams,
    ) -> Result<Vec<HybridScore>, IndexError> {
        let start = Instant::now();
        let candidates = self.coarse_candidates(query, params.candidate_pool, &params.weights)?;
        let coarse_ms = start.elapsed().as_millis();

        let mut scored = candidates
            .par_iter()
            .map(|c| -> Result<(usize, HybridScore), IndexError> {
                let id = &self.ids[c.row];
                let mv = self.multivector(id)?;
                let colbert = maxsim(&query.multivector, &mv);
                Ok((
                    c.row,
                    HybridScore::new(id.clone(), c.dense_score, c.bm25_score, colbert, &params.weights),
                ))
            })
            .collect::<Result<Vec<(usize, HybridScore)>, IndexError>>()?;

        scored.sort_unstable_by(|(ra, a), (rb, b)| {
            by_score_desc(a.hybrid_score, *ra, b.hybrid_score, *rb)
        });

        debug!(
            corpus = self.len(),
            candidates = scored.len(),
            coarse_ms,
            total_ms = start.elapsed().as_millis(),
            weights = %params.weights.version,
            "retrieve completed"
        );
        Ok(scored.into_iter().map(|(_, hs)| hs).collect())
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dir", &self.dir)
            .field("passages", &self.ids.len())
            .field("dimension", &self.dense.dim())
            .field("vocabulary", &self.vocabulary.len())
            .field("cache", &self.cache)
            .finish()
    }
}
