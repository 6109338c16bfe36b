//! Per-token (ColBERT-style) multi-vectors, MaxSim scoring, and the LRU
//! cache that keeps recently scored matrices resident between queries.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use half::f16;
use lru::LruCache;
use parking_lot::Mutex;

use super::matrix::dot;

/// A `T x D` matrix stored at half precision, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiVector {
    data: Vec<f16>,
    dim: usize,
}

impl MultiVector {
    /// Quantize f32 rows. Returns `None` if any row is not `dim` wide.
    pub fn from_rows(rows: &[Vec<f32>], dim: usize) -> Option<Self> {
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            if row.len() != dim {
                return None;
            }
            data.extend(row.iter().map(|&x| f16::from_f32(x)));
        }
        Some(Self { data, dim })
    }

    /// Wrap an already-quantized flat buffer.
    pub fn from_f16(data: Vec<f16>, dim: usize) -> Option<Self> {
        if dim == 0 {
            return data.is_empty().then_some(Self { data, dim });
        }
        (data.len() % dim == 0).then_some(Self { data, dim })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of token rows.
    pub fn len(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f16(&self) -> &[f16] {
        &self.data
    }

    /// Rows widened back to f32.
    pub fn rows_f32(&self) -> Vec<Vec<f32>> {
        if self.dim == 0 {
            return Vec::new();
        }
        self.data
            .chunks_exact(self.dim)
            .map(|row| row.iter().map(|x| x.to_f32()).collect())
            .collect()
    }
}

/// MaxSim late interaction, averaged over query tokens.
///
/// For each query token the best dot product against any document token is
/// taken; the result is the mean of those maxima. An empty query or an empty
/// document scores 0.
pub fn maxsim(query: &[Vec<f32>], doc: &MultiVector) -> f32 {
    if query.is_empty() || doc.is_empty() {
        return 0.0;
    }
    let doc_rows = doc.rows_f32();
    let total: f32 = query
        .iter()
        .map(|q| {
            doc_rows
                .iter()
                .map(|d| dot(q, d))
                .fold(f32::NEG_INFINITY, f32::max)
        })
        .sum();
    total / query.len() as f32
}

/// Cache statistics for monitoring performance.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Get current stats as a tuple: (hits, misses, evictions).
    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed),
        )
    }

    /// Calculate hit rate as a fraction (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// LRU cache of decoded multi-vectors keyed by passage id.
///
/// Least recently used entries are evicted once `capacity` matrices are
/// resident.
pub struct MultiVectorCache {
    entries: Mutex<LruCache<String, Arc<MultiVector>>>,
    stats: CacheStats,
}

impl MultiVectorCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            stats: CacheStats::default(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<MultiVector>> {
        let mut entries = self.entries.lock();
        if let Some(cached) = entries.get(id) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            Some(Arc::clone(cached))
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn insert(&self, id: &str, mv: MultiVector) -> Arc<MultiVector> {
        let arc = Arc::new(mv);
        let mut entries = self.entries.lock();
        // Only count eviction if the cache is full AND the key is new.
        if entries.len() == entries.cap().get() && !entries.contains(id) {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        entries.put(id.to_string(), Arc::clone(&arc));
        arc
    }

    /// Return the cached entry or decode it with `load` and remember it.
    pub fn get_or_try_insert<E>(
        &self,
        id: &str,
        load: impl FnOnce() -> Result<MultiVector, E>,
    ) -> Result<Arc<MultiVector>, E> {
        if let Some(hit) = self.get(id) {
            return Ok(hit);
        }
        let mv = load()?;
        Ok(self.insert(id, mv))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl std::fmt::Debug for MultiVectorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiVectorCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("stats", &self.stats.get())
            .finish()
    }
}
