//! Embedder trait and types for hybrid retrieval.
//!
//! An [`Embedder`] turns passages into three co-indexed representations:
//!
//! - a dense vector of fixed dimension D,
//! - sparse lexical weights keyed by token,
//! - a multi-vector matrix with one D-dimensional row per sub-token.
//!
//! The embedding model itself lives outside this crate. [`BatchingEmbedder`]
//! wraps any implementation and splits oversized inputs into sub-batches
//! under a character budget, since the underlying models have practical
//! input-size limits.
//!
//! # Implementations
//!
//! - **Hash embedder**: FNV-1a feature hashing, deterministic and model-free
//!   (see [`crate::search::hash_embedder`]).

use std::fmt;
use std::ops::Range;

use thiserror::Error;
use tracing::debug;

/// Error type for embedder operations.
#[derive(Debug, Error)]
pub enum EmbedderError {
    /// The embedder is not available (e.g., model not loaded).
    #[error("embedder {model} unavailable: {reason}")]
    Unavailable { model: String, reason: String },

    /// The underlying encode call failed.
    #[error("embedding failed for {model}: {source}")]
    EncodingFailed {
        model: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Input is empty or invalid.
    #[error("invalid embedder input: {0}")]
    InvalidInput(String),

    /// A produced vector has the wrong width.
    #[error("embedder {model} produced dimension {actual}, expected {expected}")]
    DimensionMismatch {
        model: String,
        expected: usize,
        actual: usize,
    },

    /// The embedder returned a different number of results than inputs.
    #[error("embedder {model} returned {actual} results for {expected} inputs")]
    CountMismatch {
        model: String,
        expected: usize,
        actual: usize,
    },
}

/// Result type for embedder operations.
pub type EmbedderResult<T> = Result<T, EmbedderError>;

/// Sparse lexical weights of one passage: `(token, weight)` pairs with
/// non-negative weights, at most one pair per token.
pub type LexicalWeights = Vec<(String, f32)>;

/// The three representations of a single passage or query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PassageEmbedding {
    pub dense: Vec<f32>,
    pub lexical: LexicalWeights,
    /// One row per sub-token.
    pub multivector: Vec<Vec<f32>>,
}

/// Encoder output for a batch, as three parallel arrays.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EncodedBatch {
    pub dense: Vec<Vec<f32>>,
    pub lexical: Vec<LexicalWeights>,
    pub multivector: Vec<Vec<Vec<f32>>>,
}

impl EncodedBatch {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            dense: Vec::with_capacity(n),
            lexical: Vec::with_capacity(n),
            multivector: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, embedding: PassageEmbedding) {
        self.dense.push(embedding.dense);
        self.lexical.push(embedding.lexical);
        self.multivector.push(embedding.multivector);
    }

    /// Append another batch, preserving order.
    pub fn extend(&mut self, other: EncodedBatch) {
        self.dense.extend(other.dense);
        self.lexical.extend(other.lexical);
        self.multivector.extend(other.multivector);
    }

    /// Number of passages; `None` when the three arrays disagree.
    pub fn consistent_len(&self) -> Option<usize> {
        let n = self.dense.len();
        (self.lexical.len() == n && self.multivector.len() == n).then_some(n)
    }

    pub fn len(&self) -> usize {
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    /// Re-zip the parallel arrays into per-passage records.
    pub fn into_embeddings(self) -> Vec<PassageEmbedding> {
        self.dense
            .into_iter()
            .zip(self.lexical)
            .zip(self.multivector)
            .map(|((dense, lexical), multivector)| PassageEmbedding {
                dense,
                lexical,
                multivector,
            })
            .collect()
    }
}

impl FromIterator<PassageEmbedding> for EncodedBatch {
    fn from_iter<I: IntoIterator<Item = PassageEmbedding>>(iter: I) -> Self {
        let mut batch = EncodedBatch::default();
        for embedding in iter {
            batch.push(embedding);
        }
        batch
    }
}

/// Trait for hybrid embedding implementations.
///
/// # Thread Safety
///
/// Implementations should be `Send + Sync` so a loaded service can be shared
/// across query threads.
pub trait Embedder: Send + Sync {
    /// Encode a batch of texts. Output index *i* corresponds to input *i*.
    fn encode(&self, texts: &[&str]) -> EmbedderResult<EncodedBatch>;

    /// Width of dense vectors and multi-vector rows.
    fn dimension(&self) -> usize;

    /// Unique identifier, e.g. `"fnv1a-1024"`.
    fn id(&self) -> &str;

    /// Whether it's a semantic (ML) embedder.
    fn is_semantic(&self) -> bool;

    /// Encode a single text (typically a query).
    fn encode_one(&self, text: &str) -> EmbedderResult<PassageEmbedding> {
        let batch = self.encode(&[text])?;
        let got = batch.len();
        batch
            .into_embeddings()
            .into_iter()
            .next()
            .ok_or_else(|| EmbedderError::CountMismatch {
                model: self.id().to_string(),
                expected: 1,
                actual: got,
            })
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn encode(&self, texts: &[&str]) -> EmbedderResult<EncodedBatch> {
        (**self).encode(texts)
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn id(&self) -> &str {
        (**self).id()
    }

    fn is_semantic(&self) -> bool {
        (**self).is_semantic()
    }
}

/// Metadata about an embedder for display and logging.
#[derive(Debug, Clone)]
pub struct EmbedderInfo {
    /// The embedder's unique identifier.
    pub id: String,
    /// The output dimension.
    pub dimension: usize,
    /// Whether it's a semantic (ML) embedder.
    pub is_semantic: bool,
}

impl EmbedderInfo {
    /// Create info from an embedder instance.
    pub fn from_embedder(embedder: &dyn Embedder) -> Self {
        Self {
            id: embedder.id().to_string(),
            dimension: embedder.dimension(),
            is_semantic: embedder.is_semantic(),
        }
    }
}

impl fmt::Display for EmbedderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_semantic {
            "semantic"
        } else {
            "lexical"
        };
        write!(f, "{} ({}, {} dims)", self.id, kind, self.dimension)
    }
}

/// Split `texts` into contiguous ranges whose cumulative character count
/// stays within `budget`. A text longer than the budget gets its own range.
pub fn partition_by_char_budget(texts: &[&str], budget: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut used = 0usize;
    for (i, text) in texts.iter().enumerate() {
        let len = text.chars().count();
        if i > start && used + len > budget {
            ranges.push(start..i);
            start = i;
            used = 0;
        }
        used += len;
    }
    if start < texts.len() {
        ranges.push(start..texts.len());
    }
    ranges
}

/// Adapter that enforces the character budget and checks the inner
/// embedder's output shape.
pub struct BatchingEmbedder<E> {
    inner: E,
    char_budget: usize,
}

impl<E: Embedder> BatchingEmbedder<E> {
    pub fn new(inner: E, char_budget: usize) -> Self {
        Self {
            inner,
            char_budget: char_budget.max(1),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn char_budget(&self) -> usize {
        self.char_budget
    }

    fn check_sub_batch(&self, expected: usize, batch: &EncodedBatch) -> EmbedderResult<()> {
        let model = self.inner.id();
        let actual = batch.consistent_len().ok_or_else(|| EmbedderError::CountMismatch {
            model: model.to_string(),
            expected,
            actual: batch.len(),
        })?;
        if actual != expected {
            return Err(EmbedderError::CountMismatch {
                model: model.to_string(),
                expected,
                actual,
            });
        }

        let dim = self.inner.dimension();
        let rows = batch
            .dense
            .iter()
            .chain(batch.multivector.iter().flatten());
        for row in rows {
            if row.len() != dim {
                return Err(EmbedderError::DimensionMismatch {
                    model: model.to_string(),
                    expected: dim,
                    actual: row.len(),
                });
            }
        }
        for weights in &batch.lexical {
            if let Some((token, w)) = weights.iter().find(|(_, w)| !w.is_finite() || *w < 0.0) {
                return Err(EmbedderError::EncodingFailed {
                    model: model.to_string(),
                    source: Box::new(std::io::Error::other(format!(
                        "lexical weight for {token:?} is {w}"
                    ))),
                });
            }
        }
        Ok(())
    }
}

impl<E: Embedder> Embedder for BatchingEmbedder<E> {
    fn encode(&self, texts: &[&str]) -> EmbedderResult<EncodedBatch> {
        let ranges = partition_by_char_budget(texts, self.char_budget);
        let mut out = EncodedBatch::with_capacity(texts.len());
        for range in ranges {
            let sub = &texts[range.clone()];
            debug!(
                embedder = self.inner.id(),
                start = range.start,
                len = sub.len(),
                "encoding sub-batch"
            );
            let batch = self.inner.encode(sub)?;
            self.check_sub_batch(sub.len(), &batch)?;
            out.extend(batch);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn id(&self) -> &str {
        self.inner.id()
    }

    fn is_semantic(&self) -> bool {
        self.inner.is_semantic()
    }
}
