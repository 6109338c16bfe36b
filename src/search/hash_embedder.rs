//! FNV-1a feature-hashing embedder.
//!
//! Deterministic and model-free: every token maps to a pseudo-random unit
//! vector seeded by its FNV-1a hash. The dense vector is the normalized sum
//! of token vectors, the multi-vector is the per-token matrix, and the
//! lexical weights are sublinear term frequencies. Distinct tokens are close
//! to orthogonal in high dimensions, which is enough for tests, offline
//! fallbacks and benchmarks.

use std::collections::HashMap;

use super::canonicalize::tokenize;
use super::embedder::{Embedder, EmbedderError, EmbedderResult, EncodedBatch, PassageEmbedding};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// splitmix64 step; good enough to spread one seed over many dimensions.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn normalize_in_place(v: &mut [f32]) {
    let norm_sq: f32 = v.iter().map(|x| x * x).sum();
    if norm_sq.is_finite() && norm_sq > f32::EPSILON {
        let inv = 1.0 / norm_sq.sqrt();
        for x in v.iter_mut() {
            *x *= inv;
        }
    } else {
        v.fill(0.0);
    }
}

/// Hash-based embedder producing all three representations.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    id: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            id: format!("fnv1a-{dimension}"),
        }
    }

    /// Unit vector for a single token.
    pub fn token_vector(&self, token: &str) -> Vec<f32> {
        let mut state = fnv1a(token.as_bytes());
        let mut v: Vec<f32> = (0..self.dimension)
            .map(|_| {
                let bits = splitmix64(&mut state);
                // Map the top 24 bits onto [-1, 1).
                ((bits >> 40) as f32 / (1u64 << 23) as f32) - 1.0
            })
            .collect();
        normalize_in_place(&mut v);
        v
    }

    fn embed_text(&self, text: &str) -> PassageEmbedding {
        let tokens = tokenize(text);

        let mut tf: HashMap<&str, u32> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for t in &tokens {
            let count = tf.entry(t.as_str()).or_insert(0);
            if *count == 0 {
                order.push(t.as_str());
            }
            *count += 1;
        }

        let multivector: Vec<Vec<f32>> = tokens.iter().map(|t| self.token_vector(t)).collect();

        let mut dense = vec![0.0f32; self.dimension];
        for row in &multivector {
            for (d, x) in dense.iter_mut().zip(row) {
                *d += x;
            }
        }
        normalize_in_place(&mut dense);

        let lexical = order
            .into_iter()
            .map(|t| (t.to_string(), 1.0 + (tf[t] as f32).ln()))
            .collect();

        PassageEmbedding {
            dense,
            lexical,
            multivector,
        }
    }
}

impl Embedder for HashEmbedder {
    fn encode(&self, texts: &[&str]) -> EmbedderResult<EncodedBatch> {
        if self.dimension == 0 {
            return Err(EmbedderError::Unavailable {
                model: self.id.clone(),
                reason: "dimension must be > 0".into(),
            });
        }
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn is_semantic(&self) -> bool {
        false
    }
}
