//! Score fusion for the two-phase cascade.
//!
//! Weights are a named, versioned value rather than constants sprinkled
//! through the scorer: an index queried with `cascade-v1` must not silently
//! behave like one queried with `maxsim-balanced`.

use serde::{Deserialize, Serialize};

/// Default preset name.
pub const CASCADE_V1: &str = "cascade-v1";

/// Alternate preset that gives the dense score equal footing with MaxSim.
pub const MAXSIM_BALANCED: &str = "maxsim-balanced";

/// Weights for phase-1 filtering and phase-2 ranking.
///
/// Phase 1: `dense + coarse_lexical * lexical`.
/// Phase 2: `colbert * maxsim + dense * dense_score + bm25 * lexical`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    /// Preset name or a caller-chosen label for custom weights.
    pub version: String,
    pub coarse_lexical: f32,
    pub colbert: f32,
    pub dense: f32,
    pub bm25: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self::cascade_v1()
    }
}

impl FusionWeights {
    pub fn cascade_v1() -> Self {
        Self {
            version: CASCADE_V1.to_string(),
            coarse_lexical: 0.5,
            colbert: 0.6,
            dense: 0.4,
            bm25: 0.2,
        }
    }

    pub fn maxsim_balanced() -> Self {
        Self {
            version: MAXSIM_BALANCED.to_string(),
            coarse_lexical: 0.5,
            colbert: 0.4,
            dense: 0.4,
            bm25: 0.2,
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            CASCADE_V1 => Some(Self::cascade_v1()),
            MAXSIM_BALANCED => Some(Self::maxsim_balanced()),
            _ => None,
        }
    }

    /// Phase-1 score used to pick the candidate pool.
    #[inline]
    pub fn coarse(&self, dense: f32, lexical: f32) -> f32 {
        dense + self.coarse_lexical * lexical
    }

    /// Phase-2 ranking key.
    #[inline]
    pub fn hybrid(&self, dense: f32, bm25: f32, colbert: f32) -> f32 {
        self.colbert * colbert + self.dense * dense + self.bm25 * bm25
    }

    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("coarse_lexical", self.coarse_lexical),
            ("colbert", self.colbert),
            ("dense", self.dense),
            ("bm25", self.bm25),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(format!(
                    "fusion weight `{name}` must be finite and >= 0 (got {value})"
                ));
            }
        }
        if self.version.trim().is_empty() {
            return Err("fusion version label cannot be empty".into());
        }
        Ok(())
    }
}

/// One ranked passage with its component scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridScore {
    pub id: String,
    pub dense_score: f32,
    pub bm25_score: f32,
    pub colbert_score: f32,
    /// Fused ranking key; see [`FusionWeights::hybrid`].
    pub hybrid_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl HybridScore {
    pub fn new(
        id: impl Into<String>,
        dense_score: f32,
        bm25_score: f32,
        colbert_score: f32,
        weights: &FusionWeights,
    ) -> Self {
        Self {
            id: id.into(),
            dense_score,
            bm25_score,
            colbert_score,
            hybrid_score: weights.hybrid(dense_score, bm25_score, colbert_score),
            content_id: None,
            text: None,
        }
    }
}
