//! Engine configuration.
//!
//! Settings come from three layers, later layers winning:
//! built-in defaults, an optional TOML file, then `PASSAGE_SEARCH_*`
//! environment variables (a `.env` file is honoured through `dotenvy`).
//!
//! # Example Configuration
//!
//! ```toml
//! dimension = 1024
//! candidate_pool = 1000
//! cache_capacity = 256
//! batch_char_budget = 8000
//! default_top_k = 10
//!
//! [fusion]
//! version = "cascade-v1"
//! coarse_lexical = 0.5
//! colbert = 0.6
//! dense = 0.4
//! bm25 = 0.2
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::search::fusion::FusionWeights;

/// Errors that can occur when loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Tunables for indexing and the two-phase query path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Embedding dimension shared by dense and multi-vector rows (default: 1024).
    pub dimension: usize,
    /// Phase-1 survivors handed to MaxSim reranking (default: 1000).
    pub candidate_pool: usize,
    /// Multi-vector matrices kept resident between queries (default: 256).
    pub cache_capacity: usize,
    /// Character budget per embedder sub-batch (default: 8000).
    pub batch_char_budget: usize,
    /// Results returned when the caller does not pass `top_k` (default: 10).
    pub default_top_k: usize,
    /// Score fusion weights.
    pub fusion: FusionWeights,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            dimension: 1024,
            candidate_pool: 1000,
            cache_capacity: 256,
            batch_char_budget: 8000,
            default_top_k: 10,
            fusion: FusionWeights::default(),
        }
    }
}

impl SearchConfig {
    /// Load config from environment variables on top of the defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    /// Load a TOML file, then apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut cfg: Self = toml::from_str(&raw)?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Override fields from `PASSAGE_SEARCH_*` variables. Unparseable values
    /// are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(val) = dotenvy::var("PASSAGE_SEARCH_DIMENSION")
            && let Ok(dim) = val.parse()
        {
            self.dimension = dim;
        }

        if let Ok(val) = dotenvy::var("PASSAGE_SEARCH_CANDIDATE_POOL")
            && let Ok(pool) = val.parse()
        {
            self.candidate_pool = pool;
        }

        if let Ok(val) = dotenvy::var("PASSAGE_SEARCH_CACHE_CAPACITY")
            && let Ok(cap) = val.parse()
        {
            self.cache_capacity = cap;
        }

        if let Ok(val) = dotenvy::var("PASSAGE_SEARCH_BATCH_CHARS")
            && let Ok(budget) = val.parse()
        {
            self.batch_char_budget = budget;
        }

        if let Ok(val) = dotenvy::var("PASSAGE_SEARCH_TOP_K")
            && let Ok(k) = val.parse()
        {
            self.default_top_k = k;
        }

        if let Ok(val) = dotenvy::var("PASSAGE_SEARCH_FUSION") {
            match FusionWeights::preset(val.trim()) {
                Some(weights) => self.fusion = weights,
                None => tracing::warn!(preset = %val, "unknown fusion preset; keeping current weights"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimension == 0 {
            return Err(ConfigError::Validation("dimension must be > 0".into()));
        }
        if self.candidate_pool == 0 {
            return Err(ConfigError::Validation("candidate_pool must be > 0".into()));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Validation("cache_capacity must be > 0".into()));
        }
        if self.batch_char_budget == 0 {
            return Err(ConfigError::Validation(
                "batch_char_budget must be > 0".into(),
            ));
        }
        self.fusion.validate().map_err(ConfigError::Validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, val: &str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe { std::env::set_var(key, val) };
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(v) => unsafe { std::env::set_var(self.key, v) },
                None => unsafe { std::env::remove_var(self.key) },
            }
        }
    }

    #[test]
    fn test_config_defaults() {
        let cfg = SearchConfig::default();
        assert_eq!(cfg.dimension, 1024);
        assert_eq!(cfg.candidate_pool, 1000);
        assert_eq!(cfg.cache_capacity, 256);
        assert_eq!(cfg.batch_char_budget, 8000);
        assert_eq!(cfg.default_top_k, 10);
        assert_eq!(cfg.fusion, FusionWeights::cascade_v1());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        let _dim = EnvGuard::set("PASSAGE_SEARCH_DIMENSION", "64");
        let _pool = EnvGuard::set("PASSAGE_SEARCH_CANDIDATE_POOL", "50");
        let _fusion = EnvGuard::set("PASSAGE_SEARCH_FUSION", "maxsim-balanced");
        let _bad = EnvGuard::set("PASSAGE_SEARCH_CACHE_CAPACITY", "not-a-number");

        let cfg = SearchConfig::from_env();
        assert_eq!(cfg.dimension, 64);
        assert_eq!(cfg.candidate_pool, 50);
        assert_eq!(cfg.cache_capacity, 256);
        assert_eq!(cfg.fusion, FusionWeights::maxsim_balanced());
    }

    #[test]
    #[serial]
    fn test_load_toml_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("search.toml");
        std::fs::write(&path, "dimension = 128\ncandidate_pool = 20\n").unwrap();

        let cfg = SearchConfig::load(&path).unwrap();
        assert_eq!(cfg.dimension, 128);
        assert_eq!(cfg.candidate_pool, 20);
        assert_eq!(cfg.cache_capacity, 256);
    }

    #[test]
    #[serial]
    fn test_load_toml_with_fusion_table() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("search.toml");
        std::fs::write(
            &path,
            r#"
[fusion]
version = "custom-1"
coarse_lexical = 1.0
colbert = 0.5
dense = 0.5
bm25 = 0.0
"#,
        )
        .unwrap();

        let cfg = SearchConfig::load(&path).unwrap();
        assert_eq!(cfg.fusion.version, "custom-1");
        assert!((cfg.fusion.coarse_lexical - 1.0).abs() < f32::EPSILON);
        assert!(cfg.fusion.bm25.abs() < f32::EPSILON);
    }

    #[test]
    #[serial]
    fn test_load_rejects_zero_pool() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("search.toml");
        std::fs::write(&path, "candidate_pool = 0\n").unwrap();

        let err = SearchConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)), "got {err:?}");
    }

    #[test]
    fn test_load_reports_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("search.toml");
        std::fs::write(&path, "dimension = \"wide\"\n").unwrap();

        let err = SearchConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn test_load_missing_file() {
        let err = SearchConfig::load(Path::new("/nonexistent/search.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read(_)));
    }
}
