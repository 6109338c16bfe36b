//! passage-search: hybrid passage retrieval over dense, lexical and
//! multi-vector (ColBERT-style) representations.
//!
//! Ingestion goes through [`search::vector_index::IndexBuilder`] (build mode),
//! which persists a JSON side file plus a safetensors blob. Queries run
//! against [`search::vector_index::VectorIndex`] (query mode), which scores the
//! whole corpus cheaply and then reranks a bounded candidate pool with MaxSim
//! late interaction.
//!
//! Most callers only need [`search::semantic_search::SemanticSearchService`].

pub mod config;
pub mod logging;
pub mod model;
pub mod search;

pub use config::{ConfigError, SearchConfig};
pub use model::types::Passage;
pub use search::fusion::{FusionWeights, HybridScore};
pub use search::semantic_search::{SearchError, SemanticSearchService};
