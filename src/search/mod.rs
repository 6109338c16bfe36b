//! Search layer facade.
//!
//! This module provides the hybrid retrieval stack, including:
//!
//! - **[`embedder`]**: Embedder trait, batch types, and the character-budget batching adapter.
//! - **[`hash_embedder`]**: FNV-1a feature hashing embedder (deterministic, model-free).
//! - **[`canonicalize`]**: Text preprocessing for consistent embedding input.
//! - **[`vocabulary`]**: Token to sparse-column interning.
//! - **[`matrix`]**: Dense and COO matrices for phase-1 scoring.
//! - **[`multivector`]**: Half-precision multi-vectors, MaxSim, and the LRU cache.
//! - **[`tensor_blob`]**: Safetensors writer and memory-mapped reader.
//! - **[`vector_index`]**: Build-mode `IndexBuilder` and query-mode `VectorIndex`.
//! - **[`fusion`]**: Versioned fusion weights and the `HybridScore` record.
//! - **[`content_store`]**: JSON Lines passage text store for result hydration.
//! - **[`semantic_search`]**: The service tying the pieces together.

pub mod canonicalize;
pub mod content_store;
pub mod embedder;
pub mod fusion;
pub mod hash_embedder;
pub mod matrix;
pub mod multivector;
pub mod semantic_search;
pub mod tensor_blob;
pub mod vector_index;
pub mod vocabulary;
