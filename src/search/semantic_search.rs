//! Passage search service: embedder + vector index + content store.
//!
//! ```text
//! feed(passages) ──► canonicalize ──► BatchingEmbedder ──► IndexBuilder::save
//!                                                     └──► ContentStore::append
//! persist()      ──► IndexBuilder::persist ──► VectorIndex::load (serving)
//! search(q, k)   ──► embed q ──► VectorIndex::retrieve ──► top k ──► load_text
//! ```
//!
//! The service starts in build mode. `persist` flushes the builder and
//! reloads the result from disk, after which only `search` is available.
//! `load` skips building entirely and serves an index written earlier.

use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::canonicalize::canonicalize_for_embedding;
use super::content_store::{ContentRecord, ContentStore};
use super::embedder::{BatchingEmbedder, Embedder, EmbedderError, EmbedderInfo};
use super::fusion::HybridScore;
use super::vector_index::{IndexBuilder, IndexError, IndexStats, RetrieveParams, VectorIndex};
use crate::config::{ConfigError, SearchConfig};
use crate::model::types::Passage;

/// Errors surfaced by [`SemanticSearchService`].
#[derive(Debug, Error)]
pub enum SearchError {
    /// Embedder failures pass through unmodified.
    #[error(transparent)]
    Embedding(#[from] EmbedderError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("content store error: {0:#}")]
    Content(anyhow::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("service is serving a loaded index; feed and persist need build mode")]
    NotBuilding,

    #[error("no index loaded; call persist() or load() first")]
    NotServing,

    #[error("query is empty after normalization")]
    EmptyQuery,
}

enum ServiceState {
    Building(IndexBuilder),
    Serving(VectorIndex),
}

/// Hybrid passage search over one index directory.
pub struct SemanticSearchService<E> {
    embedder: BatchingEmbedder<E>,
    config: SearchConfig,
    data_dir: PathBuf,
    content: ContentStore,
    state: ServiceState,
}

impl<E: Embedder> SemanticSearchService<E> {
    /// Create a service in build mode writing to `data_dir`.
    ///
    /// The embedder's dimension is authoritative; a differing
    /// `config.dimension` is logged and ignored.
    pub fn new(
        embedder: E,
        config: SearchConfig,
        data_dir: impl Into<PathBuf>,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        let data_dir = data_dir.into();
        if embedder.dimension() != config.dimension {
            warn!(
                embedder = embedder.id(),
                embedder_dimension = embedder.dimension(),
                config_dimension = config.dimension,
                "embedder dimension differs from configuration; using the embedder's"
            );
        }
        let content = ContentStore::open_in(&data_dir).map_err(SearchError::Content)?;
        let builder = IndexBuilder::new(embedder.dimension());
        Ok(Self {
            embedder: BatchingEmbedder::new(embedder, config.batch_char_budget),
            config,
            data_dir,
            content,
            state: ServiceState::Building(builder),
        })
    }

    /// Create a service and immediately load the index in `data_dir`.
    pub fn open(
        embedder: E,
        config: SearchConfig,
        data_dir: impl Into<PathBuf>,
    ) -> Result<Self, SearchError> {
        let mut service = Self::new(embedder, config, data_dir)?;
        service.load()?;
        Ok(service)
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn embedder_info(&self) -> EmbedderInfo {
        EmbedderInfo::from_embedder(&self.embedder)
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    pub fn is_serving(&self) -> bool {
        matches!(self.state, ServiceState::Serving(_))
    }

    /// The builder, while in build mode.
    pub fn builder(&self) -> Option<&IndexBuilder> {
        match &self.state {
            ServiceState::Building(b) => Some(b),
            ServiceState::Serving(_) => None,
        }
    }

    /// The loaded index, once serving.
    pub fn index(&self) -> Option<&VectorIndex> {
        match &self.state {
            ServiceState::Serving(idx) => Some(idx),
            ServiceState::Building(_) => None,
        }
    }

    /// Embed and accumulate a batch of passages. Returns how many were fed.
    ///
    /// An embedder failure rejects the whole batch.
    pub fn feed(&mut self, passages: &[Passage]) -> Result<usize, SearchError> {
        let ServiceState::Building(builder) = &mut self.state else {
            return Err(SearchError::NotBuilding);
        };
        if passages.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        let canonical: Vec<String> = passages
            .iter()
            .map(|p| canonicalize_for_embedding(&p.text))
            .collect();
        let texts: Vec<&str> = canonical.iter().map(String::as_str).collect();
        let batch = self.embedder.encode(&texts)?;

        let zero_rows = batch
            .dense
            .iter()
            .filter(|row| row.iter().all(|&x| x == 0.0))
            .count();
        if zero_rows > 0 {
            warn!(
                embedder = self.embedder.id(),
                zero_rows,
                batch = passages.len(),
                "embedder returned all-zero dense vectors"
            );
        }

        let ids: Vec<&str> = passages.iter().map(|p| p.id.as_str()).collect();
        builder.save(ids.as_slice(), batch)?;
        self.content
            .append(passages.iter().map(ContentRecord::from))
            .map_err(SearchError::Content)?;

        debug!(
            fed = passages.len(),
            total = builder.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "fed passages"
        );
        Ok(passages.len())
    }

    /// Write the accumulated index to `data_dir` and switch to serving it.
    pub fn persist(&mut self) -> Result<IndexStats, SearchError> {
        let ServiceState::Building(builder) = &self.state else {
            return Err(SearchError::NotBuilding);
        };
        let stats = builder.persist(&self.data_dir)?;
        self.load()?;
        Ok(stats)
    }

    /// Load the index in `data_dir`, replacing whatever state the service
    /// was in.
    pub fn load(&mut self) -> Result<IndexStats, SearchError> {
        let index = VectorIndex::load(&self.data_dir, self.config.cache_capacity)?;
        if index.dimension() != self.embedder.dimension() && !index.is_empty() {
            return Err(IndexError::DimensionMismatch {
                id: "index".into(),
                expected: self.embedder.dimension(),
                actual: index.dimension(),
            }
            .into());
        }
        self.content = ContentStore::open_in(&self.data_dir).map_err(SearchError::Content)?;
        let stats = index.stats();
        info!(
            dir = %self.data_dir.display(),
            passages = stats.passages,
            stored_texts = self.content.len(),
            embedder = %self.embedder_info(),
            fusion = %self.config.fusion.version,
            "search service ready"
        );
        self.state = ServiceState::Serving(index);
        Ok(stats)
    }

    /// Rank passages for `query`, best first, at most `top_k` of them.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<HybridScore>, SearchError> {
        let ServiceState::Serving(index) = &self.state else {
            return Err(SearchError::NotServing);
        };
        let canonical = canonicalize_for_embedding(query);
        if canonical.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let embedded = self.embedder.encode_one(&canonical)?;
        let embed_ms = start.elapsed().as_millis();

        let mut params = RetrieveParams::from(&self.config);
        params.candidate_pool = params.candidate_pool.max(top_k);
        let mut results = index.retrieve(&embedded, &params)?;
        results.truncate(top_k);
        self.content.load_text(&mut results);

        debug!(
            top_k,
            returned = results.len(),
            embed_ms,
            total_ms = start.elapsed().as_millis(),
            "search completed"
        );
        Ok(results)
    }

    /// [`search`](Self::search) with the configured `default_top_k`.
    pub fn search_default(&self, query: &str) -> Result<Vec<HybridScore>, SearchError> {
        self.search(query, self.config.default_top_k)
    }
}
