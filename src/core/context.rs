//! `CoreContext` — the explicit handle for process-wide shared state.
//!
//! Embedding caches are shared by every page session in the process; the
//! promotion store is shared across processes through its SQLite file. No
//! globals: everything reaches the pipeline through this handle. Only model
//! weights use process-wide lazy init, inside [`crate::embed::Embedder`].

use std::sync::Arc;

use tracing::warn;

use crate::core::config::PinpointConfig;
use crate::core::errors::PinpointError;
use crate::embed::cache::EmbeddingCache;
use crate::embed::vector_store::VectorStore;
use crate::embed::Embedder;
use crate::heal::promotion::{PromotionEntry, PromotionStore};
use crate::rank::vocab::ProductVocabulary;

pub struct CoreContext {
    pub config: PinpointConfig,
    pub embedder: Arc<Embedder>,
    pub cache: EmbeddingCache,
    promotions: Arc<PromotionStore>,
    pub vocab: ProductVocabulary,
}

impl CoreContext {
    /// Initialize shared state from configuration. Store corruption degrades
    /// (empty store, warn, continue) rather than failing startup; only a
    /// strict-mode embedder failure is fatal.
    pub async fn init(config: PinpointConfig) -> Result<Arc<Self>, PinpointError> {
        let embedder = Arc::new(
            Embedder::init(&config.models_dir, config.elem_dim, config.strict).await?,
        );

        let disk = match VectorStore::open(&config.vector_db_path(), embedder.dim(), config.disk_cap)
        {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!("vector store unavailable ({}); running memory-tier only", e);
                None
            }
        };

        let promotions = match PromotionStore::open(
            &config.promotion_db_path(),
            config.promotion_ttl_days,
        ) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!("promotion store unavailable ({}); starting with empty history", e);
                Arc::new(
                    PromotionStore::open_in_memory(config.promotion_ttl_days)
                        .expect("in-memory promotion store"),
                )
            }
        };

        let cache = EmbeddingCache::new(&config, Arc::clone(&embedder), disk);
        let vocab = ProductVocabulary::new(&config.product_vocabulary);

        Ok(Arc::new(Self { config, embedder, cache, promotions, vocab }))
    }

    /// Hermetic context for tests: fallback embedder, in-memory stores.
    pub fn for_tests(config: PinpointConfig) -> Arc<Self> {
        let embedder = Arc::new(Embedder::fallback_only(config.elem_dim));
        let disk = VectorStore::open_in_memory(embedder.dim(), config.disk_cap)
            .ok()
            .map(Arc::new);
        let promotions = Arc::new(
            PromotionStore::open_in_memory(config.promotion_ttl_days)
                .expect("in-memory promotion store"),
        );
        let cache = EmbeddingCache::new(&config, Arc::clone(&embedder), disk);
        let vocab = ProductVocabulary::new(&config.product_vocabulary);
        Arc::new(Self { config, embedder, cache, promotions, vocab })
    }

    /// Promotion reads, off the async runtime. Reads for different keys run
    /// in parallel; the store serializes them internally.
    pub async fn promotions_lookup(
        &self,
        origin: &str,
        query: &str,
        mode_key: &str,
    ) -> Vec<PromotionEntry> {
        let store = Arc::clone(&self.promotions);
        let (origin, query, mode_key, conf_min) = (
            origin.to_string(),
            query.to_string(),
            mode_key.to_string(),
            self.config.conf_min,
        );
        tokio::task::spawn_blocking(move || store.lookup(&origin, &query, &mode_key, conf_min))
            .await
            .unwrap_or_default()
    }

    /// Record one attempt outcome. Writes for the same key are serialized by
    /// the store; this call only suspends on the blocking pool.
    pub async fn promotions_record(
        &self,
        success: bool,
        origin: &str,
        query: &str,
        selector: &str,
        mode_key: &str,
    ) {
        let store = Arc::clone(&self.promotions);
        let (origin, query, selector, mode_key) = (
            origin.to_string(),
            query.to_string(),
            selector.to_string(),
            mode_key.to_string(),
        );
        let _ = tokio::task::spawn_blocking(move || {
            if success {
                store.record_success(&origin, &query, &selector, &mode_key);
            } else {
                store.record_failure(&origin, &query, &selector, &mode_key);
            }
        })
        .await;
    }

    /// Direct store access for maintenance paths and tests.
    pub fn promotion_store(&self) -> &Arc<PromotionStore> {
        &self.promotions
    }
}
