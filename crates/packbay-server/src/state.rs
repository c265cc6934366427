//! Shared application state, assembled once at startup.

use packbay_core::audit::AuditLog;
use packbay_core::flight::DownloadCoordinator;
use packbay_core::meta::MetadataCache;
use packbay_core::tarball::reclaim_cache_dir;
use packbay_core::verify::IntegrityVerifier;
use packbay_core::{ProxyConfig, RegistryClient};
use packbay_rag::{
    ChatEngine, Chunker, EmbeddingCache, IngestPipeline, ModelClient, ResponseCache,
    RetrievalEngine, RetrievalOptions,
};
use packbay_store::Store;
use std::sync::Arc;
use std::time::Instant;

/// Everything a request handler can reach, wired by dependency injection at
/// startup. Component lifetimes are the server's lifetime.
pub struct AppState {
    pub config: ProxyConfig,
    pub store: Arc<Store>,
    pub registry: RegistryClient,
    pub metadata: MetadataCache,
    pub coordinator: Arc<DownloadCoordinator>,
    pub audit: AuditLog,
    pub retrieval: Arc<RetrievalEngine>,
    pub ingest: IngestPipeline,
    pub chat: ChatEngine,
    pub started_at: Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Open the store, reclaim leftover cache files, and wire every
    /// component.
    pub fn build(config: ProxyConfig) -> packbay_rag::Result<SharedState> {
        let store = Arc::new(Store::open(&config.db_path)?);

        // Tarballs from interrupted runs are unusable until re-verified.
        let reclaimed = reclaim_cache_dir(&config.cache_dir, &store)?;
        if reclaimed > 0 {
            tracing::info!(files = reclaimed, "reclaimed stale cache files at startup");
        }

        let registry = RegistryClient::new(&config.registry_url)?;
        let metadata = MetadataCache::new(config.cache_dir.clone());
        let audit = AuditLog::new(Arc::clone(&store));
        let verifier = IntegrityVerifier::new(registry.clone(), Arc::clone(&store), audit.clone());
        let coordinator = Arc::new(DownloadCoordinator::new(
            config.cache_dir.clone(),
            registry.clone(),
            verifier,
        ));

        let model = ModelClient::new(&config)?;
        let embedding_cache = EmbeddingCache::new(Arc::clone(&store), config.embedding_ttl_secs);
        let retrieval = Arc::new(RetrievalEngine::new(
            Arc::clone(&store),
            Arc::new(model.clone()),
            embedding_cache.clone(),
            RetrievalOptions {
                min_similarity: config.min_similarity,
                vector_weight: config.vector_weight,
                lexical_weight: config.lexical_weight,
            },
        ));
        let ingest = IngestPipeline::new(
            registry.clone(),
            Arc::clone(&store),
            Chunker::new(config.chunk_size, config.chunk_overlap),
            Arc::new(model.clone()),
            embedding_cache,
        );
        let response_cache = ResponseCache::new(Arc::clone(&store), config.response_ttl_secs);
        let chat = ChatEngine::new(Arc::clone(&retrieval), model, response_cache);

        Ok(Arc::new(Self {
            config,
            store,
            registry,
            metadata,
            coordinator,
            audit,
            retrieval,
            ingest,
            chat,
            started_at: Instant::now(),
        }))
    }
}
