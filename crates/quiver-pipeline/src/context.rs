//! Process-wide shared clients, built once and passed as `Arc<AppContext>`.

use std::sync::Arc;

use tracing::info;

use quiver_cache::{CacheLayer, MemoryBackend, RedisBackend};
use quiver_core::{
    CacheBackend, GenerationBackend, GraphBackend, HistoryStore, PipelineConfig, Result,
};
use quiver_graph::{GraphConfig, Neo4jGraph, SchemaArtifacts, SchemaCatalog, SemanticIntrospector};
use quiver_inference::{GenerationClient, OpenAIBackend};

use crate::details::EntityDetailClient;
use crate::session::{InMemoryHistory, SessionLocks};

pub struct AppContext {
    pub config: PipelineConfig,
    pub graph: Arc<dyn GraphBackend>,
    pub cache: CacheLayer,
    pub llm: GenerationClient,
    pub artifacts: Arc<SchemaArtifacts>,
    pub details: EntityDetailClient,
    pub history: Arc<dyn HistoryStore>,
    pub sessions: SessionLocks,
    pub catalog: Arc<SchemaCatalog>,
    pub introspector: SemanticIntrospector,
}

impl AppContext {
    /// Assemble a context from already-built backends.
    ///
    /// Artifacts are read from `config.artifacts_path` when set; history
    /// defaults to the in-memory store.
    pub fn new(
        config: PipelineConfig,
        graph: Arc<dyn GraphBackend>,
        cache_backend: Arc<dyn CacheBackend>,
        llm_backend: Arc<dyn GenerationBackend>,
    ) -> Result<Self> {
        let cache = CacheLayer::with_timeout(cache_backend, config.cache_timeout);
        let llm = GenerationClient::new(llm_backend, config.retry, config.llm_timeout);
        let artifacts = Arc::new(SchemaArtifacts::load_optional(
            config.artifacts_path.as_deref(),
        ));
        let details = EntityDetailClient::new(config.detail_url.clone(), config.detail_timeout)?;
        let catalog = Arc::new(SchemaCatalog::new(graph.clone(), cache.clone(), &config));
        let introspector =
            SemanticIntrospector::new(graph.clone(), cache.clone(), catalog.clone(), &config);

        Ok(Self {
            config,
            graph,
            cache,
            llm,
            artifacts,
            details,
            history: Arc::new(InMemoryHistory::new()),
            sessions: SessionLocks::new(),
            catalog,
            introspector,
        })
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = history;
        self
    }

    pub fn with_artifacts(mut self, artifacts: SchemaArtifacts) -> Self {
        self.artifacts = Arc::new(artifacts);
        self
    }

    /// Connect every backend from environment variables.
    ///
    /// `REDIS_ENABLED=false` keeps the cache in process memory.
    pub async fn from_env() -> Result<Self> {
        let config = PipelineConfig::from_env();
        let graph =
            Neo4jGraph::connect(GraphConfig::from_env().database(config.database.clone())).await?;

        let redis_enabled = std::env::var("REDIS_ENABLED")
            .map(|v| !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true);
        let cache_backend: Arc<dyn CacheBackend> = if redis_enabled {
            Arc::new(RedisBackend::from_env().await)
        } else {
            Arc::new(MemoryBackend::new())
        };

        let llm = OpenAIBackend::from_env()?;
        info!(
            subsystem = "pipeline",
            component = "app_context",
            op = "from_env",
            database = %config.database,
            cache = cache_backend.name(),
            model = llm.model_name(),
            "Application context ready"
        );

        Self::new(config, Arc::new(graph), cache_backend, Arc::new(llm))
    }
}
