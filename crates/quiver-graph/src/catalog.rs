//! Versioned schema catalog.
//!
//! Builds [`SchemaSnapshot`]s from the graph's own metadata and caches them
//! under `schema:<database>:v<version>`. A snapshot is never mutated: bumping
//! the version makes the next read build and store a fresh one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, instrument};

use quiver_cache::{keys, CacheLayer};
use quiver_core::{
    defaults, with_timeout, GraphBackend, LabelSchema, PipelineConfig, Result, SchemaSnapshot,
};

pub struct SchemaCatalog {
    graph: Arc<dyn GraphBackend>,
    cache: CacheLayer,
    database: String,
    version: AtomicU64,
    ttl: Duration,
    timeout: Duration,
    concurrency: usize,
}

impl SchemaCatalog {
    pub fn new(graph: Arc<dyn GraphBackend>, cache: CacheLayer, config: &PipelineConfig) -> Self {
        Self {
            graph,
            cache,
            database: config.database.clone(),
            version: AtomicU64::new(config.schema_version),
            ttl: config.schema_ttl,
            timeout: config.graph_timeout,
            concurrency: defaults::INTROSPECTION_CONCURRENCY,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Advance the version; entries under older versions are never read again.
    pub fn bump_version(&self) -> u64 {
        let next = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            subsystem = "graph",
            component = "schema_catalog",
            op = "bump_version",
            schema_version = next,
            "Schema version bumped"
        );
        next
    }

    /// Snapshot at the current version.
    pub async fn schema(&self) -> Result<SchemaSnapshot> {
        self.get_schema(self.current_version()).await
    }

    /// Snapshot for `version`, building it from the graph on a cache miss.
    #[instrument(skip(self), fields(subsystem = "graph", component = "schema_catalog", op = "get_schema"))]
    pub async fn get_schema(&self, version: u64) -> Result<SchemaSnapshot> {
        let key = keys::schema_key(&self.database, version);
        self.cache
            .get_or_compute(&key, self.ttl, || self.build(version))
            .await
    }

    async fn build(&self, version: u64) -> Result<SchemaSnapshot> {
        let start = Instant::now();
        let graph = &self.graph;
        let timeout = self.timeout;

        let labels = with_timeout(timeout, "list_labels", graph.list_labels()).await?;

        // `buffered` keeps label order; the snapshot sorts anyway.
        let label_schemas: Vec<LabelSchema> = stream::iter(labels)
            .map(|name| async move {
                let properties =
                    with_timeout(timeout, "label_properties", graph.label_properties(&name))
                        .await?;
                let count = with_timeout(timeout, "count_nodes", graph.count_nodes(&name)).await?;
                Ok::<_, quiver_core::Error>(LabelSchema {
                    name,
                    count,
                    properties,
                })
            })
            .buffered(self.concurrency.max(1))
            .try_collect()
            .await?;

        let relationships =
            with_timeout(timeout, "relationship_metadata", graph.relationship_metadata()).await?;

        let snapshot = SchemaSnapshot::new(&self.database, version, label_schemas, relationships);
        debug!(
            schema_version = version,
            labels = snapshot.labels.len(),
            relationships = snapshot.relationships.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Built schema snapshot"
        );
        Ok(snapshot)
    }
}
