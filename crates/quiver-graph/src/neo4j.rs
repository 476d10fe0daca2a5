//! Neo4j client over Bolt.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `NEO4J_URI`: Bolt address (default: 127.0.0.1:7687)
//! - `NEO4J_USER`: user name (default: neo4j)
//! - `NEO4J_PASSWORD`: password (default: empty)
//! - `NEO4J_DATABASE`: database name (default: neo4j)
//! - `NEO4J_MAX_CONNECTIONS`: Bolt pool size (default: 16)

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use neo4rs::{query, ConfigBuilder, Graph, Query};
use tracing::{debug, info, instrument, warn};

use quiver_core::{
    defaults, Error, GraphBackend, ParamValue, PropertySchema, PropertyType, Record,
    RelationshipSchema, Result,
};

/// Connection settings for [`Neo4jGraph`].
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: defaults::NEO4J_URI.to_string(),
            user: defaults::NEO4J_USER.to_string(),
            password: String::new(),
            database: defaults::DATABASE.to_string(),
            max_connections: defaults::GRAPH_MAX_CONNECTIONS,
        }
    }
}

impl GraphConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            uri: std::env::var("NEO4J_URI").unwrap_or(d.uri),
            user: std::env::var("NEO4J_USER").unwrap_or(d.user),
            password: std::env::var("NEO4J_PASSWORD").unwrap_or(d.password),
            database: std::env::var("NEO4J_DATABASE").unwrap_or(d.database),
            max_connections: std::env::var("NEO4J_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(d.max_connections),
        }
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }
}

/// Shared Bolt client. `neo4rs::Graph` pools connections internally, so one
/// instance serves every request for the process lifetime.
#[derive(Clone)]
pub struct Neo4jGraph {
    graph: Graph,
}

impl Neo4jGraph {
    /// Connect using [`GraphConfig::from_env`].
    pub async fn from_env() -> Result<Self> {
        Self::connect(GraphConfig::from_env()).await
    }

    pub async fn connect(config: GraphConfig) -> Result<Self> {
        let start = Instant::now();
        info!(
            subsystem = "graph",
            component = "neo4j",
            op = "connect",
            uri = %config.uri,
            database = %config.database,
            max_connections = config.max_connections,
            "Connecting to Neo4j"
        );

        let bolt = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str())
            .db(config.database.as_str())
            .max_connections(config.max_connections)
            .build()
            .map_err(|e| Error::Config(format!("Invalid Neo4j configuration: {}", e)))?;
        let graph = Graph::connect(bolt)
            .await
            .map_err(|e| Error::Graph(format!("Failed to connect to Neo4j: {}", e)))?;

        info!(
            subsystem = "graph",
            component = "neo4j",
            op = "established",
            duration_ms = start.elapsed().as_millis() as u64,
            "Neo4j connection established"
        );
        Ok(Self { graph })
    }

    async fn fetch(&self, q: Query) -> Result<Vec<neo4rs::Row>> {
        let mut stream = self.graph.execute(q).await.map_err(graph_error)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(graph_error)? {
            rows.push(row);
        }
        Ok(rows)
    }
}

fn graph_error(e: neo4rs::Error) -> Error {
    Error::Graph(e.to_string())
}

fn decode_error(e: neo4rs::DeError) -> Error {
    Error::Graph(format!("Unexpected row shape: {}", e))
}

/// Backtick-quote an identifier for interpolation into Cypher.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn bind(mut q: Query, params: &BTreeMap<String, ParamValue>) -> Query {
    for (name, value) in params {
        q = match value {
            ParamValue::Bool(b) => q.param(name, *b),
            ParamValue::Int(i) => q.param(name, *i),
            ParamValue::Float(f) => q.param(name, *f),
            ParamValue::String(s) => q.param(name, s.as_str()),
        };
    }
    q
}

#[async_trait]
impl GraphBackend for Neo4jGraph {
    async fn list_labels(&self) -> Result<Vec<String>> {
        let rows = self
            .fetch(query("CALL db.labels() YIELD label RETURN label ORDER BY label"))
            .await?;
        rows.iter()
            .map(|row| row.get::<String>("label").map_err(decode_error))
            .collect()
    }

    async fn label_properties(&self, label: &str) -> Result<Vec<PropertySchema>> {
        let q = query(
            "CALL db.schema.nodeTypeProperties() \
             YIELD nodeLabels, propertyName, propertyTypes \
             WHERE $label IN nodeLabels AND propertyName IS NOT NULL \
             RETURN propertyName, propertyTypes",
        )
        .param("label", label);

        let mut properties = Vec::new();
        for row in self.fetch(q).await? {
            let name: String = row.get("propertyName").map_err(decode_error)?;
            let types: Vec<String> = row.get("propertyTypes").unwrap_or_default();
            let kind = types
                .iter()
                .map(|t| PropertyType::from_neo4j(t))
                .reduce(PropertyType::unify)
                .unwrap_or(PropertyType::Unknown);
            properties.push(PropertySchema { name, kind });
        }
        Ok(properties)
    }

    async fn count_nodes(&self, label: &str) -> Result<i64> {
        let text = format!("MATCH (n:{}) RETURN count(n) AS count", quote_ident(label));
        let rows = self.fetch(query(&text)).await?;
        match rows.first() {
            Some(row) => row.get::<i64>("count").map_err(decode_error),
            None => Ok(0),
        }
    }

    async fn relationship_metadata(&self) -> Result<Vec<RelationshipSchema>> {
        let rows = self
            .fetch(query(
                "MATCH (a)-[r]->(b) \
                 RETURN type(r) AS rel_type, head(labels(a)) AS from, \
                 head(labels(b)) AS to, count(*) AS count",
            ))
            .await?;

        let mut relationships = Vec::with_capacity(rows.len());
        for row in rows {
            // Unlabelled endpoints carry no schema information.
            let (Ok(from), Ok(to)) = (row.get::<String>("from"), row.get::<String>("to")) else {
                continue;
            };
            relationships.push(RelationshipSchema {
                rel_type: row.get("rel_type").map_err(decode_error)?,
                from,
                to,
                count: row.get("count").unwrap_or(0),
            });
        }
        Ok(relationships)
    }

    async fn sample_nodes(&self, label: &str, limit: usize) -> Result<Vec<Record>> {
        let text = format!(
            "MATCH (n:{}) RETURN properties(n) AS props LIMIT $limit",
            quote_ident(label)
        );
        let rows = self
            .fetch(query(&text).param("limit", limit as i64))
            .await?;
        rows.iter()
            .map(|row| row.get::<Record>("props").map_err(decode_error))
            .collect()
    }

    #[instrument(skip(self, query_text, params), fields(subsystem = "graph", component = "neo4j", op = "execute", param_count = params.len()))]
    async fn execute(
        &self,
        query_text: &str,
        params: &BTreeMap<String, ParamValue>,
    ) -> Result<Vec<Record>> {
        let start = Instant::now();
        let rows = self.fetch(bind(query(query_text), params)).await?;
        let records = rows
            .iter()
            .map(|row| row.to::<Record>().map_err(decode_error))
            .collect::<Result<Vec<_>>>()?;

        let duration_ms = start.elapsed().as_millis() as u64;
        if duration_ms > defaults::SLOW_CALL_MS {
            warn!(duration_ms, result_count = records.len(), slow = true, "Slow graph query");
        } else {
            debug!(duration_ms, result_count = records.len(), "Graph query complete");
        }
        Ok(records)
    }
}
