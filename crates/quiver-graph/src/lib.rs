//! # quiver-graph
//!
//! Graph database access for the quiver pipeline.
//!
//! This crate provides:
//! - [`Neo4jGraph`]: the shared Bolt client implementing [`GraphBackend`]
//! - [`SchemaCatalog`]: versioned, cached schema snapshots
//! - [`SemanticIntrospector`]: sample-based risk, derived-feature and
//!   relationship detection
//! - [`SchemaArtifacts`]: static label/relationship notes loaded at startup
//!
//! # Feature Flags
//!
//! - `mock`: in-memory graph backend with call counters
//!
//! [`GraphBackend`]: quiver_core::GraphBackend

pub mod artifacts;
pub mod catalog;
pub mod introspect;
pub mod neo4j;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use artifacts::SchemaArtifacts;
pub use catalog::SchemaCatalog;
pub use introspect::SemanticIntrospector;
pub use neo4j::{GraphConfig, Neo4jGraph};
