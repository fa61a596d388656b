//! Veritas core library: knowledge-graph store, ingestion, and usage validation.
//!
//! Repositories are ingested with [`ingest::Ingestor`] into a
//! [`store::GraphStore`]; target scripts are checked against the populated
//! store with [`validate::Validator`], which produces a
//! [`types::ValidationReport`].

pub mod config;
pub mod error;
pub mod fetch;
pub mod hierarchy;
pub mod ingest;
pub mod progress;
pub mod report;
pub mod resolve;
pub mod store;
pub mod types;
pub mod validate;
