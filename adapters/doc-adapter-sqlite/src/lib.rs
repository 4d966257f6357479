#![forbid(unsafe_code)]

//! SQLite-backed document storage adapter for Rill.
//!
//! Implements the `DocStorage` contract on SQLite with the JSON1 extension:
//! Mango selectors compile into parameterised WHERE fragments (with an
//! in-process matcher fallback for what SQL cannot express), writes are
//! revision-checked and serialised through a single write connection, and
//! every committed bulk is broadcast to change-stream subscribers.

mod compile;
mod db;
mod error;
mod fields;
mod instance;
pub mod matcher;
mod operators;
mod plan;
mod regex_like;
mod schema;
mod sieve;
mod stable;
mod statements;
mod write;

use async_trait::async_trait;
use std::sync::Arc;

use rill::doc_adapter::{DocAdapter, DocStorage, InstanceParams};
use rill::prelude::*;

pub use db::MEMORY_FILENAME;
pub use instance::SqliteDocStorage;

/// Adapter configuration.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
	/// Directory to keep one SQLite file per database in, or
	/// [`MEMORY_FILENAME`] for a shared in-memory database per name.
	pub filename: Box<str>,

	/// Change-stream broadcast capacity per instance.
	pub broadcast_capacity: usize,

	/// Read pool size for file-backed databases.
	pub read_connections: u32,
}

impl Default for AdapterConfig {
	fn default() -> Self {
		Self { filename: MEMORY_FILENAME.into(), broadcast_capacity: 1000, read_connections: 5 }
	}
}

impl AdapterConfig {
	pub fn with_filename(filename: impl Into<Box<str>>) -> Self {
		Self { filename: filename.into(), ..Self::default() }
	}
}

/// SQLite implementation of the `DocAdapter` factory. Databases are shared
/// and refcounted across the instances opened through one adapter.
#[derive(Debug, Default)]
pub struct DocAdapterSqlite {
	config: AdapterConfig,
	registry: Arc<db::DatabaseRegistry>,
}

impl DocAdapterSqlite {
	pub fn new(config: AdapterConfig) -> Self {
		Self { config, registry: Arc::new(db::DatabaseRegistry::default()) }
	}
}

#[async_trait]
impl DocAdapter for DocAdapterSqlite {
	async fn open(&self, params: InstanceParams) -> ClResult<Arc<dyn DocStorage>> {
		let instance =
			SqliteDocStorage::open(&self.config, Arc::clone(&self.registry), params).await?;
		Ok(instance)
	}
}

// vim: ts=4
