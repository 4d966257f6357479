//! Refcounted database registry.
//!
//! All storage instances on the same database name share one pair of
//! connection pools and one translation cache. The first instance opens the
//! database; the last one to close tears it down. Writes go through a pool
//! capped at a single connection — transactions acquired from it form the
//! FIFO write queue — while reads run on a separate pool under WAL.

use rill::prelude::*;
use sqlx::sqlite::{self, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::RwLock;

use crate::plan::{PlanCache, PLAN_CACHE_CAPACITY};
use crate::sieve::SieveCache;
use crate::AdapterConfig;

/// In-memory storage sentinel for `AdapterConfig::filename`.
pub const MEMORY_FILENAME: &str = ":memory:";

/// Process-global expression-index presence cache, keyed by
/// `database|table|field`. Purely additive; bounded.
static INDEX_CACHE: OnceLock<Mutex<SieveCache<String, bool>>> = OnceLock::new();

const INDEX_CACHE_CAPACITY: usize = 1_000;

pub(crate) fn index_cache() -> &'static Mutex<SieveCache<String, bool>> {
	INDEX_CACHE.get_or_init(|| Mutex::new(SieveCache::new(INDEX_CACHE_CAPACITY)))
}

/// One open database shared by every instance on the same name.
#[derive(Debug)]
pub(crate) struct Database {
	pub name: Box<str>,
	/// Single-connection write pool; its transactions serialise all writes.
	pub db: SqlitePool,
	/// Read pool. For in-memory databases this is the write pool, since a
	/// second connection would see a different database.
	pub dbr: SqlitePool,
	/// Per-database selector translation cache.
	pub plans: PlanCache,
	refcount: AtomicUsize,
}

impl Database {
	async fn open(config: &AdapterConfig, name: &str) -> ClResult<Self> {
		let mut opts = sqlite::SqliteConnectOptions::new()
			.create_if_missing(true)
			// LIKE must be case-sensitive so regex reductions keep exact
			// semantics; case-insensitive forms go through LOWER().
			.pragma("case_sensitive_like", "1");

		let memory = config.filename.as_ref() == MEMORY_FILENAME;
		if memory {
			opts = opts.filename(MEMORY_FILENAME);
		} else {
			let db_path = db_file_path(config.filename.as_ref(), name);
			if let Some(parent) = db_path.parent() {
				tokio::fs::create_dir_all(parent).await?;
			}
			opts = opts.filename(&db_path).journal_mode(sqlite::SqliteJournalMode::Wal);
		}

		let mut pool_opts = sqlite::SqlitePoolOptions::new().max_connections(1);
		if memory {
			// The database lives in its one connection; never let the pool
			// reap it.
			pool_opts = pool_opts.min_connections(1).idle_timeout(None).max_lifetime(None);
		}
		let db = pool_opts
			.connect_with(opts.clone())
			.await
			.map_err(crate::error::db_err)?;

		let dbr = if memory {
			db.clone()
		} else {
			sqlite::SqlitePoolOptions::new()
				.max_connections(config.read_connections)
				.connect_with(opts.read_only(true))
				.await
				.map_err(crate::error::db_err)?
		};

		debug!("opened database '{}'", name);
		Ok(Self {
			name: name.into(),
			db,
			dbr,
			plans: Mutex::new(SieveCache::new(PLAN_CACHE_CAPACITY)),
			refcount: AtomicUsize::new(0),
		})
	}
}

/// SQLite file for a database name under the configured directory.
pub(crate) fn db_file_path(base: &str, name: &str) -> PathBuf {
	Path::new(base).join(format!("{}.db", name))
}

/// Refcounted map of open databases by name.
#[derive(Debug, Default)]
pub(crate) struct DatabaseRegistry {
	databases: RwLock<HashMap<Box<str>, Arc<Database>>>,
}

impl DatabaseRegistry {
	/// Opens the database on first use, otherwise hands out another
	/// reference to the shared one.
	pub async fn acquire(&self, config: &AdapterConfig, name: &str) -> ClResult<Arc<Database>> {
		{
			let databases = self.databases.read().await;
			if let Some(database) = databases.get(name) {
				database.refcount.fetch_add(1, Ordering::AcqRel);
				return Ok(Arc::clone(database));
			}
		}

		let mut databases = self.databases.write().await;
		// Double-checked: another task may have opened it meanwhile.
		if let Some(database) = databases.get(name) {
			database.refcount.fetch_add(1, Ordering::AcqRel);
			return Ok(Arc::clone(database));
		}

		let database = Arc::new(Database::open(config, name).await?);
		database.refcount.fetch_add(1, Ordering::AcqRel);
		databases.insert(name.into(), Arc::clone(&database));
		Ok(database)
	}

	/// Drops one reference; the last one closes the pools and forgets the
	/// database.
	pub async fn release(&self, name: &str) -> ClResult<()> {
		let database = {
			let mut databases = self.databases.write().await;
			let Some(database) = databases.get(name) else {
				return Ok(());
			};
			if database.refcount.fetch_sub(1, Ordering::AcqRel) > 1 {
				return Ok(());
			}
			databases.remove(name)
		};

		if let Some(database) = database {
			database.db.close().await;
			database.dbr.close().await;
			debug!("closed database '{}'", name);
		}
		Ok(())
	}
}

// vim: ts=4
