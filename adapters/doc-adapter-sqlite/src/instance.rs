//! The storage instance: one collection on one shared database.
//!
//! Reads run on the read pool; every mutation happens inside a transaction
//! on the single-connection write pool, which serialises concurrent writers
//! in submission order. Change events are broadcast strictly after commit,
//! batched per bulk write with a single checkpoint.

use async_trait::async_trait;
use rill::prelude::*;
use serde_json::Value;
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use rill::doc_adapter::{
	BulkWriteResponse, BulkWriteRow, ChangeStream, ChangesResult, Checkpoint, CollectionSchema,
	CountMode, CountResult, DocStorage, DocumentData, EventBulk, InstanceParams, PreparedQuery,
	QueryResult,
};

use crate::db::{index_cache, Database, DatabaseRegistry};
use crate::error::db_err;
use crate::fields::{FieldMap, FieldType, Resolution};
use crate::operators::SqlArg;
use crate::plan::{self, Plan};
use crate::statements::dynamic_query;
use crate::{matcher, schema, write, AdapterConfig};

/// Bound-parameter budget per statement; far below any engine's limit.
const BIND_LIMIT: usize = 500;

/// Columns per inserted row.
const INSERT_COLUMNS: usize = 5;

#[derive(Debug)]
pub struct SqliteDocStorage {
	params: InstanceParams,
	table: String,
	fields: FieldMap,
	/// Fields with a LOWER() expression index, for the regex reducer.
	lower_indexed: HashSet<Box<str>>,
	database: Arc<Database>,
	registry: Arc<DatabaseRegistry>,
	change_tx: broadcast::Sender<EventBulk>,
	closed: AtomicBool,
}

impl SqliteDocStorage {
	pub(crate) async fn open(
		config: &AdapterConfig,
		registry: Arc<DatabaseRegistry>,
		params: InstanceParams,
	) -> ClResult<Arc<Self>> {
		validate_schema(&params.schema)?;
		schema::validate_name(&params.database_name)?;
		let table = schema::table_name(&params.collection_name, params.schema.version)?;
		let fields = FieldMap::from_schema(&params.schema);

		let database = registry.acquire(config, &params.database_name).await?;
		let setup = async {
			schema::init_collection_table(&database.db, &table, &params.schema, &fields)
				.await
				.map_err(db_err)?;
			load_lower_indexed(&database, &table, &params.schema, &fields).await
		};
		let lower_indexed = match setup.await {
			Ok(set) => set,
			Err(err) => {
				registry.release(&params.database_name).await?;
				return Err(err);
			}
		};

		let (change_tx, _) = broadcast::channel(config.broadcast_capacity.max(1));
		debug!(
			"opened storage instance {}/{} (schema v{})",
			params.database_name, params.collection_name, params.schema.version
		);

		Ok(Arc::new(Self {
			params,
			table,
			fields,
			lower_indexed,
			database,
			registry,
			change_tx,
			closed: AtomicBool::new(false),
		}))
	}

	fn ensure_open(&self) -> ClResult<()> {
		if self.closed.load(Ordering::Acquire) {
			return Err(Error::Closed);
		}
		Ok(())
	}

	fn plan(&self, selector: &Value) -> ClResult<Arc<Plan>> {
		plan::plan_selector(
			selector,
			&self.params.collection_name,
			self.params.schema.version,
			&self.fields,
			&self.lower_indexed,
			&self.database.plans,
		)
	}

	async fn fetch_documents(&self, sql: &str, args: &[SqlArg]) -> ClResult<Vec<DocumentData>> {
		debug!("query SQL: {}", sql);
		let rows = dynamic_query(sql, args)
			.fetch_all(&self.database.dbr)
			.await
			.map_err(db_err)?;
		let mut documents = Vec::with_capacity(rows.len());
		for row in &rows {
			let data: String = row.try_get("data").map_err(db_err)?;
			documents.push(serde_json::from_str(&data)?);
		}
		Ok(documents)
	}

	/// Runs a split plan up to (but excluding) sorting and windowing.
	async fn fetch_split_candidates(
		&self,
		prefilter: Option<&crate::operators::Fragment>,
		residual: &Value,
	) -> ClResult<Vec<DocumentData>> {
		let where_sql = prefilter.map_or("1=1", |f| f.sql.as_str());
		let args = prefilter.map_or(&[][..], |f| f.args.as_slice());
		let sql = format!(
			"SELECT data FROM \"{}\" WHERE {} ORDER BY id ASC",
			self.table, where_sql
		);
		let candidates = self.fetch_documents(&sql, args).await?;
		Ok(candidates
			.into_iter()
			.filter(|doc| matcher::matches_selector(residual, doc))
			.collect())
	}
}

#[async_trait]
impl DocStorage for SqliteDocStorage {
	async fn bulk_write(&self, rows: Vec<BulkWriteRow>, context: &str) -> ClResult<BulkWriteResponse> {
		self.ensure_open()?;
		if rows.is_empty() {
			return Ok(BulkWriteResponse::default());
		}

		let primary_key = self.params.schema.primary_key.clone();
		let mut ids: Vec<&str> = Vec::with_capacity(rows.len());
		for row in &rows {
			ids.push(write::doc_id(&row.document, &primary_key)?);
		}
		let ids_json = serde_json::to_string(&ids)?;

		// Everything from the state read to the last update runs inside one
		// transaction on the single write connection.
		let mut tx = self.database.db.begin().await.map_err(db_err)?;

		let current_rows = sqlx::query(&format!(
			"SELECT id, data FROM \"{}\" WHERE id IN (SELECT value FROM json_each(?))",
			self.table
		))
		.persistent(false)
		.bind(&ids_json)
		.fetch_all(&mut *tx)
		.await
		.map_err(db_err)?;

		let mut current: HashMap<Box<str>, Value> = HashMap::with_capacity(current_rows.len());
		for row in &current_rows {
			let id: String = row.try_get("id").map_err(db_err)?;
			let data: String = row.try_get("data").map_err(db_err)?;
			current.insert(id.into(), serde_json::from_str(&data)?);
		}

		let mut categorized = write::categorize(rows, &current, &primary_key)?;

		let rows_per_chunk = BIND_LIMIT / INSERT_COLUMNS;
		for chunk in categorized.inserts.chunks(rows_per_chunk) {
			let placeholders = vec!["(?, ?, ?, ?, ?)"; chunk.len()].join(", ");
			let sql = format!(
				"INSERT INTO \"{}\" (id, data, deleted, rev, mtime_ms) VALUES {}",
				self.table, placeholders
			);
			let mut query = sqlx::query(&sql).persistent(false);
			for row in chunk {
				query = query
					.bind(row.id.as_ref())
					.bind(serde_json::to_string(&row.document)?)
					.bind(i64::from(row.deleted))
					.bind(row.rev.as_ref())
					.bind(row.lwt);
			}
			query.execute(&mut *tx).await.map_err(db_err)?;
		}

		let update_sql = format!(
			"UPDATE \"{}\" SET data=?, deleted=?, rev=?, mtime_ms=? WHERE id=? AND rev=?",
			self.table
		);
		let mut drifted: Vec<Box<str>> = Vec::new();
		for row in &categorized.updates {
			let expected_rev = row.expected_rev.as_deref().unwrap_or_default();
			let res = sqlx::query(&update_sql)
				.bind(serde_json::to_string(&row.document)?)
				.bind(i64::from(row.deleted))
				.bind(row.rev.as_ref())
				.bind(row.lwt)
				.bind(row.id.as_ref())
				.bind(expected_rev)
				.execute(&mut *tx)
				.await
				.map_err(db_err)?;

			if res.rows_affected() == 0 {
				// The row changed underneath the categorisation; report a
				// conflict with the row as it is now.
				warn!("revision drift on '{}' during bulk write", row.id);
				let in_db = sqlx::query(&format!(
					"SELECT data FROM \"{}\" WHERE id = ?",
					self.table
				))
				.bind(row.id.as_ref())
				.fetch_optional(&mut *tx)
				.await
				.map_err(db_err)?;
				let document_in_db = match in_db {
					Some(r) => {
						let data: String = r.try_get("data").map_err(db_err)?;
						Some(serde_json::from_str(&data)?)
					}
					None => None,
				};
				categorized.errors.push(rill::doc_adapter::WriteError {
					status: write::CONFLICT_STATUS,
					document_id: row.id.clone(),
					write_row: BulkWriteRow { document: row.document.clone(), previous: None },
					document_in_db,
				});
				drifted.push(row.id.clone());
			}
		}
		if !drifted.is_empty() {
			categorized.events.retain(|e| !drifted.contains(&e.document_id));
			categorized.checkpoint = write::checkpoint_of(&categorized.events);
		}

		tx.commit().await.map_err(db_err)?;

		if !categorized.events.is_empty() {
			// No receiver is not an error; late subscribers only get
			// future bulks.
			let _ = self.change_tx.send(EventBulk {
				context: context.into(),
				events: categorized.events,
				checkpoint: categorized.checkpoint,
			});
		}

		Ok(BulkWriteResponse { error: categorized.errors })
	}

	async fn find_documents_by_id(&self, ids: &[Box<str>], include_deleted: bool) -> ClResult<Vec<DocumentData>> {
		self.ensure_open()?;
		if ids.is_empty() {
			return Ok(Vec::new());
		}
		let ids_json = serde_json::to_string(ids)?;
		let sql = if include_deleted {
			format!(
				"SELECT data FROM \"{}\" WHERE id IN (SELECT value FROM json_each(?))",
				self.table
			)
		} else {
			format!(
				"SELECT data FROM \"{}\" WHERE deleted = 0 AND id IN (SELECT value FROM json_each(?))",
				self.table
			)
		};
		let args = [SqlArg::Text(ids_json.into())];
		self.fetch_documents(&sql, &args).await
	}

	async fn query(&self, prepared: &PreparedQuery) -> ClResult<QueryResult> {
		self.ensure_open()?;
		let plan = self.plan(&prepared.selector)?;

		let documents = match &*plan {
			Plan::Sql(fragment) => {
				match plan::order_by_clause(&prepared.sort, &self.fields) {
					Some(order_by) => {
						let sql = format!(
							"SELECT data FROM \"{}\" WHERE {} ORDER BY {}{}",
							self.table,
							fragment.sql,
							order_by,
							plan::limit_clause(prepared.skip, prepared.limit),
						);
						self.fetch_documents(&sql, &fragment.args).await?
					}
					None => {
						// Sort keys without a uniform SQL ordering: sort the
						// matches in process, window afterwards.
						let sql = format!(
							"SELECT data FROM \"{}\" WHERE {} ORDER BY id ASC",
							self.table, fragment.sql
						);
						let mut docs = self.fetch_documents(&sql, &fragment.args).await?;
						docs.sort_by(|a, b| matcher::compare_docs(a, b, &prepared.sort));
						apply_window(docs, prepared.skip, prepared.limit)
					}
				}
			}
			Plan::Split { prefilter, residual } => {
				let mut docs = self.fetch_split_candidates(prefilter.as_ref(), residual).await?;
				if !prepared.sort.is_empty() {
					docs.sort_by(|a, b| matcher::compare_docs(a, b, &prepared.sort));
				}
				apply_window(docs, prepared.skip, prepared.limit)
			}
		};

		Ok(QueryResult { documents })
	}

	async fn count(&self, prepared: &PreparedQuery) -> ClResult<CountResult> {
		self.ensure_open()?;
		let plan = self.plan(&prepared.selector)?;

		match &*plan {
			Plan::Sql(fragment) => {
				let sql = format!(
					"SELECT COUNT(*) AS cnt FROM \"{}\" WHERE {}",
					self.table, fragment.sql
				);
				let row = dynamic_query(&sql, &fragment.args)
					.fetch_one(&self.database.dbr)
					.await
					.map_err(db_err)?;
				let count: i64 = row.try_get("cnt").map_err(db_err)?;
				Ok(CountResult { count: count as usize, mode: CountMode::Fast })
			}
			Plan::Split { prefilter, residual } => {
				let docs = self.fetch_split_candidates(prefilter.as_ref(), residual).await?;
				Ok(CountResult { count: docs.len(), mode: CountMode::Slow })
			}
		}
	}

	async fn changed_documents_since(&self, limit: u32, checkpoint: Option<&Checkpoint>) -> ClResult<ChangesResult> {
		self.ensure_open()?;
		let (since_lwt, since_id) = match checkpoint {
			Some(cp) => (cp.lwt.0, cp.id.as_ref().to_string()),
			None => (-1, String::new()),
		};

		let sql = format!(
			"SELECT data FROM \"{}\" WHERE mtime_ms > ? OR (mtime_ms = ? AND id > ?) ORDER BY mtime_ms ASC, id ASC LIMIT ?",
			self.table
		);
		let args = [
			SqlArg::Int(since_lwt),
			SqlArg::Int(since_lwt),
			SqlArg::Text(since_id.into()),
			SqlArg::Int(i64::from(limit)),
		];
		let documents = self.fetch_documents(&sql, &args).await?;

		let checkpoint = match documents.last() {
			Some(doc) => Some(Checkpoint {
				id: write::doc_id(doc, &self.params.schema.primary_key)?.into(),
				lwt: Timestamp(write::doc_lwt(doc)?),
			}),
			None => checkpoint.cloned(),
		};
		Ok(ChangesResult { documents, checkpoint })
	}

	async fn change_stream(&self) -> ClResult<ChangeStream> {
		self.ensure_open()?;
		let mut rx = self.change_tx.subscribe();
		let stream = async_stream::stream! {
			loop {
				match rx.recv().await {
					Ok(bulk) => yield bulk,
					Err(broadcast::error::RecvError::Lagged(n)) => {
						warn!("change stream lagged, missed {} event bulks", n);
						continue;
					}
					Err(broadcast::error::RecvError::Closed) => break,
				}
			}
		};
		Ok(Box::pin(stream))
	}

	async fn cleanup(&self, before_lwt: Timestamp) -> ClResult<bool> {
		self.ensure_open()?;
		let mut tx = self.database.db.begin().await.map_err(db_err)?;
		let res = sqlx::query(&format!(
			"DELETE FROM \"{}\" WHERE deleted = 1 AND mtime_ms < ?",
			self.table
		))
		.bind(before_lwt.0)
		.execute(&mut *tx)
		.await
		.map_err(db_err)?;
		tx.commit().await.map_err(db_err)?;
		Ok(res.rows_affected() > 0)
	}

	async fn close(&self) -> ClResult<()> {
		if self.closed.swap(true, Ordering::AcqRel) {
			return Err(Error::Closed);
		}
		debug!(
			"closing storage instance {}/{}",
			self.params.database_name, self.params.collection_name
		);
		self.registry.release(&self.params.database_name).await
	}

	async fn remove(&self) -> ClResult<()> {
		self.ensure_open()?;
		schema::drop_collection_table(&self.database.db, &self.table)
			.await
			.map_err(db_err)?;
		self.close().await
	}
}

fn apply_window(docs: Vec<DocumentData>, skip: u64, limit: Option<u64>) -> Vec<DocumentData> {
	let start = usize::try_from(skip).unwrap_or(usize::MAX).min(docs.len());
	let end = match limit {
		Some(l) => start.saturating_add(usize::try_from(l).unwrap_or(usize::MAX)).min(docs.len()),
		None => docs.len(),
	};
	docs[start..end].to_vec()
}

fn validate_schema(schema: &CollectionSchema) -> ClResult<()> {
	if schema.key_compression {
		return Err(Error::ConfigError("key compression is not supported".into()));
	}
	if !schema.encrypted.is_empty() {
		return Err(Error::ConfigError(
			"encrypted fields are not supported without a password module".into(),
		));
	}
	if schema.primary_key.is_empty() {
		return Err(Error::ValidationError("schema has no primary key".into()));
	}
	Ok(())
}

/// Figures out which schema-declared index paths have a LOWER() expression
/// index, consulting the global presence cache before touching the catalog.
async fn load_lower_indexed(
	database: &Database,
	table: &str,
	schema: &CollectionSchema,
	fields: &FieldMap,
) -> ClResult<HashSet<Box<str>>> {
	let mut candidates: Vec<Box<str>> = Vec::new();
	for entry in &schema.indexes {
		if let [field] = entry.as_slice() {
			if let Resolution::Json(json) = fields.resolve(field) {
				if json.ty == FieldType::String {
					candidates.push(field.clone());
				}
			}
		}
	}
	if candidates.is_empty() {
		return Ok(HashSet::new());
	}

	let mut present = HashSet::new();
	let mut misses: Vec<Box<str>> = Vec::new();
	if let Ok(mut cache) = index_cache().lock() {
		for field in &candidates {
			let key = format!("{}|{}|{}", database.name, table, field);
			match cache.get(&key) {
				Some(true) => {
					present.insert(field.clone());
				}
				Some(false) => {}
				None => misses.push(field.clone()),
			}
		}
	} else {
		misses = candidates;
	}

	if !misses.is_empty() {
		let found: HashSet<Box<str>> = schema::scan_lower_indexed(&database.db, table)
			.await
			.map_err(db_err)?
			.into_iter()
			.collect();
		for field in misses {
			let hit = found.contains(&field);
			if let Ok(mut cache) = index_cache().lock() {
				cache.insert(format!("{}|{}|{}", database.name, table, field), hit);
			}
			if hit {
				present.insert(field);
			}
		}
	}
	Ok(present)
}

// vim: ts=4
