//! Adapter contract for document storage backends.
//!
//! A storage adapter persists opaque JSON documents for one collection,
//! answers Mango-style selector queries over them, and feeds the replication
//! layer through a change stream. Everything the reactive layer knows about
//! a backend goes through [`DocAdapter`] and [`DocStorage`].

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;

use crate::prelude::*;

/// A stored document. Opaque to the storage layer except for the reserved
/// fields below and the schema-designated primary key.
pub type DocumentData = Value;

/// Tombstone marker field.
pub const FIELD_DELETED: &str = "_deleted";
/// Revision string field.
pub const FIELD_REV: &str = "_rev";
/// Metadata object field; carries `lwt` (last-write-timestamp, ms).
pub const FIELD_META: &str = "_meta";
/// Last-write-timestamp key inside `_meta`.
pub const META_LWT: &str = "lwt";
/// Attachments placeholder field; persisted opaquely, never interpreted.
pub const FIELD_ATTACHMENTS: &str = "_attachments";

// Schema
//********

/// The slice of a collection's JSON schema the storage layer cares about:
/// field type classification and index declarations. Validation of documents
/// against the schema is a caller concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
	#[serde(default)]
	pub version: u32,
	pub primary_key: Box<str>,
	/// JSON-schema `properties` tree, used for field type classification.
	#[serde(default)]
	pub properties: serde_json::Map<String, Value>,
	/// Dotted field paths to back with expression indexes.
	#[serde(default)]
	pub indexes: Vec<Vec<Box<str>>>,
	/// Unsupported here; rejected at instance creation.
	#[serde(default)]
	pub key_compression: bool,
	/// Unsupported here; rejected at instance creation.
	#[serde(default)]
	pub encrypted: Vec<Box<str>>,
}

/// Parameters for opening one storage instance.
#[derive(Debug, Clone)]
pub struct InstanceParams {
	pub database_name: Box<str>,
	pub collection_name: Box<str>,
	pub schema: CollectionSchema,
}

// Writes
//********

/// One row of a bulk write: the new document state plus the state the writer
/// believes is currently persisted (`None` for a fresh insert).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkWriteRow {
	pub document: DocumentData,
	#[serde(default)]
	pub previous: Option<DocumentData>,
}

/// Per-row write failure. `status` is 409 for revision conflicts and insert
/// collisions; `document_in_db` carries the row currently persisted so the
/// caller can rebase.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteError {
	pub status: u16,
	pub document_id: Box<str>,
	pub write_row: BulkWriteRow,
	pub document_in_db: Option<DocumentData>,
}

/// Outcome of a bulk write. Successes are implicit; failed rows are returned
/// here and never throw.
#[derive(Debug, Default)]
pub struct BulkWriteResponse {
	pub error: Vec<WriteError>,
}

// Change stream
//***************

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOperation {
	#[serde(rename = "INSERT")]
	Insert,
	#[serde(rename = "UPDATE")]
	Update,
	#[serde(rename = "DELETE")]
	Delete,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
	pub operation: ChangeOperation,
	pub document_id: Box<str>,
	pub document_data: DocumentData,
	pub previous_document_data: Option<DocumentData>,
}

/// Replication resume point: the `(id, lwt)` of the last emitted change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
	pub id: Box<str>,
	pub lwt: Timestamp,
}

/// All events of one committed bulk write, emitted atomically after commit.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBulk {
	pub context: Box<str>,
	pub events: Vec<ChangeEvent>,
	pub checkpoint: Option<Checkpoint>,
}

pub type ChangeStream = Pin<Box<dyn Stream<Item = EventBulk> + Send>>;

// Queries
//*********

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortField {
	pub field: Box<str>,
	pub ascending: bool,
}

/// A prepared Mango query: selector plus ordering and pagination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedQuery {
	pub selector: Value,
	#[serde(default)]
	pub sort: Vec<SortField>,
	#[serde(default)]
	pub skip: u64,
	#[serde(default)]
	pub limit: Option<u64>,
}

impl PreparedQuery {
	/// A query returning every row (including tombstones), unordered.
	pub fn all() -> Self {
		Self { selector: Value::Object(serde_json::Map::new()), sort: Vec::new(), skip: 0, limit: None }
	}
}

#[derive(Debug)]
pub struct QueryResult {
	pub documents: Vec<DocumentData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountMode {
	/// The count ran entirely in SQL and is exact and cheap.
	Fast,
	/// A residual in-process filter had to run; exact but not cheap.
	Slow,
}

#[derive(Debug)]
pub struct CountResult {
	pub count: usize,
	pub mode: CountMode,
}

#[derive(Debug)]
pub struct ChangesResult {
	pub documents: Vec<DocumentData>,
	pub checkpoint: Option<Checkpoint>,
}

// Traits
//********

/// One open storage instance: a single collection in a single database.
#[async_trait]
pub trait DocStorage: Debug + Send + Sync {
	/// Writes a batch of rows. Per-row conflicts are reported in the
	/// response, never as an `Err`. Emits one event bulk on the change
	/// stream for the rows that were persisted.
	async fn bulk_write(&self, rows: Vec<BulkWriteRow>, context: &str) -> ClResult<BulkWriteResponse>;

	/// Fetches documents by primary key. With `include_deleted = false`
	/// tombstones are filtered out.
	async fn find_documents_by_id(&self, ids: &[Box<str>], include_deleted: bool) -> ClResult<Vec<DocumentData>>;

	/// Runs a prepared query. Tombstones are returned like any other row at
	/// this layer; callers exclude them through the selector.
	async fn query(&self, prepared: &PreparedQuery) -> ClResult<QueryResult>;

	/// Counts the documents `query` would return.
	async fn count(&self, prepared: &PreparedQuery) -> ClResult<CountResult>;

	/// Returns up to `limit` documents changed after `checkpoint` in
	/// `(lwt, id)` order, plus the checkpoint to resume from.
	async fn changed_documents_since(&self, limit: u32, checkpoint: Option<&Checkpoint>) -> ClResult<ChangesResult>;

	/// Subscribes to future event bulks. Late subscribers receive only
	/// events emitted after subscription.
	async fn change_stream(&self) -> ClResult<ChangeStream>;

	/// Deletes tombstones with `lwt` older than `before_lwt`. Returns
	/// whether any row was removed.
	async fn cleanup(&self, before_lwt: Timestamp) -> ClResult<bool>;

	/// Releases this instance's reference on the underlying database.
	async fn close(&self) -> ClResult<()>;

	/// Drops the collection's table, then closes.
	async fn remove(&self) -> ClResult<()>;
}

/// Storage backend factory. The reactive layer opens one instance per
/// (database, collection); instances on the same database share a
/// connection.
#[async_trait]
pub trait DocAdapter: Debug + Send + Sync {
	async fn open(&self, params: InstanceParams) -> ClResult<Arc<dyn DocStorage>>;
}

// vim: ts=4
