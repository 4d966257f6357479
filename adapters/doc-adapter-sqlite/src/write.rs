//! Bulk-write categorisation.
//!
//! Pure row-state logic: given the incoming rows and the current on-disk
//! state for their keys, decide which rows insert, which update, which
//! conflict, and what the change-stream bulk looks like. The storage
//! instance applies the effects inside one transaction.

use rill::prelude::*;
use serde_json::Value;
use std::collections::HashMap;

use rill::doc_adapter::{
	BulkWriteRow, ChangeEvent, ChangeOperation, Checkpoint, WriteError, FIELD_DELETED, FIELD_META,
	FIELD_REV, META_LWT,
};

/// HTTP-style status for revision conflicts and insert collisions.
pub(crate) const CONFLICT_STATUS: u16 = 409;

/// One row ready to be persisted.
#[derive(Debug, Clone)]
pub(crate) struct PersistRow {
	pub id: Box<str>,
	pub document: Value,
	pub deleted: bool,
	pub rev: Box<str>,
	pub lwt: i64,
	/// Revision the update must replace; `None` inserts a fresh row.
	pub expected_rev: Option<Box<str>>,
}

#[derive(Debug, Default)]
pub(crate) struct Categorized {
	pub inserts: Vec<PersistRow>,
	pub updates: Vec<PersistRow>,
	pub errors: Vec<WriteError>,
	pub events: Vec<ChangeEvent>,
	pub checkpoint: Option<Checkpoint>,
}

// Document field extraction
//***************************

pub(crate) fn doc_id<'v>(doc: &'v Value, primary_key: &str) -> ClResult<&'v str> {
	doc.get(primary_key).and_then(Value::as_str).ok_or_else(|| {
		Error::ValidationError(format!("document is missing primary key '{}'", primary_key))
	})
}

pub(crate) fn doc_rev<'v>(doc: &'v Value) -> ClResult<&'v str> {
	doc.get(FIELD_REV)
		.and_then(Value::as_str)
		.ok_or_else(|| Error::ValidationError("document is missing _rev".into()))
}

pub(crate) fn doc_deleted(doc: &Value) -> bool {
	doc.get(FIELD_DELETED).and_then(Value::as_bool).unwrap_or(false)
}

pub(crate) fn doc_lwt(doc: &Value) -> ClResult<i64> {
	doc.get(FIELD_META)
		.and_then(|m| m.get(META_LWT))
		.and_then(Value::as_i64)
		.ok_or_else(|| Error::ValidationError("document is missing _meta.lwt".into()))
}

/// Categorises a write batch against the current row state.
///
/// Rows targeting the same key later in the batch see the state earlier rows
/// left behind, so duplicate-key batches behave like sequential writes.
pub(crate) fn categorize(
	rows: Vec<BulkWriteRow>,
	current: &HashMap<Box<str>, Value>,
	primary_key: &str,
) -> ClResult<Categorized> {
	let mut out = Categorized::default();
	let mut overlay: HashMap<Box<str>, Value> = HashMap::new();

	for row in rows {
		let BulkWriteRow { document, previous } = row;
		let id: Box<str> = doc_id(&document, primary_key)?.into();
		let rev: Box<str> = doc_rev(&document)?.into();
		let deleted = doc_deleted(&document);
		let lwt = doc_lwt(&document)?;

		let on_disk: Option<Value> = overlay.get(&id).or_else(|| current.get(&id)).cloned();

		match (previous, on_disk) {
			(None, Some(in_db)) => {
				// Insert against an existing row: collision.
				out.errors.push(WriteError {
					status: CONFLICT_STATUS,
					document_id: id,
					write_row: BulkWriteRow { document, previous: None },
					document_in_db: Some(in_db),
				});
			}
			(Some(prev), Some(in_db)) => {
				let disk_rev: Box<str> = doc_rev(&in_db)?.into();
				if doc_rev(&prev)? != disk_rev.as_ref() {
					out.errors.push(WriteError {
						status: CONFLICT_STATUS,
						document_id: id,
						write_row: BulkWriteRow { document, previous: Some(prev) },
						document_in_db: Some(in_db),
					});
					continue;
				}
				let operation = match (doc_deleted(&prev), deleted) {
					(false, true) => ChangeOperation::Delete,
					// Resurrecting a tombstone is an insert from the
					// replication consumer's point of view.
					(true, false) => ChangeOperation::Insert,
					_ => ChangeOperation::Update,
				};
				out.events.push(ChangeEvent {
					operation,
					document_id: id.clone(),
					document_data: document.clone(),
					previous_document_data: Some(prev),
				});
				out.updates.push(PersistRow {
					id: id.clone(),
					document: document.clone(),
					deleted,
					rev,
					lwt,
					expected_rev: Some(disk_rev),
				});
				update_checkpoint(&mut out.checkpoint, &id, lwt);
				overlay.insert(id, document);
			}
			(previous, None) => {
				// Fresh insert, or an upsert whose tombstone was cleaned up.
				out.events.push(ChangeEvent {
					operation: ChangeOperation::Insert,
					document_id: id.clone(),
					document_data: document.clone(),
					previous_document_data: previous,
				});
				out.inserts.push(PersistRow {
					id: id.clone(),
					document: document.clone(),
					deleted,
					rev,
					lwt,
					expected_rev: None,
				});
				update_checkpoint(&mut out.checkpoint, &id, lwt);
				overlay.insert(id, document);
			}
		}
	}

	Ok(out)
}

/// Recomputes the checkpoint of an event bulk: the `(id, lwt)` of the event
/// with the greatest lwt.
pub(crate) fn checkpoint_of(events: &[ChangeEvent]) -> Option<Checkpoint> {
	let mut checkpoint: Option<Checkpoint> = None;
	for event in events {
		if let Ok(lwt) = doc_lwt(&event.document_data) {
			update_checkpoint(&mut checkpoint, &event.document_id, lwt);
		}
	}
	checkpoint
}

fn update_checkpoint(checkpoint: &mut Option<Checkpoint>, id: &str, lwt: i64) {
	let replace = match checkpoint {
		Some(cp) => (lwt, id) > (cp.lwt.0, cp.id.as_ref()),
		None => true,
	};
	if replace {
		*checkpoint = Some(Checkpoint { id: id.into(), lwt: Timestamp(lwt) });
	}
}


// vim: ts=4
