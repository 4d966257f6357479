//! Table layout per (collection, schema version).
//!
//! A schema version bump gets a fresh table — versions never collide and
//! never migrate in place. Every table carries the composite `(deleted, id)`
//! and `(mtime_ms, id)` indexes; schema-declared index paths get expression
//! indexes over `json_extract`, and string-typed ones additionally a
//! `LOWER(...)` index for case-insensitive lookups.

use rill::prelude::*;
use sqlx::SqlitePool;

use rill::doc_adapter::CollectionSchema;

use crate::fields::{FieldMap, FieldType, Resolution};

/// Validates a collection or database name for use inside identifiers.
pub(crate) fn validate_name(name: &str) -> ClResult<()> {
	let ok = !name.is_empty()
		&& name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
	if ok {
		Ok(())
	} else {
		Err(Error::ValidationError(format!("invalid collection or database name '{}'", name)))
	}
}

/// Table name for a collection at one schema version.
pub(crate) fn table_name(collection: &str, version: u32) -> ClResult<String> {
	validate_name(collection)?;
	Ok(format!("{}__v{}", collection, version))
}

/// Creates the collection table and its indexes.
pub(crate) async fn init_collection_table(
	db: &SqlitePool,
	table: &str,
	schema: &CollectionSchema,
	fields: &FieldMap,
) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	sqlx::query(&format!(
		"CREATE TABLE IF NOT EXISTS \"{}\" (
			id text NOT NULL,
			data text NOT NULL,
			deleted integer NOT NULL DEFAULT 0,
			rev text NOT NULL,
			mtime_ms integer NOT NULL,
			PRIMARY KEY(id)
		)",
		table
	))
	.execute(&mut *tx)
	.await?;

	sqlx::query(&format!(
		"CREATE INDEX IF NOT EXISTS \"idx_{t}_deleted_id\" ON \"{t}\" (deleted, id)",
		t = table
	))
	.execute(&mut *tx)
	.await?;
	sqlx::query(&format!(
		"CREATE INDEX IF NOT EXISTS \"idx_{t}_mtime_id\" ON \"{t}\" (mtime_ms, id)",
		t = table
	))
	.execute(&mut *tx)
	.await?;

	for index_fields in &schema.indexes {
		let mut terms: Vec<String> = Vec::with_capacity(index_fields.len());
		let mut name_parts: Vec<String> = Vec::with_capacity(index_fields.len());
		let mut lower_term: Option<String> = None;
		for field in index_fields {
			match fields.resolve(field) {
				Resolution::Column(col) => {
					terms.push(col.name.to_string());
					name_parts.push(col.name.to_string());
				}
				Resolution::Json(json) => {
					terms.push(format!("json_extract(data, '{}')", json.path));
					name_parts.push(sanitize(field));
					if index_fields.len() == 1 && json.ty == FieldType::String {
						lower_term = Some(format!("LOWER(json_extract(data, '{}'))", json.path));
					}
				}
				Resolution::Unsupported => {
					warn!("skipping index on unindexable path '{}'", field);
					terms.clear();
					break;
				}
			}
		}
		if terms.is_empty() {
			continue;
		}

		let suffix = name_parts.join("_");
		sqlx::query(&format!(
			"CREATE INDEX IF NOT EXISTS \"idx_{t}_{s}\" ON \"{t}\" ({e})",
			t = table,
			s = suffix,
			e = terms.join(", ")
		))
		.execute(&mut *tx)
		.await?;

		if let Some(expr) = lower_term {
			sqlx::query(&format!(
				"CREATE INDEX IF NOT EXISTS \"idx_{t}_{s}_lower\" ON \"{t}\" ({e})",
				t = table,
				s = suffix,
				e = expr
			))
			.execute(&mut *tx)
			.await?;
		}
	}

	tx.commit().await?;
	Ok(())
}

/// Index-name-safe rendering of a field path.
fn sanitize(field: &str) -> String {
	field.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

/// Drops the collection table (used by `remove`).
pub(crate) async fn drop_collection_table(db: &SqlitePool, table: &str) -> Result<(), sqlx::Error> {
	sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", table)).execute(db).await?;
	Ok(())
}

/// Scans `sqlite_master` for `LOWER(json_extract(...))` expression indexes
/// on a table and reports the dotted field paths they cover.
pub(crate) async fn scan_lower_indexed(
	db: &SqlitePool,
	table: &str,
) -> Result<Vec<Box<str>>, sqlx::Error> {
	use sqlx::Row;

	let rows = sqlx::query("SELECT sql FROM sqlite_master WHERE type='index' AND tbl_name=?")
		.bind(table)
		.fetch_all(db)
		.await?;

	let mut found = Vec::new();
	for row in rows {
		let Some(sql) = row.try_get::<Option<String>, _>("sql")? else {
			continue;
		};
		if let Some(field) = parse_lower_index(&sql) {
			found.push(field.into());
		}
	}
	Ok(found)
}

/// Extracts the dotted field path from an index over
/// `LOWER(json_extract(data, '$.a.b'))`. Quoted or bracketed path segments
/// are skipped — those fields simply lose the index-aware rewrite.
fn parse_lower_index(sql: &str) -> Option<String> {
	let start = sql.find("LOWER(json_extract(data, '$.")?;
	let rest = &sql[start + "LOWER(json_extract(data, '$.".len()..];
	let end = rest.find('\'')?;
	let path = &rest[..end];
	if path.contains('"') || path.contains('[') {
		return None;
	}
	Some(path.to_string())
}


// vim: ts=4
