//! Field resolution: maps selector field paths onto the table layout.
//!
//! A path resolves either to one of the first-class columns (primary key,
//! tombstone flag, revision, last-write timestamp) or to a JSON extraction
//! over the `data` column. Types come from the collection's JSON schema;
//! anything the schema does not describe is `Unknown` and gets conservative
//! treatment downstream.

use rill::doc_adapter::{CollectionSchema, FIELD_DELETED, FIELD_META, FIELD_REV, META_LWT};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldType {
	String,
	Number,
	Boolean,
	Array,
	Unknown,
}

/// A resolved first-class column.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ColumnRef {
	pub name: &'static str,
	pub ty: FieldType,
}

/// A resolved JSON path into the `data` column, e.g. `$.users[0].email`.
#[derive(Debug, Clone)]
pub(crate) struct JsonField {
	pub path: String,
	pub ty: FieldType,
}

#[derive(Debug, Clone)]
pub(crate) enum Resolution {
	Column(ColumnRef),
	Json(JsonField),
	/// The path cannot be addressed in SQL: a non-numeric segment crosses an
	/// array boundary (implicit traversal) or a segment cannot be quoted.
	Unsupported,
}

/// Per-collection field type map, derived once from the schema.
#[derive(Debug)]
pub(crate) struct FieldMap {
	primary_key: Box<str>,
	types: HashMap<String, FieldType>,
}

impl FieldMap {
	pub fn from_schema(schema: &CollectionSchema) -> Self {
		let mut types = HashMap::new();
		walk_properties(&schema.properties, "", &mut types);
		Self { primary_key: schema.primary_key.clone(), types }
	}

	/// Resolves a selector field path to a column or a JSON path.
	pub fn resolve(&self, field: &str) -> Resolution {
		if field == self.primary_key.as_ref() {
			return Resolution::Column(ColumnRef { name: "id", ty: FieldType::String });
		}
		if field == FIELD_DELETED {
			return Resolution::Column(ColumnRef { name: "deleted", ty: FieldType::Boolean });
		}
		if field == FIELD_REV {
			return Resolution::Column(ColumnRef { name: "rev", ty: FieldType::String });
		}
		if field == format!("{}.{}", FIELD_META, META_LWT) {
			return Resolution::Column(ColumnRef { name: "mtime_ms", ty: FieldType::Number });
		}

		let mut path = String::from("$");
		let mut type_path = String::new();
		for (i, seg) in field.split('.').enumerate() {
			if seg.is_empty() {
				return Resolution::Unsupported;
			}
			if is_index(seg) {
				path.push('[');
				path.push_str(seg);
				path.push(']');
				push_type_seg(&mut type_path, "[]");
				continue;
			}
			// A named segment below an array-typed prefix means implicit
			// element traversal, which SQL cannot express here.
			if i > 0 && self.types.get(&type_path).copied() == Some(FieldType::Array) {
				return Resolution::Unsupported;
			}
			match quote_segment(seg) {
				Some(quoted) => {
					path.push('.');
					path.push_str(&quoted);
				}
				None => return Resolution::Unsupported,
			}
			push_type_seg(&mut type_path, seg);
		}

		let ty = self.types.get(&type_path).copied().unwrap_or(FieldType::Unknown);
		Resolution::Json(JsonField { path, ty })
	}
}

/// Builds a JSON path relative to an arbitrary JSON value (no schema, no
/// column mapping) — used for fields inside `$elemMatch` elements.
pub(crate) fn relative_json_path(field: &str) -> Option<String> {
	let mut path = String::from("$");
	for seg in field.split('.') {
		if seg.is_empty() {
			return None;
		}
		if is_index(seg) {
			path.push('[');
			path.push_str(seg);
			path.push(']');
		} else {
			path.push('.');
			path.push_str(&quote_segment(seg)?);
		}
	}
	Some(path)
}

fn push_type_seg(type_path: &mut String, seg: &str) {
	if !type_path.is_empty() {
		type_path.push('.');
	}
	type_path.push_str(seg);
}

fn is_index(seg: &str) -> bool {
	!seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit())
}

/// Quotes a JSON path object label. Plain identifiers pass through bare;
/// anything with quotes, backslashes or control characters is refused.
fn quote_segment(seg: &str) -> Option<String> {
	if seg.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') && !seg.as_bytes()[0].is_ascii_digit()
	{
		return Some(seg.to_string());
	}
	if seg.chars().any(|c| c == '"' || c == '\\' || c.is_control()) {
		return None;
	}
	Some(format!("\"{}\"", seg))
}

fn walk_properties(props: &serde_json::Map<String, Value>, prefix: &str, out: &mut HashMap<String, FieldType>) {
	for (name, sub) in props {
		let path = if prefix.is_empty() { name.clone() } else { format!("{}.{}", prefix, name) };
		let ty = classify(sub);
		out.insert(path.clone(), ty);

		if let Some(Value::Object(nested)) = sub.get("properties") {
			walk_properties(nested, &path, out);
		}
		if ty == FieldType::Array {
			if let Some(items) = sub.get("items") {
				let elem_path = format!("{}.[]", path);
				out.insert(elem_path.clone(), classify(items));
				if let Some(Value::Object(nested)) = items.get("properties") {
					walk_properties(nested, &elem_path, out);
				}
			}
		}
	}
}

fn classify(prop: &Value) -> FieldType {
	match prop.get("type").and_then(Value::as_str) {
		Some("string") => FieldType::String,
		Some("number" | "integer") => FieldType::Number,
		Some("boolean") => FieldType::Boolean,
		Some("array") => FieldType::Array,
		_ => FieldType::Unknown,
	}
}


// vim: ts=4
