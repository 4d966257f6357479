//! Recursive selector-to-SQL compiler.
//!
//! Walks a Mango selector and produces a single parameterised boolean
//! fragment, or `None` when any part of the selector cannot be expressed
//! safely in SQL — the planner then falls back to the in-process matcher.
//! Logical operators collapse SQLite's three-valued logic back to MongoDB's
//! two-valued semantics with `COALESCE(…, 0)` at every negation boundary.

use rill::prelude::*;
use serde_json::Value;
use std::collections::HashSet;

use crate::fields::{self, FieldMap, FieldType, Resolution};
use crate::matcher;
use crate::operators::{self, Fragment, Operand};
use crate::regex_like;

/// Recursion guard; a selector this deep is pathological and the matcher
/// handles it fine.
const MAX_DEPTH: usize = 32;

/// What a field expression is evaluated against: the document row or one
/// `json_each` element inside an `$elemMatch` subquery.
#[derive(Debug, Clone, Copy)]
enum Base<'a> {
	Doc,
	Elem { alias: &'a str },
}

pub(crate) struct SelectorCompiler<'a> {
	fields: &'a FieldMap,
	/// Dotted field paths backed by a `LOWER(...)` expression index.
	lower_indexed: &'a HashSet<Box<str>>,
	alias_seq: usize,
}

impl<'a> SelectorCompiler<'a> {
	pub fn new(fields: &'a FieldMap, lower_indexed: &'a HashSet<Box<str>>) -> Self {
		Self { fields, lower_indexed, alias_seq: 0 }
	}

	/// Compiles a whole selector. `Ok(None)` means "not representable".
	pub fn compile(&mut self, selector: &Value) -> ClResult<Option<Fragment>> {
		self.compile_selector(selector, Base::Doc, 0)
	}

	/// Compiles a single top-level selector entry — the planner uses this
	/// to split partially representable selectors.
	pub fn compile_entry(&mut self, key: &str, value: &Value) -> ClResult<Option<Fragment>> {
		self.selector_entry(key, value, Base::Doc, 0)
	}

	fn next_alias(&mut self) -> String {
		self.alias_seq += 1;
		format!("e{}", self.alias_seq)
	}

	fn compile_selector(&mut self, selector: &Value, base: Base, depth: usize) -> ClResult<Option<Fragment>> {
		if depth > MAX_DEPTH {
			return Ok(None);
		}
		let Value::Object(entries) = selector else {
			return Err(Error::ValidationError("selector must be an object".into()));
		};
		if entries.is_empty() {
			return Ok(Some(Fragment::fixed("1=1")));
		}

		let mut parts: Vec<Fragment> = Vec::with_capacity(entries.len());
		for (key, value) in entries {
			match self.selector_entry(key, value, base, depth)? {
				Some(fragment) => parts.push(fragment),
				None => return Ok(None),
			}
		}
		Ok(Some(and_join(parts)))
	}

	fn selector_entry(&mut self, key: &str, value: &Value, base: Base, depth: usize) -> ClResult<Option<Fragment>> {
		match key {
			"$and" => {
				let clauses = logical_clauses(key, value)?;
				let mut parts = Vec::with_capacity(clauses.len());
				for clause in clauses {
					match self.compile_selector(clause, base, depth + 1)? {
						Some(fragment) => parts.push(fragment),
						None => return Ok(None),
					}
				}
				Ok(Some(and_join(parts)))
			}
			"$or" => {
				let clauses = logical_clauses(key, value)?;
				let mut parts = Vec::with_capacity(clauses.len());
				for clause in clauses {
					match self.compile_selector(clause, base, depth + 1)? {
						Some(fragment) => parts.push(fragment),
						None => return Ok(None),
					}
				}
				Ok(Some(or_join(parts)))
			}
			"$nor" => {
				let clauses = logical_clauses(key, value)?;
				let mut parts = Vec::with_capacity(clauses.len());
				for clause in clauses {
					match self.compile_selector(clause, base, depth + 1)? {
						Some(fragment) => parts.push(fragment),
						None => return Ok(None),
					}
				}
				let inner = or_join(parts);
				Ok(Some(Fragment::new(
					format!("NOT (COALESCE(({}), 0))", inner.sql),
					inner.args,
				)))
			}
			_ if key.starts_with('$') => {
				Err(Error::ValidationError(format!("unknown top-level operator {}", key)))
			}
			field => self.compile_field(field, value, base, depth),
		}
	}

	/// One `{ field: … }` entry: implicit `$eq`, an operator expression, or
	/// sub-field descent for plain nested objects.
	fn compile_field(&mut self, field: &str, value: &Value, base: Base, depth: usize) -> ClResult<Option<Fragment>> {
		if depth > MAX_DEPTH {
			return Ok(None);
		}
		match value {
			Value::Object(entries) => {
				if entries.is_empty() {
					return Ok(Some(Fragment::fixed("1=1")));
				}
				let mut parts: Vec<Fragment> = Vec::new();
				// `$regex` and `$options` are one predicate, not two.
				let options = entries.get("$options").and_then(Value::as_str).unwrap_or("");
				for (op, operand_value) in entries {
					let compiled = if op.starts_with('$') {
						if op == "$options" {
							if !entries.contains_key("$regex") {
								regex_like::validate_options(options)?;
							}
							continue;
						}
						self.compile_operator(field, op, operand_value, options, base, depth)?
					} else {
						// Plain key inside an operator expression descends
						// into the JSON path.
						self.compile_field(&format!("{}.{}", field, op), operand_value, base, depth + 1)?
					};
					match compiled {
						Some(fragment) => parts.push(fragment),
						None => return Ok(None),
					}
				}
				Ok(Some(and_join(parts)))
			}
			// Implicit $eq; array and object operands need deep equality.
			_ => self.leaf_op(field, "$eq", value, "", base, depth),
		}
	}

	fn compile_operator(
		&mut self,
		field: &str,
		op: &str,
		value: &Value,
		options: &str,
		base: Base,
		depth: usize,
	) -> ClResult<Option<Fragment>> {
		match op {
			"$not" => self.compile_not(field, value, base, depth),
			"$elemMatch" => self.compile_elem_match(field, value, base, depth),
			"$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" | "$in" | "$nin" | "$exists"
			| "$type" | "$size" | "$mod" | "$regex" => {
				self.leaf_op(field, op, value, options, base, depth)
			}
			_ => Err(Error::ValidationError(format!("unsupported operator {}", op))),
		}
	}

	/// Tolerant `$not`: primitives mean `$eq`, an empty object is an
	/// impossible condition, logical keys mean a nested selector, plain
	/// objects mean equality against the object.
	fn compile_not(&mut self, field: &str, value: &Value, base: Base, depth: usize) -> ClResult<Option<Fragment>> {
		let inner = match value {
			Value::Object(entries) if entries.is_empty() => Some(Fragment::fixed("1=0")),
			Value::Object(entries) => {
				if entries.keys().any(|k| matches!(k.as_str(), "$and" | "$or" | "$nor")) {
					self.compile_selector(value, base, depth + 1)?
				} else if entries.keys().any(|k| k.starts_with('$')) {
					self.compile_field(field, value, base, depth + 1)?
				} else {
					// Equality against a plain object: deep equality, which
					// only the matcher can do.
					None
				}
			}
			Value::Array(_) => None,
			primitive => self.leaf_op(field, "$eq", primitive, "", base, depth)?,
		};
		Ok(inner.map(|f| Fragment::new(format!("NOT (COALESCE(({}), 0))", f.sql), f.args)))
	}

	fn compile_elem_match(&mut self, field: &str, criteria: &Value, base: Base, depth: usize) -> ClResult<Option<Fragment>> {
		let Some(operand) = self.operand(field, base) else {
			return Ok(None);
		};
		let Some((doc_expr, path)) = operand.each.clone() else {
			// First-class columns are never arrays.
			return Ok(Some(Fragment::fixed("1=0")));
		};

		let alias = self.next_alias();
		let elem_base = Base::Elem { alias: &alias };
		let element = element_operand(&alias);

		let inner = match criteria {
			Value::Object(entries) if !entries.is_empty() => {
				let mut parts: Vec<Fragment> = Vec::new();
				let options = entries.get("$options").and_then(Value::as_str).unwrap_or("");
				for (key, value) in entries {
					let compiled = match key.as_str() {
						"$and" | "$or" | "$nor" => self.selector_entry(key, value, elem_base, depth + 1)?,
						"$options" => continue,
						"$not" => self.not_on_operand(&element, value, depth)?,
						op if op.starts_with('$') => {
							self.translate_leaf(&element, op, value, options, None, depth)?
						}
						// Field-name keys predicate on element properties.
						field_key => self.compile_field(field_key, value, elem_base, depth + 1)?,
					};
					match compiled {
						Some(fragment) => parts.push(fragment),
						None => return Ok(None),
					}
				}
				Some(and_join(parts))
			}
			Value::Object(_) => Some(Fragment::fixed("1=1")),
			// Scalar criteria: equality against the element itself.
			scalar => operators::eq_fragment(&element, scalar),
		};

		let Some(inner) = inner else {
			return Ok(None);
		};
		let array_guard = format!("json_type({}, '{}') = 'array'", doc_expr, path);
		Ok(Some(Fragment::new(
			format!(
				"EXISTS (SELECT 1 FROM json_each({}, '{}') AS {} WHERE {} AND COALESCE(({}), 0))",
				doc_expr, path, alias, array_guard, inner.sql
			),
			inner.args,
		)))
	}

	/// `$not` applied directly to an `$elemMatch` element.
	fn not_on_operand(&mut self, element: &Operand, value: &Value, depth: usize) -> ClResult<Option<Fragment>> {
		let inner = match value {
			Value::Object(entries) if entries.is_empty() => Some(Fragment::fixed("1=0")),
			Value::Object(entries) if entries.keys().any(|k| k.starts_with('$')) => {
				let options = entries.get("$options").and_then(Value::as_str).unwrap_or("");
				let mut parts = Vec::new();
				for (op, v) in entries {
					if op == "$options" {
						continue;
					}
					match self.translate_leaf(element, op, v, options, None, depth)? {
						Some(fragment) => parts.push(fragment),
						None => return Ok(None),
					}
				}
				Some(and_join(parts))
			}
			Value::Object(_) | Value::Array(_) => None,
			primitive => operators::eq_fragment(element, primitive),
		};
		Ok(inner.map(|f| Fragment::new(format!("NOT (COALESCE(({}), 0))", f.sql), f.args)))
	}

	/// A leaf operator on a document field, with implicit element matching
	/// when the field is array-typed.
	fn leaf_op(
		&mut self,
		field: &str,
		op: &str,
		value: &Value,
		options: &str,
		base: Base,
		depth: usize,
	) -> ClResult<Option<Fragment>> {
		let Some(operand) = self.operand(field, base) else {
			return Ok(None);
		};

		if operand.ty == FieldType::Array && element_applicable(op) {
			let Some((doc_expr, path)) = operand.each.clone() else {
				return Ok(Some(Fragment::fixed("1=0")));
			};
			let alias = self.next_alias();
			let element = element_operand(&alias);
			// Negations invert the whole quantifier: "no element matches",
			// not "some element does not match".
			let (inner_op, negate) = match op {
				"$ne" => ("$eq", true),
				"$nin" => ("$in", true),
				other => (other, false),
			};
			// A LOWER() index on the field expression does not cover its
			// elements, so no index hint here.
			let Some(inner) = self.translate_leaf(&element, inner_op, value, options, None, depth)? else {
				return Ok(None);
			};
			let exists = format!(
				"EXISTS (SELECT 1 FROM json_each({}, '{}') AS {} WHERE json_type({}, '{}') = 'array' AND COALESCE(({}), 0))",
				doc_expr, path, alias, doc_expr, path, inner.sql
			);
			// A null operand also matches an absent or null field, not just
			// a null element.
			let null_matches_absent = match op {
				"$eq" | "$ne" | "$gte" | "$lte" => value.is_null(),
				"$in" | "$nin" => value.as_array().is_some_and(|l| l.iter().any(Value::is_null)),
				_ => false,
			};
			let positive = if null_matches_absent {
				format!("({} IS NULL OR {})", operand.expr, exists)
			} else {
				exists
			};
			let sql = if negate { format!("NOT ({})", positive) } else { positive };
			return Ok(Some(Fragment::new(sql, inner.args)));
		}

		self.translate_leaf(&operand, op, value, options, Some(field), depth)
	}

	/// Dispatches one leaf operator over a concrete operand.
	fn translate_leaf(
		&mut self,
		operand: &Operand,
		op: &str,
		value: &Value,
		options: &str,
		field: Option<&str>,
		_depth: usize,
	) -> ClResult<Option<Fragment>> {
		let fragment = match op {
			"$eq" => operators::eq_fragment(operand, value),
			"$ne" => operators::ne_fragment(operand, value),
			"$gt" => operators::cmp_fragment(operand, ">", value),
			"$gte" => operators::cmp_fragment(operand, ">=", value),
			"$lt" => operators::cmp_fragment(operand, "<", value),
			"$lte" => operators::cmp_fragment(operand, "<=", value),
			"$in" => {
				let Some(items) = value.as_array() else {
					return Err(Error::ValidationError("$in expects an array".into()));
				};
				operators::in_fragment(operand, items)
			}
			"$nin" => {
				let Some(items) = value.as_array() else {
					return Err(Error::ValidationError("$nin expects an array".into()));
				};
				operators::nin_fragment(operand, items)
			}
			"$exists" => Some(operators::exists_fragment(operand, value)),
			"$type" => operators::type_fragment(operand, value),
			"$size" => operators::size_fragment(operand, value),
			"$mod" => operators::mod_fragment(operand, value)?,
			"$regex" => {
				let Some(pattern) = value.as_str() else {
					return Err(Error::ValidationError("$regex expects a string pattern".into()));
				};
				regex_like::validate_options(options)?;
				// Even when the reduction fails, the pattern itself must be
				// valid before the matcher is allowed to see it.
				matcher::compiled_regex(pattern, options)?;
				let lower_indexed =
					field.is_some_and(|f| self.lower_indexed.contains(f));
				operators::regex_fragment(operand, pattern, options, lower_indexed)
			}
			// Nested $elemMatch on a bare element: the matcher handles it.
			"$elemMatch" => None,
			other => {
				return Err(Error::ValidationError(format!("unsupported operator {}", other)));
			}
		};
		Ok(fragment)
	}

	fn operand(&mut self, field: &str, base: Base) -> Option<Operand> {
		match base {
			Base::Doc => match self.fields.resolve(field) {
				Resolution::Column(col) => Some(Operand {
					expr: col.name.to_string(),
					type_expr: None,
					each: None,
					ty: col.ty,
				}),
				Resolution::Json(json) => Some(Operand {
					expr: format!("json_extract(data, '{}')", json.path),
					type_expr: Some(format!("json_type(data, '{}')", json.path)),
					each: Some(("data".to_string(), json.path)),
					ty: json.ty,
				}),
				Resolution::Unsupported => None,
			},
			Base::Elem { alias } => {
				let path = fields::relative_json_path(field)?;
				let value_expr = format!("{}.value", alias);
				Some(Operand {
					expr: format!("json_extract({}, '{}')", value_expr, path),
					type_expr: Some(format!("json_type({}, '{}')", value_expr, path)),
					each: Some((value_expr, path)),
					ty: FieldType::Unknown,
				})
			}
		}
	}
}

/// The operand of one `json_each` row: its value and its reported type.
fn element_operand(alias: &str) -> Operand {
	Operand {
		expr: format!("{}.value", alias),
		type_expr: Some(format!("{}.type", alias)),
		each: None,
		ty: FieldType::Unknown,
	}
}

/// Operators that match against array elements implicitly.
fn element_applicable(op: &str) -> bool {
	matches!(op, "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" | "$in" | "$nin" | "$regex" | "$mod")
}

fn logical_clauses<'v>(key: &str, value: &'v Value) -> ClResult<&'v Vec<Value>> {
	match value.as_array() {
		Some(items) if !items.is_empty() => Ok(items),
		_ => Err(Error::ValidationError(format!("{} expects a non-empty array", key))),
	}
}

pub(crate) fn and_join(mut parts: Vec<Fragment>) -> Fragment {
	if parts.len() == 1 {
		return parts.remove(0);
	}
	let sql = parts.iter().map(|p| p.sql.as_str()).collect::<Vec<_>>().join(" AND ");
	let args = parts.into_iter().flat_map(|p| p.args).collect();
	Fragment::new(sql, args)
}

/// `$or` output is always parenthesised — joined under an enclosing `AND`
/// without parentheses it would silently change precedence.
fn or_join(mut parts: Vec<Fragment>) -> Fragment {
	if parts.len() == 1 {
		return parts.remove(0);
	}
	let sql = format!(
		"({})",
		parts.iter().map(|p| format!("({})", p.sql)).collect::<Vec<_>>().join(" OR ")
	);
	let args = parts.into_iter().flat_map(|p| p.args).collect();
	Fragment::new(sql, args)
}

// Validation
//************

/// Pre-execution validation: hard input errors (bad regex options, invalid
/// patterns, malformed operators) surface here, before any SQL runs and
/// before the matcher sees the selector.
pub(crate) fn validate_selector(selector: &Value) -> ClResult<()> {
	validate_level(selector, 0)
}

fn validate_level(selector: &Value, depth: usize) -> ClResult<()> {
	if depth > MAX_DEPTH {
		return Err(Error::ValidationError("selector nesting too deep".into()));
	}
	let Value::Object(entries) = selector else {
		return Err(Error::ValidationError("selector must be an object".into()));
	};
	for (key, value) in entries {
		match key.as_str() {
			"$and" | "$or" | "$nor" => {
				for clause in logical_clauses(key, value)? {
					validate_level(clause, depth + 1)?;
				}
			}
			_ if key.starts_with('$') => {
				return Err(Error::ValidationError(format!("unknown top-level operator {}", key)));
			}
			_ => validate_field_value(value, depth)?,
		}
	}
	Ok(())
}

fn validate_field_value(value: &Value, depth: usize) -> ClResult<()> {
	if depth > MAX_DEPTH {
		return Err(Error::ValidationError("selector nesting too deep".into()));
	}
	let Value::Object(entries) = value else {
		return Ok(());
	};
	let options = entries.get("$options").and_then(Value::as_str).unwrap_or("");
	for (op, v) in entries {
		match op.as_str() {
			"$regex" => {
				let Some(pattern) = v.as_str() else {
					return Err(Error::ValidationError("$regex expects a string pattern".into()));
				};
				regex_like::validate_options(options)?;
				matcher::compiled_regex(pattern, options)?;
			}
			"$options" => regex_like::validate_options(options)?,
			"$in" | "$nin" => {
				if !v.is_array() {
					return Err(Error::ValidationError(format!("{} expects an array", op)));
				}
			}
			"$mod" => {
				let ok = v.as_array().is_some_and(|a| {
					a.len() == 2 && a[0].is_number() && a[1].is_number() && a[0].as_f64() != Some(0.0)
				});
				if !ok {
					return Err(Error::ValidationError("$mod expects [divisor, remainder] with a non-zero divisor".into()));
				}
			}
			"$elemMatch" => {
				if let Value::Object(inner) = v {
					for (k, sub) in inner {
						match k.as_str() {
							"$and" | "$or" | "$nor" => {
								for clause in logical_clauses(k, sub)? {
									validate_level(clause, depth + 1)?;
								}
							}
							op2 if op2.starts_with('$') => {
								validate_field_value(&single_op(op2, sub), depth + 1)?;
							}
							_ => validate_field_value(sub, depth + 1)?,
						}
					}
				}
			}
			"$not" => validate_field_value(v, depth + 1)?,
			"$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" | "$exists" | "$type" | "$size" => {}
			other if other.starts_with('$') => {
				return Err(Error::ValidationError(format!("unsupported operator {}", other)));
			}
			// Plain keys descend into the JSON path.
			_ => validate_field_value(v, depth + 1)?,
		}
	}
	Ok(())
}

fn single_op(op: &str, value: &Value) -> Value {
	let mut map = serde_json::Map::new();
	map.insert(op.to_string(), value.clone());
	Value::Object(map)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::operators::SqlArg;
	use rill::doc_adapter::CollectionSchema;
	use serde_json::json;

	fn fields() -> FieldMap {
		let schema: CollectionSchema = serde_json::from_value(json!({
			"version": 0,
			"primaryKey": "id",
			"properties": {
				"id": {"type": "string"},
				"age": {"type": "number"},
				"name": {"type": "string"},
				"status": {"type": "string"},
				"tags": {"type": "array", "items": {"type": "string"}},
				"users": {
					"type": "array",
					"items": {"type": "object", "properties": {"name": {"type": "string"}}}
				}
			}
		}))
		.unwrap();
		FieldMap::from_schema(&schema)
	}

	fn compile(selector: serde_json::Value) -> Option<Fragment> {
		let fields = fields();
		let lower = HashSet::new();
		SelectorCompiler::new(&fields, &lower).compile(&selector).unwrap()
	}

	#[test]
	fn empty_selector_matches_everything() {
		assert_eq!(compile(json!({})).unwrap().sql, "1=1");
	}

	#[test]
	fn implicit_eq_on_typed_field() {
		let f = compile(json!({"status": "active"})).unwrap();
		assert_eq!(
			f.sql,
			"(json_type(data, '$.status') = 'text' AND json_extract(data, '$.status') = ?)"
		);
		assert_eq!(f.args, vec![SqlArg::Text("active".into())]);
	}

	#[test]
	fn siblings_join_under_and() {
		let f = compile(json!({"age": {"$gte": 20, "$lte": 40}})).unwrap();
		assert!(f.sql.contains(">= ?"));
		assert!(f.sql.contains("<= ?"));
		assert!(f.sql.contains(" AND "));
		assert_eq!(f.args.len(), 2);
	}

	#[test]
	fn or_is_always_parenthesised() {
		let or_only = compile(json!({"$or": [{"age": {"$lt": 20}}, {"age": {"$gt": 40}}]})).unwrap();
		assert!(or_only.sql.starts_with('(') && or_only.sql.ends_with(')'));

		// Embedded under an implicit AND the whole OR group must stay one
		// parenthesised term.
		let combined = compile(json!({
			"status": "active",
			"$or": [{"age": {"$lt": 20}}, {"age": {"$gt": 40}}]
		}))
		.unwrap();
		assert!(combined.sql.contains(&or_only.sql));
		assert!(combined.sql.contains(" AND "));
	}

	#[test]
	fn nor_collapses_to_two_valued() {
		let f = compile(json!({"$nor": [{"age": 1}, {"age": 2}]})).unwrap();
		assert!(f.sql.starts_with("NOT (COALESCE(("));
	}

	#[test]
	fn not_wraps_with_coalesce() {
		let f = compile(json!({
			"age": {"$not": {"$or": [{"age": {"$lt": 20}}, {"age": {"$gt": 40}}]}}
		}))
		.unwrap();
		assert!(f.sql.starts_with("NOT (COALESCE(("));
		assert!(f.sql.contains("< ?"));
		assert!(f.sql.contains("> ?"));
		assert_eq!(f.args, vec![SqlArg::Int(20), SqlArg::Int(40)]);
	}

	#[test]
	fn tolerant_not_accepts_primitives() {
		let f = compile(json!({"age": {"$not": 30}})).unwrap();
		assert!(f.sql.starts_with("NOT (COALESCE(("));
		assert!(f.sql.contains("= ?"));
	}

	#[test]
	fn tolerant_not_of_empty_object_matches_everything() {
		let f = compile(json!({"age": {"$not": {}}})).unwrap();
		assert_eq!(f.sql, "NOT (COALESCE((1=0), 0))");
	}

	#[test]
	fn scalar_predicate_on_array_field_wraps_in_exists() {
		let f = compile(json!({"tags": "urgent"})).unwrap();
		assert!(f.sql.starts_with("EXISTS (SELECT 1 FROM json_each(data, '$.tags') AS e1"));
		assert!(f.sql.contains("json_type(data, '$.tags') = 'array'"));
		assert!(f.sql.contains("e1.value = ?"));
	}

	#[test]
	fn ne_on_array_field_negates_the_quantifier() {
		let f = compile(json!({"tags": {"$ne": "urgent"}})).unwrap();
		assert!(f.sql.starts_with("NOT (EXISTS"));
	}

	#[test]
	fn elem_match_with_operator_criteria() {
		let f = compile(json!({"tags": {"$elemMatch": {"$eq": "urgent"}}})).unwrap();
		assert!(f.sql.contains("json_each(data, '$.tags')"));
		assert!(f.sql.contains("COALESCE(("));
		assert_eq!(f.args, vec![SqlArg::Text("urgent".into())]);
	}

	#[test]
	fn elem_match_on_element_properties() {
		let f = compile(json!({"users": {"$elemMatch": {"name": "Alice", "$or": [{"name": "Bob"}, {"name": "Alice"}]}}}))
			.unwrap();
		assert!(f.sql.contains("json_extract(e1.value, '$.name')"));
	}

	#[test]
	fn implicit_array_traversal_is_not_representable() {
		assert!(compile(json!({"users.name": "Alice"})).is_none());
	}

	#[test]
	fn deep_equality_is_not_representable() {
		assert!(compile(json!({"tags": ["a", "b"]})).is_none());
		assert!(compile(json!({"age": {"$not": {"x": 1}}})).is_none());
	}

	#[test]
	fn nested_object_descends_into_path() {
		let f = compile(json!({"address": {"city": "Berlin"}})).unwrap();
		assert!(f.sql.contains("json_extract(data, '$.address.city')"));
	}

	#[test]
	fn unknown_operator_is_a_hard_error() {
		let fields = fields();
		let lower = HashSet::new();
		let res = SelectorCompiler::new(&fields, &lower).compile(&json!({"age": {"$foo": 1}}));
		assert!(matches!(res, Err(Error::ValidationError(_))));
	}

	#[test]
	fn bad_regex_options_are_a_hard_error() {
		let fields = fields();
		let lower = HashSet::new();
		let res = SelectorCompiler::new(&fields, &lower)
			.compile(&json!({"name": {"$regex": "^x", "$options": "g"}}));
		assert!(matches!(res, Err(Error::ConfigError(_))));
	}

	#[test]
	fn empty_logical_arrays_are_rejected() {
		assert!(validate_selector(&json!({"$and": []})).is_err());
		assert!(validate_selector(&json!({"$or": []})).is_err());
	}

	#[test]
	fn validate_accepts_the_full_grammar() {
		let sel = json!({
			"$and": [
				{"age": {"$gte": 20}},
				{"$or": [{"name": {"$regex": "^A"}}, {"tags": {"$elemMatch": {"$eq": "x"}}}]}
			],
			"status": {"$in": ["a", "b"]},
			"score": {"$mod": [3, 1]}
		});
		assert!(validate_selector(&sel).is_ok());
	}

	#[test]
	fn determinism_under_key_reordering() {
		let a = compile(json!({"age": {"$gte": 20, "$lte": 40}})).unwrap();
		let b = compile(json!({"age": {"$lte": 40, "$gte": 20}})).unwrap();
		assert_eq!(a.sql, b.sql);
		assert_eq!(a.args, b.args);
	}
}

// vim: ts=4
