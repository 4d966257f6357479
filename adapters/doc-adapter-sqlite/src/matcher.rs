//! In-process Mango selector evaluation.
//!
//! This is the reference semantics: whatever the SQL translation cannot
//! express runs through here, and the SQL path is expected to return exactly
//! the documents this module accepts. Implicit array traversal (a named path
//! segment crossing an array) lives only here — SQL declares it
//! unrepresentable on purpose; do not "optimise" it into a translation.

use regex::Regex;
use rill::prelude::*;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::{Arc, Mutex, OnceLock};

use rill::doc_adapter::SortField;

use crate::sieve::SieveCache;
use crate::stable::{stable_eq, stable_string};

/// Process-global regex compilation cache. Purely additive; bounded.
static REGEX_CACHE: OnceLock<Mutex<SieveCache<String, Arc<Regex>>>> = OnceLock::new();

const REGEX_CACHE_CAPACITY: usize = 100;

/// Compiles (or fetches) a `$regex` pattern with MongoDB option flags.
pub(crate) fn compiled_regex(pattern: &str, options: &str) -> ClResult<Arc<Regex>> {
	let key = format!("{}\u{0}{}", options, pattern);
	let cache = REGEX_CACHE.get_or_init(|| Mutex::new(SieveCache::new(REGEX_CACHE_CAPACITY)));

	if let Ok(mut cache) = cache.lock() {
		if let Some(re) = cache.get(&key) {
			return Ok(Arc::clone(re));
		}
	}

	let mut builder = regex::RegexBuilder::new(pattern);
	builder
		.case_insensitive(options.contains('i'))
		.multi_line(options.contains('m'))
		.dot_matches_new_line(options.contains('s'))
		.ignore_whitespace(options.contains('x'));
	// `u` is a no-op: the regex crate is Unicode-aware by default.
	let re = Arc::new(
		builder
			.build()
			.map_err(|e| Error::ConfigError(format!("invalid regex pattern: {}", e)))?,
	);

	if let Ok(mut cache) = cache.lock() {
		cache.insert(key, Arc::clone(&re));
	}
	Ok(re)
}

/// Evaluates a selector against one document.
pub fn matches_selector(selector: &Value, doc: &Value) -> bool {
	let Value::Object(entries) = selector else {
		return false;
	};
	entries.iter().all(|(key, value)| match key.as_str() {
		"$and" => value
			.as_array()
			.is_some_and(|clauses| clauses.iter().all(|c| matches_selector(c, doc))),
		"$or" => value
			.as_array()
			.is_some_and(|clauses| clauses.iter().any(|c| matches_selector(c, doc))),
		"$nor" => value
			.as_array()
			.is_some_and(|clauses| !clauses.iter().any(|c| matches_selector(c, doc))),
		k if k.starts_with('$') => false,
		field => match_field(doc, field, value),
	})
}

fn match_field(doc: &Value, field: &str, value: &Value) -> bool {
	match value {
		Value::Object(entries) => {
			if entries.is_empty() {
				return true;
			}
			let options = entries.get("$options").and_then(Value::as_str).unwrap_or("");
			entries.iter().all(|(op, v)| {
				if op == "$options" {
					return true;
				}
				if op.starts_with('$') {
					apply_operator(doc, field, op, v, options)
				} else {
					// Plain keys descend into the JSON path.
					match_field(doc, &format!("{}.{}", field, op), v)
				}
			})
		}
		_ => eval_eq_on_field(doc, field, value),
	}
}

fn apply_operator(doc: &Value, field: &str, op: &str, value: &Value, options: &str) -> bool {
	match op {
		"$eq" => eval_eq_on_field(doc, field, value),
		"$ne" => !eval_eq_on_field(doc, field, value),
		"$gt" => any_candidate(doc, field, |c| cmp_scalar(c, value) == Some(Ordering::Greater)),
		"$gte" => {
			if value.is_null() {
				return eval_eq_on_field(doc, field, value);
			}
			any_candidate(doc, field, |c| {
				matches!(cmp_scalar(c, value), Some(Ordering::Greater | Ordering::Equal))
			})
		}
		"$lt" => any_candidate(doc, field, |c| cmp_scalar(c, value) == Some(Ordering::Less)),
		"$lte" => {
			if value.is_null() {
				return eval_eq_on_field(doc, field, value);
			}
			any_candidate(doc, field, |c| {
				matches!(cmp_scalar(c, value), Some(Ordering::Less | Ordering::Equal))
			})
		}
		"$in" => value.as_array().is_some_and(|list| eval_in_on_field(doc, field, list)),
		"$nin" => value.as_array().is_some_and(|list| !eval_in_on_field(doc, field, list)),
		"$exists" => {
			let present = !resolve_path(doc, field).is_empty();
			present == crate::operators::value_truthy(value)
		}
		"$type" => {
			let names: Vec<&str> = match value {
				Value::String(s) => vec![s.as_str()],
				Value::Array(items) => {
					match items.iter().map(Value::as_str).collect::<Option<Vec<_>>>() {
						Some(names) => names,
						None => return false,
					}
				}
				_ => return false,
			};
			resolve_path(doc, field)
				.iter()
				.any(|c| names.iter().any(|n| type_name_matches(c, n)))
		}
		"$size" => {
			let Some(n) = value.as_i64() else {
				return false;
			};
			resolve_path(doc, field)
				.iter()
				.any(|c| c.as_array().is_some_and(|a| a.len() as i64 == n))
		}
		"$mod" => {
			let Some(pair) = value.as_array() else {
				return false;
			};
			let (Some(d), Some(r)) = (
				pair.first().and_then(Value::as_f64),
				pair.get(1).and_then(Value::as_f64),
			) else {
				return false;
			};
			if d == 0.0 {
				return false;
			}
			any_candidate(doc, field, |c| {
				c.as_f64().is_some_and(|f| f - (f / d).trunc() * d == r)
			})
		}
		"$regex" => {
			let Some(pattern) = value.as_str() else {
				return false;
			};
			let Ok(re) = compiled_regex(pattern, options) else {
				return false;
			};
			any_candidate(doc, field, |c| c.as_str().is_some_and(|s| re.is_match(s)))
		}
		"$elemMatch" => resolve_path(doc, field)
			.iter()
			.any(|c| c.as_array().is_some_and(|arr| arr.iter().any(|e| elem_matches(e, value)))),
		"$not" => !eval_not_inner(doc, field, value),
		_ => false,
	}
}

/// Tolerant `$not` operand evaluation, mirroring the compiler: primitives
/// mean `$eq`, an empty object never matches, logical keys mean a nested
/// selector, plain objects mean object equality.
fn eval_not_inner(doc: &Value, field: &str, value: &Value) -> bool {
	match value {
		Value::Object(entries) if entries.is_empty() => false,
		Value::Object(entries) => {
			if entries.keys().any(|k| matches!(k.as_str(), "$and" | "$or" | "$nor")) {
				matches_selector(value, doc)
			} else if entries.keys().any(|k| k.starts_with('$')) {
				match_field(doc, field, value)
			} else {
				eval_eq_on_field(doc, field, value)
			}
		}
		_ => eval_eq_on_field(doc, field, value),
	}
}

/// One `$elemMatch` element against the criteria.
fn elem_matches(element: &Value, criteria: &Value) -> bool {
	match criteria {
		Value::Object(entries) if !entries.is_empty() => {
			let options = entries.get("$options").and_then(Value::as_str).unwrap_or("");
			entries.iter().all(|(key, v)| match key.as_str() {
				"$and" => v
					.as_array()
					.is_some_and(|cs| cs.iter().all(|c| matches_selector(c, element))),
				"$or" => v
					.as_array()
					.is_some_and(|cs| cs.iter().any(|c| matches_selector(c, element))),
				"$nor" => v
					.as_array()
					.is_some_and(|cs| !cs.iter().any(|c| matches_selector(c, element))),
				"$options" => true,
				"$not" => !elem_not_inner(element, v, options),
				op if op.starts_with('$') => elem_op_single(element, op, v, options),
				field => match_field(element, field, v),
			})
		}
		Value::Object(_) => true,
		scalar => eval_eq(element, scalar),
	}
}

/// `$not` inside `$elemMatch`: the operand is either operator criteria or a
/// primitive equality.
fn elem_not_inner(element: &Value, value: &Value, options: &str) -> bool {
	match value {
		Value::Object(entries) if entries.is_empty() => false,
		Value::Object(entries) if entries.keys().any(|k| k.starts_with('$')) => entries
			.iter()
			.filter(|(k, _)| k.as_str() != "$options")
			.all(|(op, v)| elem_op_single(element, op, v, options)),
		Value::Object(_) | Value::Array(_) => eval_eq(element, value),
		primitive => eval_eq(element, primitive),
	}
}

/// A single operator applied to an element value itself.
fn elem_op_single(element: &Value, op: &str, value: &Value, options: &str) -> bool {
	match op {
		"$eq" => eval_eq(element, value),
		"$ne" => !eval_eq(element, value),
		"$gt" => cmp_scalar(element, value) == Some(Ordering::Greater),
		"$gte" => {
			value.is_null() && element.is_null()
				|| matches!(cmp_scalar(element, value), Some(Ordering::Greater | Ordering::Equal))
		}
		"$lt" => cmp_scalar(element, value) == Some(Ordering::Less),
		"$lte" => {
			value.is_null() && element.is_null()
				|| matches!(cmp_scalar(element, value), Some(Ordering::Less | Ordering::Equal))
		}
		"$in" => value.as_array().is_some_and(|list| list.iter().any(|v| eval_eq(element, v))),
		"$nin" => value.as_array().is_some_and(|list| !list.iter().any(|v| eval_eq(element, v))),
		"$exists" => crate::operators::value_truthy(value),
		"$type" => match value {
			Value::String(s) => type_name_matches(element, s),
			Value::Array(items) => items
				.iter()
				.filter_map(Value::as_str)
				.any(|n| type_name_matches(element, n)),
			_ => false,
		},
		"$size" => value
			.as_i64()
			.is_some_and(|n| element.as_array().is_some_and(|a| a.len() as i64 == n)),
		"$mod" => {
			let Some(pair) = value.as_array() else {
				return false;
			};
			let (Some(d), Some(r)) = (
				pair.first().and_then(Value::as_f64),
				pair.get(1).and_then(Value::as_f64),
			) else {
				return false;
			};
			d != 0.0 && element.as_f64().is_some_and(|f| f - (f / d).trunc() * d == r)
		}
		"$regex" => {
			let Some(pattern) = value.as_str() else {
				return false;
			};
			let Ok(re) = compiled_regex(pattern, options) else {
				return false;
			};
			element.as_str().is_some_and(|s| re.is_match(s))
		}
		"$elemMatch" => element
			.as_array()
			.is_some_and(|arr| arr.iter().any(|e| elem_matches(e, value))),
		"$not" => !elem_not_inner(element, value, options),
		_ => false,
	}
}

// Path resolution
//*****************

/// Resolves a dotted path, flat-mapping through arrays at every non-numeric
/// segment — MongoDB's implicit traversal. The result is every value the
/// path can reach; empty means "absent".
pub(crate) fn resolve_path<'v>(doc: &'v Value, path: &str) -> Vec<&'v Value> {
	let mut current = vec![doc];
	for seg in path.split('.') {
		let mut next: Vec<&Value> = Vec::new();
		let index: Option<usize> =
			if seg.bytes().all(|b| b.is_ascii_digit()) && !seg.is_empty() { seg.parse().ok() } else { None };
		for value in current {
			match value {
				Value::Object(map) => {
					if let Some(v) = map.get(seg) {
						next.push(v);
					}
				}
				Value::Array(items) => match index {
					Some(i) => {
						if let Some(v) = items.get(i) {
							next.push(v);
						}
					}
					None => {
						for item in items {
							if let Value::Object(map) = item {
								if let Some(v) = map.get(seg) {
									next.push(v);
								}
							}
						}
					}
				},
				_ => {}
			}
		}
		current = next;
		if current.is_empty() {
			break;
		}
	}
	current
}

/// Direct path lookup without traversal, for sorting.
pub(crate) fn get_path<'v>(doc: &'v Value, path: &str) -> Option<&'v Value> {
	let mut current = doc;
	for seg in path.split('.') {
		current = match current {
			Value::Object(map) => map.get(seg)?,
			Value::Array(items) => {
				let idx: usize = seg.parse().ok()?;
				items.get(idx)?
			}
			_ => return None,
		};
	}
	Some(current)
}

// Candidate evaluation
//**********************

/// Applies a predicate to every resolved value and, for arrays, every
/// element — the implicit element matching of comparison operators.
fn any_candidate(doc: &Value, field: &str, pred: impl Fn(&Value) -> bool) -> bool {
	for candidate in resolve_path(doc, field) {
		if pred(candidate) {
			return true;
		}
		if let Value::Array(items) = candidate {
			if items.iter().any(&pred) {
				return true;
			}
		}
	}
	false
}

/// `null` matches an absent field, a stored null, and an array containing
/// null.
fn matches_null(doc: &Value, field: &str) -> bool {
	let candidates = resolve_path(doc, field);
	candidates.is_empty()
		|| candidates.iter().any(|c| {
			c.is_null() || c.as_array().is_some_and(|a| a.iter().any(Value::is_null))
		})
}

fn eval_eq_on_field(doc: &Value, field: &str, value: &Value) -> bool {
	if value.is_null() {
		return matches_null(doc, field);
	}
	let candidates = resolve_path(doc, field);
	for candidate in &candidates {
		if eval_eq(candidate, value) {
			return true;
		}
		if let Value::Array(items) = candidate {
			if items.iter().any(|e| eval_eq(e, value)) {
				return true;
			}
		}
	}
	false
}

fn eval_in_on_field(doc: &Value, field: &str, list: &[Value]) -> bool {
	if list.iter().any(Value::is_null) && matches_null(doc, field) {
		return true;
	}
	list.iter().filter(|v| !v.is_null()).any(|v| {
		any_candidate(doc, field, |c| eval_eq(c, v))
	})
}

/// Scalar equality with numeric widening; containers compare structurally
/// through the stable serialiser, never by identity.
pub(crate) fn eval_eq(a: &Value, b: &Value) -> bool {
	match (a, b) {
		(Value::Null, Value::Null) => true,
		(Value::Bool(x), Value::Bool(y)) => x == y,
		(Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
			(Some(i), Some(j)) => i == j,
			_ => x.as_f64() == y.as_f64(),
		},
		(Value::String(x), Value::String(y)) => x == y,
		(Value::Array(_) | Value::Object(_), Value::Array(_) | Value::Object(_)) => stable_eq(a, b),
		_ => false,
	}
}

/// Type-strict scalar ordering: cross-type comparisons never order.
fn cmp_scalar(a: &Value, b: &Value) -> Option<Ordering> {
	match (a, b) {
		(Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
		(Value::String(x), Value::String(y)) => Some(x.cmp(y)),
		(Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
		_ => None,
	}
}

fn type_name_matches(value: &Value, name: &str) -> bool {
	match name {
		"string" => value.is_string(),
		"number" => value.is_number(),
		"boolean" | "bool" => value.is_boolean(),
		"array" => value.is_array(),
		"object" => value.is_object(),
		"null" => value.is_null(),
		_ => false,
	}
}

// Document ordering
//*******************

/// Total order over field values for sorting: absent and null sort first
/// (and equal, as SQL cannot tell them apart), then numbers, strings,
/// objects, arrays, booleans.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
	fn rank(v: Option<&Value>) -> u8 {
		match v {
			None | Some(Value::Null) => 0,
			Some(Value::Number(_)) => 1,
			Some(Value::String(_)) => 2,
			Some(Value::Object(_)) => 3,
			Some(Value::Array(_)) => 4,
			Some(Value::Bool(_)) => 5,
		}
	}
	let (ra, rb) = (rank(a), rank(b));
	if ra != rb {
		return ra.cmp(&rb);
	}
	match (a, b) {
		(Some(Value::Number(x)), Some(Value::Number(y))) => {
			x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal)
		}
		(Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
		(Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
		(Some(x @ (Value::Object(_) | Value::Array(_))), Some(y)) => {
			stable_string(x).cmp(&stable_string(y))
		}
		_ => Ordering::Equal,
	}
}

/// Comparator for a sort specification; ties break on nothing — callers
/// append the primary key themselves when they need total order.
pub(crate) fn compare_docs(a: &Value, b: &Value, sort: &[SortField]) -> Ordering {
	for field in sort {
		let ord = compare_values(get_path(a, &field.field), get_path(b, &field.field));
		let ord = if field.ascending { ord } else { ord.reverse() };
		if ord != Ordering::Equal {
			return ord;
		}
	}
	Ordering::Equal
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn implicit_eq_and_operators() {
		let doc = json!({"age": 30, "name": "Alice"});
		assert!(matches_selector(&json!({"age": 30}), &doc));
		assert!(matches_selector(&json!({"age": {"$gte": 30}}), &doc));
		assert!(!matches_selector(&json!({"age": {"$gt": 30}}), &doc));
		assert!(matches_selector(&json!({"age": {"$ne": 31}, "name": "Alice"}), &doc));
	}

	#[test]
	fn type_strict_comparisons() {
		let doc = json!({"age": "5"});
		// "5" > 3 is false: no cross-type ordering.
		assert!(!matches_selector(&json!({"age": {"$gt": 3}}), &doc));
		assert!(!matches_selector(&json!({"age": 5}), &doc));
	}

	#[test]
	fn eq_null_matches_absent() {
		let doc = json!({"a": 1});
		assert!(matches_selector(&json!({"b": null}), &doc));
		assert!(matches_selector(&json!({"b": {"$eq": null}}), &doc));
		assert!(!matches_selector(&json!({"a": null}), &doc));
		assert!(matches_selector(&json!({"c": {"$ne": 5}}), &doc));
	}

	#[test]
	fn implicit_array_traversal() {
		let doc = json!({"users": [{"name": "Alice"}, {"name": "Bob"}]});
		assert!(matches_selector(&json!({"users.name": "Alice"}), &doc));
		assert!(!matches_selector(&json!({"users.name": "Carol"}), &doc));
		assert!(matches_selector(&json!({"users.0.name": "Alice"}), &doc));
		assert!(!matches_selector(&json!({"users.1.name": "Alice"}), &doc));
	}

	#[test]
	fn array_element_matching() {
		let doc = json!({"tags": ["urgent", "home"]});
		assert!(matches_selector(&json!({"tags": "urgent"}), &doc));
		assert!(matches_selector(&json!({"tags": {"$in": ["urgent", "x"]}}), &doc));
		assert!(!matches_selector(&json!({"tags": {"$ne": "urgent"}}), &doc));
		assert!(matches_selector(&json!({"tags": {"$size": 2}}), &doc));
		assert!(matches_selector(&json!({"tags": {"$elemMatch": {"$eq": "home"}}}), &doc));
	}

	#[test]
	fn whole_array_equality_is_structural() {
		let doc = json!({"tags": ["a", "b"]});
		assert!(matches_selector(&json!({"tags": ["a", "b"]}), &doc));
		assert!(!matches_selector(&json!({"tags": ["b", "a"]}), &doc));
	}

	#[test]
	fn numeric_widening_reaches_into_containers() {
		// 1 and 1.0 are one number, as scalars and inside containers.
		assert!(eval_eq(&json!(1), &json!(1.0)));
		assert!(eval_eq(&json!([1]), &json!([1.0])));
		let doc = json!({"pair": [1, 2]});
		assert!(matches_selector(&json!({"pair": [1.0, 2.0]}), &doc));
	}

	#[test]
	fn elem_match_on_object_elements() {
		let doc = json!({"users": [{"name": "Alice", "age": 30}, {"name": "Bob", "age": 20}]});
		assert!(matches_selector(
			&json!({"users": {"$elemMatch": {"name": "Alice", "age": {"$gte": 25}}}}),
			&doc
		));
		assert!(!matches_selector(
			&json!({"users": {"$elemMatch": {"name": "Bob", "age": {"$gte": 25}}}}),
			&doc
		));
	}

	#[test]
	fn logical_operators() {
		let doc = json!({"age": 30});
		assert!(matches_selector(
			&json!({"$or": [{"age": {"$lt": 20}}, {"age": {"$gt": 25}}]}),
			&doc
		));
		assert!(matches_selector(
			&json!({"$nor": [{"age": {"$lt": 20}}, {"age": {"$gt": 40}}]}),
			&doc
		));
		assert!(!matches_selector(&json!({"$and": [{"age": 30}, {"age": 31}]}), &doc));
	}

	#[test]
	fn tolerant_not() {
		let doc = json!({"age": 30});
		assert!(matches_selector(&json!({"age": {"$not": {"$gt": 40}}}), &doc));
		assert!(!matches_selector(&json!({"age": {"$not": 30}}), &doc));
		// Empty object: impossible inner condition, so $not always matches.
		assert!(matches_selector(&json!({"age": {"$not": {}}}), &doc));
		// $not matches documents where the field is absent.
		assert!(matches_selector(&json!({"height": {"$not": {"$gt": 0}}}), &doc));
	}

	#[test]
	fn mod_uses_truncating_division() {
		let doc = json!({"n": 5.5});
		assert!(matches_selector(&json!({"n": {"$mod": [3, 2.5]}}), &doc));
		let doc = json!({"n": -7});
		assert!(matches_selector(&json!({"n": {"$mod": [3, -1]}}), &doc));
	}

	#[test]
	fn regex_options() {
		let doc = json!({"name": "ALICE"});
		assert!(matches_selector(&json!({"name": {"$regex": "^ali", "$options": "i"}}), &doc));
		assert!(!matches_selector(&json!({"name": {"$regex": "^ali"}}), &doc));
	}

	#[test]
	fn exists_distinguishes_null_from_absent() {
		let doc = json!({"a": null});
		assert!(matches_selector(&json!({"a": {"$exists": true}}), &doc));
		assert!(!matches_selector(&json!({"b": {"$exists": true}}), &doc));
		assert!(matches_selector(&json!({"b": {"$exists": false}}), &doc));
	}

	#[test]
	fn value_ordering_brackets() {
		let vals = [json!(null), json!(1), json!("a"), json!({"x": 1}), json!([1]), json!(true)];
		for w in vals.windows(2) {
			assert_eq!(compare_values(Some(&w[0]), Some(&w[1])), Ordering::Less);
		}
		assert_eq!(compare_values(None, Some(&json!(null))), Ordering::Equal);
	}

	#[test]
	fn sort_comparator_respects_direction() {
		let a = json!({"age": 20});
		let b = json!({"age": 30});
		let asc = vec![SortField { field: "age".into(), ascending: true }];
		let desc = vec![SortField { field: "age".into(), ascending: false }];
		assert_eq!(compare_docs(&a, &b, &asc), Ordering::Less);
		assert_eq!(compare_docs(&a, &b, &desc), Ordering::Greater);
	}
}

// vim: ts=4
