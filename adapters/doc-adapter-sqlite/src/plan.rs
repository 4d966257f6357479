//! Query planning: SQL-only vs. bipartite execution, cached per selector.
//!
//! A selector compiles either into one WHERE fragment, or — when parts of it
//! are unrepresentable — into a SQL prefilter plus a residual selector the
//! in-process matcher evaluates over the candidate rows. Plans are cached
//! per database, keyed by schema version and the selector's canonical form,
//! with SIEVE eviction.

use rill::prelude::*;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rill::doc_adapter::SortField;

use crate::compile::{self, SelectorCompiler};
use crate::fields::{FieldMap, FieldType, Resolution};
use crate::operators::Fragment;
use crate::sieve::SieveCache;
use crate::stable::stable_string;

pub(crate) type PlanCache = Mutex<SieveCache<Box<str>, Arc<Plan>>>;

/// Per-database plan cache capacity.
pub(crate) const PLAN_CACHE_CAPACITY: usize = 5_000;

#[derive(Debug)]
pub(crate) enum Plan {
	/// The whole selector runs in SQL.
	Sql(Fragment),
	/// SQL prefilter (when any top-level entry compiled) plus a residual
	/// selector for the matcher. An empty prefilter with a non-empty
	/// residual is the fully-unrepresentable case.
	Split {
		prefilter: Option<Fragment>,
		residual: Value,
	},
}

/// Resolves (or computes and caches) the plan for a selector. The cache is
/// shared per database, so entries are scoped by collection and schema
/// version — two collections may type the same field differently.
pub(crate) fn plan_selector(
	selector: &Value,
	collection: &str,
	schema_version: u32,
	fields: &FieldMap,
	lower_indexed: &HashSet<Box<str>>,
	cache: &PlanCache,
) -> ClResult<Arc<Plan>> {
	// Hard input errors surface before any SQL runs and before caching.
	compile::validate_selector(selector)?;

	let key: Box<str> =
		format!("{}_v{}_{}", collection, schema_version, stable_string(selector)).into();
	if let Ok(mut cache) = cache.lock() {
		if let Some(plan) = cache.get(&key) {
			return Ok(Arc::clone(plan));
		}
	}

	let mut compiler = SelectorCompiler::new(fields, lower_indexed);
	let plan = match compiler.compile(selector)? {
		Some(fragment) => Plan::Sql(fragment),
		None => split_selector(selector, &mut compiler)?,
	};

	let plan = Arc::new(plan);
	if let Ok(mut cache) = cache.lock() {
		cache.insert(key, Arc::clone(&plan));
	}
	Ok(plan)
}

/// Splits a partially representable selector entry-by-entry: representable
/// top-level entries join the prefilter under AND, the rest stays for the
/// matcher.
fn split_selector(selector: &Value, compiler: &mut SelectorCompiler) -> ClResult<Plan> {
	let Value::Object(entries) = selector else {
		return Err(Error::ValidationError("selector must be an object".into()));
	};

	let mut prefilter: Vec<Fragment> = Vec::new();
	let mut residual = serde_json::Map::new();
	for (key, value) in entries {
		match compiler.compile_entry(key, value)? {
			Some(fragment) => prefilter.push(fragment),
			None => {
				residual.insert(key.clone(), value.clone());
			}
		}
	}

	Ok(Plan::Split {
		prefilter: if prefilter.is_empty() { None } else { Some(compile::and_join(prefilter)) },
		residual: Value::Object(residual),
	})
}

/// Builds an ORDER BY clause when every sort field has a uniform SQL
/// ordering (first-class column or schema-typed scalar path). Mixed-type or
/// untyped fields fall back to in-process sorting, where MongoDB's type
/// brackets apply. Unless the sort already ends on the primary key, it is
/// appended as a tie-break so both paths are deterministic.
pub(crate) fn order_by_clause(sort: &[SortField], fields: &FieldMap) -> Option<String> {
	let mut terms: Vec<String> = Vec::with_capacity(sort.len() + 1);
	let mut last_is_primary = false;
	for field in sort {
		let dir = if field.ascending { "ASC" } else { "DESC" };
		match fields.resolve(&field.field) {
			Resolution::Column(col) => {
				terms.push(format!("{} {}", col.name, dir));
				last_is_primary = col.name == "id";
			}
			Resolution::Json(json)
				if matches!(json.ty, FieldType::String | FieldType::Number | FieldType::Boolean) =>
			{
				terms.push(format!("json_extract(data, '{}') {}", json.path, dir));
				last_is_primary = false;
			}
			_ => return None,
		}
	}
	// The primary key is already a total order; another tie-break behind it
	// would be dead weight in the statement.
	if !last_is_primary {
		terms.push("id ASC".to_string());
	}
	Some(terms.join(", "))
}

/// LIMIT/OFFSET tail; `LIMIT -1` keeps an OFFSET without bounding the rows.
pub(crate) fn limit_clause(skip: u64, limit: Option<u64>) -> String {
	match (limit, skip) {
		(Some(l), 0) => format!(" LIMIT {}", l),
		(Some(l), s) => format!(" LIMIT {} OFFSET {}", l, s),
		(None, 0) => String::new(),
		(None, s) => format!(" LIMIT -1 OFFSET {}", s),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rill::doc_adapter::CollectionSchema;
	use serde_json::json;

	fn fields() -> FieldMap {
		let schema: CollectionSchema = serde_json::from_value(json!({
			"version": 2,
			"primaryKey": "id",
			"properties": {
				"id": {"type": "string"},
				"age": {"type": "number"},
				"name": {"type": "string"},
				"users": {"type": "array", "items": {"type": "object"}}
			}
		}))
		.unwrap();
		FieldMap::from_schema(&schema)
	}

	fn plan(selector: serde_json::Value) -> Arc<Plan> {
		let fields = fields();
		let lower = HashSet::new();
		let cache: PlanCache = Mutex::new(SieveCache::new(16));
		plan_selector(&selector, "people", 2, &fields, &lower, &cache).unwrap()
	}

	#[test]
	fn representable_selector_plans_as_sql() {
		assert!(matches!(&*plan(json!({"age": {"$gt": 3}})), Plan::Sql(_)));
	}

	#[test]
	fn partially_representable_selector_splits() {
		let p = plan(json!({"age": {"$gt": 3}, "users.name": "Alice"}));
		match &*p {
			Plan::Split { prefilter, residual } => {
				assert!(prefilter.is_some());
				assert_eq!(residual, &json!({"users.name": "Alice"}));
			}
			other => panic!("unexpected plan: {:?}", other),
		}
	}

	#[test]
	fn fully_unrepresentable_selector_has_no_prefilter() {
		let p = plan(json!({"users.name": "Alice"}));
		match &*p {
			Plan::Split { prefilter, .. } => assert!(prefilter.is_none()),
			other => panic!("unexpected plan: {:?}", other),
		}
	}

	#[test]
	fn cache_returns_the_same_plan_for_reordered_keys() {
		let fields = fields();
		let lower = HashSet::new();
		let cache: PlanCache = Mutex::new(SieveCache::new(16));
		let a = plan_selector(
			&json!({"age": {"$gte": 1, "$lte": 9}}),
			"people",
			2,
			&fields,
			&lower,
			&cache,
		)
		.unwrap();
		let b = plan_selector(
			&json!({"age": {"$lte": 9, "$gte": 1}}),
			"people",
			2,
			&fields,
			&lower,
			&cache,
		)
		.unwrap();
		assert!(Arc::ptr_eq(&a, &b));
	}

	#[test]
	fn validation_errors_are_not_cached() {
		let fields = fields();
		let lower = HashSet::new();
		let cache: PlanCache = Mutex::new(SieveCache::new(16));
		let res = plan_selector(&json!({"$bogus": 1}), "people", 2, &fields, &lower, &cache);
		assert!(res.is_err());
		assert!(cache.lock().unwrap().is_empty());
	}

	#[test]
	fn sort_pushdown_needs_uniform_types() {
		let fields = fields();
		let sort = vec![SortField { field: "age".into(), ascending: false }];
		assert_eq!(
			order_by_clause(&sort, &fields).unwrap(),
			"json_extract(data, '$.age') DESC, id ASC"
		);

		let sort = vec![SortField { field: "untyped".into(), ascending: true }];
		assert!(order_by_clause(&sort, &fields).is_none());

		// A sort ending on the primary key needs no extra tie-break.
		let sort = vec![SortField { field: "id".into(), ascending: true }];
		assert_eq!(order_by_clause(&sort, &fields).unwrap(), "id ASC");
		let sort = vec![
			SortField { field: "age".into(), ascending: true },
			SortField { field: "id".into(), ascending: false },
		];
		assert_eq!(
			order_by_clause(&sort, &fields).unwrap(),
			"json_extract(data, '$.age') ASC, id DESC"
		);
	}

	#[test]
	fn limit_clause_forms() {
		assert_eq!(limit_clause(0, None), "");
		assert_eq!(limit_clause(0, Some(5)), " LIMIT 5");
		assert_eq!(limit_clause(2, Some(5)), " LIMIT 5 OFFSET 2");
		assert_eq!(limit_clause(2, None), " LIMIT -1 OFFSET 2");
	}
}

// vim: ts=4
