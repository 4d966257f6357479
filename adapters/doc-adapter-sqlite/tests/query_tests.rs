//! Query behaviour: selector translation end to end, ordering, pagination.

use serde_json::{json, Value};
use std::sync::Arc;

use rill::doc_adapter::{
	BulkWriteRow, CollectionSchema, DocAdapter, DocStorage, InstanceParams, PreparedQuery,
	SortField,
};
use rill_doc_adapter_sqlite::{AdapterConfig, DocAdapterSqlite};

fn user_schema() -> CollectionSchema {
	serde_json::from_value(json!({
		"version": 0,
		"primaryKey": "id",
		"properties": {
			"id": {"type": "string"},
			"name": {"type": "string"},
			"age": {"type": "number"},
			"status": {"type": "string"},
			"tags": {"type": "array", "items": {"type": "string"}},
			"users": {
				"type": "array",
				"items": {"type": "object", "properties": {"name": {"type": "string"}}}
			}
		},
		"indexes": [["name"], ["age"]]
	}))
	.unwrap()
}

async fn open_instance(database: &str) -> Arc<dyn DocStorage> {
	let adapter = DocAdapterSqlite::new(AdapterConfig::default());
	adapter
		.open(InstanceParams {
			database_name: database.into(),
			collection_name: "users".into(),
			schema: user_schema(),
		})
		.await
		.expect("Failed to open storage instance")
}

fn user(id: &str, name: &str, age: i64, status: &str) -> Value {
	json!({
		"id": id,
		"name": name,
		"age": age,
		"status": status,
		"_deleted": false,
		"_rev": format!("1-{}", id),
		"_meta": {"lwt": 1000 + id.parse::<i64>().unwrap_or(0)},
		"_attachments": {}
	})
}

async fn seed(storage: &Arc<dyn DocStorage>, docs: Vec<Value>) {
	let rows = docs.into_iter().map(|document| BulkWriteRow { document, previous: None }).collect();
	let res = storage.bulk_write(rows, "seed").await.expect("Seed write failed");
	assert!(res.error.is_empty(), "Seed write reported errors: {:?}", res.error);
}

fn selector_query(selector: Value) -> PreparedQuery {
	PreparedQuery { selector, sort: Vec::new(), skip: 0, limit: None }
}

fn ids(documents: &[Value]) -> Vec<&str> {
	documents.iter().filter_map(|d| d.get("id").and_then(Value::as_str)).collect()
}

async fn seed_four_users(storage: &Arc<dyn DocStorage>) {
	seed(
		storage,
		vec![
			user("1", "Alice", 30, "active"),
			user("2", "Bob", 25, "inactive"),
			user("3", "Charlie", 35, "active"),
			user("4", "David", 28, "inactive"),
		],
	)
	.await;
}

#[tokio::test]
async fn equality_on_string_field() {
	let storage = open_instance("q-eq").await;
	seed_four_users(&storage).await;

	let res = storage.query(&selector_query(json!({"status": "active"}))).await.unwrap();
	assert_eq!(ids(&res.documents), vec!["1", "3"]);
}

#[tokio::test]
async fn elem_match_on_tag_arrays() {
	let storage = open_instance("q-elem").await;
	let mut d1 = user("1", "Alice", 30, "active");
	d1["tags"] = json!(["urgent", "home"]);
	let mut d2 = user("2", "Bob", 25, "active");
	d2["tags"] = json!(["work"]);
	let mut d3 = user("3", "Charlie", 35, "active");
	d3["tags"] = json!(["urgent"]);
	seed(&storage, vec![d1, d2, d3]).await;

	let res = storage
		.query(&selector_query(json!({"tags": {"$elemMatch": {"$eq": "urgent"}}})))
		.await
		.unwrap();
	assert_eq!(ids(&res.documents), vec!["1", "3"]);
}

#[tokio::test]
async fn not_over_or_compiles_and_filters() {
	let storage = open_instance("q-not").await;
	seed(
		&storage,
		vec![
			user("1", "Alice", 18, "active"),
			user("2", "Bob", 25, "active"),
			user("3", "Charlie", 40, "active"),
			user("4", "David", 45, "active"),
		],
	)
	.await;

	let res = storage
		.query(&selector_query(json!({
			"age": {"$not": {"$or": [{"age": {"$lt": 20}}, {"age": {"$gt": 40}}]}}
		})))
		.await
		.unwrap();
	assert_eq!(ids(&res.documents), vec!["2", "3"]);
}

#[tokio::test]
async fn regex_prefix_matches_like() {
	let storage = open_instance("q-regex").await;
	seed_four_users(&storage).await;

	let res = storage.query(&selector_query(json!({"name": {"$regex": "^Ali"}}))).await.unwrap();
	assert_eq!(ids(&res.documents), vec!["1"]);

	// LIKE is case-sensitive here: lowercase prefix must not match.
	let res = storage.query(&selector_query(json!({"name": {"$regex": "^ali"}}))).await.unwrap();
	assert!(res.documents.is_empty());
}

#[tokio::test]
async fn regex_escapes_sql_wildcards() {
	let storage = open_instance("q-regex-esc").await;
	seed(
		&storage,
		vec![
			user("1", "test%name", 1, "x"),
			user("2", "testXname", 2, "x"),
			user("3", "TEST%NAME", 3, "x"),
		],
	)
	.await;

	let res = storage
		.query(&selector_query(json!({"name": {"$regex": "test%name", "$options": "i"}})))
		.await
		.unwrap();
	// `%` is literal: the X variant must not match, the case variants must.
	assert_eq!(ids(&res.documents), vec!["1", "3"]);
}

#[tokio::test]
async fn invalid_regex_flags_error_before_execution() {
	let storage = open_instance("q-regex-flags").await;
	seed_four_users(&storage).await;

	let res = storage
		.query(&selector_query(json!({"name": {"$regex": "^A", "$options": "g"}})))
		.await;
	assert!(res.is_err(), "the global flag must be refused");
}

#[tokio::test]
async fn implicit_array_traversal_falls_back() {
	let storage = open_instance("q-traversal").await;
	let mut d1 = user("1", "x", 1, "a");
	d1["users"] = json!([{"name": "Alice"}, {"name": "Bob"}]);
	let mut d2 = user("2", "y", 2, "a");
	d2["users"] = json!([{"name": "Carol"}]);
	seed(&storage, vec![d1, d2]).await;

	let res = storage.query(&selector_query(json!({"users.name": "Alice"}))).await.unwrap();
	assert_eq!(ids(&res.documents), vec!["1"]);
}

#[tokio::test]
async fn bipartite_split_keeps_sql_prefilter() {
	let storage = open_instance("q-split").await;
	let mut d1 = user("1", "x", 10, "a");
	d1["users"] = json!([{"name": "Alice"}]);
	let mut d2 = user("2", "y", 10, "a");
	d2["users"] = json!([{"name": "Alice"}]);
	let mut d3 = user("3", "z", 99, "a");
	d3["users"] = json!([{"name": "Alice"}]);
	seed(&storage, vec![d1, d2, d3]).await;

	// age is SQL-representable, users.name is not; both must apply.
	let res = storage
		.query(&selector_query(json!({"age": {"$lt": 50}, "users.name": "Alice"})))
		.await
		.unwrap();
	assert_eq!(ids(&res.documents), vec!["1", "2"]);
}

#[tokio::test]
async fn in_and_nin_with_mixed_and_empty_lists() {
	let storage = open_instance("q-in").await;
	seed_four_users(&storage).await;

	let res = storage
		.query(&selector_query(json!({"age": {"$in": [25, 35, "30"]}})))
		.await
		.unwrap();
	// The string "30" must not match the number 30.
	assert_eq!(ids(&res.documents), vec!["2", "3"]);

	let res = storage.query(&selector_query(json!({"age": {"$in": []}}))).await.unwrap();
	assert!(res.documents.is_empty());

	let res = storage.query(&selector_query(json!({"age": {"$nin": [25, 35]}}))).await.unwrap();
	assert_eq!(ids(&res.documents), vec!["1", "4"]);
}

#[tokio::test]
async fn lazy_limit_window_in_insertion_order() {
	let storage = open_instance("q-limit-lazy").await;
	seed(
		&storage,
		(1..=9).map(|i| user(&i.to_string(), "u", i, "a")).collect(),
	)
	.await;

	let q = PreparedQuery { selector: json!({}), sort: Vec::new(), skip: 2, limit: Some(3) };
	let res = storage.query(&q).await.unwrap();
	assert_eq!(ids(&res.documents), vec!["3", "4", "5"]);

	// Skip past the end yields nothing.
	let q = PreparedQuery { selector: json!({}), sort: Vec::new(), skip: 100, limit: Some(3) };
	assert!(storage.query(&q).await.unwrap().documents.is_empty());
}

#[tokio::test]
async fn eager_limit_window_respects_sort() {
	let storage = open_instance("q-limit-eager").await;
	seed_four_users(&storage).await;

	let q = PreparedQuery {
		selector: json!({}),
		sort: vec![SortField { field: "age".into(), ascending: true }],
		skip: 1,
		limit: Some(2),
	};
	let res = storage.query(&q).await.unwrap();
	// Ages: 25 (2), 28 (4), 30 (1), 35 (3) — window [1..3] is 28, 30.
	assert_eq!(ids(&res.documents), vec!["4", "1"]);

	let q = PreparedQuery {
		selector: json!({}),
		sort: vec![SortField { field: "age".into(), ascending: false }],
		skip: 0,
		limit: Some(2),
	};
	let res = storage.query(&q).await.unwrap();
	assert_eq!(ids(&res.documents), vec!["3", "1"]);
}

#[tokio::test]
async fn count_matches_query_semantics() {
	let storage = open_instance("q-count").await;
	seed_four_users(&storage).await;

	let res = storage.count(&selector_query(json!({"status": "active"}))).await.unwrap();
	assert_eq!(res.count, 2);
	assert_eq!(res.mode, rill::doc_adapter::CountMode::Fast);

	// A fallback-only selector still counts, just not in fast mode.
	let mut d = user("9", "x", 1, "active");
	d["users"] = json!([{"name": "Alice"}]);
	seed(&storage, vec![d]).await;
	let res = storage.count(&selector_query(json!({"users.name": "Alice"}))).await.unwrap();
	assert_eq!(res.count, 1);
	assert_eq!(res.mode, rill::doc_adapter::CountMode::Slow);
}

#[tokio::test]
async fn comparison_chain_and_logical_nesting() {
	let storage = open_instance("q-nested").await;
	seed_four_users(&storage).await;

	let res = storage
		.query(&selector_query(json!({
			"$and": [
				{"age": {"$gte": 25}},
				{"$or": [{"status": "inactive"}, {"name": {"$regex": "^Ch"}}]}
			]
		})))
		.await
		.unwrap();
	assert_eq!(ids(&res.documents), vec!["2", "3", "4"]);
}

#[tokio::test]
async fn type_and_exists_and_size() {
	let storage = open_instance("q-shape").await;
	let mut d1 = user("1", "a", 1, "x");
	d1["tags"] = json!(["p", "q"]);
	let d2 = user("2", "b", 2, "x");
	let mut d3 = user("3", "c", 3, "x");
	d3["extra"] = json!(null);
	seed(&storage, vec![d1, d2, d3]).await;

	let res = storage.query(&selector_query(json!({"tags": {"$exists": true}}))).await.unwrap();
	assert_eq!(ids(&res.documents), vec!["1"]);

	// A stored null exists, like in MongoDB.
	let res = storage.query(&selector_query(json!({"extra": {"$exists": true}}))).await.unwrap();
	assert_eq!(ids(&res.documents), vec!["3"]);

	let res = storage.query(&selector_query(json!({"tags": {"$size": 2}}))).await.unwrap();
	assert_eq!(ids(&res.documents), vec!["1"]);

	let res = storage.query(&selector_query(json!({"age": {"$type": "number"}}))).await.unwrap();
	assert_eq!(res.documents.len(), 3);
}

#[tokio::test]
async fn mod_operator() {
	let storage = open_instance("q-mod").await;
	seed(
		&storage,
		vec![user("1", "a", 10, "x"), user("2", "b", 11, "x"), user("3", "c", 14, "x")],
	)
	.await;

	let res = storage.query(&selector_query(json!({"age": {"$mod": [4, 2]}}))).await.unwrap();
	assert_eq!(ids(&res.documents), vec!["1", "3"]);
}

#[tokio::test]
async fn repeated_queries_hit_the_translation_cache() {
	let storage = open_instance("q-cache").await;
	seed_four_users(&storage).await;

	// Same selector with reordered keys must produce identical results
	// (and, internally, share one cached plan).
	let a = storage
		.query(&selector_query(json!({"age": {"$gte": 25, "$lte": 40}})))
		.await
		.unwrap();
	let b = storage
		.query(&selector_query(json!({"age": {"$lte": 40, "$gte": 25}})))
		.await
		.unwrap();
	assert_eq!(ids(&a.documents), ids(&b.documents));
}

// vim: ts=4
