//! Deterministic canonical string form for JSON values.
//!
//! Object keys are sorted (UTF-16 code-unit order, so keys hash the same
//! regardless of how the selector object was built), arrays keep their
//! order, and numbers are normalised into one class — `1` and `1.0` render
//! identically, like the widening rule of scalar equality. Structurally
//! identical values always produce byte-identical strings — this is the
//! cache-key primitive and the deep-equality primitive of the fallback
//! matcher.

use serde_json::Value;
use std::cmp::Ordering;

/// Serialises a JSON value into its canonical string form.
pub fn stable_string(value: &Value) -> String {
	let mut out = String::with_capacity(32);
	write_value(&mut out, value);
	out
}

/// Deep structural equality through the canonical form.
pub fn stable_eq(a: &Value, b: &Value) -> bool {
	// Cheap discriminant check before serialising anything.
	std::mem::discriminant(a) == std::mem::discriminant(b) && stable_string(a) == stable_string(b)
}

fn write_value(out: &mut String, value: &Value) {
	match value {
		Value::Null => out.push_str("null"),
		Value::Bool(true) => out.push_str("true"),
		Value::Bool(false) => out.push_str("false"),
		Value::Number(n) => write_number(out, n),
		Value::String(s) => write_string(out, s),
		Value::Array(items) => {
			out.push('[');
			for (i, item) in items.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				write_value(out, item);
			}
			out.push(']');
		}
		Value::Object(map) => {
			let mut keys: Vec<&String> = map.keys().collect();
			keys.sort_unstable_by(|a, b| cmp_utf16(a, b));
			out.push('{');
			for (i, key) in keys.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				write_string(out, key);
				out.push(':');
				if let Some(v) = map.get(key.as_str()) {
					write_value(out, v);
				}
			}
			out.push('}');
		}
	}
}

/// Numbers form one class: an integral float renders without its fractional
/// part so `1.0` and `1` hash alike, matching the widening rule of scalar
/// equality. Non-integral and non-finite-representable values keep
/// serde_json's rendering.
fn write_number(out: &mut String, n: &serde_json::Number) {
	if n.as_i64().is_none() && n.as_u64().is_none() {
		if let Some(f) = n.as_f64() {
			if f.is_finite() && f.fract() == 0.0 {
				if f == 0.0 {
					// Covers -0.0, which must not render as "-0".
					out.push('0');
				} else {
					out.push_str(&format!("{:.0}", f));
				}
				return;
			}
		}
	}
	out.push_str(&n.to_string());
}

fn write_string(out: &mut String, s: &str) {
	// Fast path: plain printable ASCII needs no escaping.
	if s.bytes().all(|b| (0x20..0x7f).contains(&b) && b != b'"' && b != b'\\') {
		out.push('"');
		out.push_str(s);
		out.push('"');
		return;
	}
	match serde_json::to_string(s) {
		Ok(escaped) => out.push_str(&escaped),
		Err(_) => {
			// serde_json cannot fail on a plain string; keep something
			// deterministic if it ever does.
			out.push('"');
			out.push_str(&s.escape_default().to_string());
			out.push('"');
		}
	}
}

/// Key ordering over UTF-16 code units, matching how JavaScript engines
/// compare strings. Differs from `str::cmp` only for strings mixing
/// supplementary-plane and upper-BMP characters.
fn cmp_utf16(a: &str, b: &str) -> Ordering {
	a.encode_utf16().cmp(b.encode_utf16())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn key_order_is_ignored() {
		let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
		let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
		assert_eq!(stable_string(&a), stable_string(&b));
	}

	#[test]
	fn array_order_is_preserved() {
		let a = json!([1, 2, 3]);
		let b = json!([3, 2, 1]);
		assert_ne!(stable_string(&a), stable_string(&b));
	}

	#[test]
	fn primitives_render_canonically() {
		assert_eq!(stable_string(&json!(null)), "null");
		assert_eq!(stable_string(&json!(true)), "true");
		assert_eq!(stable_string(&json!(42)), "42");
		assert_eq!(stable_string(&json!(-1.5)), "-1.5");
		assert_eq!(stable_string(&json!("hi")), "\"hi\"");
	}

	#[test]
	fn integral_floats_render_like_integers() {
		assert_eq!(stable_string(&json!(1.0)), "1");
		assert_eq!(stable_string(&json!(-2.0)), "-2");
		assert_eq!(stable_string(&json!(-0.0)), "0");
		assert_eq!(stable_string(&json!(1.5)), "1.5");
		// Containers with numbers parsed with and without a decimal point
		// must hash alike, like the scalar widening rule.
		assert!(stable_eq(&json!([1]), &json!([1.0])));
		assert!(stable_eq(&json!({"n": 2.0}), &json!({"n": 2})));
		assert!(!stable_eq(&json!([1]), &json!([1.5])));
	}

	#[test]
	fn strings_with_control_chars_are_escaped() {
		assert_eq!(stable_string(&json!("a\nb")), "\"a\\nb\"");
		assert_eq!(stable_string(&json!("q\"q")), "\"q\\\"q\"");
	}

	#[test]
	fn regex_object_differs_from_empty_object() {
		// A selector `{ $regex: "x" }` must never collide with `{}`.
		let r = json!({"$regex": "x", "$options": ""});
		let empty = json!({});
		assert_ne!(stable_string(&r), stable_string(&empty));
	}

	#[test]
	fn deep_equality_matches_structure_not_identity() {
		let a = json!({"t": [1, {"k": "v"}]});
		let b = json!({"t": [1, {"k": "v"}]});
		assert!(stable_eq(&a, &b));
		assert!(!stable_eq(&a, &json!({"t": [1, {"k": "w"}]})));
	}

	#[test]
	fn nested_selectors_are_deterministic() {
		let s1 = json!({"$and": [{"age": {"$gte": 20, "$lte": 40}}, {"name": "x"}]});
		let s2 = json!({"$and": [{"age": {"$lte": 40, "$gte": 20}}, {"name": "x"}]});
		assert_eq!(stable_string(&s1), stable_string(&s2));
	}
}

// vim: ts=4
