//! Per-operator SQL translators.
//!
//! Each translator takes a resolved operand and a query value and produces a
//! parameterised boolean fragment, or `None` when the construct cannot be
//! expressed safely in SQL (the planner then routes it to the fallback
//! matcher). SQLite compares loosely, so scalar comparisons carry a
//! `json_type` guard derived from the query value's type — MongoDB never
//! matches across BSON type boundaries.

use rill::prelude::*;
use serde_json::Value;

use crate::fields::FieldType;
use crate::regex_like::{self, Reduction, ReductionKind};

/// A positional SQL argument. Booleans bind as integers, matching how
/// `json_extract` surfaces JSON booleans.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlArg {
	Text(Box<str>),
	Int(i64),
	Real(f64),
	Null,
}

/// A SQL boolean expression with `?` placeholders and its argument list.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Fragment {
	pub sql: String,
	pub args: Vec<SqlArg>,
}

impl Fragment {
	pub fn new(sql: impl Into<String>, args: Vec<SqlArg>) -> Self {
		Self { sql: sql.into(), args }
	}

	pub fn fixed(sql: &str) -> Self {
		Self { sql: sql.into(), args: Vec::new() }
	}
}

/// A field operand resolved to SQL expressions.
#[derive(Debug, Clone)]
pub(crate) struct Operand {
	/// Expression yielding the field value.
	pub expr: String,
	/// Expression yielding the JSON type name; `None` for typed columns.
	pub type_expr: Option<String>,
	/// `(document expression, path literal)` for two-argument JSON1 calls
	/// (`json_each`, `json_array_length`) over this field.
	pub each: Option<(String, String)>,
	pub ty: FieldType,
}

/// Converts a scalar query value into a bindable argument.
pub(crate) fn scalar_arg(value: &Value) -> Option<SqlArg> {
	match value {
		Value::Null => Some(SqlArg::Null),
		Value::Bool(b) => Some(SqlArg::Int(i64::from(*b))),
		Value::Number(n) => {
			if let Some(i) = n.as_i64() {
				Some(SqlArg::Int(i))
			} else {
				n.as_f64().map(SqlArg::Real)
			}
		}
		Value::String(s) => Some(SqlArg::Text(s.as_str().into())),
		Value::Array(_) | Value::Object(_) => None,
	}
}

/// MongoDB-style truthiness for operator arguments like `$exists`.
pub(crate) fn value_truthy(value: &Value) -> bool {
	match value {
		Value::Null => false,
		Value::Bool(b) => *b,
		Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
		_ => true,
	}
}

/// Type guard restricting a comparison to the query value's JSON type.
/// Typed columns need no guard.
fn type_guard(operand: &Operand, value: &Value) -> Option<String> {
	let type_expr = operand.type_expr.as_ref()?;
	match value {
		Value::Number(_) => Some(format!("{} IN ('integer','real')", type_expr)),
		Value::String(_) => Some(format!("{} = 'text'", type_expr)),
		Value::Bool(_) => Some(format!("{} IN ('true','false')", type_expr)),
		_ => None,
	}
}

// Comparison operators
//**********************

pub(crate) fn eq_fragment(operand: &Operand, value: &Value) -> Option<Fragment> {
	if value.is_null() {
		// JSON null and an absent key both surface as SQL NULL, which is
		// exactly MongoDB's `$eq: null` behaviour.
		return Some(Fragment::new(format!("{} IS NULL", operand.expr), Vec::new()));
	}
	let arg = scalar_arg(value)?;
	let sql = match type_guard(operand, value) {
		Some(guard) => format!("({} AND {} = ?)", guard, operand.expr),
		None => format!("{} = ?", operand.expr),
	};
	Some(Fragment::new(sql, vec![arg]))
}

pub(crate) fn ne_fragment(operand: &Operand, value: &Value) -> Option<Fragment> {
	if value.is_null() {
		return Some(Fragment::new(format!("{} IS NOT NULL", operand.expr), Vec::new()));
	}
	let arg = scalar_arg(value)?;
	// Values of a different type must also match, so negate the guarded
	// equality instead of guarding an inequality.
	let sql = match type_guard(operand, value) {
		Some(guard) => {
			format!("({expr} IS NULL OR NOT ({guard} AND {expr} = ?))", expr = operand.expr, guard = guard)
		}
		None => format!("({expr} IS NULL OR {expr} <> ?)", expr = operand.expr),
	};
	Some(Fragment::new(sql, vec![arg]))
}

pub(crate) fn cmp_fragment(operand: &Operand, sql_op: &str, value: &Value) -> Option<Fragment> {
	if value.is_null() {
		// Only the equality component of >= / <= can match a null.
		return if sql_op == ">=" || sql_op == "<=" {
			eq_fragment(operand, value)
		} else {
			Some(Fragment::fixed("1=0"))
		};
	}
	let arg = scalar_arg(value)?;
	let sql = match type_guard(operand, value) {
		Some(guard) => format!("({} AND {} {} ?)", guard, operand.expr, sql_op),
		None => format!("{} {} ?", operand.expr, sql_op),
	};
	Some(Fragment::new(sql, vec![arg]))
}

// Set membership
//****************

/// `$in`: the list is split by JSON type so each group can carry its own
/// guard; every group binds a single JSON array driven through
/// `json_each(?)`, keeping the placeholder count fixed.
pub(crate) fn in_fragment(operand: &Operand, values: &[Value]) -> Option<Fragment> {
	if values.is_empty() {
		return Some(Fragment::fixed("1=0"));
	}

	let mut has_null = false;
	let mut strings: Vec<Value> = Vec::new();
	let mut numbers: Vec<Value> = Vec::new();
	let mut bools: Vec<Value> = Vec::new();
	for v in values {
		match v {
			Value::Null => has_null = true,
			Value::String(_) => strings.push(v.clone()),
			Value::Number(_) => numbers.push(v.clone()),
			Value::Bool(b) => bools.push(Value::Number((i64::from(*b)).into())),
			// Array/object membership needs deep equality; leave it to the
			// fallback matcher.
			Value::Array(_) | Value::Object(_) => return None,
		}
	}

	let mut parts: Vec<String> = Vec::new();
	let mut args: Vec<SqlArg> = Vec::new();
	for (group, probe) in [
		(strings, Value::String(String::new())),
		(numbers, Value::Number(0.into())),
		(bools, Value::Bool(true)),
	] {
		if group.is_empty() {
			continue;
		}
		let membership = format!("{} IN (SELECT value FROM json_each(?))", operand.expr);
		let sql = match type_guard(operand, &probe) {
			Some(guard) => format!("({} AND {})", guard, membership),
			None => membership,
		};
		parts.push(sql);
		args.push(SqlArg::Text(Value::Array(group).to_string().into()));
	}
	if has_null {
		parts.push(format!("{} IS NULL", operand.expr));
	}

	let sql = if parts.len() == 1 {
		parts.remove(0)
	} else {
		format!("({})", parts.join(" OR "))
	};
	Some(Fragment::new(sql, args))
}

/// `$nin` is the three-valued-safe negation of `$in`; an absent field
/// matches, like in MongoDB.
pub(crate) fn nin_fragment(operand: &Operand, values: &[Value]) -> Option<Fragment> {
	if values.is_empty() {
		return Some(Fragment::fixed("1=1"));
	}
	let inner = in_fragment(operand, values)?;
	Some(Fragment::new(format!("NOT (COALESCE(({}), 0))", inner.sql), inner.args))
}

// Field shape operators
//***********************

pub(crate) fn exists_fragment(operand: &Operand, value: &Value) -> Fragment {
	let wanted = value_truthy(value);
	// `json_type` distinguishes a stored JSON null (which *exists*) from an
	// absent key; `json_extract` cannot.
	let probe = operand.type_expr.as_deref().unwrap_or(&operand.expr);
	if wanted {
		Fragment::new(format!("{} IS NOT NULL", probe), Vec::new())
	} else {
		Fragment::new(format!("{} IS NULL", probe), Vec::new())
	}
}

pub(crate) fn type_fragment(operand: &Operand, value: &Value) -> Option<Fragment> {
	let names: Vec<&str> = match value {
		Value::String(s) => vec![s.as_str()],
		Value::Array(items) => items.iter().map(Value::as_str).collect::<Option<Vec<_>>>()?,
		_ => return None,
	};
	if names.is_empty() {
		return Some(Fragment::fixed("1=0"));
	}

	let Some(type_expr) = operand.type_expr.as_ref() else {
		// Typed column: the answer is static.
		let column_matches = names.iter().any(|n| column_type_matches(operand.ty, n));
		return Some(Fragment::fixed(if column_matches { "1=1" } else { "1=0" }));
	};

	let mut json_types: Vec<&str> = Vec::new();
	for name in names {
		match name {
			"string" => json_types.push("'text'"),
			"number" => json_types.extend(["'integer'", "'real'"]),
			"boolean" | "bool" => json_types.extend(["'true'", "'false'"]),
			"array" => json_types.push("'array'"),
			"object" => json_types.push("'object'"),
			"null" => json_types.push("'null'"),
			// Unknown alias: no closed SQL form, let the matcher decide.
			_ => return None,
		}
	}
	json_types.dedup();
	let sql = if json_types.len() == 1 {
		format!("{} = {}", type_expr, json_types[0])
	} else {
		format!("{} IN ({})", type_expr, json_types.join(","))
	};
	Some(Fragment::new(sql, Vec::new()))
}

fn column_type_matches(ty: FieldType, name: &str) -> bool {
	matches!(
		(ty, name),
		(FieldType::String, "string")
			| (FieldType::Number, "number")
			| (FieldType::Boolean, "boolean" | "bool")
	)
}

pub(crate) fn size_fragment(operand: &Operand, value: &Value) -> Option<Fragment> {
	let Some(n) = value.as_i64() else {
		// MongoDB rejects non-numeric $size; treat it as matching nothing
		// rather than failing the whole query.
		return Some(Fragment::fixed("1=0"));
	};
	if n < 0 {
		return Some(Fragment::fixed("1=0"));
	}
	let Some(type_expr) = operand.type_expr.as_ref() else {
		return Some(Fragment::fixed("1=0"));
	};
	let length = match &operand.each {
		Some((doc, path)) => format!("json_array_length({}, '{}')", doc, path),
		None => format!("json_array_length({})", operand.expr),
	};
	Some(Fragment::new(
		format!("({} = 'array' AND {} = ?)", type_expr, length),
		vec![SqlArg::Int(n)],
	))
}

pub(crate) fn mod_fragment(operand: &Operand, value: &Value) -> ClResult<Option<Fragment>> {
	let Some(pair) = value.as_array() else {
		return Err(Error::ValidationError("$mod expects [divisor, remainder]".into()));
	};
	if pair.len() != 2 {
		return Err(Error::ValidationError("$mod expects [divisor, remainder]".into()));
	}
	let (Some(divisor), Some(remainder)) = (scalar_number(&pair[0]), scalar_number(&pair[1])) else {
		return Err(Error::ValidationError("$mod operands must be numbers".into()));
	};
	if divisor == SqlArg::Int(0) || divisor == SqlArg::Real(0.0) {
		return Err(Error::ValidationError("$mod divisor cannot be 0".into()));
	}

	let guard = operand
		.type_expr
		.as_ref()
		.map(|t| format!("{} IN ('integer','real') AND ", t))
		.unwrap_or_default();
	// Truncating division keeps MongoDB's toward-zero remainder semantics,
	// including for non-integer field values.
	let sql = format!(
		"({guard}({expr} - CAST({expr} / ? AS INTEGER) * ?) = ?)",
		guard = guard,
		expr = operand.expr
	);
	Ok(Some(Fragment::new(sql, vec![divisor.clone(), divisor, remainder])))
}

fn scalar_number(value: &Value) -> Option<SqlArg> {
	match value {
		Value::Number(_) => scalar_arg(value),
		_ => None,
	}
}

// Regex
//*******

/// `$regex` with a reducible pattern. `lower_indexed` reports whether a
/// `LOWER(...)` expression index exists for this field, which picks the
/// index-friendly shape for case-insensitive equality.
pub(crate) fn regex_fragment(
	operand: &Operand,
	pattern: &str,
	options: &str,
	lower_indexed: bool,
) -> Option<Fragment> {
	let reduction: Reduction = regex_like::reduce(pattern, options)?;
	let guard = operand
		.type_expr
		.as_ref()
		.map(|t| format!("{} = 'text' AND ", t))
		.unwrap_or_default();

	let (sql, arg) = match reduction.kind {
		ReductionKind::Exact => {
			if reduction.case_insensitive {
				if lower_indexed {
					(format!("LOWER({}) = ?", operand.expr), reduction.text.to_lowercase())
				} else {
					(format!("{} = ? COLLATE NOCASE", operand.expr), reduction.text)
				}
			} else {
				(format!("{} = ?", operand.expr), reduction.text)
			}
		}
		kind => {
			let escaped = regex_like::escape_like(&reduction.text);
			let like_arg = match kind {
				ReductionKind::Prefix => format!("{}%", escaped),
				ReductionKind::Suffix => format!("%{}", escaped),
				_ => format!("%{}%", escaped),
			};
			if reduction.case_insensitive {
				(format!("LOWER({}) LIKE ? ESCAPE '\\'", operand.expr), like_arg.to_lowercase())
			} else {
				(format!("{} LIKE ? ESCAPE '\\'", operand.expr), like_arg)
			}
		}
	};

	Some(Fragment::new(format!("({}{})", guard, sql), vec![SqlArg::Text(arg.into())]))
}


// vim: ts=4
