//! Prepared-statement cache policy.
//!
//! sqlx keeps a bounded per-connection prepared-statement cache. Fixed CRUD
//! and DDL statements belong in it; selector-derived SQL and anything with a
//! membership subquery varies from call to call and would only thrash the
//! cache, so those are prepared and finalised per call.

use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};

use crate::operators::SqlArg;

/// Whether a SQL string is worth keeping in the prepared-statement cache.
pub(crate) fn is_cacheable(sql: &str) -> bool {
	!sql.contains("(SELECT value FROM json_each(")
}

/// Builds a query for dynamically assembled SQL with the right cache policy.
pub(crate) fn dynamic_query<'q>(
	sql: &'q str,
	args: &'q [SqlArg],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
	bind_args(sqlx::query(sql).persistent(is_cacheable(sql)), args)
}

/// Binds positional fragment arguments onto a query.
pub(crate) fn bind_args<'q>(
	mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
	args: &'q [SqlArg],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
	for arg in args {
		query = match arg {
			SqlArg::Text(s) => query.bind(s.as_ref()),
			SqlArg::Int(i) => query.bind(*i),
			SqlArg::Real(f) => query.bind(*f),
			SqlArg::Null => query.bind(Option::<String>::None),
		};
	}
	query
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn membership_subqueries_are_not_cached() {
		assert!(!is_cacheable("SELECT data FROM t WHERE id IN (SELECT value FROM json_each(?))"));
		assert!(is_cacheable("SELECT data FROM t WHERE id = ?"));
		assert!(is_cacheable("UPDATE t SET data=? WHERE id=? AND rev=?"));
	}
}

// vim: ts=4
