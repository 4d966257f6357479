//! sqlx error mapping helpers.

use rill::prelude::*;

pub(crate) fn inspect(err: &sqlx::Error) {
	warn!("DB: {:#?}", err);
}

/// Logs and collapses an engine error into the contract's `DbError`.
pub(crate) fn db_err(err: sqlx::Error) -> Error {
	inspect(&err);
	Error::DbError
}

// vim: ts=4
