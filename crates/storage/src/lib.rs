// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! The durable string→string substrate under the kernel store.
//!
//! Two backends share one trait: an in-memory map with overlay savepoints
//! for tests and embedding, and a SQLite file store whose savepoints map
//! onto SQL `SAVEPOINT`s. Savepoints are nested and strictly LIFO; a
//! release commits into the parent scope, a rollback discards.

pub use memory::MemoryDatabase;
pub use sqlite::SqliteDatabase;

mod memory;
mod sqlite;

use serde_json::Value;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("required key `{0}` is missing")]
	KeyNotFound(String),
	#[error("savepoint name `{0}` is not a valid identifier")]
	InvalidSavepointName(String),
	#[error("savepoint `{requested}` is not the innermost open savepoint (innermost: {expected:?})")]
	SavepointMismatch {
		expected: Option<String>,
		requested: String,
	},
	#[error("operation requires all savepoints to be settled first")]
	SavepointActive,
	#[error("diagnostic queries are not supported by this backend")]
	QueryUnsupported,
	#[error(transparent)]
	Sqlite(#[from] rusqlite::Error),
}

/// The persistence interface the kernel runs on.
///
/// Keys and values are opaque strings. The per-vat sub-store is a second
/// namespace keyed by vat id, isolated from the kernel namespace and from
/// other vats.
pub trait KernelDatabase: Send {
	fn get(&self, key: &str) -> Result<Option<String>>;

	fn get_required(&self, key: &str) -> Result<String> {
		self.get(key)?.ok_or_else(|| Error::KeyNotFound(key.to_string()))
	}

	fn set(&mut self, key: &str, value: &str) -> Result<()>;

	fn delete(&mut self, key: &str) -> Result<()>;

	/// The smallest key strictly greater than `previous`, used for
	/// lexicographic prefix scans.
	fn get_next_key(&self, previous: &str) -> Result<Option<String>>;

	fn vatstore_get(&self, vat: &str, key: &str) -> Result<Option<String>>;

	fn vatstore_set(&mut self, vat: &str, key: &str, value: &str) -> Result<()>;

	fn vatstore_delete(&mut self, vat: &str, key: &str) -> Result<()>;

	fn vatstore_get_next_key(&self, vat: &str, previous: &str) -> Result<Option<String>>;

	/// All rows of one vat's sub-store, ordered by key.
	fn get_kv_data(&self, vat: &str) -> Result<Vec<(String, String)>>;

	/// Apply a batch of writes and deletes to one vat's sub-store as a
	/// single atomic unit.
	fn update_kv_data(&mut self, vat: &str, sets: &[(String, String)], deletes: &[String]) -> Result<()>;

	fn delete_vat_store(&mut self, vat: &str) -> Result<()>;

	fn create_savepoint(&mut self, name: &str) -> Result<()>;

	fn release_savepoint(&mut self, name: &str) -> Result<()>;

	fn rollback_savepoint(&mut self, name: &str) -> Result<()>;

	fn savepoint_depth(&self) -> usize;

	/// Every kernel-namespace row in first-write order, for diagnostics
	/// and the cleared-state dump.
	fn dump(&self) -> Result<Vec<(String, String)>>;

	/// Drop all state. Refused while savepoints are open.
	fn clear(&mut self) -> Result<()>;

	/// Force buffered writes to durable storage.
	fn checkpoint(&mut self) -> Result<()> {
		Ok(())
	}

	/// Run a raw diagnostic query, returning one JSON object per row.
	fn execute_query(&mut self, sql: &str) -> Result<Vec<Value>>;
}

/// Savepoint identifiers are restricted so they can be spliced into SQL
/// without quoting.
pub(crate) fn validate_savepoint_name(name: &str) -> Result<()> {
	let mut chars = name.chars();
	let valid_head = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
	if valid_head && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
		Ok(())
	} else {
		Err(Error::InvalidSavepointName(name.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn savepoint_names() {
		validate_savepoint_name("crank_12").unwrap();
		validate_savepoint_name("_x").unwrap();
		assert!(validate_savepoint_name("").is_err());
		assert!(validate_savepoint_name("1abc").is_err());
		assert!(validate_savepoint_name("a;drop table kv").is_err());
		assert!(validate_savepoint_name("a b").is_err());
	}
}
