// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params, types::ValueRef};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{Error, KernelDatabase, Result, validate_savepoint_name};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv (
	key TEXT PRIMARY KEY,
	value TEXT NOT NULL,
	seq INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS kv_vatstore (
	vat_id TEXT NOT NULL,
	key TEXT NOT NULL,
	value TEXT NOT NULL,
	PRIMARY KEY (vat_id, key)
);
";

/// SQLite-backed store. The kernel namespace lives in `kv` with an
/// insertion stamp per key; vat sub-stores live in `kv_vatstore`.
/// Savepoints delegate to SQL SAVEPOINTs, with the stack mirrored here so
/// misuse is caught before it reaches the database.
pub struct SqliteDatabase {
	conn: Connection,
	savepoints: Vec<String>,
	next_seq: i64,
}

impl SqliteDatabase {
	/// Open (or create) the store at `path`, in WAL mode.
	pub fn open(path: impl AsRef<Path>) -> Result<Self> {
		let conn = Connection::open(path.as_ref())?;
		let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
		debug!(path = %path.as_ref().display(), %mode, "opened kernel store");
		conn.pragma_update(None, "synchronous", "NORMAL")?;
		conn.busy_timeout(std::time::Duration::from_secs(5))?;
		Self::init(conn)
	}

	/// A private, process-lifetime store for tests and tooling.
	pub fn in_memory() -> Result<Self> {
		Self::init(Connection::open_in_memory()?)
	}

	fn init(conn: Connection) -> Result<Self> {
		conn.execute_batch(SCHEMA)?;
		let next_seq: i64 =
			conn.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM kv", [], |row| row.get(0))?;
		Ok(SqliteDatabase { conn, savepoints: Vec::new(), next_seq })
	}

	fn check_top(&self, name: &str) -> Result<()> {
		match self.savepoints.last() {
			Some(top) if top == name => Ok(()),
			top => Err(Error::SavepointMismatch {
				expected: top.cloned(),
				requested: name.to_string(),
			}),
		}
	}
}

fn column_value(value: ValueRef<'_>) -> Value {
	match value {
		ValueRef::Null => Value::Null,
		ValueRef::Integer(n) => Value::from(n),
		ValueRef::Real(f) => Value::from(f),
		ValueRef::Text(text) => Value::from(String::from_utf8_lossy(text).into_owned()),
		ValueRef::Blob(bytes) => {
			let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
			Value::from(hex)
		}
	}
}

impl KernelDatabase for SqliteDatabase {
	fn get(&self, key: &str) -> Result<Option<String>> {
		let value = self
			.conn
			.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
			.optional()?;
		Ok(value)
	}

	fn set(&mut self, key: &str, value: &str) -> Result<()> {
		self.conn.execute(
			"INSERT INTO kv (key, value, seq) VALUES (?1, ?2, ?3) \
			 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
			params![key, value, self.next_seq],
		)?;
		self.next_seq += 1;
		Ok(())
	}

	fn delete(&mut self, key: &str) -> Result<()> {
		self.conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
		Ok(())
	}

	fn get_next_key(&self, previous: &str) -> Result<Option<String>> {
		let key = self
			.conn
			.query_row(
				"SELECT key FROM kv WHERE key > ?1 ORDER BY key LIMIT 1",
				params![previous],
				|row| row.get(0),
			)
			.optional()?;
		Ok(key)
	}

	fn vatstore_get(&self, vat: &str, key: &str) -> Result<Option<String>> {
		let value = self
			.conn
			.query_row(
				"SELECT value FROM kv_vatstore WHERE vat_id = ?1 AND key = ?2",
				params![vat, key],
				|row| row.get(0),
			)
			.optional()?;
		Ok(value)
	}

	fn vatstore_set(&mut self, vat: &str, key: &str, value: &str) -> Result<()> {
		self.conn.execute(
			"INSERT INTO kv_vatstore (vat_id, key, value) VALUES (?1, ?2, ?3) \
			 ON CONFLICT (vat_id, key) DO UPDATE SET value = excluded.value",
			params![vat, key, value],
		)?;
		Ok(())
	}

	fn vatstore_delete(&mut self, vat: &str, key: &str) -> Result<()> {
		self.conn.execute(
			"DELETE FROM kv_vatstore WHERE vat_id = ?1 AND key = ?2",
			params![vat, key],
		)?;
		Ok(())
	}

	fn vatstore_get_next_key(&self, vat: &str, previous: &str) -> Result<Option<String>> {
		let key = self
			.conn
			.query_row(
				"SELECT key FROM kv_vatstore WHERE vat_id = ?1 AND key > ?2 \
				 ORDER BY key LIMIT 1",
				params![vat, previous],
				|row| row.get(0),
			)
			.optional()?;
		Ok(key)
	}

	fn get_kv_data(&self, vat: &str) -> Result<Vec<(String, String)>> {
		let mut stmt = self
			.conn
			.prepare("SELECT key, value FROM kv_vatstore WHERE vat_id = ?1 ORDER BY key")?;
		let rows = stmt
			.query_map(params![vat], |row| Ok((row.get(0)?, row.get(1)?)))?
			.collect::<rusqlite::Result<Vec<_>>>()?;
		Ok(rows)
	}

	fn update_kv_data(&mut self, vat: &str, sets: &[(String, String)], deletes: &[String]) -> Result<()> {
		let txn = self.conn.unchecked_transaction()?;
		for (key, value) in sets {
			txn.execute(
				"INSERT INTO kv_vatstore (vat_id, key, value) VALUES (?1, ?2, ?3) \
				 ON CONFLICT (vat_id, key) DO UPDATE SET value = excluded.value",
				params![vat, key, value],
			)?;
		}
		for key in deletes {
			txn.execute(
				"DELETE FROM kv_vatstore WHERE vat_id = ?1 AND key = ?2",
				params![vat, key],
			)?;
		}
		txn.commit()?;
		Ok(())
	}

	fn delete_vat_store(&mut self, vat: &str) -> Result<()> {
		self.conn.execute("DELETE FROM kv_vatstore WHERE vat_id = ?1", params![vat])?;
		Ok(())
	}

	fn create_savepoint(&mut self, name: &str) -> Result<()> {
		validate_savepoint_name(name)?;
		self.conn.execute_batch(&format!("SAVEPOINT {name}"))?;
		self.savepoints.push(name.to_string());
		Ok(())
	}

	fn release_savepoint(&mut self, name: &str) -> Result<()> {
		self.check_top(name)?;
		self.conn.execute_batch(&format!("RELEASE SAVEPOINT {name}"))?;
		self.savepoints.pop();
		Ok(())
	}

	fn rollback_savepoint(&mut self, name: &str) -> Result<()> {
		self.check_top(name)?;
		// ROLLBACK TO rewinds but keeps the savepoint open; the RELEASE
		// afterwards pops it from the SQL stack as well.
		self.conn.execute_batch(&format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"))?;
		self.savepoints.pop();
		Ok(())
	}

	fn savepoint_depth(&self) -> usize {
		self.savepoints.len()
	}

	fn dump(&self) -> Result<Vec<(String, String)>> {
		let mut stmt = self.conn.prepare("SELECT key, value FROM kv ORDER BY seq, key")?;
		let rows = stmt
			.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
			.collect::<rusqlite::Result<Vec<_>>>()?;
		Ok(rows)
	}

	fn clear(&mut self) -> Result<()> {
		if !self.savepoints.is_empty() {
			return Err(Error::SavepointActive);
		}
		self.conn.execute_batch("DELETE FROM kv; DELETE FROM kv_vatstore;")?;
		self.next_seq = 1;
		Ok(())
	}

	fn checkpoint(&mut self) -> Result<()> {
		self.conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
		Ok(())
	}

	fn execute_query(&mut self, sql: &str) -> Result<Vec<Value>> {
		let mut stmt = self.conn.prepare(sql)?;
		if stmt.column_count() == 0 {
			let affected = stmt.execute([])?;
			return Ok(vec![Value::from(
				Map::from_iter([("rowsAffected".to_string(), Value::from(affected))]),
			)]);
		}
		let names: Vec<String> = stmt.column_names().iter().map(|name| name.to_string()).collect();
		let mut rows = stmt.query([])?;
		let mut out = Vec::new();
		while let Some(row) = rows.next()? {
			let mut object = Map::new();
			for (index, name) in names.iter().enumerate() {
				object.insert(name.clone(), column_value(row.get_ref(index)?));
			}
			out.push(Value::from(object));
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn savepoint_rollback_discards() {
		let mut db = SqliteDatabase::in_memory().unwrap();
		db.set("a", "1").unwrap();
		db.create_savepoint("crank_1").unwrap();
		db.set("a", "2").unwrap();
		db.set("b", "x").unwrap();
		db.vatstore_set("v1", "k", "v").unwrap();
		db.rollback_savepoint("crank_1").unwrap();
		assert_eq!(db.get("a").unwrap().as_deref(), Some("1"));
		assert_eq!(db.get("b").unwrap(), None);
		assert_eq!(db.vatstore_get("v1", "k").unwrap(), None);
	}

	#[test]
	fn savepoint_release_commits() {
		let mut db = SqliteDatabase::in_memory().unwrap();
		db.create_savepoint("crank_1").unwrap();
		db.set("a", "1").unwrap();
		db.release_savepoint("crank_1").unwrap();
		assert_eq!(db.get("a").unwrap().as_deref(), Some("1"));
		assert_eq!(db.savepoint_depth(), 0);
	}

	#[test]
	fn rejects_non_lifo_names() {
		let mut db = SqliteDatabase::in_memory().unwrap();
		db.create_savepoint("a").unwrap();
		db.create_savepoint("b").unwrap();
		assert!(matches!(db.rollback_savepoint("a"), Err(Error::SavepointMismatch { .. })));
		assert!(matches!(db.create_savepoint("no spaces"), Err(Error::InvalidSavepointName(_))));
	}

	#[test]
	fn dump_orders_by_first_write() {
		let mut db = SqliteDatabase::in_memory().unwrap();
		db.set("z", "1").unwrap();
		db.set("a", "2").unwrap();
		db.set("z", "3").unwrap();
		assert_eq!(
			db.dump().unwrap(),
			vec![("z".to_string(), "3".to_string()), ("a".to_string(), "2".to_string())]
		);
	}

	#[test]
	fn diagnostic_query_returns_rows() {
		let mut db = SqliteDatabase::in_memory().unwrap();
		db.set("a", "1").unwrap();
		let rows = db.execute_query("SELECT key, value FROM kv").unwrap();
		assert_eq!(rows[0]["key"], "a");
		assert_eq!(rows[0]["value"], "1");
	}
}
