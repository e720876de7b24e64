// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Typed access to the kernel's persisted schema.
//!
//! Every kernel mutation flows through [`KernelStore`] so the cross-table
//! invariants can be checked at crank boundaries. The store owns the
//! underlying [`KernelDatabase`] and adds no caching: each accessor reads
//! and writes the KV rows directly, which keeps savepoint rollback
//! trivially correct.

pub use gc::GcAction;
pub use rows::{ObjectRow, PromiseRow, PromiseState, RefCounts};
pub use vat::{TranscriptEntry, VatConfigRecord};

mod clist;
mod counters;
mod gc;
mod invariants;
mod object;
mod pins;
mod promise;
mod queue;
mod rows;
mod schema;
mod subcluster;
mod vat;

use std::collections::BTreeSet;

use ocap_storage::KernelDatabase;
use ocap_types::KernelRef;
use serde_json::Value;

pub use subcluster::SubclusterRecord;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Storage(#[from] ocap_storage::Error),
	#[error("kernel store row is corrupt: {0}")]
	Corrupt(String),
	#[error("unknown kernel reference {0}")]
	UnknownRef(KernelRef),
}

/// The kernel's window onto its database.
pub struct KernelStore {
	db: Box<dyn KernelDatabase>,
	// krefs whose counts may have decayed to zero during this crank
	maybe_free: BTreeSet<KernelRef>,
}

impl KernelStore {
	/// Wrap a database, performing first-boot initialization if the
	/// `initialized` marker is absent.
	pub fn open(db: Box<dyn KernelDatabase>) -> Result<Self> {
		let mut store = KernelStore { db, maybe_free: BTreeSet::new() };
		if store.db.get(schema::INITIALIZED)?.is_none() {
			store.first_boot()?;
		}
		Ok(store)
	}

	fn first_boot(&mut self) -> Result<()> {
		// written in this exact order so a cleared kernel dumps
		// deterministically
		for (key, value) in schema::FIRST_BOOT {
			self.db.set(key, value)?;
		}
		Ok(())
	}

	pub fn get(&self, key: &str) -> Result<Option<String>> {
		Ok(self.db.get(key)?)
	}

	pub fn dump(&self) -> Result<Vec<(String, String)>> {
		Ok(self.db.dump()?)
	}

	pub fn execute_query(&mut self, sql: &str) -> Result<Vec<Value>> {
		Ok(self.db.execute_query(sql)?)
	}

	pub fn checkpoint(&mut self) -> Result<()> {
		Ok(self.db.checkpoint()?)
	}

	pub fn create_savepoint(&mut self, name: &str) -> Result<()> {
		Ok(self.db.create_savepoint(name)?)
	}

	pub fn release_savepoint(&mut self, name: &str) -> Result<()> {
		Ok(self.db.release_savepoint(name)?)
	}

	pub fn rollback_savepoint(&mut self, name: &str) -> Result<()> {
		Ok(self.db.rollback_savepoint(name)?)
	}

	pub fn savepoint_depth(&self) -> usize {
		self.db.savepoint_depth()
	}

	/// Krefs whose refcounts were decremented since the last drain.
	pub fn take_maybe_free(&mut self) -> Vec<KernelRef> {
		std::mem::take(&mut self.maybe_free).into_iter().collect()
	}

	pub(crate) fn note_maybe_free(&mut self, kref: KernelRef) {
		self.maybe_free.insert(kref);
	}

	fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T> {
		let raw = self.db.get_required(key)?;
		serde_json::from_str(&raw).map_err(|err| Error::Corrupt(format!("{key}: {err}")))
	}

	fn set_json<T: serde::Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
		let raw = serde_json::to_string(value).map_err(|err| Error::Corrupt(format!("{key}: {err}")))?;
		self.db.set(key, &raw)?;
		Ok(())
	}
}

#[cfg(test)]
pub(crate) fn testing_store() -> KernelStore {
	KernelStore::open(Box::new(ocap_storage::MemoryDatabase::new())).unwrap()
}
