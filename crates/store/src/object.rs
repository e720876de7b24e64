// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use ocap_types::{KernelRef, VatId};
use tracing::trace;

use crate::{Error, KernelStore, ObjectRow, RefCounts, Result, schema};

impl KernelStore {
	/// Create a fresh `ko` owned by `owner`, with zero counts.
	pub fn add_object(&mut self, owner: VatId) -> Result<KernelRef> {
		let kref = self.allocate_object_id()?;
		self.db.set(&schema::object_owner(kref), &owner.to_string())?;
		self.db.set(&schema::object_refcount(kref), &RefCounts::default().to_string())?;
		trace!(%kref, %owner, "object added");
		Ok(kref)
	}

	pub fn object_exists(&self, kref: KernelRef) -> Result<bool> {
		Ok(self.db.get(&schema::object_refcount(kref))?.is_some())
	}

	pub fn object_owner(&self, kref: KernelRef) -> Result<VatId> {
		let raw = self.db.get(&schema::object_owner(kref))?.ok_or(Error::UnknownRef(kref))?;
		raw.parse().map_err(|_| Error::Corrupt(format!("owner of {kref} = `{raw}`")))
	}

	pub fn object_refcounts(&self, kref: KernelRef) -> Result<RefCounts> {
		let raw = self.db.get(&schema::object_refcount(kref))?.ok_or(Error::UnknownRef(kref))?;
		RefCounts::parse(&raw)
	}

	pub fn set_object_refcounts(&mut self, kref: KernelRef, counts: RefCounts) -> Result<()> {
		self.db.set(&schema::object_refcount(kref), &counts.to_string())?;
		Ok(())
	}

	pub fn revoke_object(&mut self, kref: KernelRef) -> Result<()> {
		self.db.set(&schema::object_revoked(kref), "true")?;
		Ok(())
	}

	pub fn object_revoked(&self, kref: KernelRef) -> Result<bool> {
		Ok(self.db.get(&schema::object_revoked(kref))?.is_some())
	}

	pub fn delete_object(&mut self, kref: KernelRef) -> Result<()> {
		self.db.delete(&schema::object_owner(kref))?;
		self.db.delete(&schema::object_refcount(kref))?;
		self.db.delete(&schema::object_revoked(kref))?;
		trace!(%kref, "object deleted");
		Ok(())
	}

	pub fn object_row(&self, kref: KernelRef) -> Result<ObjectRow> {
		Ok(ObjectRow {
			kref,
			owner: self.object_owner(kref)?,
			ref_counts: self.object_refcounts(kref)?,
			revoked: self.object_revoked(kref)?,
		})
	}

	/// Every live `ko`, for diagnostics and invariant sweeps.
	pub fn object_krefs(&self) -> Result<Vec<KernelRef>> {
		let mut out = Vec::new();
		let mut cursor = "ko".to_string();
		while let Some(key) = self.db.get_next_key(&cursor)? {
			if !key.starts_with("ko") {
				break;
			}
			cursor = key.clone();
			if let Some(kref) = key.strip_suffix(".refCount").and_then(|k| k.parse().ok()) {
				out.push(kref);
			}
		}
		Ok(out)
	}

	/// Apply a delta to both counts, remembering krefs that may now be
	/// free. Deltas never underflow: a corrupt double-decrement is
	/// surfaced instead of wrapped.
	pub fn adjust_object_refcount(
		&mut self,
		kref: KernelRef,
		d_reachable: i64,
		d_recognizable: i64,
	) -> Result<RefCounts> {
		let counts = self.object_refcounts(kref)?;
		let apply = |count: u64, delta: i64| -> Result<u64> {
			count.checked_add_signed(delta)
				.ok_or_else(|| Error::Corrupt(format!("refCount underflow on {kref}")))
		};
		let next = RefCounts {
			reachable: apply(counts.reachable, d_reachable)?,
			recognizable: apply(counts.recognizable, d_recognizable)?,
		};
		self.set_object_refcounts(kref, next)?;
		if (d_reachable < 0 && next.reachable == 0) || (d_recognizable < 0 && next.recognizable == 0) {
			self.note_maybe_free(kref);
		}
		Ok(next)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing_store;

	#[test]
	fn object_lifecycle() {
		let mut store = testing_store();
		let kref = store.add_object(VatId(1)).unwrap();
		assert_eq!(kref, KernelRef::Object(1));
		assert_eq!(store.object_owner(kref).unwrap(), VatId(1));
		assert!(store.object_refcounts(kref).unwrap().is_zero());
		assert!(!store.object_revoked(kref).unwrap());

		store.adjust_object_refcount(kref, 1, 1).unwrap();
		assert_eq!(store.object_refcounts(kref).unwrap(), RefCounts { reachable: 1, recognizable: 1 });

		store.delete_object(kref).unwrap();
		assert!(!store.object_exists(kref).unwrap());
		assert!(store.object_owner(kref).is_err());
	}

	#[test]
	fn decrement_to_zero_marks_maybe_free() {
		let mut store = testing_store();
		let kref = store.add_object(VatId(1)).unwrap();
		store.adjust_object_refcount(kref, 1, 1).unwrap();
		assert!(store.take_maybe_free().is_empty());
		store.adjust_object_refcount(kref, -1, 0).unwrap();
		assert_eq!(store.take_maybe_free(), vec![kref]);
	}

	#[test]
	fn underflow_is_corruption() {
		let mut store = testing_store();
		let kref = store.add_object(VatId(1)).unwrap();
		assert!(store.adjust_object_refcount(kref, -1, 0).is_err());
	}

	#[test]
	fn object_listing_skips_other_rows() {
		let mut store = testing_store();
		let a = store.add_object(VatId(1)).unwrap();
		let b = store.add_object(VatId(2)).unwrap();
		assert_eq!(store.object_krefs().unwrap(), vec![a, b]);
	}
}
