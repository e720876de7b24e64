// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use ocap_types::{KernelRef, RefTag, VatId, VatRef};
use tracing::trace;

use crate::{Error, KernelStore, Result, schema};

fn format_kref_row(reachable: bool, vref: VatRef) -> String {
	format!("{} {vref}", if reachable { "R" } else { "_" })
}

fn parse_kref_row(raw: &str) -> Result<(bool, VatRef)> {
	let (flag, vref) =
		raw.split_once(' ').ok_or_else(|| Error::Corrupt(format!("c-list row `{raw}`")))?;
	let reachable = match flag {
		"R" => true,
		"_" => false,
		_ => return Err(Error::Corrupt(format!("c-list row `{raw}`"))),
	};
	let vref = vref.parse().map_err(|_| Error::Corrupt(format!("c-list row `{raw}`")))?;
	Ok((reachable, vref))
}

impl KernelStore {
	/// Record both directions of a translation.
	pub fn clist_add(&mut self, vat: VatId, kref: KernelRef, vref: VatRef, reachable: bool) -> Result<()> {
		self.db.set(&schema::clist_by_kref(vat, kref), &format_kref_row(reachable, vref))?;
		self.db.set(&schema::clist_by_vref(vat, vref), &kref.to_string())?;
		trace!(%vat, %kref, %vref, reachable, "c-list entry added");
		Ok(())
	}

	pub fn clist_lookup_kref(&self, vat: VatId, kref: KernelRef) -> Result<Option<(bool, VatRef)>> {
		match self.db.get(&schema::clist_by_kref(vat, kref))? {
			Some(raw) => parse_kref_row(&raw).map(Some),
			None => Ok(None),
		}
	}

	pub fn clist_lookup_vref(&self, vat: VatId, vref: VatRef) -> Result<Option<KernelRef>> {
		match self.db.get(&schema::clist_by_vref(vat, vref))? {
			Some(raw) => Ok(Some(
				raw.parse().map_err(|_| Error::Corrupt(format!("c-list row `{raw}`")))?,
			)),
			None => Ok(None),
		}
	}

	/// Flip the reachability flag, returning the previous value.
	pub fn clist_set_reachable(&mut self, vat: VatId, kref: KernelRef, reachable: bool) -> Result<bool> {
		let (was, vref) = self
			.clist_lookup_kref(vat, kref)?
			.ok_or_else(|| Error::Corrupt(format!("no c-list entry for {kref} in {vat}")))?;
		if was != reachable {
			self.db.set(&schema::clist_by_kref(vat, kref), &format_kref_row(reachable, vref))?;
		}
		Ok(was)
	}

	/// Drop both directions. Returns the vref side if it existed.
	pub fn clist_remove(&mut self, vat: VatId, kref: KernelRef) -> Result<Option<VatRef>> {
		let Some((_, vref)) = self.clist_lookup_kref(vat, kref)? else {
			return Ok(None);
		};
		self.db.delete(&schema::clist_by_kref(vat, kref))?;
		self.db.delete(&schema::clist_by_vref(vat, vref))?;
		trace!(%vat, %kref, %vref, "c-list entry removed");
		Ok(Some(vref))
	}

	/// Allocate the next kernel-assigned import index (`o-<n>`/`p-<n>`)
	/// for a vat.
	pub fn allocate_import_index(&mut self, vat: VatId, tag: RefTag) -> Result<u64> {
		let key = match tag {
			RefTag::Object => schema::next_import_object_id(vat),
			RefTag::Promise => schema::next_import_promise_id(vat),
		};
		let current = match self.db.get(&key)? {
			Some(raw) => raw
				.parse::<u64>()
				.map_err(|_| Error::Corrupt(format!("counter {key} = `{raw}`")))?,
			None => 1,
		};
		self.db.set(&key, &(current + 1).to_string())?;
		Ok(current)
	}

	/// All krefs present in a vat's c-list, kref-keyed direction only.
	pub fn clist_krefs(&self, vat: VatId) -> Result<Vec<KernelRef>> {
		let prefix = schema::clist_prefix(vat);
		let start = format!("{prefix}k");
		let mut out = Vec::new();
		let mut cursor = start.clone();
		while let Some(key) = self.db.get_next_key(&cursor)? {
			if !key.starts_with(&start) {
				break;
			}
			cursor = key.clone();
			if let Ok(kref) = key[prefix.len()..].parse() {
				out.push(kref);
			}
		}
		Ok(out)
	}

	/// Remove every c-list row of a vat, returning the krefs it named.
	pub fn clist_clear(&mut self, vat: VatId) -> Result<Vec<KernelRef>> {
		let krefs = self.clist_krefs(vat)?;
		for kref in &krefs {
			self.clist_remove(vat, *kref)?;
		}
		self.db.delete(&schema::next_import_object_id(vat))?;
		self.db.delete(&schema::next_import_promise_id(vat))?;
		Ok(krefs)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing_store;

	#[test]
	fn both_directions_and_flag() {
		let mut store = testing_store();
		let kref = KernelRef::Object(5);
		let vref = VatRef::object_import(2);
		store.clist_add(VatId(1), kref, vref, true).unwrap();

		assert_eq!(store.clist_lookup_kref(VatId(1), kref).unwrap(), Some((true, vref)));
		assert_eq!(store.clist_lookup_vref(VatId(1), vref).unwrap(), Some(kref));
		assert_eq!(store.get("v1.c.ko5").unwrap().as_deref(), Some("R o-2"));
		assert_eq!(store.get("v1.c.o-2").unwrap().as_deref(), Some("ko5"));

		assert!(store.clist_set_reachable(VatId(1), kref, false).unwrap());
		assert_eq!(store.get("v1.c.ko5").unwrap().as_deref(), Some("_ o-2"));

		assert_eq!(store.clist_remove(VatId(1), kref).unwrap(), Some(vref));
		assert_eq!(store.get("v1.c.ko5").unwrap(), None);
		assert_eq!(store.get("v1.c.o-2").unwrap(), None);
	}

	#[test]
	fn import_indexes_are_per_vat_and_per_tag() {
		let mut store = testing_store();
		assert_eq!(store.allocate_import_index(VatId(1), RefTag::Object).unwrap(), 1);
		assert_eq!(store.allocate_import_index(VatId(1), RefTag::Object).unwrap(), 2);
		assert_eq!(store.allocate_import_index(VatId(1), RefTag::Promise).unwrap(), 1);
		assert_eq!(store.allocate_import_index(VatId(2), RefTag::Object).unwrap(), 1);
	}

	#[test]
	fn clist_sweep_lists_only_this_vat() {
		let mut store = testing_store();
		store.clist_add(VatId(1), KernelRef::Object(1), VatRef::object_import(1), true).unwrap();
		store.clist_add(VatId(1), KernelRef::Promise(2), VatRef::promise_import(1), true).unwrap();
		store.clist_add(VatId(2), KernelRef::Object(3), VatRef::object_import(1), true).unwrap();
		assert_eq!(
			store.clist_krefs(VatId(1)).unwrap(),
			vec![KernelRef::Object(1), KernelRef::Promise(2)]
		);
		let cleared = store.clist_clear(VatId(1)).unwrap();
		assert_eq!(cleared.len(), 2);
		assert_eq!(store.clist_krefs(VatId(1)).unwrap(), Vec::new());
		assert_eq!(store.clist_krefs(VatId(2)).unwrap(), vec![KernelRef::Object(3)]);
	}
}
