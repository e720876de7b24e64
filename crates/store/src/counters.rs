// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use ocap_types::{KernelRef, SubclusterId, VatId};

use crate::{Error, KernelStore, Result, schema};

impl KernelStore {
	fn bump(&mut self, key: &str) -> Result<u64> {
		let raw = self.db.get_required(key)?;
		let current =
			raw.parse::<u64>().map_err(|_| Error::Corrupt(format!("counter {key} = `{raw}`")))?;
		self.db.set(key, &(current + 1).to_string())?;
		Ok(current)
	}

	pub fn allocate_object_id(&mut self) -> Result<KernelRef> {
		Ok(KernelRef::Object(self.bump(schema::NEXT_OBJECT_ID)?))
	}

	pub fn allocate_promise_id(&mut self) -> Result<KernelRef> {
		Ok(KernelRef::Promise(self.bump(schema::NEXT_PROMISE_ID)?))
	}

	pub fn allocate_vat_id(&mut self) -> Result<VatId> {
		Ok(VatId(self.bump(schema::NEXT_VAT_ID)?))
	}

	pub fn allocate_subcluster_id(&mut self) -> Result<SubclusterId> {
		Ok(SubclusterId(self.bump(schema::NEXT_SUBCLUSTER_ID)?))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing_store;

	#[test]
	fn counters_are_monotonic() {
		let mut store = testing_store();
		assert_eq!(store.allocate_object_id().unwrap(), KernelRef::Object(1));
		assert_eq!(store.allocate_object_id().unwrap(), KernelRef::Object(2));
		assert_eq!(store.allocate_promise_id().unwrap(), KernelRef::Promise(1));
		assert_eq!(store.allocate_vat_id().unwrap(), VatId(1));
		assert_eq!(store.allocate_subcluster_id().unwrap(), SubclusterId(1));
		assert_eq!(store.get(schema::NEXT_OBJECT_ID).unwrap().as_deref(), Some("3"));
	}
}
