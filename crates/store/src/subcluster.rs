// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::collections::BTreeMap;

use ocap_types::{ClusterConfig, SubclusterId, VatId};
use serde::{Deserialize, Serialize};

use crate::{KernelStore, Result, schema};

/// One launched subcluster, persisted inside the `subclusters` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubclusterRecord {
	pub id: SubclusterId,
	pub config: ClusterConfig,
	/// name → vat id, in config order
	pub vats: BTreeMap<String, VatId>,
}

impl KernelStore {
	pub fn subclusters(&self) -> Result<Vec<SubclusterRecord>> {
		self.get_json(schema::SUBCLUSTERS)
	}

	pub fn subcluster(&self, id: SubclusterId) -> Result<Option<SubclusterRecord>> {
		Ok(self.subclusters()?.into_iter().find(|record| record.id == id))
	}

	pub fn add_subcluster(&mut self, record: &SubclusterRecord) -> Result<()> {
		let mut records = self.subclusters()?;
		records.push(record.clone());
		self.set_json(schema::SUBCLUSTERS, &records)?;
		for vat in record.vats.values() {
			self.map_vat_to_subcluster(*vat, record.id)?;
		}
		Ok(())
	}

	pub fn remove_subcluster(&mut self, id: SubclusterId) -> Result<Option<SubclusterRecord>> {
		let mut records = self.subclusters()?;
		let Some(pos) = records.iter().position(|record| record.id == id) else {
			return Ok(None);
		};
		let record = records.remove(pos);
		self.set_json(schema::SUBCLUSTERS, &records)?;
		for vat in record.vats.values() {
			self.unmap_vat_from_subcluster(*vat)?;
		}
		Ok(Some(record))
	}

	fn vat_subcluster_map(&self) -> Result<BTreeMap<VatId, SubclusterId>> {
		self.get_json(schema::VAT_SUBCLUSTER_MAP)
	}

	pub fn subcluster_of_vat(&self, vat: VatId) -> Result<Option<SubclusterId>> {
		Ok(self.vat_subcluster_map()?.get(&vat).copied())
	}

	pub fn map_vat_to_subcluster(&mut self, vat: VatId, id: SubclusterId) -> Result<()> {
		let mut map = self.vat_subcluster_map()?;
		map.insert(vat, id);
		self.set_json(schema::VAT_SUBCLUSTER_MAP, &map)?;
		Ok(())
	}

	pub fn unmap_vat_from_subcluster(&mut self, vat: VatId) -> Result<()> {
		let mut map = self.vat_subcluster_map()?;
		if map.remove(&vat).is_some() {
			self.set_json(schema::VAT_SUBCLUSTER_MAP, &map)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use serde_json::{Value, json};

	use super::*;
	use crate::testing_store;

	fn record(id: u64) -> SubclusterRecord {
		let config: ClusterConfig = serde_json::from_value(json!({
			"bootstrap": "alice",
			"vats": { "alice": { "bundleSpec": "test:alice" } }
		}))
		.unwrap();
		SubclusterRecord {
			id: SubclusterId(id),
			config,
			vats: BTreeMap::from([("alice".to_string(), VatId(id))]),
		}
	}

	#[test]
	fn add_lookup_remove() {
		let mut store = testing_store();
		store.add_subcluster(&record(1)).unwrap();
		store.add_subcluster(&record(2)).unwrap();

		assert_eq!(store.subcluster(SubclusterId(2)).unwrap().unwrap().id, SubclusterId(2));
		assert_eq!(store.subcluster_of_vat(VatId(1)).unwrap(), Some(SubclusterId(1)));

		let map: Value =
			serde_json::from_str(&store.get("vatToSubclusterMap").unwrap().unwrap()).unwrap();
		assert_eq!(map["v1"], "s1");

		store.remove_subcluster(SubclusterId(1)).unwrap();
		assert_eq!(store.subcluster(SubclusterId(1)).unwrap(), None);
		assert_eq!(store.subcluster_of_vat(VatId(1)).unwrap(), None);
	}
}
