// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use serde_json::Value;

use crate::{Error, KernelDatabase, Result, validate_savepoint_name};

type VatKey = (String, String);

/// Uncommitted writes of one open savepoint. `None` marks a deletion.
#[derive(Debug, Default)]
struct Layer {
	name: String,
	kv: BTreeMap<String, Option<String>>,
	vat: BTreeMap<VatKey, Option<String>>,
}

/// In-memory backend. Savepoints are overlay layers folded into their
/// parent on release and discarded on rollback.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
	kv: BTreeMap<String, String>,
	vat: BTreeMap<VatKey, String>,
	// first-write order of kernel keys, for dump()
	stamps: HashMap<String, u64>,
	next_stamp: u64,
	layers: Vec<Layer>,
}

impl MemoryDatabase {
	pub fn new() -> Self {
		MemoryDatabase::default()
	}

	fn stamp(&mut self, key: &str) {
		if !self.stamps.contains_key(key) {
			self.stamps.insert(key.to_string(), self.next_stamp);
			self.next_stamp += 1;
		}
	}

	fn resolve(&self, key: &str) -> Option<String> {
		for layer in self.layers.iter().rev() {
			if let Some(entry) = layer.kv.get(key) {
				return entry.clone();
			}
		}
		self.kv.get(key).cloned()
	}

	fn resolve_vat(&self, vat: &str, key: &str) -> Option<String> {
		let lookup = (vat.to_string(), key.to_string());
		for layer in self.layers.iter().rev() {
			if let Some(entry) = layer.vat.get(&lookup) {
				return entry.clone();
			}
		}
		self.vat.get(&lookup).cloned()
	}

	fn write(&mut self, key: &str, value: Option<String>) {
		match self.layers.last_mut() {
			Some(layer) => {
				layer.kv.insert(key.to_string(), value);
			}
			None => match value {
				Some(value) => {
					self.stamp(key);
					self.kv.insert(key.to_string(), value);
				}
				None => {
					self.kv.remove(key);
				}
			},
		}
	}

	fn write_vat(&mut self, vat: &str, key: &str, value: Option<String>) {
		let entry = (vat.to_string(), key.to_string());
		match self.layers.last_mut() {
			Some(layer) => {
				layer.vat.insert(entry, value);
			}
			None => match value {
				Some(value) => {
					self.vat.insert(entry, value);
				}
				None => {
					self.vat.remove(&entry);
				}
			},
		}
	}

	fn check_top(&self, name: &str) -> Result<()> {
		match self.layers.last() {
			Some(layer) if layer.name == name => Ok(()),
			top => Err(Error::SavepointMismatch {
				expected: top.map(|layer| layer.name.clone()),
				requested: name.to_string(),
			}),
		}
	}

	/// Smallest key greater than `previous` whose resolved value is live.
	fn next_key_from(
		&self,
		previous: &str,
		base_keys: impl Fn(&str) -> Option<String>,
		layer_keys: impl Fn(&Layer, &str) -> Option<String>,
		resolve: impl Fn(&str) -> Option<String>,
	) -> Option<String> {
		let mut cursor = previous.to_string();
		loop {
			let mut candidate: Option<String> = base_keys(&cursor);
			for layer in &self.layers {
				if let Some(key) = layer_keys(layer, &cursor) {
					candidate = match candidate {
						Some(best) if best <= key => Some(best),
						_ => Some(key),
					};
				}
			}
			let key = candidate?;
			if resolve(&key).is_some() {
				return Some(key);
			}
			// deleted in an overlay; skip past it
			cursor = key;
		}
	}
}

impl KernelDatabase for MemoryDatabase {
	fn get(&self, key: &str) -> Result<Option<String>> {
		Ok(self.resolve(key))
	}

	fn set(&mut self, key: &str, value: &str) -> Result<()> {
		self.write(key, Some(value.to_string()));
		Ok(())
	}

	fn delete(&mut self, key: &str) -> Result<()> {
		self.write(key, None);
		Ok(())
	}

	fn get_next_key(&self, previous: &str) -> Result<Option<String>> {
		Ok(self.next_key_from(
			previous,
			|cursor| {
				self.kv
					.range::<str, _>((Bound::Excluded(cursor), Bound::Unbounded))
					.next()
					.map(|(k, _)| k.clone())
			},
			|layer, cursor| {
				layer.kv
					.range::<str, _>((Bound::Excluded(cursor), Bound::Unbounded))
					.next()
					.map(|(k, _)| k.clone())
			},
			|key| self.resolve(key),
		))
	}

	fn vatstore_get(&self, vat: &str, key: &str) -> Result<Option<String>> {
		Ok(self.resolve_vat(vat, key))
	}

	fn vatstore_set(&mut self, vat: &str, key: &str, value: &str) -> Result<()> {
		self.write_vat(vat, key, Some(value.to_string()));
		Ok(())
	}

	fn vatstore_delete(&mut self, vat: &str, key: &str) -> Result<()> {
		self.write_vat(vat, key, None);
		Ok(())
	}

	fn vatstore_get_next_key(&self, vat: &str, previous: &str) -> Result<Option<String>> {
		let start = (vat.to_string(), previous.to_string());
		let within_vat = |map: &BTreeMap<VatKey, _>, cursor: &VatKey| -> Option<String> {
			map.range((Bound::Excluded(cursor.clone()), Bound::Unbounded))
				.take_while(|((v, _), _)| v == vat)
				.next()
				.map(|((_, k), _)| k.clone())
		};
		let mut cursor = start;
		loop {
			let mut candidate: Option<String> = {
				let base: &BTreeMap<VatKey, String> = &self.vat;
				base.range((Bound::Excluded(cursor.clone()), Bound::Unbounded))
					.take_while(|((v, _), _)| v == vat)
					.next()
					.map(|((_, k), _)| k.clone())
			};
			for layer in &self.layers {
				if let Some(key) = within_vat(&layer.vat, &cursor) {
					candidate = match candidate {
						Some(best) if best <= key => Some(best),
						_ => Some(key),
					};
				}
			}
			let Some(key) = candidate else {
				return Ok(None);
			};
			if self.resolve_vat(vat, &key).is_some() {
				return Ok(Some(key));
			}
			cursor = (vat.to_string(), key);
		}
	}

	fn get_kv_data(&self, vat: &str) -> Result<Vec<(String, String)>> {
		let mut rows = BTreeMap::new();
		for ((v, k), value) in &self.vat {
			if v == vat {
				rows.insert(k.clone(), Some(value.clone()));
			}
		}
		for layer in &self.layers {
			for ((v, k), value) in &layer.vat {
				if v == vat {
					rows.insert(k.clone(), value.clone());
				}
			}
		}
		Ok(rows.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))).collect())
	}

	fn update_kv_data(&mut self, vat: &str, sets: &[(String, String)], deletes: &[String]) -> Result<()> {
		for (key, value) in sets {
			self.write_vat(vat, key, Some(value.clone()));
		}
		for key in deletes {
			self.write_vat(vat, key, None);
		}
		Ok(())
	}

	fn delete_vat_store(&mut self, vat: &str) -> Result<()> {
		let keys: Vec<String> = self.get_kv_data(vat)?.into_iter().map(|(k, _)| k).collect();
		for key in keys {
			self.write_vat(vat, &key, None);
		}
		Ok(())
	}

	fn create_savepoint(&mut self, name: &str) -> Result<()> {
		validate_savepoint_name(name)?;
		self.layers.push(Layer { name: name.to_string(), ..Layer::default() });
		Ok(())
	}

	fn release_savepoint(&mut self, name: &str) -> Result<()> {
		self.check_top(name)?;
		let layer = self.layers.pop().expect("checked non-empty");
		match self.layers.last_mut() {
			Some(parent) => {
				parent.kv.extend(layer.kv);
				parent.vat.extend(layer.vat);
			}
			None => {
				for (key, value) in layer.kv {
					match value {
						Some(value) => {
							self.stamp(&key);
							self.kv.insert(key, value);
						}
						None => {
							self.kv.remove(&key);
						}
					}
				}
				for (key, value) in layer.vat {
					match value {
						Some(value) => {
							self.vat.insert(key, value);
						}
						None => {
							self.vat.remove(&key);
						}
					}
				}
			}
		}
		Ok(())
	}

	fn rollback_savepoint(&mut self, name: &str) -> Result<()> {
		self.check_top(name)?;
		self.layers.pop();
		Ok(())
	}

	fn savepoint_depth(&self) -> usize {
		self.layers.len()
	}

	fn dump(&self) -> Result<Vec<(String, String)>> {
		let mut rows: Vec<(u64, String, String)> = Vec::new();
		let mut extra: Vec<(String, String)> = Vec::new();
		let mut keys: BTreeMap<String, String> = self.kv.clone();
		for layer in &self.layers {
			for (key, value) in &layer.kv {
				match value {
					Some(value) => {
						keys.insert(key.clone(), value.clone());
					}
					None => {
						keys.remove(key);
					}
				}
			}
		}
		for (key, value) in keys {
			match self.stamps.get(&key) {
				Some(stamp) => rows.push((*stamp, key, value)),
				None => extra.push((key, value)),
			}
		}
		rows.sort();
		let mut out: Vec<(String, String)> = rows.into_iter().map(|(_, k, v)| (k, v)).collect();
		out.extend(extra);
		Ok(out)
	}

	fn clear(&mut self) -> Result<()> {
		if !self.layers.is_empty() {
			return Err(Error::SavepointActive);
		}
		self.kv.clear();
		self.vat.clear();
		self.stamps.clear();
		self.next_stamp = 0;
		Ok(())
	}

	fn execute_query(&mut self, _sql: &str) -> Result<Vec<Value>> {
		Err(Error::QueryUnsupported)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn overlay_visibility() {
		let mut db = MemoryDatabase::new();
		db.set("a", "1").unwrap();
		db.create_savepoint("sp1").unwrap();
		db.set("a", "2").unwrap();
		db.set("b", "3").unwrap();
		assert_eq!(db.get("a").unwrap().as_deref(), Some("2"));
		db.rollback_savepoint("sp1").unwrap();
		assert_eq!(db.get("a").unwrap().as_deref(), Some("1"));
		assert_eq!(db.get("b").unwrap(), None);
	}

	#[test]
	fn release_folds_into_parent() {
		let mut db = MemoryDatabase::new();
		db.create_savepoint("outer").unwrap();
		db.set("a", "1").unwrap();
		db.create_savepoint("inner").unwrap();
		db.delete("a").unwrap();
		db.release_savepoint("inner").unwrap();
		assert_eq!(db.get("a").unwrap(), None);
		db.rollback_savepoint("outer").unwrap();
		assert_eq!(db.get("a").unwrap(), None);
		assert_eq!(db.savepoint_depth(), 0);
	}

	#[test]
	fn lifo_enforced() {
		let mut db = MemoryDatabase::new();
		db.create_savepoint("a").unwrap();
		db.create_savepoint("b").unwrap();
		assert!(matches!(db.release_savepoint("a"), Err(Error::SavepointMismatch { .. })));
		db.release_savepoint("b").unwrap();
		db.release_savepoint("a").unwrap();
		// released names are gone for good
		assert!(matches!(db.rollback_savepoint("a"), Err(Error::SavepointMismatch { .. })));
	}

	#[test]
	fn next_key_sees_overlay_deletes() {
		let mut db = MemoryDatabase::new();
		db.set("k1", "a").unwrap();
		db.set("k2", "b").unwrap();
		db.set("k3", "c").unwrap();
		db.create_savepoint("sp").unwrap();
		db.delete("k2").unwrap();
		assert_eq!(db.get_next_key("k1").unwrap().as_deref(), Some("k3"));
		db.rollback_savepoint("sp").unwrap();
		assert_eq!(db.get_next_key("k1").unwrap().as_deref(), Some("k2"));
	}

	#[test]
	fn vatstore_is_isolated_per_vat() {
		let mut db = MemoryDatabase::new();
		db.vatstore_set("v1", "x", "1").unwrap();
		db.vatstore_set("v2", "x", "2").unwrap();
		assert_eq!(db.vatstore_get("v1", "x").unwrap().as_deref(), Some("1"));
		db.delete_vat_store("v1").unwrap();
		assert_eq!(db.vatstore_get("v1", "x").unwrap(), None);
		assert_eq!(db.vatstore_get("v2", "x").unwrap().as_deref(), Some("2"));
	}

	#[test]
	fn dump_preserves_first_write_order() {
		let mut db = MemoryDatabase::new();
		db.set("zz", "1").unwrap();
		db.set("aa", "2").unwrap();
		db.set("zz", "3").unwrap();
		let dump = db.dump().unwrap();
		assert_eq!(dump, vec![("zz".to_string(), "3".to_string()), ("aa".to_string(), "2".to_string())]);
	}
}
