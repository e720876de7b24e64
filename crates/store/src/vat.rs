// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use ocap_types::{VatDelivery, VatId, VatSpec, VatSyscall};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::{Error, KernelStore, Result, schema};

/// Persisted configuration of one vat, `vatConfig.v<N>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatConfigRecord {
	pub name: String,
	#[serde(flatten)]
	pub spec: VatSpec,
}

/// One replayable delivery: the dispatch, the syscalls the worker issued
/// with the results the kernel answered, and the delivery outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
	pub crank: u64,
	pub delivery: VatDelivery,
	pub syscalls: Vec<(VatSyscall, Value)>,
	pub result: String,
}

impl KernelStore {
	pub fn vat_config(&self, vat: VatId) -> Result<Option<VatConfigRecord>> {
		match self.db.get(&schema::vat_config(vat))? {
			Some(raw) => Ok(Some(serde_json::from_str(&raw).map_err(|err| {
				Error::Corrupt(format!("vatConfig.{vat}: {err}"))
			})?)),
			None => Ok(None),
		}
	}

	pub fn set_vat_config(&mut self, vat: VatId, record: &VatConfigRecord) -> Result<()> {
		self.set_json(&schema::vat_config(vat), record)?;
		Ok(())
	}

	pub fn delete_vat_config(&mut self, vat: VatId) -> Result<()> {
		self.db.delete(&schema::vat_config(vat))?;
		Ok(())
	}

	/// Every vat with a persisted config, in id order.
	pub fn vat_ids(&self) -> Result<Vec<VatId>> {
		let mut out = Vec::new();
		let mut cursor = schema::VAT_CONFIG_PREFIX.to_string();
		while let Some(key) = self.db.get_next_key(&cursor)? {
			if !key.starts_with(schema::VAT_CONFIG_PREFIX) {
				break;
			}
			cursor = key.clone();
			if let Ok(vat) = key[schema::VAT_CONFIG_PREFIX.len()..].parse() {
				out.push(vat);
			}
		}
		out.sort();
		Ok(out)
	}

	pub fn terminated_vats(&self) -> Result<Vec<VatId>> {
		self.get_json(schema::TERMINATED)
	}

	pub fn is_vat_terminated(&self, vat: VatId) -> Result<bool> {
		Ok(self.terminated_vats()?.contains(&vat))
	}

	pub fn mark_vat_terminated(&mut self, vat: VatId) -> Result<()> {
		let mut set = self.terminated_vats()?;
		if !set.contains(&vat) {
			set.push(vat);
			self.set_json(schema::TERMINATED, &set)?;
		}
		trace!(%vat, "vat marked terminated");
		Ok(())
	}

	pub fn unmark_vat_terminated(&mut self, vat: VatId) -> Result<()> {
		let mut set = self.terminated_vats()?;
		if let Some(pos) = set.iter().position(|v| *v == vat) {
			set.remove(pos);
			self.set_json(schema::TERMINATED, &set)?;
		}
		Ok(())
	}

	// vat sub-store, user namespace

	pub fn vatstore_get(&self, vat: VatId, key: &str) -> Result<Option<String>> {
		Ok(self.db.vatstore_get(&vat.to_string(), &schema::vatstore_key(key))?)
	}

	pub fn vatstore_set(&mut self, vat: VatId, key: &str, value: &str) -> Result<()> {
		Ok(self.db.vatstore_set(&vat.to_string(), &schema::vatstore_key(key), value)?)
	}

	pub fn vatstore_delete(&mut self, vat: VatId, key: &str) -> Result<()> {
		Ok(self.db.vatstore_delete(&vat.to_string(), &schema::vatstore_key(key))?)
	}

	pub fn vatstore_get_next_key(&self, vat: VatId, previous: &str) -> Result<Option<String>> {
		let next = self
			.db
			.vatstore_get_next_key(&vat.to_string(), &schema::vatstore_key(previous))?;
		// stay inside the user namespace
		Ok(next.and_then(|key| key.strip_prefix(schema::VATSTORE_PREFIX).map(str::to_string)))
	}

	pub fn delete_vat_store(&mut self, vat: VatId) -> Result<()> {
		Ok(self.db.delete_vat_store(&vat.to_string())?)
	}

	// vat sub-store, transcript namespace

	pub fn transcript_length(&self, vat: VatId) -> Result<u64> {
		match self.db.vatstore_get(&vat.to_string(), schema::TRANSCRIPT_END)? {
			Some(raw) => raw
				.parse()
				.map_err(|_| Error::Corrupt(format!("transcript cursor of {vat} = `{raw}`"))),
			None => Ok(0),
		}
	}

	pub fn append_transcript(&mut self, vat: VatId, entry: &TranscriptEntry) -> Result<()> {
		let position = self.transcript_length(vat)?;
		let raw = serde_json::to_string(entry)
			.map_err(|err| Error::Corrupt(format!("transcript of {vat}: {err}")))?;
		let vat_key = vat.to_string();
		self.db.vatstore_set(&vat_key, &schema::transcript_key(position), &raw)?;
		self.db.vatstore_set(&vat_key, schema::TRANSCRIPT_END, &(position + 1).to_string())?;
		Ok(())
	}

	pub fn transcript_entries(&self, vat: VatId) -> Result<Vec<TranscriptEntry>> {
		let length = self.transcript_length(vat)?;
		let vat_key = vat.to_string();
		let mut entries = Vec::with_capacity(length as usize);
		for position in 0..length {
			let raw = self
				.db
				.vatstore_get(&vat_key, &schema::transcript_key(position))?
				.ok_or_else(|| Error::Corrupt(format!("transcript gap in {vat} at {position}")))?;
			entries.push(serde_json::from_str(&raw).map_err(|err| {
				Error::Corrupt(format!("transcript of {vat} at {position}: {err}"))
			})?);
		}
		Ok(entries)
	}

	// reap accounting, also in the vat sub-store

	/// Count down towards the next `bringOutYourDead`; true when due.
	pub fn note_delivery_for_reap(&mut self, vat: VatId, reap_interval: u64) -> Result<bool> {
		let vat_key = vat.to_string();
		let remaining = match self.db.vatstore_get(&vat_key, schema::REAP_COUNTDOWN)? {
			Some(raw) => raw
				.parse::<u64>()
				.map_err(|_| Error::Corrupt(format!("reap countdown of {vat} = `{raw}`")))?,
			None => reap_interval,
		};
		if remaining <= 1 {
			self.db.vatstore_set(&vat_key, schema::REAP_COUNTDOWN, &reap_interval.to_string())?;
			Ok(true)
		} else {
			self.db.vatstore_set(&vat_key, schema::REAP_COUNTDOWN, &(remaining - 1).to_string())?;
			Ok(false)
		}
	}
}

#[cfg(test)]
mod tests {
	use ocap_types::{CapData, Message, VatRef};
	use serde_json::json;

	use super::*;
	use crate::testing_store;

	fn record(name: &str) -> VatConfigRecord {
		VatConfigRecord {
			name: name.into(),
			spec: VatSpec {
				bundle_spec: format!("test:{name}"),
				parameters: Value::Null,
				endowments: Vec::new(),
			},
		}
	}

	#[test]
	fn config_round_trip_and_listing() {
		let mut store = testing_store();
		store.set_vat_config(VatId(1), &record("alice")).unwrap();
		store.set_vat_config(VatId(2), &record("bob")).unwrap();
		assert_eq!(store.vat_config(VatId(1)).unwrap().unwrap().name, "alice");
		assert_eq!(store.vat_ids().unwrap(), vec![VatId(1), VatId(2)]);
		store.delete_vat_config(VatId(1)).unwrap();
		assert_eq!(store.vat_ids().unwrap(), vec![VatId(2)]);
	}

	#[test]
	fn config_wire_form_is_camel_case() {
		let mut store = testing_store();
		store.set_vat_config(VatId(1), &record("alice")).unwrap();
		let raw = store.get("vatConfig.v1").unwrap().unwrap();
		let value: Value = serde_json::from_str(&raw).unwrap();
		assert_eq!(value["name"], "alice");
		assert_eq!(value["bundleSpec"], "test:alice");
	}

	#[test]
	fn terminated_set() {
		let mut store = testing_store();
		store.mark_vat_terminated(VatId(3)).unwrap();
		store.mark_vat_terminated(VatId(3)).unwrap();
		assert!(store.is_vat_terminated(VatId(3)).unwrap());
		assert_eq!(store.get(schema::TERMINATED).unwrap().as_deref(), Some("[\"v3\"]"));
		store.unmark_vat_terminated(VatId(3)).unwrap();
		assert_eq!(store.get(schema::TERMINATED).unwrap().as_deref(), Some("[]"));
	}

	#[test]
	fn vatstore_namespace_is_prefixed() {
		let mut store = testing_store();
		store.vatstore_set(VatId(1), "counter", "5").unwrap();
		store.append_transcript(
			VatId(1),
			&TranscriptEntry {
				crank: 1,
				delivery: VatDelivery::BringOutYourDead,
				syscalls: Vec::new(),
				result: "ok".into(),
			},
		)
		.unwrap();
		// user-visible iteration never leaks transcript rows
		assert_eq!(store.vatstore_get_next_key(VatId(1), "").unwrap().as_deref(), Some("counter"));
		assert_eq!(store.vatstore_get_next_key(VatId(1), "counter").unwrap(), None);
	}

	#[test]
	fn transcript_appends_in_order() {
		let mut store = testing_store();
		for crank in 1..=3 {
			store.append_transcript(
				VatId(1),
				&TranscriptEntry {
					crank,
					delivery: VatDelivery::Message {
						target: VatRef::root(),
						message: Message::new(
							format!("m{crank}"),
							CapData::value(&json!([])),
							None,
						),
					},
					syscalls: Vec::new(),
					result: "ok".into(),
				},
			)
			.unwrap();
		}
		let entries = store.transcript_entries(VatId(1)).unwrap();
		assert_eq!(entries.len(), 3);
		assert_eq!(entries[0].crank, 1);
		assert_eq!(entries[2].crank, 3);
	}

	#[test]
	fn reap_countdown_fires_every_interval() {
		let mut store = testing_store();
		assert!(!store.note_delivery_for_reap(VatId(1), 3).unwrap());
		assert!(!store.note_delivery_for_reap(VatId(1), 3).unwrap());
		assert!(store.note_delivery_for_reap(VatId(1), 3).unwrap());
		assert!(!store.note_delivery_for_reap(VatId(1), 3).unwrap());
	}
}
