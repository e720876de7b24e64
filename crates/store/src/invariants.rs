// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Cross-table consistency checks, run at crank boundaries in debug
//! builds and asserted by the integration suites.

use std::collections::BTreeMap;

use ocap_types::KernelRef;

use crate::{KernelStore, PromiseState, Result};

impl KernelStore {
	/// Verify the stable-point invariants, returning a human-readable
	/// description of every violation found.
	///
	/// Host pins count toward the persisted totals alongside c-list
	/// entries and queue occurrences.
	pub fn verify_invariants(&self) -> Result<Vec<String>> {
		let pins = self.pins()?;
		let mut violations = Vec::new();

		// every reference held by a queue slot, promise queue or
		// resolution value, per kref
		let mut held: BTreeMap<KernelRef, u64> = BTreeMap::new();
		{
			let mut hold = |kref: KernelRef| *held.entry(kref).or_insert(0) += 1;
			for item in self.run_queue_items()? {
				for kref in item.held_refs() {
					hold(kref);
				}
			}
			for kp in self.promise_krefs()? {
				for message in self.promise_queue(kp)? {
					for slot in &message.args.slots {
						hold(*slot);
					}
					if let Some(result) = message.result {
						hold(result);
					}
				}
				if let Some(value) = self.promise_value(kp)? {
					for slot in &value.slots {
						hold(*slot);
					}
				}
			}
		}

		let vats = self.vat_ids()?;

		for ko in self.object_krefs()? {
			let counts = self.object_refcounts(ko)?;
			if counts.reachable > counts.recognizable {
				violations.push(format!(
					"{ko}: reachable {} exceeds recognizable {}",
					counts.reachable, counts.recognizable
				));
			}
			let owner = self.object_owner(ko)?;
			let mut reachable = held.get(&ko).copied().unwrap_or(0);
			let mut recognizable = reachable;
			for vat in &vats {
				if *vat == owner {
					continue;
				}
				if let Some((flag, _)) = self.clist_lookup_kref(*vat, ko)? {
					recognizable += 1;
					if flag {
						reachable += 1;
					}
				}
			}
			reachable += pins.get(&ko).copied().unwrap_or(0);
			recognizable += pins.get(&ko).copied().unwrap_or(0);
			if counts.reachable != reachable {
				violations.push(format!(
					"{ko}: reachable count {} but {} holders found",
					counts.reachable, reachable
				));
			}
			if counts.recognizable != recognizable {
				violations.push(format!(
					"{ko}: recognizable count {} but {} holders found",
					counts.recognizable, recognizable
				));
			}
		}

		for kp in self.promise_krefs()? {
			let state = self.promise_state(kp)?;
			let decider = self.promise_decider(kp)?;
			if state.is_settled() && decider.is_some() {
				violations.push(format!("{kp}: settled but still has decider"));
			}
			if state != PromiseState::Unresolved && !self.promise_queue(kp)?.is_empty() {
				violations.push(format!("{kp}: settled but queue is non-empty"));
			}
			let mut expected = held.get(&kp).copied().unwrap_or(0) + pins.get(&kp).copied().unwrap_or(0);
			for vat in &vats {
				if self.clist_lookup_kref(*vat, kp)?.is_some() {
					expected += 1;
				}
			}
			let count = self.promise_refcount(kp)?;
			if count != expected {
				violations.push(format!("{kp}: refCount {count} but {expected} holders found"));
			}
		}

		// c-list rows must be mutually consistent in both directions
		for vat in &vats {
			for kref in self.clist_krefs(*vat)? {
				match self.clist_lookup_kref(*vat, kref)? {
					Some((_, vref)) => {
						if self.clist_lookup_vref(*vat, vref)? != Some(kref) {
							violations.push(format!(
								"{vat}: c-list row for {kref} has no matching inverse"
							));
						}
					}
					None => unreachable!("listed krefs resolve"),
				}
			}
		}

		Ok(violations)
	}
}

#[cfg(test)]
mod tests {
	use ocap_types::{VatId, VatRef, VatSpec};
	use serde_json::Value;

	use super::*;
	use crate::{VatConfigRecord, testing_store};

	fn add_vat(store: &mut crate::KernelStore, name: &str) -> VatId {
		let vat = store.allocate_vat_id().unwrap();
		store.set_vat_config(
			vat,
			&VatConfigRecord {
				name: name.into(),
				spec: VatSpec {
					bundle_spec: format!("test:{name}"),
					parameters: Value::Null,
					endowments: Vec::new(),
				},
			},
		)
		.unwrap();
		vat
	}

	#[test]
	fn clean_store_has_no_violations() {
		let store = testing_store();
		assert_eq!(store.verify_invariants().unwrap(), Vec::<String>::new());
	}

	#[test]
	fn consistent_import_passes() {
		let mut store = testing_store();
		let owner = add_vat(&mut store, "owner");
		let holder = add_vat(&mut store, "holder");
		let ko = store.add_object(owner).unwrap();
		store.clist_add(owner, ko, VatRef::object_export(0), true).unwrap();
		store.clist_add(holder, ko, VatRef::object_import(1), true).unwrap();
		store.adjust_object_refcount(ko, 1, 1).unwrap();
		assert_eq!(store.verify_invariants().unwrap(), Vec::<String>::new());
	}

	#[test]
	fn drifted_refcount_is_reported() {
		let mut store = testing_store();
		let owner = add_vat(&mut store, "owner");
		let ko = store.add_object(owner).unwrap();
		store.adjust_object_refcount(ko, 1, 1).unwrap();
		let violations = store.verify_invariants().unwrap();
		assert_eq!(violations.len(), 2);
		assert!(violations[0].contains("reachable count"));
	}

	#[test]
	fn settled_promise_with_decider_is_reported() {
		let mut store = testing_store();
		let vat = add_vat(&mut store, "v");
		let kp = store.add_promise().unwrap();
		store.settle_promise(kp, false, &ocap_types::CapData::value(&serde_json::json!(1)))
			.unwrap();
		store.set_promise_decider(kp, Some(vat)).unwrap();
		let violations = store.verify_invariants().unwrap();
		assert!(violations.iter().any(|v| v.contains("still has decider")));
	}
}
