// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::fmt;

use ocap_types::{GcActionKind, KernelRef, VatId};

use crate::{Error, KernelStore, Result, schema};

/// One pending GC delta, persisted as `"<vatId> <kind> <kref>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GcAction {
	pub vat_id: VatId,
	pub kind: GcActionKind,
	pub kref: KernelRef,
}

impl fmt::Display for GcAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {} {}", self.vat_id, self.kind, self.kref)
	}
}

impl GcAction {
	pub fn parse(raw: &str) -> Result<Self> {
		let mut parts = raw.split(' ');
		let parse = || Error::Corrupt(format!("gc action `{raw}`"));
		let vat_id = parts.next().and_then(|s| s.parse().ok()).ok_or_else(parse)?;
		let kind = parts.next().and_then(GcActionKind::parse).ok_or_else(parse)?;
		let kref = parts.next().and_then(|s| s.parse().ok()).ok_or_else(parse)?;
		if parts.next().is_some() {
			return Err(parse());
		}
		Ok(GcAction { vat_id, kind, kref })
	}
}

impl KernelStore {
	pub fn gc_actions(&self) -> Result<Vec<GcAction>> {
		let raw: Vec<String> = self.get_json(schema::GC_ACTIONS)?;
		raw.iter().map(|s| GcAction::parse(s)).collect()
	}

	/// Merge new actions into the persisted set, keeping it sorted and
	/// free of duplicates.
	pub fn add_gc_actions(&mut self, actions: impl IntoIterator<Item = GcAction>) -> Result<()> {
		let mut set: Vec<GcAction> = self.gc_actions()?;
		for action in actions {
			if !set.contains(&action) {
				set.push(action);
			}
		}
		set.sort();
		let raw: Vec<String> = set.iter().map(GcAction::to_string).collect();
		self.set_json(schema::GC_ACTIONS, &raw)?;
		Ok(())
	}

	pub fn take_gc_actions(&mut self) -> Result<Vec<GcAction>> {
		let actions = self.gc_actions()?;
		if !actions.is_empty() {
			self.db.set(schema::GC_ACTIONS, "[]")?;
		}
		Ok(actions)
	}

	/// Remove any pending action touching `kref` (used when the object
	/// row disappears before the action is delivered).
	pub fn retain_gc_actions(&mut self, keep: impl Fn(&GcAction) -> bool) -> Result<()> {
		let actions = self.gc_actions()?;
		let kept: Vec<String> =
			actions.iter().filter(|a| keep(a)).map(GcAction::to_string).collect();
		self.set_json(schema::GC_ACTIONS, &kept)?;
		Ok(())
	}

	pub fn reap_queue(&self) -> Result<Vec<VatId>> {
		self.get_json(schema::REAP_QUEUE)
	}

	/// FIFO, one entry per vat.
	pub fn add_to_reap_queue(&mut self, vat: VatId) -> Result<()> {
		let mut queue = self.reap_queue()?;
		if !queue.contains(&vat) {
			queue.push(vat);
			self.set_json(schema::REAP_QUEUE, &queue)?;
		}
		Ok(())
	}

	pub fn take_reap_queue(&mut self) -> Result<Vec<VatId>> {
		let queue = self.reap_queue()?;
		if !queue.is_empty() {
			self.db.set(schema::REAP_QUEUE, "[]")?;
		}
		Ok(queue)
	}

	pub fn remove_from_reap_queue(&mut self, vat: VatId) -> Result<()> {
		let mut queue = self.reap_queue()?;
		if let Some(pos) = queue.iter().position(|v| *v == vat) {
			queue.remove(pos);
			self.set_json(schema::REAP_QUEUE, &queue)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing_store;

	#[test]
	fn action_text_round_trip() {
		let action = GcAction {
			vat_id: VatId(1),
			kind: GcActionKind::DropExports,
			kref: KernelRef::Object(5),
		};
		assert_eq!(action.to_string(), "v1 dropExports ko5");
		assert_eq!(GcAction::parse("v1 dropExports ko5").unwrap(), action);
		assert!(GcAction::parse("v1 vanish ko5").is_err());
		assert!(GcAction::parse("v1 dropExports").is_err());
	}

	#[test]
	fn set_is_sorted_and_deduplicated() {
		let mut store = testing_store();
		let a = GcAction { vat_id: VatId(2), kind: GcActionKind::RetireImports, kref: KernelRef::Object(1) };
		let b = GcAction { vat_id: VatId(1), kind: GcActionKind::DropExports, kref: KernelRef::Object(9) };
		store.add_gc_actions([a, b, a]).unwrap();
		assert_eq!(store.gc_actions().unwrap(), vec![b, a]);
		assert_eq!(
			store.get(schema::GC_ACTIONS).unwrap().unwrap(),
			"[\"v1 dropExports ko9\",\"v2 retireImports ko1\"]"
		);
		assert_eq!(store.take_gc_actions().unwrap().len(), 2);
		assert_eq!(store.get(schema::GC_ACTIONS).unwrap().as_deref(), Some("[]"));
	}

	#[test]
	fn reap_queue_is_fifo_and_unique() {
		let mut store = testing_store();
		store.add_to_reap_queue(VatId(2)).unwrap();
		store.add_to_reap_queue(VatId(1)).unwrap();
		store.add_to_reap_queue(VatId(2)).unwrap();
		assert_eq!(store.reap_queue().unwrap(), vec![VatId(2), VatId(1)]);
		store.remove_from_reap_queue(VatId(2)).unwrap();
		assert_eq!(store.take_reap_queue().unwrap(), vec![VatId(1)]);
		assert_eq!(store.reap_queue().unwrap(), Vec::new());
	}
}
