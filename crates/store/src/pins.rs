// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! References the host holds outside any c-list (e.g. result promises
//! handed to a façade caller). Pins count toward refcounts; the `pins`
//! row exists only while at least one pin is held.

use std::collections::BTreeMap;

use ocap_types::KernelRef;

use crate::{KernelStore, Result};

const PINS: &str = "pins";

impl KernelStore {
	pub fn pins(&self) -> Result<BTreeMap<KernelRef, u64>> {
		match self.db.get(PINS)? {
			Some(raw) => serde_json::from_str(&raw)
				.map_err(|err| crate::Error::Corrupt(format!("pins: {err}"))),
			None => Ok(BTreeMap::new()),
		}
	}

	fn write_pins(&mut self, pins: &BTreeMap<KernelRef, u64>) -> Result<()> {
		if pins.is_empty() {
			self.db.delete(PINS)?;
		} else {
			self.set_json(PINS, pins)?;
		}
		Ok(())
	}

	pub fn add_pin(&mut self, kref: KernelRef) -> Result<u64> {
		let mut pins = self.pins()?;
		let count = pins.entry(kref).or_insert(0);
		*count += 1;
		let count = *count;
		self.write_pins(&pins)?;
		Ok(count)
	}

	pub fn remove_pin(&mut self, kref: KernelRef) -> Result<u64> {
		let mut pins = self.pins()?;
		let remaining = match pins.get_mut(&kref) {
			Some(count) if *count > 1 => {
				*count -= 1;
				*count
			}
			Some(_) => {
				pins.remove(&kref);
				0
			}
			None => 0,
		};
		self.write_pins(&pins)?;
		Ok(remaining)
	}

	/// Drop every pin, returning what was held so the caller can release
	/// the matching refcounts.
	pub fn take_pins(&mut self) -> Result<BTreeMap<KernelRef, u64>> {
		let pins = self.pins()?;
		if !pins.is_empty() {
			self.db.delete(PINS)?;
		}
		Ok(pins)
	}
}
