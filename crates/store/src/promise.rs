// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use ocap_types::{CapData, KernelRef, Message, VatId};
use tracing::trace;

use crate::{Error, KernelStore, PromiseRow, PromiseState, Result, schema};

impl KernelStore {
	/// Create a fresh unresolved `kp` with no decider and zero refcount.
	pub fn add_promise(&mut self) -> Result<KernelRef> {
		let kref = self.allocate_promise_id()?;
		self.db.set(&schema::promise_state(kref), PromiseState::Unresolved.as_str())?;
		self.db.set(&schema::promise_subscribers(kref), "[]")?;
		self.db.set(&schema::promise_queue(kref), "[]")?;
		self.db.set(&schema::promise_refcount(kref), "0")?;
		trace!(%kref, "promise added");
		Ok(kref)
	}

	pub fn promise_exists(&self, kref: KernelRef) -> Result<bool> {
		Ok(self.db.get(&schema::promise_state(kref))?.is_some())
	}

	pub fn promise_state(&self, kref: KernelRef) -> Result<PromiseState> {
		let raw = self.db.get(&schema::promise_state(kref))?.ok_or(Error::UnknownRef(kref))?;
		PromiseState::parse(&raw)
	}

	pub fn promise_decider(&self, kref: KernelRef) -> Result<Option<VatId>> {
		match self.db.get(&schema::promise_decider(kref))? {
			Some(raw) => Ok(Some(
				raw.parse().map_err(|_| Error::Corrupt(format!("decider of {kref} = `{raw}`")))?,
			)),
			None => Ok(None),
		}
	}

	pub fn set_promise_decider(&mut self, kref: KernelRef, decider: Option<VatId>) -> Result<()> {
		match decider {
			Some(vat) => self.db.set(&schema::promise_decider(kref), &vat.to_string())?,
			None => self.db.delete(&schema::promise_decider(kref))?,
		}
		Ok(())
	}

	pub fn promise_subscribers(&self, kref: KernelRef) -> Result<Vec<VatId>> {
		self.get_json(&schema::promise_subscribers(kref))
	}

	/// Append a subscriber, preserving subscription order, at most once.
	pub fn add_promise_subscriber(&mut self, kref: KernelRef, vat: VatId) -> Result<()> {
		let mut subscribers = self.promise_subscribers(kref)?;
		if !subscribers.contains(&vat) {
			subscribers.push(vat);
			self.set_json(&schema::promise_subscribers(kref), &subscribers)?;
		}
		Ok(())
	}

	pub fn promise_queue(&self, kref: KernelRef) -> Result<Vec<Message<KernelRef>>> {
		self.get_json(&schema::promise_queue(kref))
	}

	/// Park a send on an unresolved promise, in arrival order.
	pub fn enqueue_promise_message(&mut self, kref: KernelRef, message: Message<KernelRef>) -> Result<()> {
		let mut queue = self.promise_queue(kref)?;
		queue.push(message);
		self.set_json(&schema::promise_queue(kref), &queue)?;
		Ok(())
	}

	pub fn promise_value(&self, kref: KernelRef) -> Result<Option<CapData<KernelRef>>> {
		match self.db.get(&schema::promise_value(kref))? {
			Some(raw) => Ok(Some(
				serde_json::from_str(&raw)
					.map_err(|err| Error::Corrupt(format!("value of {kref}: {err}")))?,
			)),
			None => Ok(None),
		}
	}

	/// Settle the promise: write state and value, clear the decider, and
	/// hand back the parked messages and ordered subscribers for the
	/// caller to act on.
	pub fn settle_promise(
		&mut self,
		kref: KernelRef,
		rejected: bool,
		value: &CapData<KernelRef>,
	) -> Result<(Vec<VatId>, Vec<Message<KernelRef>>)> {
		let state = if rejected { PromiseState::Rejected } else { PromiseState::Fulfilled };
		let subscribers = self.promise_subscribers(kref)?;
		let queue = self.promise_queue(kref)?;
		self.db.set(&schema::promise_state(kref), state.as_str())?;
		self.set_json(&schema::promise_value(kref), value)?;
		self.db.delete(&schema::promise_decider(kref))?;
		self.set_json(&schema::promise_subscribers(kref), &Vec::<VatId>::new())?;
		self.db.set(&schema::promise_queue(kref), "[]")?;
		trace!(%kref, %state, "promise settled");
		Ok((subscribers, queue))
	}

	pub fn promise_refcount(&self, kref: KernelRef) -> Result<u64> {
		let raw = self.db.get(&schema::promise_refcount(kref))?.ok_or(Error::UnknownRef(kref))?;
		raw.parse().map_err(|_| Error::Corrupt(format!("refCount of {kref} = `{raw}`")))
	}

	pub fn adjust_promise_refcount(&mut self, kref: KernelRef, delta: i64) -> Result<u64> {
		let count = self.promise_refcount(kref)?;
		let next = count
			.checked_add_signed(delta)
			.ok_or_else(|| Error::Corrupt(format!("refCount underflow on {kref}")))?;
		self.db.set(&schema::promise_refcount(kref), &next.to_string())?;
		if delta < 0 && next == 0 {
			self.note_maybe_free(kref);
		}
		Ok(next)
	}

	/// Remove the row, returning any resolution value whose slots still
	/// hold references the caller must release.
	pub fn delete_promise(&mut self, kref: KernelRef) -> Result<Option<CapData<KernelRef>>> {
		let value = self.promise_value(kref)?;
		self.db.delete(&schema::promise_state(kref))?;
		self.db.delete(&schema::promise_decider(kref))?;
		self.db.delete(&schema::promise_subscribers(kref))?;
		self.db.delete(&schema::promise_queue(kref))?;
		self.db.delete(&schema::promise_value(kref))?;
		self.db.delete(&schema::promise_refcount(kref))?;
		trace!(%kref, "promise deleted");
		Ok(value)
	}

	pub fn promise_row(&self, kref: KernelRef) -> Result<PromiseRow> {
		Ok(PromiseRow {
			kref,
			state: self.promise_state(kref)?,
			decider: self.promise_decider(kref)?,
			subscribers: self.promise_subscribers(kref)?,
			queue: self.promise_queue(kref)?,
			value: self.promise_value(kref)?,
			ref_count: self.promise_refcount(kref)?,
		})
	}

	/// Every live `kp`, for diagnostics and invariant sweeps.
	pub fn promise_krefs(&self) -> Result<Vec<KernelRef>> {
		let mut out = Vec::new();
		let mut cursor = "kp".to_string();
		while let Some(key) = self.db.get_next_key(&cursor)? {
			if !key.starts_with("kp") {
				break;
			}
			cursor = key.clone();
			if let Some(kref) = key.strip_suffix(".state").and_then(|k| k.parse().ok()) {
				out.push(kref);
			}
		}
		Ok(out)
	}
}
