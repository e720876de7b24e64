// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Promise settlement and its propagation: subscriber notifies, flushing
//! of pipelined messages, and the notify delivery itself.

use ocap_store::PromiseState;
use ocap_types::{CapData, ErrorKind, ErrorRecord, KernelRef, VatDelivery, VatId, VatResolution};
use tracing::debug;

use crate::{
	error::{Error, Result},
	kernel::Kernel,
};

impl Kernel {
	/// Settle `kp`. The first settlement wins; a second is a kernel bug
	/// because the syscall layer already rejects it.
	///
	/// `resolver` is the vat acting through `syscall.resolve`, if any;
	/// its own c-list entry for the promise retires immediately.
	pub(crate) fn resolve_promise(
		&mut self,
		resolver: Option<VatId>,
		kp: KernelRef,
		rejected: bool,
		value: CapData<KernelRef>,
	) -> Result<()> {
		if self.store.promise_state(kp)? != PromiseState::Unresolved {
			return Err(Error::Internal(format!("{kp} settled twice")));
		}
		debug!(%kp, rejected, "promise settled");
		// the stored resolution value holds its slots
		for slot in &value.slots {
			self.incref(*slot, true)?;
		}
		let (subscribers, parked) = self.store.settle_promise(kp, rejected, &value)?;

		if let Some(vat) = resolver {
			if self.store.clist_remove(vat, kp)?.is_some() {
				self.decref(kp, true)?;
			}
		}

		for subscriber in subscribers {
			if self.is_vat_live(subscriber)? {
				self.enqueue_notify(subscriber, kp)?;
			}
		}

		// flush pipelined sends in arrival order
		for message in parked {
			if !rejected {
				match value.slots.first() {
					Some(next_target) => {
						self.enqueue_send(*next_target, message.clone())?;
					}
					None => {
						self.reject_result(
							&message,
							&ErrorRecord::new(
								ErrorKind::Internal,
								format!("{kp} resolved to a non-capability value"),
							),
						)?;
					}
				}
			} else if let Some(result) = message.result {
				if self.store.promise_state(result)? == PromiseState::Unresolved {
					self.resolve_promise(None, result, true, value.clone())?;
				}
			}
			// release the promise queue's holds
			for slot in &message.args.slots {
				self.decref(*slot, true)?;
			}
			if let Some(result) = message.result {
				self.decref(result, true)?;
			}
		}
		Ok(())
	}

	/// Deliver a `notify` to one subscriber, then retire its c-list
	/// entry for the promise.
	pub(crate) fn deliver_notify(&mut self, vat: VatId, kp: KernelRef) -> Result<()> {
		if !self.is_vat_live(vat)? {
			return Ok(());
		}
		if !self.store.promise_exists(kp)? {
			return Ok(());
		}
		let state = self.store.promise_state(kp)?;
		if state == PromiseState::Unresolved {
			return Err(Error::Internal(format!("notify for unresolved {kp}")));
		}
		let Some((_, subject)) = self.store.clist_lookup_kref(vat, kp)? else {
			// already retired from this vat's view
			return Ok(());
		};
		let value = self
			.store
			.promise_value(kp)?
			.ok_or_else(|| Error::Internal(format!("{kp} settled without value")))?;
		let translated = value.try_map_slots(|slot| self.translate_kref_to_vat(vat, slot))?;
		let delivery = VatDelivery::Notify {
			resolutions: vec![VatResolution {
				subject,
				rejected: state == PromiseState::Rejected,
				value: translated,
			}],
		};
		self.dispatch(vat, &delivery)?;
		// the vat has observed the resolution; its c-list entry retires
		if self.store.clist_remove(vat, kp)?.is_some() {
			self.decref(kp, true)?;
		}
		self.note_reap(vat)?;
		Ok(())
	}
}
