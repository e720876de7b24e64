// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Run-queue item construction and routing. Everything enqueued through
//! here carries the reference holds invariant (4) expects.

use ocap_store::PromiseState;
use ocap_types::{ErrorKind, ErrorRecord, KernelRef, Message, RunQueueItem, VatId};
use tracing::debug;

use crate::{
	error::{Error, Result},
	kernel::Kernel,
};

impl Kernel {
	/// Enqueue an item, taking a reachable hold on every kref it names.
	pub(crate) fn enqueue_with_holds(&mut self, item: RunQueueItem) -> Result<u64> {
		for kref in item.held_refs() {
			self.incref(kref, true)?;
		}
		Ok(self.store.enqueue_run(&item)?)
	}

	pub(crate) fn enqueue_send(&mut self, target: KernelRef, message: Message<KernelRef>) -> Result<()> {
		self.enqueue_with_holds(RunQueueItem::Send { target, message })?;
		Ok(())
	}

	pub(crate) fn enqueue_notify(&mut self, vat_id: VatId, kp: KernelRef) -> Result<()> {
		self.enqueue_with_holds(RunQueueItem::Notify { vat_id, kp })?;
		Ok(())
	}

	/// GC items hold nothing; the counts they act on are already settled.
	pub(crate) fn enqueue_gc_item(&mut self, item: RunQueueItem) -> Result<()> {
		self.store.enqueue_run(&item)?;
		Ok(())
	}

	pub(crate) fn enqueue_bring_out_your_dead(&mut self, vat_id: VatId) -> Result<()> {
		self.enqueue_gc_item(RunQueueItem::BringOutYourDead { vat_id })
	}

	/// One delivery, routed by item type.
	pub(crate) fn deliver_item(&mut self, item: &RunQueueItem) -> Result<()> {
		match item {
			RunQueueItem::Send { target, message } => self.deliver_send(*target, message),
			RunQueueItem::Notify { vat_id, kp } => self.deliver_notify(*vat_id, *kp),
			RunQueueItem::DropExports { vat_id, krefs } => {
				self.deliver_drop_exports(*vat_id, krefs)
			}
			RunQueueItem::RetireExports { vat_id, krefs } => {
				self.deliver_retire_exports(*vat_id, krefs)
			}
			RunQueueItem::RetireImports { vat_id, krefs } => {
				self.deliver_retire_imports(*vat_id, krefs)
			}
			RunQueueItem::BringOutYourDead { vat_id } => self.deliver_bring_out_your_dead(*vat_id),
		}
	}

	fn deliver_send(&mut self, target: KernelRef, message: &Message<KernelRef>) -> Result<()> {
		match target {
			KernelRef::Object(_) => {
				if !self.store.object_exists(target)? || self.store.object_revoked(target)? {
					return self.reject_result(
						message,
						&ErrorRecord::new(ErrorKind::VatDeleted, format!("{target} is gone")),
					);
				}
				let owner = self.store.object_owner(target)?;
				if !self.is_vat_live(owner)? {
					return self.reject_result(message, &ErrorRecord::disconnected(owner));
				}
				self.deliver_message_to_vat(owner, target, message)
			}
			KernelRef::Promise(_) => {
				if !self.store.promise_exists(target)? {
					return self.reject_result(
						message,
						&ErrorRecord::new(ErrorKind::VatNotFound, format!("{target} is gone")),
					);
				}
				match self.store.promise_state(target)? {
					PromiseState::Unresolved => {
						// park behind the promise; holds transfer
						// from the run queue to the promise queue
						for slot in &message.args.slots {
							self.incref(*slot, true)?;
						}
						if let Some(result) = message.result {
							self.incref(result, true)?;
						}
						self.store.enqueue_promise_message(target, message.clone())?;
						debug!(%target, "send parked behind unresolved promise");
						Ok(())
					}
					PromiseState::Fulfilled => {
						let value = self
							.store
							.promise_value(target)?
							.ok_or_else(|| Error::Internal(format!("{target} fulfilled without value")))?;
						match value.slots.first() {
							Some(next) => {
								self.enqueue_send(*next, message.clone())?;
								Ok(())
							}
							None => self.reject_result(
								message,
								&ErrorRecord::new(
									ErrorKind::Internal,
									format!("{target} resolved to a non-capability value"),
								),
							),
						}
					}
					PromiseState::Rejected => {
						let reason = self
							.store
							.promise_value(target)?
							.ok_or_else(|| Error::Internal(format!("{target} rejected without value")))?;
						if let Some(result) = message.result {
							if self.store.promise_state(result)? == PromiseState::Unresolved {
								self.resolve_promise(None, result, true, reason)?;
							}
						}
						Ok(())
					}
				}
			}
		}
	}

	/// Reject the message's result promise with a marshaled error; the
	/// message itself is dropped. A result the sender already settled is
	/// left alone.
	pub(crate) fn reject_result(&mut self, message: &Message<KernelRef>, reason: &ErrorRecord) -> Result<()> {
		if let Some(result) = message.result {
			if self.store.promise_exists(result)?
				&& self.store.promise_state(result)? == PromiseState::Unresolved
			{
				let value = ocap_types::CapData::value(
					&serde_json::to_value(reason)
						.map_err(|err| Error::Internal(format!("marshal failure: {err}")))?,
				);
				self.resolve_promise(None, result, true, value)?;
			}
		}
		Ok(())
	}
}
