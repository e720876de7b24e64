// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Reference translation across the vat boundary.
//!
//! Outbound (kref→vref) translation creates c-list imports on demand and
//! takes the matching reference holds. Inbound (vref→kref) translation
//! validates what the vat names: unknown imports and unreachable slots
//! are contract violations, fresh exports allocate kernel entities.

use ocap_types::{KernelRef, RefTag, VatId, VatRef};
use tracing::trace;

use crate::{
	error::{Error, Result},
	kernel::Kernel,
};

impl Kernel {
	/// Translate a kref for delivery into `vat`, importing it into the
	/// c-list if the vat has never seen it.
	pub(crate) fn translate_kref_to_vat(&mut self, vat: VatId, kref: KernelRef) -> Result<VatRef> {
		if let Some((reachable, vref)) = self.store.clist_lookup_kref(vat, kref)? {
			if !reachable {
				self.store.clist_set_reachable(vat, kref, true)?;
				// a re-delivered import becomes invokable again
				if kref.is_object() && !vref.export {
					self.store.adjust_object_refcount(kref, 1, 0)?;
				}
			}
			return Ok(vref);
		}
		if kref.is_object() && self.store.object_owner(kref)? == vat {
			return Err(Error::Internal(format!("{vat} lost its own export {kref}")));
		}
		let tag = if kref.is_object() { RefTag::Object } else { RefTag::Promise };
		let index = self.store.allocate_import_index(vat, tag)?;
		let vref = match tag {
			RefTag::Object => VatRef::object_import(index),
			RefTag::Promise => VatRef::promise_import(index),
		};
		self.store.clist_add(vat, kref, vref, true)?;
		self.incref(kref, true)?;
		trace!(%vat, %kref, %vref, "imported into vat");
		Ok(vref)
	}

	/// Translate a vref arriving in a syscall from `vat`.
	///
	/// `require_reachable` applies to message slots and targets: a vat
	/// may not pass a reference it has already dropped.
	pub(crate) fn translate_vref_from_vat(
		&mut self,
		vat: VatId,
		vref: VatRef,
		require_reachable: bool,
	) -> Result<KernelRef> {
		if let Some(kref) = self.store.clist_lookup_vref(vat, vref)? {
			if require_reachable && kref.is_object() {
				let (reachable, _) = self
					.store
					.clist_lookup_kref(vat, kref)?
					.ok_or_else(|| Error::Internal(format!("one-way c-list row for {kref}")))?;
				if !reachable {
					if vref.export {
						// the owner may always re-export
						self.store.clist_set_reachable(vat, kref, true)?;
					} else {
						return Err(Error::SyscallViolation {
							vat,
							reason: format!("{vref} was dropped and cannot be sent"),
						});
					}
				}
			}
			return Ok(kref);
		}
		if !vref.export {
			return Err(Error::SyscallViolation {
				vat,
				reason: format!("unknown import {vref}"),
			});
		}
		let kref = match vref.tag {
			RefTag::Object => self.store.add_object(vat)?,
			RefTag::Promise => {
				let kref = self.store.add_promise()?;
				self.store.set_promise_decider(kref, Some(vat))?;
				kref
			}
		};
		self.store.clist_add(vat, kref, vref, true)?;
		if kref.is_promise() {
			// promise c-list entries count for every vat, exporter
			// included; object counts track importers only
			self.store.adjust_promise_refcount(kref, 1)?;
		}
		trace!(%vat, %vref, %kref, "vat exported new entity");
		Ok(kref)
	}

	/// Translate the result slot of an outgoing send: a promise the vat
	/// either just minted or still decides, whose decidership rides
	/// along with the message.
	pub(crate) fn translate_result_from_vat(&mut self, vat: VatId, vref: VatRef) -> Result<KernelRef> {
		if !vref.is_promise() {
			return Err(Error::SyscallViolation {
				vat,
				reason: format!("result {vref} is not a promise"),
			});
		}
		let kref = self.translate_vref_from_vat(vat, vref, false)?;
		if !matches!(self.store.promise_state(kref)?, ocap_store::PromiseState::Unresolved) {
			return Err(Error::SyscallViolation {
				vat,
				reason: format!("result {vref} is already settled"),
			});
		}
		match self.store.promise_decider(kref)? {
			Some(decider) if decider == vat => Ok(kref),
			None => Ok(kref),
			Some(other) => Err(Error::SyscallViolation {
				vat,
				reason: format!("result {vref} is decided by {other}"),
			}),
		}
	}
}
