// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Validation and application of vat syscalls. Any contract violation
//! surfaces as [`Error::SyscallViolation`], which terminates the vat.

use ocap_store::PromiseState;
use ocap_types::{CapData, KernelRef, Message, VatId, VatRef, VatSyscall};
use serde_json::Value;
use tracing::trace;

use crate::{
	error::{Error, Result},
	kernel::Kernel,
};

impl Kernel {
	/// Apply one syscall from `vat`, returning the value the worker's
	/// request is answered with.
	pub(crate) fn apply_syscall(&mut self, vat: VatId, syscall: &VatSyscall) -> Result<Value> {
		trace!(%vat, method = syscall.method_name(), "syscall");
		match syscall {
			VatSyscall::Send { target, message } => {
				let target_kref = self.translate_vref_from_vat(vat, *target, true)?;
				let message = self.translate_message_from_vat(vat, message)?;
				self.enqueue_send(target_kref, message)?;
				Ok(Value::Null)
			}
			VatSyscall::Subscribe { vref } => {
				if !vref.is_promise() {
					return Err(Error::SyscallViolation {
						vat,
						reason: format!("cannot subscribe to {vref}"),
					});
				}
				let kref = self.translate_vref_from_vat(vat, *vref, false)?;
				if self.store.promise_state(kref)?.is_settled() {
					self.enqueue_notify(vat, kref)?;
				} else {
					self.store.add_promise_subscriber(kref, vat)?;
				}
				Ok(Value::Null)
			}
			VatSyscall::Resolve { resolutions } => {
				for resolution in resolutions {
					let kref =
						self.translate_vref_from_vat(vat, resolution.subject, false)?;
					if !kref.is_promise() {
						return Err(Error::SyscallViolation {
							vat,
							reason: format!("{} is not a promise", resolution.subject),
						});
					}
					if self.store.promise_state(kref)? != PromiseState::Unresolved {
						return Err(Error::SyscallViolation {
							vat,
							reason: format!("{kref} is already resolved"),
						});
					}
					if self.store.promise_decider(kref)? != Some(vat) {
						return Err(Error::SyscallViolation {
							vat,
							reason: format!("{vat} is not the decider of {kref}"),
						});
					}
					let value = self.translate_capdata_from_vat(vat, &resolution.value)?;
					self.resolve_promise(Some(vat), kref, resolution.rejected, value)?;
				}
				Ok(Value::Null)
			}
			VatSyscall::Exit { failure, info } => {
				let info = self.translate_capdata_from_vat(vat, info)?;
				self.pending_exits.push((vat, *failure, info));
				Ok(Value::Null)
			}
			VatSyscall::VatstoreGet { key } => {
				let value = self.store.vatstore_get(vat, key)?;
				Ok(value.map(Value::String).unwrap_or(Value::Null))
			}
			VatSyscall::VatstoreSet { key, value } => {
				self.store.vatstore_set(vat, key, value)?;
				Ok(Value::Null)
			}
			VatSyscall::VatstoreDelete { key } => {
				self.store.vatstore_delete(vat, key)?;
				Ok(Value::Null)
			}
			VatSyscall::VatstoreGetNextKey { previous } => {
				let next = self.store.vatstore_get_next_key(vat, previous)?;
				Ok(next.map(Value::String).unwrap_or(Value::Null))
			}
			VatSyscall::DropImports { vrefs } => {
				self.drop_imports(vat, vrefs)?;
				Ok(Value::Null)
			}
			VatSyscall::RetireImports { vrefs } => {
				self.retire_imports(vat, vrefs)?;
				Ok(Value::Null)
			}
			VatSyscall::RetireExports { vrefs } => {
				self.retire_exports(vat, vrefs)?;
				Ok(Value::Null)
			}
		}
	}

	fn translate_message_from_vat(
		&mut self,
		vat: VatId,
		message: &Message<VatRef>,
	) -> Result<Message<KernelRef>> {
		let args = self.translate_capdata_from_vat(vat, &message.args)?;
		let result = match message.result {
			Some(vref) => Some(self.translate_result_from_vat(vat, vref)?),
			None => None,
		};
		Ok(Message::new(message.method.clone(), args, result))
	}

	pub(crate) fn translate_capdata_from_vat(
		&mut self,
		vat: VatId,
		data: &CapData<VatRef>,
	) -> Result<CapData<KernelRef>> {
		data.clone().try_map_slots(|vref| self.translate_vref_from_vat(vat, vref, true))
	}

	fn drop_imports(&mut self, vat: VatId, vrefs: &[VatRef]) -> Result<()> {
		for vref in vrefs {
			if vref.export || vref.is_promise() {
				return Err(Error::SyscallViolation {
					vat,
					reason: format!("cannot drop {vref}"),
				});
			}
			let kref = self.lookup_import(vat, *vref)?;
			let was_reachable = self.store.clist_set_reachable(vat, kref, false)?;
			if was_reachable {
				self.store.adjust_object_refcount(kref, -1, 0)?;
			}
		}
		Ok(())
	}

	fn retire_imports(&mut self, vat: VatId, vrefs: &[VatRef]) -> Result<()> {
		for vref in vrefs {
			if vref.export || vref.is_promise() {
				return Err(Error::SyscallViolation {
					vat,
					reason: format!("cannot retire {vref}"),
				});
			}
			let kref = self.lookup_import(vat, *vref)?;
			let (reachable, _) = self
				.store
				.clist_lookup_kref(vat, kref)?
				.ok_or_else(|| Error::Internal(format!("one-way c-list row for {kref}")))?;
			self.store.clist_remove(vat, kref)?;
			if self.store.object_exists(kref)? {
				self.store.adjust_object_refcount(kref, if reachable { -1 } else { 0 }, -1)?;
			}
		}
		Ok(())
	}

	fn retire_exports(&mut self, vat: VatId, vrefs: &[VatRef]) -> Result<()> {
		for vref in vrefs {
			if !vref.export || vref.is_promise() {
				return Err(Error::SyscallViolation {
					vat,
					reason: format!("cannot retire export {vref}"),
				});
			}
			let kref = self
				.store
				.clist_lookup_vref(vat, *vref)?
				.ok_or_else(|| Error::SyscallViolation {
					vat,
					reason: format!("unknown export {vref}"),
				})?;
			if self.store.object_owner(kref)? != vat {
				return Err(Error::SyscallViolation {
					vat,
					reason: format!("{vref} is not owned by {vat}"),
				});
			}
			let counts = self.store.object_refcounts(kref)?;
			if counts.reachable > 0 {
				return Err(Error::SyscallViolation {
					vat,
					reason: format!("{vref} is still reachable and cannot be retired"),
				});
			}
			self.abandon_export(vat, kref)?;
		}
		Ok(())
	}

	fn lookup_import(&mut self, vat: VatId, vref: VatRef) -> Result<KernelRef> {
		self.store.clist_lookup_vref(vat, vref)?.ok_or_else(|| Error::SyscallViolation {
			vat,
			reason: format!("unknown import {vref}"),
		})
	}
}
