// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Reference accounting and the cross-vat collector: refcount holds,
//! end-of-crank decay processing, GC delivery handling, terminated-vat
//! cleanup, and the full sweep behind `collectGarbage`.

use ocap_store::GcAction;
use ocap_types::{GcActionKind, KernelRef, RunQueueItem, VatId};
use tracing::{debug, instrument, trace};

use crate::{
	error::{Error, Result},
	kernel::Kernel,
};

impl Kernel {
	/// Take a hold on `kref`. Objects gain recognizable (and reachable
	/// when `reachable`); promises gain one count.
	pub(crate) fn incref(&mut self, kref: KernelRef, reachable: bool) -> Result<()> {
		match kref {
			KernelRef::Object(_) => {
				if !self.store.object_exists(kref)? {
					return Err(Error::Internal(format!("hold on missing {kref}")));
				}
				self.store.adjust_object_refcount(kref, i64::from(reachable), 1)?;
			}
			KernelRef::Promise(_) => {
				if !self.store.promise_exists(kref)? {
					return Err(Error::Internal(format!("hold on missing {kref}")));
				}
				self.store.adjust_promise_refcount(kref, 1)?;
			}
		}
		Ok(())
	}

	/// Release a hold. Rows that were already collected are tolerated:
	/// abandonment paths delete objects while stale holders unwind.
	pub(crate) fn decref(&mut self, kref: KernelRef, reachable: bool) -> Result<()> {
		match kref {
			KernelRef::Object(_) => {
				if self.store.object_exists(kref)? {
					self.store.adjust_object_refcount(kref, -i64::from(reachable), -1)?;
				}
			}
			KernelRef::Promise(_) => {
				if self.store.promise_exists(kref)? {
					self.store.adjust_promise_refcount(kref, -1)?;
				}
			}
		}
		Ok(())
	}

	/// Drain the decayed-reference set, deleting dead promises and
	/// queueing GC actions for dead objects, until nothing new decays.
	pub(crate) fn process_refcounts(&mut self) -> Result<()> {
		loop {
			let batch = self.store.take_maybe_free();
			if batch.is_empty() {
				return Ok(());
			}
			for kref in batch {
				match kref {
					KernelRef::Promise(_) => self.process_dead_promise(kref)?,
					KernelRef::Object(_) => self.process_dead_object(kref)?,
				}
			}
		}
	}

	fn process_dead_promise(&mut self, kp: KernelRef) -> Result<()> {
		if !self.store.promise_exists(kp)? || self.store.promise_refcount(kp)? > 0 {
			return Ok(());
		}
		let row = self.store.promise_row(kp)?;
		self.store.delete_promise(kp)?;
		trace!(%kp, "promise collected");
		if let Some(value) = row.value {
			for slot in value.slots {
				self.decref(slot, true)?;
			}
		}
		for message in row.queue {
			for slot in message.args.slots {
				self.decref(slot, true)?;
			}
			if let Some(result) = message.result {
				self.decref(result, true)?;
			}
		}
		Ok(())
	}

	fn process_dead_object(&mut self, ko: KernelRef) -> Result<()> {
		if !self.store.object_exists(ko)? {
			return Ok(());
		}
		let counts = self.store.object_refcounts(ko)?;
		let owner = self.store.object_owner(ko)?;
		let owner_live = self.is_vat_live(owner)?;
		if counts.recognizable == 0 {
			if owner_live && self.store.clist_lookup_kref(owner, ko)?.is_some() {
				self.store.add_gc_actions([GcAction {
					vat_id: owner,
					kind: GcActionKind::RetireExports,
					kref: ko,
				}])?;
			} else {
				self.store.delete_object(ko)?;
				self.store.retain_gc_actions(|action| action.kref != ko)?;
				trace!(%ko, "orphaned object collected");
			}
		} else if counts.reachable == 0 {
			if owner_live {
				if let Some((true, _)) = self.store.clist_lookup_kref(owner, ko)? {
					self.store.add_gc_actions([GcAction {
						vat_id: owner,
						kind: GcActionKind::DropExports,
						kref: ko,
					}])?;
				}
			}
		}
		Ok(())
	}

	/// Convert the accumulated GC action set into run-queue deliveries,
	/// coalescing per vat and kind.
	pub(crate) fn flush_gc_actions(&mut self) -> Result<()> {
		let actions = self.store.take_gc_actions()?;
		if actions.is_empty() {
			return Ok(());
		}
		debug!(count = actions.len(), "flushing gc actions");
		let mut groups: Vec<(VatId, GcActionKind, Vec<KernelRef>)> = Vec::new();
		for action in actions {
			match groups.last_mut() {
				Some((vat, kind, krefs)) if *vat == action.vat_id && *kind == action.kind => {
					krefs.push(action.kref);
				}
				_ => groups.push((action.vat_id, action.kind, vec![action.kref])),
			}
		}
		for (vat_id, kind, krefs) in groups {
			let item = match kind {
				GcActionKind::DropExports => RunQueueItem::DropExports { vat_id, krefs },
				GcActionKind::RetireExports => RunQueueItem::RetireExports { vat_id, krefs },
				GcActionKind::RetireImports => RunQueueItem::RetireImports { vat_id, krefs },
			};
			self.enqueue_gc_item(item)?;
		}
		Ok(())
	}

	// GC deliveries, each validated against current counts so stale
	// actions degrade to no-ops

	pub(crate) fn deliver_drop_exports(&mut self, vat: VatId, krefs: &[KernelRef]) -> Result<()> {
		if !self.is_vat_live(vat)? {
			return Ok(());
		}
		let mut vrefs = Vec::new();
		let mut dropped = Vec::new();
		for &ko in krefs {
			if !self.store.object_exists(ko)? {
				continue;
			}
			let counts = self.store.object_refcounts(ko)?;
			if counts.reachable > 0 || counts.recognizable == 0 {
				continue;
			}
			if let Some((true, vref)) = self.store.clist_lookup_kref(vat, ko)? {
				vrefs.push(vref);
				dropped.push(ko);
			}
		}
		if vrefs.is_empty() {
			return Ok(());
		}
		self.dispatch(vat, &ocap_types::VatDelivery::DropExports { vrefs })?;
		for ko in dropped {
			self.store.clist_set_reachable(vat, ko, false)?;
		}
		Ok(())
	}

	pub(crate) fn deliver_retire_exports(&mut self, vat: VatId, krefs: &[KernelRef]) -> Result<()> {
		if !self.is_vat_live(vat)? {
			return Ok(());
		}
		let mut vrefs = Vec::new();
		let mut retired = Vec::new();
		for &ko in krefs {
			if !self.store.object_exists(ko)? || self.store.object_refcounts(ko)?.recognizable > 0 {
				continue;
			}
			if let Some((_, vref)) = self.store.clist_lookup_kref(vat, ko)? {
				vrefs.push(vref);
				retired.push(ko);
			}
		}
		if vrefs.is_empty() {
			return Ok(());
		}
		self.dispatch(vat, &ocap_types::VatDelivery::RetireExports { vrefs })?;
		for ko in retired {
			self.store.clist_remove(vat, ko)?;
			self.store.delete_object(ko)?;
			self.store.retain_gc_actions(|action| action.kref != ko)?;
		}
		Ok(())
	}

	pub(crate) fn deliver_retire_imports(&mut self, vat: VatId, krefs: &[KernelRef]) -> Result<()> {
		if !self.is_vat_live(vat)? {
			return Ok(());
		}
		let mut vrefs = Vec::new();
		let mut retired = Vec::new();
		for &ko in krefs {
			if let Some((reachable, vref)) = self.store.clist_lookup_kref(vat, ko)? {
				vrefs.push(vref);
				retired.push((ko, reachable));
			}
		}
		if vrefs.is_empty() {
			return Ok(());
		}
		self.dispatch(vat, &ocap_types::VatDelivery::RetireImports { vrefs })?;
		for (ko, reachable) in retired {
			self.store.clist_remove(vat, ko)?;
			if self.store.object_exists(ko)? {
				self.store.adjust_object_refcount(ko, -i64::from(reachable), -1)?;
			}
		}
		Ok(())
	}

	pub(crate) fn deliver_bring_out_your_dead(&mut self, vat: VatId) -> Result<()> {
		if !self.is_vat_live(vat)? {
			return Ok(());
		}
		self.dispatch(vat, &ocap_types::VatDelivery::BringOutYourDead)
	}

	/// A terminated vat's export: tell every holder to retire its
	/// import, detach the owner, and leave the row to refcount decay,
	/// since queue slots or resolution values may still name it. Rows
	/// nothing holds disappear at once.
	fn retire_dead_export(&mut self, owner: VatId, ko: KernelRef) -> Result<()> {
		let mut holders = Vec::new();
		for vat in self.store.vat_ids()? {
			if vat != owner && self.store.clist_lookup_kref(vat, ko)?.is_some() {
				holders.push(vat);
			}
		}
		self.store.clist_remove(owner, ko)?;
		if holders.is_empty() && self.store.object_refcounts(ko)?.is_zero() {
			self.store.delete_object(ko)?;
			self.store.retain_gc_actions(|action| action.kref != ko)?;
			return Ok(());
		}
		self.store.add_gc_actions(holders.into_iter().map(|vat_id| GcAction {
			vat_id,
			kind: GcActionKind::RetireImports,
			kref: ko,
		}))?;
		Ok(())
	}

	/// An owner abandons an export: every other holder is told to
	/// retire its import, and the object row disappears now.
	pub(crate) fn abandon_export(&mut self, owner: VatId, ko: KernelRef) -> Result<()> {
		let mut actions = Vec::new();
		for vat in self.store.vat_ids()? {
			if vat != owner && self.store.clist_lookup_kref(vat, ko)?.is_some() {
				actions.push(GcAction {
					vat_id: vat,
					kind: GcActionKind::RetireImports,
					kref: ko,
				});
			}
		}
		self.store.clist_remove(owner, ko)?;
		self.store.delete_object(ko)?;
		self.store.retain_gc_actions(|action| {
			action.kref != ko || action.kind == GcActionKind::RetireImports
		})?;
		self.store.add_gc_actions(actions)?;
		Ok(())
	}

	/// Drain the c-lists of every vat marked terminated, emit the
	/// resulting retire traffic, and delete the vats' residue.
	#[instrument(name = "kernel::cleanup_terminated", level = "debug", skip(self))]
	pub(crate) fn cleanup_terminated_vats(&mut self) -> Result<()> {
		let terminated = self.store.terminated_vats()?;
		if terminated.is_empty() {
			return Ok(());
		}
		self.store.create_savepoint("cleanup")?;
		let outcome = self.cleanup_terminated_inner(&terminated);
		match outcome {
			Ok(()) => self.store.release_savepoint("cleanup")?,
			Err(ref _err) => {
				self.store.rollback_savepoint("cleanup")?;
			}
		}
		outcome
	}

	fn cleanup_terminated_inner(&mut self, terminated: &[VatId]) -> Result<()> {
		for &vat in terminated {
			self.stop_vat_worker(vat);
			for kref in self.store.clist_krefs(vat)? {
				let Some((reachable, _vref)) = self.store.clist_lookup_kref(vat, kref)? else {
					continue;
				};
				match kref {
					KernelRef::Promise(_) => {
						self.store.clist_remove(vat, kref)?;
						if self.store.promise_exists(kref)? {
							self.store.adjust_promise_refcount(kref, -1)?;
						}
					}
					KernelRef::Object(_) => {
						if self.store.object_exists(kref)?
							&& self.store.object_owner(kref)? == vat
						{
							self.retire_dead_export(vat, kref)?;
						} else {
							self.store.clist_remove(vat, kref)?;
							if self.store.object_exists(kref)? {
								self.store.adjust_object_refcount(
									kref,
									-i64::from(reachable),
									-1,
								)?;
							}
						}
					}
				}
			}
			self.store.clist_clear(vat)?;
			self.store.delete_vat_store(vat)?;
			self.store.delete_vat_config(vat)?;
			self.store.unmap_vat_from_subcluster(vat)?;
			self.store.remove_from_reap_queue(vat)?;
			self.store.unmark_vat_terminated(vat)?;
			debug!(%vat, "terminated vat cleaned up");
		}
		// subclusters whose vats are all gone disappear with them
		for record in self.store.subclusters()? {
			let mut empty = true;
			for vat in record.vats.values() {
				if self.store.vat_config(*vat)?.is_some() {
					empty = false;
					break;
				}
			}
			if empty {
				self.store.remove_subcluster(record.id)?;
			}
		}
		self.process_refcounts()?;
		self.flush_gc_actions()?;
		Ok(())
	}

	/// Force a full sweep: release host pins, clean terminated vats,
	/// settle every pending count and drive the queue dry.
	#[instrument(name = "kernel::collect_garbage", level = "info", skip(self))]
	pub fn collect_garbage(&mut self) -> Result<()> {
		self.ensure_live()?;
		for (kref, count) in self.store.take_pins()? {
			for _ in 0..count {
				self.decref(kref, true)?;
			}
		}
		self.cleanup_terminated_vats()?;
		self.process_refcounts()?;
		self.flush_gc_actions()?;
		self.run_until_quiescent(None)
	}
}
