// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Subcluster and vat lifecycle: launch, terminate, restart, reload,
//! and rehydration of every live vat when the kernel reopens.

use std::collections::BTreeMap;

use ocap_store::{PromiseState, SubclusterRecord, VatConfigRecord};
use ocap_types::{CapData, ClusterConfig, ErrorRecord, KernelRef, SubclusterId, VatId, VatRef};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::{
	error::{Error, Result},
	kernel::Kernel,
};

/// Every bootstrap vat is invoked through this method name, with one
/// root reference per sibling vat.
pub const BOOTSTRAP_METHOD: &str = "bootstrap";

impl Kernel {
	/// Launch a named group of vats and drive the bootstrap invocation
	/// to quiescence. Returns the subcluster id and the bootstrap
	/// result.
	#[instrument(name = "kernel::launch_subcluster", level = "info", skip(self, config))]
	pub fn launch_subcluster(
		&mut self,
		config: ClusterConfig,
	) -> Result<(SubclusterId, CapData<KernelRef>)> {
		self.ensure_live()?;
		config.validate()?;
		let id = self.store.allocate_subcluster_id()?;
		let mut vats: BTreeMap<String, VatId> = BTreeMap::new();
		match self.launch_vats(&config, id, &mut vats) {
			Ok(result) => Ok(result),
			Err(err) => {
				// unwind the partially launched group
				for vat in vats.values() {
					let reason = CapData::value(
						&serde_json::to_value(ErrorRecord::disconnected(vat)).unwrap_or_default(),
					);
					let _ = self.terminate_vat_inner(*vat, &reason);
				}
				let _ = self.cleanup_terminated_vats();
				Err(err)
			}
		}
	}

	fn launch_vats(
		&mut self,
		config: &ClusterConfig,
		id: SubclusterId,
		vats: &mut BTreeMap<String, VatId>,
	) -> Result<(SubclusterId, CapData<KernelRef>)> {
		let mut roots: BTreeMap<String, KernelRef> = BTreeMap::new();
		for (name, spec) in &config.vats {
			let vat = self.store.allocate_vat_id()?;
			let record = VatConfigRecord { name: name.clone(), spec: spec.clone() };
			self.store.set_vat_config(vat, &record)?;
			self.start_vat_worker(vat, &record)?;
			let root = self.store.add_object(vat)?;
			self.store.clist_add(vat, root, VatRef::root(), true)?;
			// roots stay invokable by the host until a full sweep
			self.store.add_pin(root)?;
			self.store.adjust_object_refcount(root, 1, 1)?;
			vats.insert(name.clone(), vat);
			roots.insert(name.clone(), root);
			info!(%vat, name, "vat launched");
		}
		self.store.add_subcluster(&SubclusterRecord {
			id,
			config: config.clone(),
			vats: vats.clone(),
		})?;

		let bootstrap_root = roots[&config.bootstrap];
		let mut body = serde_json::Map::new();
		let mut slots = Vec::new();
		for (index, (name, root)) in roots.iter().enumerate() {
			body.insert(name.clone(), json!({ "$slot": index }));
			slots.push(*root);
		}
		let args = CapData::new(json!({ "vats": body }).to_string(), slots);
		let result = self.queue_message(bootstrap_root, BOOTSTRAP_METHOD, args)?;
		self.run_until_quiescent(None)?;

		let row = self.store.promise_row(result)?;
		match row.state {
			PromiseState::Fulfilled => {
				let value = row
					.value
					.ok_or_else(|| Error::Internal(format!("{result} fulfilled without value")))?;
				Ok((id, value))
			}
			PromiseState::Rejected => Err(Error::Internal(format!(
				"bootstrap of {id} rejected: {}",
				row.value.map(|v| v.body).unwrap_or_default()
			))),
			PromiseState::Unresolved => {
				Err(Error::Abort(format!("bootstrap of {id} did not settle")))
			}
		}
	}

	/// Terminate a vat on host request.
	#[instrument(name = "kernel::terminate_vat", level = "info", skip(self))]
	pub fn terminate_vat(&mut self, vat: VatId) -> Result<()> {
		self.ensure_live()?;
		if self.store.vat_config(vat)?.is_none() {
			return Err(Error::VatNotFound(vat));
		}
		if self.store.is_vat_terminated(vat)? {
			return Err(Error::VatDeleted(vat));
		}
		let reason =
			CapData::value(&serde_json::to_value(ErrorRecord::disconnected(vat)).unwrap_or_default());
		self.terminate_vat_inner(vat, &reason)
	}

	/// Kill the worker, mark the vat, and reject everything it decided.
	/// C-list residue stays until the next cleanup pass, so inspection
	/// between the mark and the sweep sees the dying state.
	pub(crate) fn terminate_vat_inner(&mut self, vat: VatId, reason: &CapData<KernelRef>) -> Result<()> {
		if self.store.is_vat_terminated(vat)? {
			return Ok(());
		}
		self.stop_vat_worker(vat);
		self.store.mark_vat_terminated(vat)?;
		self.store.remove_from_reap_queue(vat)?;
		for ko in self.store.object_krefs()? {
			if self.store.object_owner(ko)? == vat {
				self.store.revoke_object(ko)?;
			}
		}
		for kp in self.store.promise_krefs()? {
			if self.store.promise_decider(kp)? == Some(vat)
				&& self.store.promise_state(kp)? == PromiseState::Unresolved
			{
				self.resolve_promise(Some(vat), kp, true, reason.clone())?;
			}
		}
		info!(%vat, "vat terminated");
		Ok(())
	}

	pub fn terminate_all_vats(&mut self) -> Result<()> {
		self.ensure_live()?;
		for vat in self.store.vat_ids()? {
			if !self.store.is_vat_terminated(vat)? {
				let reason = CapData::value(
					&serde_json::to_value(ErrorRecord::disconnected(vat)).unwrap_or_default(),
				);
				self.terminate_vat_inner(vat, &reason)?;
			}
		}
		Ok(())
	}

	pub fn terminate_subcluster(&mut self, id: SubclusterId) -> Result<()> {
		self.ensure_live()?;
		let record = self.store.subcluster(id)?.ok_or(Error::SubclusterNotFound(id))?;
		for vat in record.vats.values() {
			if self.store.vat_config(*vat)?.is_some() && !self.store.is_vat_terminated(*vat)? {
				let reason = CapData::value(
					&serde_json::to_value(ErrorRecord::disconnected(vat)).unwrap_or_default(),
				);
				self.terminate_vat_inner(*vat, &reason)?;
			}
		}
		self.cleanup_terminated_vats()?;
		Ok(())
	}

	/// Restart one vat from its persisted transcript. Divergence during
	/// replay terminates the vat and surfaces the error.
	pub fn restart_vat(&mut self, vat: VatId) -> Result<()> {
		self.ensure_live()?;
		let record = self.store.vat_config(vat)?.ok_or(Error::VatNotFound(vat))?;
		if self.store.is_vat_terminated(vat)? {
			return Err(Error::VatDeleted(vat));
		}
		self.stop_vat_worker(vat);
		self.start_vat_worker(vat, &record)?;
		match self.replay_vat(vat) {
			Ok(()) => Ok(()),
			Err(err) => {
				warn!(%vat, %err, "replay failed");
				let reason = CapData::value(
					&serde_json::to_value(err.to_record()).unwrap_or_default(),
				);
				self.terminate_vat_inner(vat, &reason)?;
				Err(err)
			}
		}
	}

	/// Restart every vat of a subcluster.
	pub fn reload_subcluster(&mut self, id: SubclusterId) -> Result<()> {
		self.ensure_live()?;
		let record = self.store.subcluster(id)?.ok_or(Error::SubclusterNotFound(id))?;
		for vat in record.vats.values() {
			if self.store.vat_config(*vat)?.is_some() && !self.store.is_vat_terminated(*vat)? {
				self.restart_vat(*vat)?;
			}
		}
		Ok(())
	}

	/// Bring every persisted live vat back up after a kernel restart.
	pub(crate) fn rehydrate(&mut self) -> Result<()> {
		for vat in self.store.vat_ids()? {
			if self.store.is_vat_terminated(vat)? {
				continue;
			}
			let Some(record) = self.store.vat_config(vat)? else { continue };
			let outcome =
				self.start_vat_worker(vat, &record).and_then(|()| self.replay_vat(vat));
			if let Err(err) = outcome {
				warn!(%vat, %err, "vat failed to rehydrate");
				let reason = CapData::value(
					&serde_json::to_value(err.to_record()).unwrap_or_default(),
				);
				self.terminate_vat_inner(vat, &reason)?;
			}
		}
		Ok(())
	}
}
