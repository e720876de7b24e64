// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{
	collections::{HashMap, HashSet},
	time::{Duration, Instant},
};

use ocap_storage::KernelDatabase;
use ocap_store::KernelStore;
use ocap_types::{CapData, KernelRef, Message, VatId};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{
	KernelConfig,
	error::{Error, Result},
	worker::{VatWorker, VatWorkerService},
};

/// The kernel: one store, one scheduler, one worker per live vat.
///
/// All methods run on the caller's thread; at most one crank executes at
/// a time because the kernel is never shared.
pub struct Kernel {
	pub(crate) store: KernelStore,
	pub(crate) config: KernelConfig,
	pub(crate) service: Box<dyn VatWorkerService>,
	pub(crate) workers: HashMap<VatId, Box<dyn VatWorker>>,
	// exit syscalls observed during the current crank
	pub(crate) pending_exits: Vec<(VatId, bool, CapData<KernelRef>)>,
	// queue indexes that already failed once and get a single retry
	retried: HashSet<u64>,
	// the vat the current crank is dispatching to, for failure policy
	pub(crate) delivering_to: Option<VatId>,
	safe_mode: bool,
	pub(crate) next_rpc_id: u64,
}

impl Kernel {
	/// Open the kernel over a database, rehydrating every live vat from
	/// its transcript.
	pub fn new(
		db: Box<dyn KernelDatabase>,
		service: Box<dyn VatWorkerService>,
		config: KernelConfig,
	) -> Result<Self> {
		let store = KernelStore::open(db)?;
		let mut kernel = Kernel {
			store,
			config,
			service,
			workers: HashMap::new(),
			pending_exits: Vec::new(),
			retried: HashSet::new(),
			delivering_to: None,
			safe_mode: false,
			next_rpc_id: 1,
		};
		kernel.rehydrate()?;
		Ok(kernel)
	}

	pub fn store(&self) -> &KernelStore {
		&self.store
	}

	pub fn config(&self) -> &KernelConfig {
		&self.config
	}

	pub(crate) fn ensure_live(&self) -> Result<()> {
		if self.safe_mode {
			return Err(Error::Internal("kernel is in read-only safe mode".into()));
		}
		Ok(())
	}

	pub fn in_safe_mode(&self) -> bool {
		self.safe_mode
	}

	/// Enqueue a message from the host. The returned result promise is
	/// pinned so it survives until the host lets go (a full GC sweep).
	#[instrument(name = "kernel::queue_message", level = "debug", skip(self, args))]
	pub fn queue_message(
		&mut self,
		target: KernelRef,
		method: &str,
		args: CapData<KernelRef>,
	) -> Result<KernelRef> {
		self.ensure_live()?;
		let depth = self.store.run_queue_length()?;
		if depth >= self.config.max_queue_depth {
			return Err(Error::ResourceLimit(format!("run queue depth {depth} at limit")));
		}
		if args.body.len() > self.config.max_message_bytes {
			return Err(Error::ResourceLimit(format!(
				"message body of {} bytes exceeds limit",
				args.body.len()
			)));
		}
		self.require_known(target)?;
		for slot in &args.slots {
			self.require_known(*slot)?;
		}
		let result = self.store.add_promise()?;
		self.store.add_pin(result)?;
		self.store.adjust_promise_refcount(result, 1)?;
		self.enqueue_send(target, Message::new(method, args, Some(result)))?;
		Ok(result)
	}

	fn require_known(&self, kref: KernelRef) -> Result<()> {
		let known = match kref {
			KernelRef::Object(_) => self.store.object_exists(kref)?,
			KernelRef::Promise(_) => self.store.promise_exists(kref)?,
		};
		if known { Ok(()) } else { Err(Error::UnknownTarget(kref)) }
	}

	/// Run one crank: pop, dispatch, apply syscalls, settle refcounts,
	/// commit. Returns false when the run queue is empty.
	pub fn step(&mut self) -> Result<bool> {
		self.ensure_live()?;
		if self.store.run_queue_length()? == 0 {
			return Ok(false);
		}
		let head = self.store.run_queue_head()?;
		let savepoint = format!("crank_{head}");
		self.store.create_savepoint(&savepoint)?;
		self.delivering_to = None;
		match self.crank() {
			Ok(()) => {
				self.store.release_savepoint(&savepoint)?;
				self.retried.remove(&head);
				#[cfg(debug_assertions)]
				{
					let violations = self.store.verify_invariants()?;
					debug_assert!(violations.is_empty(), "invariants broken: {violations:?}");
				}
				Ok(true)
			}
			Err(err) => {
				// exits observed in the rolled-back crank die with it
				self.pending_exits.clear();
				if let Err(rollback_err) = self.store.rollback_savepoint(&savepoint) {
					self.safe_mode = true;
					return Err(Error::Internal(format!(
						"crank rollback failed ({rollback_err}) after: {err}"
					)));
				}
				self.after_failed_crank(head, err)
			}
		}
	}

	fn crank(&mut self) -> Result<()> {
		let (index, item) = self
			.store
			.dequeue_run()?
			.ok_or_else(|| Error::Internal("crank started on an empty queue".into()))?;
		debug!(index, "crank");
		self.deliver_item(&item)?;
		// the queue's holds on the consumed item are released here; any
		// surviving reference was re-held by a c-list or a re-enqueue
		for kref in item.held_refs() {
			self.decref(kref, true)?;
		}
		let exits = std::mem::take(&mut self.pending_exits);
		for (vat, failure, info) in exits {
			info!(%vat, failure, "vat requested exit");
			self.terminate_vat_inner(vat, &info)?;
		}
		self.process_refcounts()?;
		self.flush_gc_actions()?;
		Ok(())
	}

	fn after_failed_crank(&mut self, head: u64, err: Error) -> Result<bool> {
		warn!(%err, head, "crank rolled back");
		if self.retried.insert(head) {
			// the item is back at the head; give it one more chance
			return Ok(true);
		}
		self.retried.remove(&head);
		if err.is_vat_fatal() || self.delivering_to.is_some() {
			if let Some(vat) = self.delivering_to.take() {
				let reason = CapData::value(
					&serde_json::to_value(err.to_record())
						.unwrap_or_else(|_| Value::String(err.to_string())),
				);
				self.terminate_vat_inner(vat, &reason)?;
				return Ok(true);
			}
		}
		self.safe_mode = true;
		Err(Error::Internal(format!("crank failed twice without a culprit vat: {err}")))
	}

	/// Drive cranks until the run queue, GC actions and reap queue are
	/// all empty, or the deadline passes.
	pub fn run_until_quiescent(&mut self, timeout: Option<Duration>) -> Result<()> {
		self.ensure_live()?;
		let deadline = Instant::now() + timeout.unwrap_or(self.config.quiescence_timeout);
		self.cleanup_terminated_vats()?;
		loop {
			if self.store.run_queue_length()? == 0 {
				let due = self.store.take_reap_queue()?;
				let mut scheduled = false;
				for vat in due {
					if self.is_vat_live(vat)? {
						self.enqueue_bring_out_your_dead(vat)?;
						scheduled = true;
					}
				}
				if !scheduled {
					break;
				}
			}
			if Instant::now() >= deadline {
				return Err(Error::Abort("quiescence deadline exceeded".into()));
			}
			self.step()?;
		}
		Ok(())
	}

	pub(crate) fn is_vat_live(&self, vat: VatId) -> Result<bool> {
		Ok(self.store.vat_config(vat)?.is_some() && !self.store.is_vat_terminated(vat)?)
	}

	// diagnostics passthrough

	pub fn dump(&self) -> Result<Vec<(String, String)>> {
		Ok(self.store.dump()?)
	}

	pub fn execute_db_query(&mut self, sql: &str) -> Result<Vec<Value>> {
		Ok(self.store.execute_query(sql)?)
	}

	pub fn checkpoint(&mut self) -> Result<()> {
		Ok(self.store.checkpoint()?)
	}

	/// A JSON summary of scheduler and table state.
	pub fn status(&self) -> Result<Value> {
		let vats: Vec<Value> = self
			.store
			.vat_ids()?
			.into_iter()
			.map(|vat| -> Result<Value> {
				let record = self.store.vat_config(vat)?;
				Ok(serde_json::json!({
					"id": vat.to_string(),
					"name": record.map(|r| r.name),
					"terminated": self.store.is_vat_terminated(vat)?,
					"running": self.workers.contains_key(&vat),
				}))
			})
			.collect::<Result<_>>()?;
		Ok(serde_json::json!({
			"queueLength": self.store.run_queue_length()?,
			"gcActions": self.store.gc_actions()?.len(),
			"reapQueue": self.store.reap_queue()?.len(),
			"safeMode": self.safe_mode,
			"vats": vats,
			"subclusters": self.store.subclusters()?.len(),
		}))
	}
}
