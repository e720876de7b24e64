// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! The per-vat dispatch window: exactly one outstanding delivery, the
//! syscall request/response loop, transcript append, and deterministic
//! replay after a restart.

use ocap_store::{TranscriptEntry, VatConfigRecord};
use ocap_types::{
	KernelRef, Message, VatDelivery, VatId,
	jsonrpc::{JsonRpcError, JsonRpcFrame, JsonRpcResponse, RequestId},
};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::{
	error::{Error, Result},
	kernel::Kernel,
	worker::{self, DELIVERY_COMPLETE, VatWorker},
};

impl Kernel {
	/// Send one delivery into the vat's worker and drain its syscalls
	/// until the end-of-delivery token. Appends the transcript record.
	#[instrument(name = "kernel::dispatch", level = "debug", skip(self, delivery))]
	pub(crate) fn dispatch(&mut self, vat: VatId, delivery: &VatDelivery) -> Result<()> {
		self.delivering_to = Some(vat);
		let mut worker = self
			.workers
			.remove(&vat)
			.ok_or_else(|| Error::StreamRead(format!("no running worker for {vat}")))?;

		let outcome = self.run_delivery_window(vat, &mut worker, delivery);
		match outcome {
			Ok(syscalls) => {
				let crank = self.store.run_queue_head()?.saturating_sub(1);
				self.store.append_transcript(
					vat,
					&TranscriptEntry {
						crank,
						delivery: delivery.clone(),
						syscalls,
						result: "ok".into(),
					},
				)?;
				self.workers.insert(vat, worker);
				Ok(())
			}
			Err(err) => {
				warn!(%vat, %err, "delivery failed; worker dropped");
				worker.kill();
				Err(err)
			}
		}
	}

	fn run_delivery_window(
		&mut self,
		vat: VatId,
		worker: &mut Box<dyn VatWorker>,
		delivery: &VatDelivery,
	) -> Result<Vec<(ocap_types::VatSyscall, Value)>> {
		worker.send(JsonRpcFrame::Request(worker::deliver_notification(delivery)))
			.map_err(|err| Error::StreamRead(err.to_string()))?;

		let mut syscalls = Vec::new();
		loop {
			let frame = worker
				.recv(self.config.worker_reply_timeout)
				.map_err(|err| Error::StreamRead(err.to_string()))?;
			let request = match frame {
				JsonRpcFrame::Request(request) => request,
				JsonRpcFrame::Response(_) => {
					return Err(Error::StreamRead(
						"unexpected response frame inside delivery window".into(),
					));
				}
			};
			if request.method == DELIVERY_COMPLETE {
				return Ok(syscalls);
			}
			let syscall = worker::parse_syscall(&request).map_err(|err| Error::SyscallViolation {
				vat,
				reason: err.to_string(),
			})?;
			match self.apply_syscall(vat, &syscall) {
				Ok(result) => {
					if let Some(id) = request.id.clone() {
						respond(worker, JsonRpcResponse::ok(id, result.clone()))?;
					}
					syscalls.push((syscall, result));
				}
				Err(err) => {
					if let Some(id) = request.id.clone() {
						let error = JsonRpcError {
							code: err.kind().code(),
							message: err.to_string(),
							data: None,
						};
						// best effort; the vat dies either way
						let _ = respond(worker, JsonRpcResponse::err(id, error));
					}
					return Err(err);
				}
			}
		}
	}

	/// Deliver a message whose target object lives in `vat`.
	pub(crate) fn deliver_message_to_vat(
		&mut self,
		vat: VatId,
		target: KernelRef,
		message: &Message<KernelRef>,
	) -> Result<()> {
		let (reachable, target_vref) = self
			.store
			.clist_lookup_kref(vat, target)?
			.ok_or_else(|| Error::Internal(format!("{vat} lost its export {target}")))?;
		if !reachable {
			// delivering to the export makes it live again
			self.store.clist_set_reachable(vat, target, true)?;
		}
		let args = message.args.clone().try_map_slots(|slot| self.translate_kref_to_vat(vat, slot))?;
		let result = match message.result {
			Some(kp) => {
				let vref = self.translate_kref_to_vat(vat, kp)?;
				// the receiver now decides the result promise, unless
				// the sender settled it while the message was queued
				if self.store.promise_state(kp)? == ocap_store::PromiseState::Unresolved {
					self.store.set_promise_decider(kp, Some(vat))?;
				}
				Some(vref)
			}
			None => None,
		};
		let delivery = VatDelivery::Message {
			target: target_vref,
			message: Message::new(message.method.clone(), args, result),
		};
		self.dispatch(vat, &delivery)?;
		self.note_reap(vat)?;
		Ok(())
	}

	pub(crate) fn note_reap(&mut self, vat: VatId) -> Result<()> {
		if self.store.note_delivery_for_reap(vat, self.config.reap_interval)? {
			self.store.add_to_reap_queue(vat)?;
		}
		Ok(())
	}

	/// Spawn a worker for the vat and complete the `startVat` handshake.
	pub(crate) fn start_vat_worker(&mut self, vat: VatId, record: &VatConfigRecord) -> Result<()> {
		if self.workers.contains_key(&vat) {
			return Err(Error::VatAlreadyExists(vat));
		}
		let mut worker = self
			.service
			.spawn(vat, record)
			.map_err(|err| Error::StreamRead(err.to_string()))?;
		let id = self.next_rpc_id;
		self.next_rpc_id += 1;
		worker.send(JsonRpcFrame::Request(worker::start_vat_request(id, record)))
			.map_err(|err| Error::StreamRead(err.to_string()))?;
		loop {
			let frame = worker
				.recv(self.config.worker_reply_timeout)
				.map_err(|err| Error::StreamRead(err.to_string()))?;
			match frame {
				JsonRpcFrame::Response(response) if response.id == RequestId::Number(id) => {
					if let Some(error) = response.error {
						return Err(Error::StreamRead(format!(
							"vat refused to start: {}",
							error.message
						)));
					}
					break;
				}
				other => {
					return Err(Error::StreamRead(format!(
						"unexpected frame during startVat handshake: {other:?}"
					)));
				}
			}
		}
		debug!(%vat, "worker ready");
		self.workers.insert(vat, worker);
		Ok(())
	}

	pub(crate) fn stop_vat_worker(&mut self, vat: VatId) {
		if let Some(mut worker) = self.workers.remove(&vat) {
			let id = self.next_rpc_id;
			self.next_rpc_id += 1;
			let _ = worker.send(JsonRpcFrame::Request(worker::stop_vat_request(id)));
			worker.kill();
		}
	}

	/// Replay the persisted transcript against a freshly started worker.
	/// Syscalls are answered from the recording, never re-executed; any
	/// divergence is fatal to the vat.
	pub(crate) fn replay_vat(&mut self, vat: VatId) -> Result<()> {
		let entries = self.store.transcript_entries(vat)?;
		let mut worker = self
			.workers
			.remove(&vat)
			.ok_or_else(|| Error::StreamRead(format!("no running worker for {vat}")))?;
		for entry in &entries {
			match self.replay_delivery(vat, &mut worker, entry) {
				Ok(()) => {}
				Err(err) => {
					worker.kill();
					return Err(err);
				}
			}
		}
		debug!(%vat, deliveries = entries.len(), "transcript replayed");
		self.workers.insert(vat, worker);
		Ok(())
	}

	fn replay_delivery(
		&mut self,
		vat: VatId,
		worker: &mut Box<dyn VatWorker>,
		entry: &TranscriptEntry,
	) -> Result<()> {
		let diverged = |reason: String| Error::SyscallViolation {
			vat,
			reason: format!("transcript divergence: {reason}"),
		};
		worker.send(JsonRpcFrame::Request(worker::deliver_notification(&entry.delivery)))
			.map_err(|err| Error::StreamRead(err.to_string()))?;
		let mut position = 0;
		loop {
			let frame = worker
				.recv(self.config.worker_reply_timeout)
				.map_err(|err| Error::StreamRead(err.to_string()))?;
			let request = match frame {
				JsonRpcFrame::Request(request) => request,
				JsonRpcFrame::Response(_) => {
					return Err(Error::StreamRead(
						"unexpected response frame during replay".into(),
					));
				}
			};
			if request.method == DELIVERY_COMPLETE {
				if position != entry.syscalls.len() {
					return Err(diverged(format!(
						"expected {} syscalls, worker made {position}",
						entry.syscalls.len()
					)));
				}
				return Ok(());
			}
			let syscall = worker::parse_syscall(&request)
				.map_err(|err| diverged(err.to_string()))?;
			let Some((expected, recorded_result)) = entry.syscalls.get(position) else {
				return Err(diverged(format!("extra syscall {}", syscall.method_name())));
			};
			if syscall != *expected {
				return Err(diverged(format!(
					"syscall {position} was {}, transcript has {}",
					syscall.method_name(),
					expected.method_name()
				)));
			}
			if let Some(id) = request.id {
				respond(worker, JsonRpcResponse::ok(id, recorded_result.clone()))?;
			}
			position += 1;
		}
	}
}

fn respond(worker: &mut Box<dyn VatWorker>, response: JsonRpcResponse) -> Result<()> {
	worker.send(JsonRpcFrame::Response(response)).map_err(|err| Error::StreamRead(err.to_string()))
}
