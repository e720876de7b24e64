// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! The worker side of the kernel: traits for spawning isolated vat
//! workers, the JSON-RPC frame vocabulary both ends speak, and a
//! child-process implementation exchanging line-delimited frames over
//! stdio.

use std::{
	io::{BufRead, BufReader, Write},
	process::{Child, ChildStdin, Command, Stdio},
	thread,
	time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use ocap_store::VatConfigRecord;
use ocap_types::{
	VatDelivery, VatId, VatSyscall,
	jsonrpc::{JsonRpcFrame, JsonRpcRequest},
};
use serde_json::{Value, json};
use tracing::{debug, warn};

pub const START_VAT: &str = "startVat";
pub const STOP_VAT: &str = "stopVat";
pub const DELIVER_METHOD: &str = "deliver";
pub const DELIVERY_COMPLETE: &str = "deliveryComplete";
pub const SYSCALL_PREFIX: &str = "syscall.";

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
	#[error("failed to spawn worker: {0}")]
	Spawn(String),
	#[error("worker stream closed")]
	Closed,
	#[error("worker did not answer within the allowed window")]
	Timeout,
	#[error("worker i/o failed: {0}")]
	Io(String),
	#[error("worker broke the frame protocol: {0}")]
	Protocol(String),
}

/// One live worker: a bidirectional JSON-RPC frame stream plus a kill
/// switch. The kernel holds exactly one of these per live vat.
pub trait VatWorker: Send {
	fn send(&mut self, frame: JsonRpcFrame) -> Result<(), WorkerError>;

	fn recv(&mut self, timeout: Duration) -> Result<JsonRpcFrame, WorkerError>;

	fn kill(&mut self);
}

/// Spawns workers. Implementations decide what isolation means; the
/// kernel only sees the stream.
pub trait VatWorkerService: Send {
	fn spawn(&mut self, vat: VatId, record: &VatConfigRecord) -> Result<Box<dyn VatWorker>, WorkerError>;
}

// frame constructors, shared by both ends of the protocol

pub fn deliver_notification(delivery: &VatDelivery) -> JsonRpcRequest {
	JsonRpcRequest::notification(DELIVER_METHOD, serde_json::to_value(delivery).expect("delivery is json"))
}

pub fn start_vat_request(id: u64, record: &VatConfigRecord) -> JsonRpcRequest {
	JsonRpcRequest::call(
		id,
		START_VAT,
		json!({
			"bundleSpec": record.spec.bundle_spec,
			"vatParameters": record.spec.parameters,
			"endowments": record.spec.endowments,
		}),
	)
}

pub fn stop_vat_request(id: u64) -> JsonRpcRequest {
	JsonRpcRequest::call(id, STOP_VAT, Value::Null)
}

pub fn syscall_request(id: u64, syscall: &VatSyscall) -> JsonRpcRequest {
	JsonRpcRequest::call(id, syscall.method_name(), serde_json::to_value(syscall).expect("syscall is json"))
}

pub fn delivery_complete_notification() -> JsonRpcRequest {
	JsonRpcRequest::notification(DELIVERY_COMPLETE, Value::Null)
}

/// Decode a `syscall.<name>` request, checking that the method name and
/// the tagged payload agree.
pub fn parse_syscall(request: &JsonRpcRequest) -> Result<VatSyscall, WorkerError> {
	if !request.method.starts_with(SYSCALL_PREFIX) {
		return Err(WorkerError::Protocol(format!("unexpected method `{}`", request.method)));
	}
	let syscall: VatSyscall = serde_json::from_value(request.params.clone())
		.map_err(|err| WorkerError::Protocol(format!("bad syscall payload: {err}")))?;
	if syscall.method_name() != request.method {
		return Err(WorkerError::Protocol(format!(
			"method `{}` does not match payload `{}`",
			request.method,
			syscall.method_name()
		)));
	}
	Ok(syscall)
}

/// Runs each vat as a child process speaking line-delimited JSON-RPC on
/// stdio. The command line comes from the service configuration; the
/// bundle spec travels in `startVat`, not on the command line.
pub struct ProcessWorkerService {
	command: Vec<String>,
}

impl ProcessWorkerService {
	pub fn new(command: Vec<String>) -> Self {
		ProcessWorkerService { command }
	}
}

impl VatWorkerService for ProcessWorkerService {
	fn spawn(&mut self, vat: VatId, _record: &VatConfigRecord) -> Result<Box<dyn VatWorker>, WorkerError> {
		let (program, args) = self
			.command
			.split_first()
			.ok_or_else(|| WorkerError::Spawn("empty worker command".into()))?;
		let mut child = Command::new(program)
			.args(args)
			.env("OCAP_VAT_ID", vat.to_string())
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.spawn()
			.map_err(|err| WorkerError::Spawn(err.to_string()))?;

		let stdin = child.stdin.take().ok_or_else(|| WorkerError::Spawn("no stdin pipe".into()))?;
		let stdout = child.stdout.take().ok_or_else(|| WorkerError::Spawn("no stdout pipe".into()))?;

		let (frame_tx, frame_rx) = unbounded();
		thread::Builder::new()
			.name(format!("worker-read-{vat}"))
			.spawn(move || {
				let reader = BufReader::new(stdout);
				for line in reader.lines() {
					let Ok(line) = line else { break };
					if line.trim().is_empty() {
						continue;
					}
					match serde_json::from_str::<JsonRpcFrame>(&line) {
						Ok(frame) => {
							if frame_tx.send(frame).is_err() {
								break;
							}
						}
						Err(err) => {
							warn!(%err, "discarding unparseable worker frame");
						}
					}
				}
				debug!("worker stream reader finished");
			})
			.map_err(|err| WorkerError::Spawn(err.to_string()))?;

		Ok(Box::new(ProcessWorker { child, stdin: Some(stdin), frames: frame_rx }))
	}
}

struct ProcessWorker {
	child: Child,
	stdin: Option<ChildStdin>,
	frames: Receiver<JsonRpcFrame>,
}

impl VatWorker for ProcessWorker {
	fn send(&mut self, frame: JsonRpcFrame) -> Result<(), WorkerError> {
		let stdin = self.stdin.as_mut().ok_or(WorkerError::Closed)?;
		let mut line = serde_json::to_string(&frame).map_err(|err| WorkerError::Io(err.to_string()))?;
		line.push('\n');
		stdin.write_all(line.as_bytes()).map_err(|err| WorkerError::Io(err.to_string()))?;
		stdin.flush().map_err(|err| WorkerError::Io(err.to_string()))?;
		Ok(())
	}

	fn recv(&mut self, timeout: Duration) -> Result<JsonRpcFrame, WorkerError> {
		match self.frames.recv_timeout(timeout) {
			Ok(frame) => Ok(frame),
			Err(RecvTimeoutError::Timeout) => Err(WorkerError::Timeout),
			Err(RecvTimeoutError::Disconnected) => Err(WorkerError::Closed),
		}
	}

	fn kill(&mut self) {
		self.stdin.take();
		if let Err(err) = self.child.kill() {
			debug!(%err, "worker already gone");
		}
		let _ = self.child.wait();
	}
}

impl Drop for ProcessWorker {
	fn drop(&mut self) {
		self.kill();
	}
}

#[cfg(test)]
mod tests {
	use ocap_types::{CapData, Message, VatRef};
	use serde_json::json;

	use super::*;

	#[test]
	fn syscall_frames_round_trip() {
		let syscall = VatSyscall::Send {
			target: VatRef::object_import(1),
			message: Message::new("poke", CapData::value(&json!([])), None),
		};
		let request = syscall_request(7, &syscall);
		assert_eq!(request.method, "syscall.send");
		assert_eq!(parse_syscall(&request).unwrap(), syscall);
	}

	#[test]
	fn mismatched_method_is_protocol_error() {
		let syscall = VatSyscall::Subscribe { vref: VatRef::promise_import(1) };
		let mut request = syscall_request(1, &syscall);
		request.method = "syscall.send".into();
		assert!(matches!(parse_syscall(&request), Err(WorkerError::Protocol(_))));
	}

	#[test]
	fn delivery_complete_is_a_notification() {
		let note = delivery_complete_notification();
		assert!(note.is_notification());
		assert_eq!(note.method, DELIVERY_COMPLETE);
	}
}
