// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{collections::HashMap, sync::Arc, thread, time::Duration};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use ocap_kernel::{
	DELIVER_METHOD, DELIVERY_COMPLETE, START_VAT, STOP_VAT, VatWorker, VatWorkerService, WorkerError,
};
use ocap_store::VatConfigRecord;
use ocap_types::{
	CapData, Message, VatDelivery, VatId, VatRef, VatSyscall,
	delivery::VatResolution,
	jsonrpc::{JsonRpcFrame, JsonRpcRequest, JsonRpcResponse, RequestId},
};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

/// The vat side of a delivery window. Each syscall is sent as a request
/// and its response awaited before returning, mirroring the contract
/// real workers must follow.
pub struct SyscallClient<'a> {
	end: &'a mut WorkerEnd,
}

impl SyscallClient<'_> {
	/// Issue a raw syscall, panicking on a kernel-side error. A panic
	/// tears down the worker thread, which the kernel observes as a
	/// closed stream.
	pub fn syscall(&mut self, syscall: VatSyscall) -> Value {
		let id = self.end.next_id;
		self.end.next_id += 1;
		let request = JsonRpcRequest::call(id, syscall.method_name(), {
			serde_json::to_value(&syscall).expect("syscall serializes")
		});
		self.end
			.tx
			.send(JsonRpcFrame::Request(request))
			.expect("kernel end alive during delivery");
		match self.end.rx.recv().expect("kernel answers syscalls") {
			JsonRpcFrame::Response(JsonRpcResponse { id: got, result, error, .. }) => {
				assert_eq!(got, RequestId::Number(id), "responses arrive in order");
				if let Some(error) = error {
					panic!("syscall refused: {}", error.message);
				}
				result.unwrap_or(Value::Null)
			}
			other => panic!("expected syscall response, got {other:?}"),
		}
	}

	pub fn send(
		&mut self,
		target: VatRef,
		method: &str,
		args: CapData<VatRef>,
		result: Option<VatRef>,
	) {
		self.syscall(VatSyscall::Send {
			target,
			message: Message::new(method, args, result),
		});
	}

	pub fn subscribe(&mut self, vref: VatRef) {
		self.syscall(VatSyscall::Subscribe { vref });
	}

	pub fn fulfill(&mut self, subject: VatRef, value: CapData<VatRef>) {
		self.syscall(VatSyscall::Resolve {
			resolutions: vec![VatResolution { subject, rejected: false, value }],
		});
	}

	pub fn reject(&mut self, subject: VatRef, value: CapData<VatRef>) {
		self.syscall(VatSyscall::Resolve {
			resolutions: vec![VatResolution { subject, rejected: true, value }],
		});
	}

	pub fn exit(&mut self, failure: bool, info: CapData<VatRef>) {
		self.syscall(VatSyscall::Exit { failure, info });
	}

	pub fn vatstore_get(&mut self, key: &str) -> Option<String> {
		match self.syscall(VatSyscall::VatstoreGet { key: key.into() }) {
			Value::String(value) => Some(value),
			_ => None,
		}
	}

	pub fn vatstore_set(&mut self, key: &str, value: &str) {
		self.syscall(VatSyscall::VatstoreSet { key: key.into(), value: value.into() });
	}

	pub fn drop_imports(&mut self, vrefs: Vec<VatRef>) {
		self.syscall(VatSyscall::DropImports { vrefs });
	}

	pub fn retire_imports(&mut self, vrefs: Vec<VatRef>) {
		self.syscall(VatSyscall::RetireImports { vrefs });
	}

	pub fn retire_exports(&mut self, vrefs: Vec<VatRef>) {
		self.syscall(VatSyscall::RetireExports { vrefs });
	}
}

/// Scripted vat logic, driven by the worker thread.
pub trait VatBehavior: Send {
	fn start(&mut self, _parameters: &Value) {}

	fn deliver(&mut self, delivery: VatDelivery, syscalls: &mut SyscallClient<'_>);
}

struct WorkerEnd {
	tx: Sender<JsonRpcFrame>,
	rx: Receiver<JsonRpcFrame>,
	next_id: u64,
}

fn vat_loop(mut end: WorkerEnd, mut behavior: Box<dyn VatBehavior>) {
	loop {
		let frame = match end.rx.recv() {
			Ok(frame) => frame,
			Err(_) => break,
		};
		let request = match frame {
			JsonRpcFrame::Request(request) => request,
			JsonRpcFrame::Response(_) => continue,
		};
		match request.method.as_str() {
			START_VAT => {
				behavior.start(&request.params["vatParameters"]);
				if let Some(id) = request.id {
					let _ = end
						.tx
						.send(JsonRpcFrame::Response(JsonRpcResponse::ok(id, Value::Null)));
				}
			}
			DELIVER_METHOD => {
				let delivery: VatDelivery = match serde_json::from_value(request.params.clone()) {
					Ok(delivery) => delivery,
					Err(err) => panic!("worker got malformed delivery: {err}"),
				};
				behavior.deliver(delivery, &mut SyscallClient { end: &mut end });
				let done = JsonRpcRequest::notification(DELIVERY_COMPLETE, Value::Null);
				if end.tx.send(JsonRpcFrame::Request(done)).is_err() {
					break;
				}
			}
			STOP_VAT => {
				if let Some(id) = request.id {
					let _ = end
						.tx
						.send(JsonRpcFrame::Response(JsonRpcResponse::ok(id, Value::Null)));
				}
				break;
			}
			other => panic!("worker got unexpected method `{other}`"),
		}
	}
	debug!("vat thread finished");
}

type BehaviorFactory = Box<dyn Fn() -> Box<dyn VatBehavior> + Send>;

/// Spawns vats as threads. Bundle specs name registered behaviors, so a
/// restart re-creates the behavior from its factory exactly like a real
/// worker reloading a bundle.
#[derive(Default)]
pub struct ChannelWorkerService {
	factories: Arc<Mutex<HashMap<String, BehaviorFactory>>>,
}

impl ChannelWorkerService {
	pub fn new() -> Self {
		ChannelWorkerService::default()
	}

	pub fn register<B, F>(&mut self, bundle_spec: &str, factory: F)
	where
		B: VatBehavior + 'static,
		F: Fn() -> B + Send + 'static,
	{
		self.factories
			.lock()
			.insert(bundle_spec.to_string(), Box::new(move || Box::new(factory())));
	}
}

impl VatWorkerService for ChannelWorkerService {
	fn spawn(&mut self, vat: VatId, record: &VatConfigRecord) -> Result<Box<dyn VatWorker>, WorkerError> {
		let behavior = {
			let factories = self.factories.lock();
			let factory = factories.get(&record.spec.bundle_spec).ok_or_else(|| {
				WorkerError::Spawn(format!("unknown bundle `{}`", record.spec.bundle_spec))
			})?;
			factory()
		};
		let (kernel_tx, worker_rx) = unbounded();
		let (worker_tx, kernel_rx) = unbounded();
		let end = WorkerEnd { tx: worker_tx, rx: worker_rx, next_id: 1 };
		thread::Builder::new()
			.name(format!("vat-{vat}"))
			.spawn(move || vat_loop(end, behavior))
			.map_err(|err| WorkerError::Spawn(err.to_string()))?;
		Ok(Box::new(ChannelWorker { tx: Some(kernel_tx), rx: kernel_rx }))
	}
}

struct ChannelWorker {
	tx: Option<Sender<JsonRpcFrame>>,
	rx: Receiver<JsonRpcFrame>,
}

impl VatWorker for ChannelWorker {
	fn send(&mut self, frame: JsonRpcFrame) -> Result<(), WorkerError> {
		let tx = self.tx.as_ref().ok_or(WorkerError::Closed)?;
		tx.send(frame).map_err(|_| WorkerError::Closed)
	}

	fn recv(&mut self, timeout: Duration) -> Result<JsonRpcFrame, WorkerError> {
		match self.rx.recv_timeout(timeout) {
			Ok(frame) => Ok(frame),
			Err(RecvTimeoutError::Timeout) => Err(WorkerError::Timeout),
			Err(RecvTimeoutError::Disconnected) => Err(WorkerError::Closed),
		}
	}

	fn kill(&mut self) {
		// dropping the sender ends the vat thread's recv loop
		self.tx.take();
	}
}
