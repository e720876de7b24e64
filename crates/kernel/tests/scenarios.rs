// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! End-to-end scheduler scenarios: bootstrap greeting, GC after vat
//! termination, promise pipelining, crank rollback, and the literal
//! cleared-state dump.

mod common;

use std::sync::{Arc, Mutex};

use ocap_store::PromiseState;
use ocap_testing::{ChannelWorkerService, FnVat, NullVat, SyscallClient, testing_kernel};
use ocap_types::{CapData, KernelRef, SubclusterId, VatDelivery, VatId, VatRef};
use serde_json::json;

#[test]
fn bootstrap_greeting_settles_with_one_pinned_promise() {
	let mut kernel = testing_kernel(common::greeting_service());
	let (subcluster, result) = kernel.launch_subcluster(common::greeting_config()).unwrap();
	assert_eq!(subcluster, SubclusterId(1));
	assert_eq!(
		result.parse_body().unwrap(),
		json!("vat Bob got \"hello\" from Alice")
	);

	// only the pinned bootstrap result promise survives quiescence
	let promises = kernel.store().promise_krefs().unwrap();
	assert_eq!(promises, vec![KernelRef::Promise(1)]);
	let row = kernel.store().promise_row(KernelRef::Promise(1)).unwrap();
	assert_eq!(row.state, PromiseState::Fulfilled);
	assert_eq!(row.ref_count, 1);
	assert_eq!(kernel.store().savepoint_depth(), 0);
	assert_eq!(kernel.store().verify_invariants().unwrap(), Vec::<String>::new());
}

fn friend_service() -> ChannelWorkerService {
	let mut service = ChannelWorkerService::new();
	service.register("test:fetcher", || {
		let mut bootstrap_result: Option<VatRef> = None;
		let mut friend_promise: Option<VatRef> = None;
		FnVat(move |delivery, syscalls: &mut SyscallClient<'_>| match delivery {
			VatDelivery::Message { message, .. } if message.method == "bootstrap" => {
				bootstrap_result = message.result;
				let body = message.args.parse_body().unwrap();
				let index = body["vats"]["carol"]["$slot"].as_u64().unwrap() as usize;
				let carol = message.args.slots[index];
				let reply = VatRef::promise_export(1);
				syscalls.send(carol, "makeFriend", CapData::value(&json!([])), Some(reply));
				syscalls.subscribe(reply);
				friend_promise = Some(reply);
			}
			VatDelivery::Notify { resolutions } => {
				for resolution in resolutions {
					if Some(resolution.subject) == friend_promise {
						if let Some(result) = bootstrap_result.take() {
							syscalls.fulfill(result, CapData::value(&json!(null)));
						}
					}
				}
			}
			_ => {}
		})
	});
	service.register("test:null", || NullVat);
	service.register("test:maker", || {
		FnVat(move |delivery, syscalls: &mut SyscallClient<'_>| {
			if let VatDelivery::Message { message, .. } = delivery {
				if message.method == "makeFriend" {
					if let Some(result) = message.result {
						syscalls.fulfill(result, CapData::slot(VatRef::object_export(1)));
					}
				} else if let Some(result) = message.result {
					syscalls.fulfill(result, CapData::value(&json!(null)));
				}
			}
		})
	});
	service
}

#[test]
fn terminated_exporter_is_collected_on_demand() {
	let mut kernel = testing_kernel(friend_service());
	let config = serde_json::from_value(json!({
		"bootstrap": "alice",
		"vats": {
			"alice": { "bundleSpec": "test:fetcher" },
			"bob": { "bundleSpec": "test:null" },
			"carol": { "bundleSpec": "test:maker" }
		}
	}))
	.unwrap();
	kernel.launch_subcluster(config).unwrap();

	// carol (v3) exported her friend object (ko4) into alice's c-list
	let friend = KernelRef::Object(4);
	assert_eq!(kernel.store().object_owner(friend).unwrap(), VatId(3));
	assert_eq!(kernel.store().get("v1.c.ko4").unwrap().as_deref(), Some("R o-3"));
	assert_eq!(kernel.store().get("ko4.refCount").unwrap().as_deref(), Some("1,1"));

	kernel.terminate_vat(VatId(3)).unwrap();
	// termination marks; the sweep happens on demand
	assert_eq!(kernel.store().terminated_vats().unwrap(), vec![VatId(3)]);
	assert!(kernel.store().object_exists(friend).unwrap());
	assert!(kernel.store().object_revoked(friend).unwrap());

	kernel.collect_garbage().unwrap();
	assert!(!kernel.store().object_exists(friend).unwrap());
	assert_eq!(kernel.store().get("v1.c.ko4").unwrap(), None);
	assert_eq!(kernel.store().terminated_vats().unwrap(), Vec::<VatId>::new());
	assert_eq!(kernel.store().verify_invariants().unwrap(), Vec::<String>::new());
}

fn pipeline_service(log: Arc<Mutex<Vec<String>>>) -> ChannelWorkerService {
	let mut service = ChannelWorkerService::new();
	service.register("test:pipeliner", move || {
		let log = log.clone();
		FnVat(move |delivery, syscalls: &mut SyscallClient<'_>| {
			if let VatDelivery::Message { message, .. } = delivery {
				match message.method.as_str() {
					"bootstrap" => {
						if let Some(result) = message.result {
							syscalls.fulfill(result, CapData::value(&json!(null)));
						}
					}
					"makePromise" => {
						if let Some(result) = message.result {
							syscalls.fulfill(
								result,
								CapData::slot(VatRef::promise_export(1)),
							);
						}
					}
					"release" => {
						syscalls.fulfill(
							VatRef::promise_export(1),
							CapData::slot(VatRef::root()),
						);
						if let Some(result) = message.result {
							syscalls.fulfill(result, CapData::value(&json!(null)));
						}
					}
					other => {
						log.lock().unwrap().push(other.to_string());
						if let Some(result) = message.result {
							syscalls.fulfill(result, CapData::value(&json!(null)));
						}
					}
				}
			}
		})
	});
	service
}

#[test]
fn pipelined_sends_flush_in_original_order() {
	let log = Arc::new(Mutex::new(Vec::new()));
	let mut kernel = testing_kernel(pipeline_service(log.clone()));
	kernel.launch_subcluster(common::single_vat_config("holder", "test:pipeliner")).unwrap();
	let root = KernelRef::Object(1);

	let handle = kernel
		.queue_message(root, "makePromise", CapData::new("[]", Vec::new()))
		.unwrap();
	kernel.run_until_quiescent(None).unwrap();
	let target = kernel.store().promise_value(handle).unwrap().unwrap().slots[0];
	assert!(target.is_promise());
	assert_eq!(kernel.store().promise_state(target).unwrap(), PromiseState::Unresolved);

	for method in ["m1", "m2", "m3"] {
		kernel.queue_message(target, method, CapData::new("[]", Vec::new())).unwrap();
	}
	kernel.run_until_quiescent(None).unwrap();
	// all three parked behind the unresolved promise, in arrival order
	let parked = kernel.store().promise_queue(target).unwrap();
	let methods: Vec<&str> = parked.iter().map(|m| m.method.as_str()).collect();
	assert_eq!(methods, vec!["m1", "m2", "m3"]);
	assert!(log.lock().unwrap().is_empty());

	kernel.queue_message(root, "release", CapData::new("[]", Vec::new())).unwrap();
	kernel.run_until_quiescent(None).unwrap();
	assert_eq!(*log.lock().unwrap(), vec!["m1", "m2", "m3"]);
	assert_eq!(kernel.store().verify_invariants().unwrap(), Vec::<String>::new());
}

fn flaky_service() -> ChannelWorkerService {
	let mut service = ChannelWorkerService::new();
	service.register("test:flaky", || {
		FnVat(move |delivery, syscalls: &mut SyscallClient<'_>| {
			if let VatDelivery::Message { message, .. } = delivery {
				match message.method.as_str() {
					"bootstrap" => {
						if let Some(result) = message.result {
							syscalls.fulfill(result, CapData::value(&json!(null)));
						}
					}
					"boom" => {
						syscalls.vatstore_set("poison", "1");
						panic!("injected failure");
					}
					_ => {}
				}
			}
		})
	});
	service
}

#[test]
fn failed_crank_rolls_back_retries_once_then_terminates() {
	let mut kernel = testing_kernel(flaky_service());
	kernel.launch_subcluster(common::single_vat_config("flaky", "test:flaky")).unwrap();
	let root = KernelRef::Object(1);
	let vat = VatId(1);

	let result = kernel.queue_message(root, "boom", CapData::new("[]", Vec::new())).unwrap();

	// first failure: crank rolls back, the event stays at the head
	assert!(kernel.step().unwrap());
	assert_eq!(kernel.store().run_queue_length().unwrap(), 1);
	assert!(!kernel.store().is_vat_terminated(vat).unwrap());
	// the syscall the vat made before dying is gone with the rollback
	assert_eq!(kernel.store().vatstore_get(vat, "poison").unwrap(), None);

	// second failure: the vat is terminated, the event still pending
	assert!(kernel.step().unwrap());
	assert!(kernel.store().is_vat_terminated(vat).unwrap());
	assert_eq!(kernel.store().run_queue_length().unwrap(), 1);

	// the pending send now rejects against the dead vat
	assert!(kernel.step().unwrap());
	assert_eq!(kernel.store().run_queue_length().unwrap(), 0);
	let row = kernel.store().promise_row(result).unwrap();
	assert_eq!(row.state, PromiseState::Rejected);
	assert!(row.value.unwrap().body.contains("-32004"));
}

#[test]
fn cleared_kernel_dumps_the_initial_layout() {
	let mut kernel = testing_kernel(common::greeting_service());
	kernel.launch_subcluster(common::greeting_config()).unwrap();
	kernel.terminate_all_vats().unwrap();
	kernel.collect_garbage().unwrap();

	let dump: Vec<(String, String)> = kernel.dump().unwrap();
	let expected: Vec<(String, String)> = [
		("queue.run.head", "6"),
		("queue.run.tail", "6"),
		("gcActions", "[]"),
		("reapQueue", "[]"),
		("vats.terminated", "[]"),
		("nextObjectId", "4"),
		("nextPromiseId", "4"),
		("nextVatId", "4"),
		("nextRemoteId", "1"),
		("subclusters", "[]"),
		("nextSubclusterId", "2"),
		("vatToSubclusterMap", "{}"),
		("initialized", "true"),
	]
	.into_iter()
	.map(|(k, v)| (k.to_string(), v.to_string()))
	.collect();
	assert_eq!(dump, expected);
}
