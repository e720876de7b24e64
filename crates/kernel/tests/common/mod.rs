// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use ocap_testing::{ChannelWorkerService, FnVat, SyscallClient, VatBehavior};
use ocap_types::{CapData, ClusterConfig, VatDelivery, VatRef};
use serde_json::json;

/// A vat that answers `hello` with the canonical greeting.
pub fn greeter(name: &'static str) -> impl VatBehavior {
	FnVat(move |delivery, syscalls: &mut SyscallClient<'_>| {
		if let VatDelivery::Message { message, .. } = delivery {
			if message.method == "hello" {
				if let Some(result) = message.result {
					let from = message
						.args
						.parse_body()
						.and_then(|v| v.as_str().map(str::to_string))
						.unwrap_or_default();
					syscalls.fulfill(
						result,
						CapData::value(&json!(format!(
							"vat {name} got \"hello\" from {from}"
						))),
					);
				}
			}
		}
	})
}

/// The bootstrap vat of the greeting cluster: greets bob and carol, and
/// settles its bootstrap result with bob's reply.
pub fn alice() -> impl VatBehavior {
	let mut bootstrap_result: Option<VatRef> = None;
	let mut bob_reply: Option<VatRef> = None;
	FnVat(move |delivery, syscalls: &mut SyscallClient<'_>| match delivery {
		VatDelivery::Message { message, .. } if message.method == "bootstrap" => {
			bootstrap_result = message.result;
			let body = message.args.parse_body().expect("bootstrap body is json");
			let slot_of = |name: &str| {
				body["vats"][name]["$slot"].as_u64().expect("vat root slot") as usize
			};
			let bob = message.args.slots[slot_of("bob")];
			let carol = message.args.slots[slot_of("carol")];

			let from_bob = VatRef::promise_export(1);
			syscalls.send(bob, "hello", CapData::value(&json!("Alice")), Some(from_bob));
			syscalls.subscribe(from_bob);
			bob_reply = Some(from_bob);

			let from_carol = VatRef::promise_export(2);
			syscalls.send(carol, "hello", CapData::value(&json!("Alice")), Some(from_carol));
			syscalls.subscribe(from_carol);
		}
		VatDelivery::Notify { resolutions } => {
			for resolution in resolutions {
				if Some(resolution.subject) == bob_reply {
					if let Some(result) = bootstrap_result.take() {
						syscalls.fulfill(result, resolution.value.clone());
					}
				}
			}
		}
		_ => {}
	})
}

/// Three-vat greeting cluster used by the bootstrap and teardown tests.
pub fn greeting_service() -> ChannelWorkerService {
	let mut service = ChannelWorkerService::new();
	service.register("test:alice", alice);
	service.register("test:bob", || greeter("Bob"));
	service.register("test:carol", || greeter("Carol"));
	service
}

pub fn greeting_config() -> ClusterConfig {
	serde_json::from_value(json!({
		"bootstrap": "alice",
		"vats": {
			"alice": { "bundleSpec": "test:alice" },
			"bob": { "bundleSpec": "test:bob" },
			"carol": { "bundleSpec": "test:carol" }
		}
	}))
	.expect("cluster config parses")
}

pub fn single_vat_config(name: &str, bundle: &str) -> ClusterConfig {
	serde_json::from_value(json!({
		"bootstrap": name,
		"vats": { name: { "bundleSpec": bundle } }
	}))
	.expect("cluster config parses")
}
