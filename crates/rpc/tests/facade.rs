// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use ocap_rpc::{GatewayError, RemoteGateway, RpcHandler};
use ocap_testing::{ChannelWorkerService, EchoVat, testing_kernel};
use ocap_types::{
	KernelRef,
	jsonrpc::{JsonRpcRequest, JsonRpcResponse},
};
use serde_json::{Value, json};

fn echo_handler() -> RpcHandler {
	let mut service = ChannelWorkerService::new();
	service.register("test:echo", || EchoVat);
	RpcHandler::new(testing_kernel(service))
}

fn call(handler: &mut RpcHandler, method: &str, params: Value) -> JsonRpcResponse {
	handler.handle(&JsonRpcRequest::call(1, method, params)).expect("requests get responses")
}

fn launch(handler: &mut RpcHandler) {
	let response = call(
		handler,
		"launchSubcluster",
		json!({ "config": {
			"bootstrap": "echo",
			"vats": { "echo": { "bundleSpec": "test:echo" } }
		}}),
	);
	assert!(response.error.is_none(), "{:?}", response.error);
}

#[test]
fn ping_pongs() {
	let mut handler = echo_handler();
	let response = call(&mut handler, "ping", Value::Null);
	assert_eq!(response.result.unwrap(), json!("pong"));
}

#[test]
fn notifications_get_no_response() {
	let mut handler = echo_handler();
	let note = JsonRpcRequest::notification("ping", Value::Null);
	assert!(handler.handle(&note).is_none());
}

#[test]
fn invoke_round_trips_through_a_vat() {
	let mut handler = echo_handler();
	launch(&mut handler);
	let response = call(
		&mut handler,
		"invoke",
		json!({
			"target": "ko1",
			"method": "echo",
			"args": { "body": "\"payload\"", "slots": [] }
		}),
	);
	let result = response.result.unwrap();
	assert_eq!(result["state"], "fulfilled");
	assert_eq!(result["value"]["body"], "\"payload\"");
}

#[test]
fn queue_message_returns_the_result_promise() {
	let mut handler = echo_handler();
	launch(&mut handler);
	let response = call(
		&mut handler,
		"queueMessage",
		json!({ "target": "ko1", "method": "echo" }),
	);
	let kp: KernelRef = serde_json::from_value(response.result.unwrap()).unwrap();
	assert!(kp.is_promise());

	call(&mut handler, "run", Value::Null);
	let inspect = call(&mut handler, "inspect", json!({ "kref": kp }));
	assert_eq!(inspect.result.unwrap()["state"], "fulfilled");
}

#[test]
fn unknown_vat_maps_to_a_stable_code() {
	let mut handler = echo_handler();
	let response = call(&mut handler, "terminateVat", json!({ "vat": "v9" }));
	let error = response.error.unwrap();
	assert_eq!(error.code, -32001);
	// the marshaled record rides along in the error data
	assert_eq!(error.data.unwrap()["sentinel"], "ocap-error");
}

#[test]
fn views_expose_the_tables() {
	let mut handler = echo_handler();
	launch(&mut handler);
	let objects = call(&mut handler, "view", json!({ "table": "objects" }));
	let rows = objects.result.unwrap();
	assert_eq!(rows[0]["kref"], "ko1");
	assert_eq!(rows[0]["owner"], "v1");

	let vats = call(&mut handler, "view", json!({ "table": "vats" }));
	assert_eq!(vats.result.unwrap()[0]["name"], "echo");

	let dump = call(&mut handler, "kvDump", Value::Null);
	let rows = dump.result.unwrap();
	assert_eq!(rows[0]["key"], "queue.run.head");
}

struct LoopbackGateway;

impl RemoteGateway for LoopbackGateway {
	fn issue(&mut self, kref: KernelRef) -> Result<String, GatewayError> {
		Ok(format!("ocap://{kref}@loopback"))
	}

	fn redeem(&mut self, url: &str) -> Result<KernelRef, GatewayError> {
		url.strip_prefix("ocap://")
			.and_then(|rest| rest.split_once('@'))
			.and_then(|(kref, _)| kref.parse().ok())
			.ok_or_else(|| GatewayError::BadUrl(url.to_string()))
	}
}

#[test]
fn ocap_urls_round_trip_through_the_gateway() {
	let mut service = ChannelWorkerService::new();
	service.register("test:echo", || EchoVat);
	let mut handler = RpcHandler::with_gateway(testing_kernel(service), Box::new(LoopbackGateway));
	launch(&mut handler);

	let issued = call(&mut handler, "issueOcapURL", json!({ "kref": "ko1" }));
	let url = issued.result.unwrap();
	assert_eq!(url, "ocap://ko1@loopback");

	let redeemed = call(&mut handler, "redeemOcapURL", json!({ "url": url }));
	assert_eq!(redeemed.result.unwrap(), json!("ko1"));
}

#[test]
fn url_operations_without_a_gateway_fail_clearly() {
	let mut handler = echo_handler();
	let response = call(&mut handler, "issueOcapURL", json!({ "kref": "ko1" }));
	let error = response.error.unwrap();
	assert!(error.message.contains("no remote gateway"));
}
