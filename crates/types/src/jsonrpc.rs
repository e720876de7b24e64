// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Minimal JSON-RPC 2.0 frame types shared by the worker protocol, the
//! host façade and the daemon socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const VERSION: &str = "2.0";

/// A request id. Notifications carry none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
	Number(u64),
	Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
	pub jsonrpc: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<RequestId>,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
	pub code: i64,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
	pub jsonrpc: String,
	pub id: RequestId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<JsonRpcError>,
}

/// Any frame that may appear on a bidirectional stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcFrame {
	Request(JsonRpcRequest),
	Response(JsonRpcResponse),
}

impl JsonRpcRequest {
	pub fn call(id: u64, method: impl Into<String>, params: Value) -> Self {
		JsonRpcRequest {
			jsonrpc: VERSION.into(),
			id: Some(RequestId::Number(id)),
			method: method.into(),
			params,
		}
	}

	pub fn notification(method: impl Into<String>, params: Value) -> Self {
		JsonRpcRequest { jsonrpc: VERSION.into(), id: None, method: method.into(), params }
	}

	pub fn is_notification(&self) -> bool {
		self.id.is_none()
	}
}

impl JsonRpcResponse {
	pub fn ok(id: RequestId, result: Value) -> Self {
		JsonRpcResponse { jsonrpc: VERSION.into(), id, result: Some(result), error: None }
	}

	pub fn err(id: RequestId, error: JsonRpcError) -> Self {
		JsonRpcResponse { jsonrpc: VERSION.into(), id, result: None, error: Some(error) }
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn frame_discrimination() {
		let req: JsonRpcFrame =
			serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "ping", "params": []}))
				.unwrap();
		assert!(matches!(req, JsonRpcFrame::Request(_)));

		let resp: JsonRpcFrame =
			serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": "pong"})).unwrap();
		assert!(matches!(resp, JsonRpcFrame::Response(_)));
	}

	#[test]
	fn notification_has_no_id() {
		let note = JsonRpcRequest::notification("deliveryComplete", Value::Null);
		assert!(note.is_notification());
		let text = serde_json::to_string(&note).unwrap();
		assert!(!text.contains("\"id\""));
	}

	#[test]
	fn text_ids_survive() {
		let resp = JsonRpcResponse::ok(RequestId::Text("abc".into()), json!(1));
		let back: JsonRpcResponse = serde_json::from_str(&serde_json::to_string(&resp).unwrap()).unwrap();
		assert_eq!(back.id, RequestId::Text("abc".into()));
	}
}
