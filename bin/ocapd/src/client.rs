// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{
	io::{BufRead, BufReader, Write},
	os::unix::net::UnixStream,
	time::Duration,
};

use ocap_types::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use serde_json::Value;

use crate::paths::DaemonDir;

pub type ClientResult<T> = Result<T, String>;

/// One request/response exchange with the daemon socket.
pub fn request(dir: &DaemonDir, method: &str, params: Value) -> ClientResult<Value> {
	let socket = dir.socket_file();
	let mut stream = UnixStream::connect(&socket)
		.map_err(|err| format!("daemon is not reachable at {}: {err}", socket.display()))?;
	stream.set_read_timeout(Some(Duration::from_secs(60))).ok();

	let call = JsonRpcRequest::call(1, method, params);
	let mut line = serde_json::to_string(&call).map_err(|err| err.to_string())?;
	line.push('\n');
	stream.write_all(line.as_bytes()).map_err(|err| format!("send failed: {err}"))?;

	let mut reader = BufReader::new(stream);
	let mut reply = String::new();
	reader.read_line(&mut reply).map_err(|err| format!("receive failed: {err}"))?;
	let response: JsonRpcResponse =
		serde_json::from_str(reply.trim()).map_err(|err| format!("bad response: {err}"))?;
	if let Some(error) = response.error {
		return Err(format!("{} (code {})", error.message, error.code));
	}
	Ok(response.result.unwrap_or(Value::Null))
}

/// True when something answers a ping on the daemon socket.
pub fn is_running(dir: &DaemonDir) -> bool {
	request(dir, "ping", Value::Null).is_ok()
}
