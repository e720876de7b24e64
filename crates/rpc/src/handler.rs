// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use ocap_kernel::{Error, Kernel};
use ocap_store::PromiseState;
use ocap_types::{
	CapData, ClusterConfig, KernelRef, SubclusterId, VatId,
	jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::gateway::RemoteGateway;

/// Dispatches façade requests onto a kernel instance. One handler owns
/// the kernel; hosts serialize access the same way the scheduler does.
pub struct RpcHandler {
	kernel: Kernel,
	gateway: Option<Box<dyn RemoteGateway>>,
}

#[derive(Deserialize)]
struct LaunchParams {
	config: ClusterConfig,
}

#[derive(Deserialize)]
struct QueueMessageParams {
	target: KernelRef,
	method: String,
	#[serde(default)]
	args: Option<CapData<KernelRef>>,
}

#[derive(Deserialize)]
struct VatParams {
	vat: VatId,
}

#[derive(Deserialize)]
struct SubclusterParams {
	subcluster: SubclusterId,
}

#[derive(Deserialize)]
struct KrefParams {
	kref: KernelRef,
}

#[derive(Deserialize)]
struct UrlParams {
	url: String,
}

#[derive(Deserialize)]
struct QueryParams {
	sql: String,
}

#[derive(Deserialize)]
struct ViewParams {
	table: String,
}

impl RpcHandler {
	pub fn new(kernel: Kernel) -> Self {
		RpcHandler { kernel, gateway: None }
	}

	pub fn with_gateway(kernel: Kernel, gateway: Box<dyn RemoteGateway>) -> Self {
		RpcHandler { kernel, gateway: Some(gateway) }
	}

	pub fn kernel(&mut self) -> &mut Kernel {
		&mut self.kernel
	}

	/// Handle one request. Notifications produce no response.
	pub fn handle(&mut self, request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
		let id = request.id.clone()?;
		let outcome = self.dispatch(&request.method, &request.params);
		Some(match outcome {
			Ok(result) => JsonRpcResponse::ok(id, result),
			Err(err) => {
				debug!(method = %request.method, %err, "facade request failed");
				let record = err.to_record();
				JsonRpcResponse::err(id, JsonRpcError::from(&record))
			}
		})
	}

	#[instrument(name = "rpc::dispatch", level = "debug", skip(self, params))]
	fn dispatch(&mut self, method: &str, params: &Value) -> Result<Value, Error> {
		match method {
			"ping" => Ok(json!("pong")),
			"launchSubcluster" => {
				let LaunchParams { config } = parse(params)?;
				let (id, result) = self.kernel.launch_subcluster(config)?;
				Ok(json!({ "subcluster": id, "result": result }))
			}
			"queueMessage" => {
				let QueueMessageParams { target, method, args } = parse(params)?;
				let args = args.unwrap_or_else(|| CapData::new("[]", Vec::new()));
				let kp = self.kernel.queue_message(target, &method, args)?;
				Ok(json!(kp))
			}
			"invoke" => {
				let QueueMessageParams { target, method, args } = parse(params)?;
				let args = args.unwrap_or_else(|| CapData::new("[]", Vec::new()));
				let kp = self.kernel.queue_message(target, &method, args)?;
				self.kernel.run_until_quiescent(None)?;
				let row = self.kernel.store().promise_row(kp)?;
				Ok(json!({
					"result": kp,
					"state": row.state.to_string(),
					"value": row.value,
				}))
			}
			"terminateVat" => {
				let VatParams { vat } = parse(params)?;
				self.kernel.terminate_vat(vat)?;
				Ok(Value::Null)
			}
			"terminateAllVats" => {
				self.kernel.terminate_all_vats()?;
				Ok(Value::Null)
			}
			"terminateSubcluster" => {
				let SubclusterParams { subcluster } = parse(params)?;
				self.kernel.terminate_subcluster(subcluster)?;
				Ok(Value::Null)
			}
			"reloadSubcluster" => {
				let SubclusterParams { subcluster } = parse(params)?;
				self.kernel.reload_subcluster(subcluster)?;
				Ok(Value::Null)
			}
			"collectGarbage" => {
				self.kernel.collect_garbage()?;
				Ok(Value::Null)
			}
			"flush" => {
				self.kernel.collect_garbage()?;
				self.kernel.checkpoint()?;
				Ok(Value::Null)
			}
			"run" => {
				self.kernel.run_until_quiescent(None)?;
				Ok(Value::Null)
			}
			"status" => self.kernel.status(),
			"issueOcapURL" => {
				let KrefParams { kref } = parse(params)?;
				let gateway = self.require_gateway()?;
				let url = gateway
					.issue(kref)
					.map_err(|err| Error::Internal(err.to_string()))?;
				Ok(json!(url))
			}
			"redeemOcapURL" => {
				let UrlParams { url } = parse(params)?;
				let gateway = self.require_gateway()?;
				let kref = gateway
					.redeem(&url)
					.map_err(|err| Error::Internal(err.to_string()))?;
				Ok(json!(kref))
			}
			"executeDBQuery" => {
				let QueryParams { sql } = parse(params)?;
				let rows = self.kernel.execute_db_query(&sql)?;
				Ok(Value::Array(rows))
			}
			"kvDump" => {
				let rows: Vec<Value> = self
					.kernel
					.dump()?
					.into_iter()
					.map(|(key, value)| json!({ "key": key, "value": value }))
					.collect();
				Ok(Value::Array(rows))
			}
			"view" => {
				let ViewParams { table } = parse(params)?;
				self.view(&table)
			}
			"inspect" => {
				let KrefParams { kref } = parse(params)?;
				self.inspect(kref)
			}
			other => Err(Error::Internal(format!("unknown method `{other}`"))),
		}
	}

	fn require_gateway(&mut self) -> Result<&mut Box<dyn RemoteGateway>, Error> {
		self.gateway
			.as_mut()
			.ok_or_else(|| Error::Internal("no remote gateway is configured".into()))
	}

	fn view(&mut self, table: &str) -> Result<Value, Error> {
		match table {
			"objects" => {
				let store = self.kernel.store();
				let mut rows = Vec::new();
				for kref in store.object_krefs()? {
					let row = store.object_row(kref)?;
					rows.push(json!({
						"kref": row.kref,
						"owner": row.owner,
						"reachable": row.ref_counts.reachable,
						"recognizable": row.ref_counts.recognizable,
						"revoked": row.revoked,
					}));
				}
				Ok(Value::Array(rows))
			}
			"promises" => {
				let store = self.kernel.store();
				let mut rows = Vec::new();
				for kref in store.promise_krefs()? {
					let row = store.promise_row(kref)?;
					rows.push(json!({
						"kref": row.kref,
						"state": row.state.to_string(),
						"decider": row.decider,
						"subscribers": row.subscribers,
						"queueLength": row.queue.len(),
						"refCount": row.ref_count,
					}));
				}
				Ok(Value::Array(rows))
			}
			"vats" => Ok(self.kernel.status()?["vats"].clone()),
			other => Err(Error::Internal(format!("unknown view `{other}`"))),
		}
	}

	fn inspect(&mut self, kref: KernelRef) -> Result<Value, Error> {
		let store = self.kernel.store();
		match kref {
			KernelRef::Object(_) if store.object_exists(kref)? => {
				let row = store.object_row(kref)?;
				Ok(json!({
					"kref": row.kref,
					"kind": "object",
					"owner": row.owner,
					"refCount": row.ref_counts.to_string(),
					"revoked": row.revoked,
				}))
			}
			KernelRef::Promise(_) if store.promise_exists(kref)? => {
				let row = store.promise_row(kref)?;
				Ok(json!({
					"kref": row.kref,
					"kind": "promise",
					"state": row.state.to_string(),
					"decider": row.decider,
					"subscribers": row.subscribers,
					"queueLength": row.queue.len(),
					"refCount": row.ref_count,
					"settledValue": if row.state == PromiseState::Unresolved {
						Value::Null
					} else {
						serde_json::to_value(&row.value).unwrap_or(Value::Null)
					},
				}))
			}
			_ => Err(Error::UnknownTarget(kref)),
		}
	}
}

fn parse<T: serde::de::DeserializeOwned>(params: &Value) -> Result<T, Error> {
	serde_json::from_value(params.clone())
		.map_err(|err| Error::Internal(format!("invalid parameters: {err}")))
}
