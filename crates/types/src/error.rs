// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Host-visible error kinds and the marshaled record they cross the
//! boundary as.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jsonrpc::JsonRpcError;

/// Fixed discriminator on every marshaled error record.
pub const ERROR_SENTINEL: &str = "ocap-error";

/// The error kinds the kernel distinguishes at its host boundary.
///
/// Each kind maps to a stable numeric code; anything the kernel cannot
/// classify surfaces as `Internal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	VatNotFound,
	SubclusterNotFound,
	VatAlreadyExists,
	VatDeleted,
	DuplicateEndowment,
	StreamRead,
	ResourceLimit,
	Internal,
	Abort,
}

impl ErrorKind {
	pub const ALL: [ErrorKind; 9] = [
		ErrorKind::VatNotFound,
		ErrorKind::SubclusterNotFound,
		ErrorKind::VatAlreadyExists,
		ErrorKind::VatDeleted,
		ErrorKind::DuplicateEndowment,
		ErrorKind::StreamRead,
		ErrorKind::ResourceLimit,
		ErrorKind::Internal,
		ErrorKind::Abort,
	];

	pub fn code(&self) -> i64 {
		match self {
			ErrorKind::VatNotFound => -32001,
			ErrorKind::SubclusterNotFound => -32002,
			ErrorKind::VatAlreadyExists => -32003,
			ErrorKind::VatDeleted => -32004,
			ErrorKind::DuplicateEndowment => -32005,
			ErrorKind::StreamRead => -32006,
			ErrorKind::ResourceLimit => -32007,
			ErrorKind::Internal => -32008,
			ErrorKind::Abort => -32009,
		}
	}

	pub fn from_code(code: i64) -> Option<Self> {
		ErrorKind::ALL.iter().copied().find(|kind| kind.code() == code)
	}
}

/// Marshaled error form: `{ sentinel, message, code, data?, stack?, cause? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
	pub sentinel: String,
	pub message: String,
	pub code: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cause: Option<Box<ErrorRecord>>,
}

impl ErrorRecord {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		ErrorRecord {
			sentinel: ERROR_SENTINEL.into(),
			message: message.into(),
			code: kind.code(),
			data: None,
			stack: None,
			cause: None,
		}
	}

	pub fn with_data(mut self, data: Value) -> Self {
		self.data = Some(data);
		self
	}

	pub fn with_cause(mut self, cause: ErrorRecord) -> Self {
		self.cause = Some(Box::new(cause));
		self
	}

	/// The typed kind, when the record carries a known code and the
	/// sentinel matches.
	pub fn kind(&self) -> Option<ErrorKind> {
		if self.sentinel != ERROR_SENTINEL {
			return None;
		}
		ErrorKind::from_code(self.code)
	}

	/// The disconnect reason used when a vat dies holding deciderships.
	pub fn disconnected(vat: impl std::fmt::Display) -> Self {
		ErrorRecord::new(ErrorKind::VatDeleted, format!("vat {vat} terminated"))
	}
}

impl From<&ErrorRecord> for JsonRpcError {
	fn from(record: &ErrorRecord) -> Self {
		JsonRpcError {
			code: record.code,
			message: record.message.clone(),
			data: Some(serde_json::to_value(record).unwrap_or(Value::Null)),
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn every_kind_round_trips() {
		for kind in ErrorKind::ALL {
			let record = ErrorRecord::new(kind, "boom")
				.with_data(json!({"hint": 1}))
				.with_cause(ErrorRecord::new(ErrorKind::Internal, "root"));
			let text = serde_json::to_string(&record).unwrap();
			let back: ErrorRecord = serde_json::from_str(&text).unwrap();
			assert_eq!(back, record);
			assert_eq!(back.kind(), Some(kind));
			assert_eq!(back.cause.as_ref().unwrap().kind(), Some(ErrorKind::Internal));
		}
	}

	#[test]
	fn codes_are_stable() {
		assert_eq!(ErrorKind::VatNotFound.code(), -32001);
		assert_eq!(ErrorKind::Abort.code(), -32009);
		assert_eq!(ErrorKind::from_code(-32004), Some(ErrorKind::VatDeleted));
		assert_eq!(ErrorKind::from_code(0), None);
	}

	#[test]
	fn foreign_sentinel_is_untyped() {
		let mut record = ErrorRecord::new(ErrorKind::Abort, "x");
		record.sentinel = "something-else".into();
		assert_eq!(record.kind(), None);
	}
}
