// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use serde::{Deserialize, Serialize};

use crate::{CapData, Message, VatRef, delivery::VatResolution};

/// A request a vat makes of the kernel inside one delivery window.
///
/// Syscalls arrive in issue order and each is answered synchronously
/// before the worker may emit the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VatSyscall {
	Send {
		target: VatRef,
		message: Message<VatRef>,
	},
	Subscribe {
		vref: VatRef,
	},
	Resolve {
		resolutions: Vec<VatResolution>,
	},
	Exit {
		failure: bool,
		info: CapData<VatRef>,
	},
	VatstoreGet {
		key: String,
	},
	VatstoreSet {
		key: String,
		value: String,
	},
	VatstoreDelete {
		key: String,
	},
	VatstoreGetNextKey {
		previous: String,
	},
	DropImports {
		vrefs: Vec<VatRef>,
	},
	RetireImports {
		vrefs: Vec<VatRef>,
	},
	RetireExports {
		vrefs: Vec<VatRef>,
	},
}

impl VatSyscall {
	/// The wire method name, `syscall.<name>`.
	pub fn method_name(&self) -> &'static str {
		match self {
			VatSyscall::Send { .. } => "syscall.send",
			VatSyscall::Subscribe { .. } => "syscall.subscribe",
			VatSyscall::Resolve { .. } => "syscall.resolve",
			VatSyscall::Exit { .. } => "syscall.exit",
			VatSyscall::VatstoreGet { .. } => "syscall.vatstoreGet",
			VatSyscall::VatstoreSet { .. } => "syscall.vatstoreSet",
			VatSyscall::VatstoreDelete { .. } => "syscall.vatstoreDelete",
			VatSyscall::VatstoreGetNextKey { .. } => "syscall.vatstoreGetNextKey",
			VatSyscall::DropImports { .. } => "syscall.dropImports",
			VatSyscall::RetireImports { .. } => "syscall.retireImports",
			VatSyscall::RetireExports { .. } => "syscall.retireExports",
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn resolve_wire_form() {
		let syscall = VatSyscall::Resolve {
			resolutions: vec![VatResolution {
				subject: VatRef::promise_import(3),
				rejected: true,
				value: CapData::value(&json!("boom")),
			}],
		};
		let value = serde_json::to_value(&syscall).unwrap();
		assert_eq!(value["type"], "resolve");
		assert_eq!(value["resolutions"][0]["subject"], "p-3");
		let back: VatSyscall = serde_json::from_value(value).unwrap();
		assert_eq!(back, syscall);
	}

	#[test]
	fn vatstore_wire_form() {
		let syscall = VatSyscall::VatstoreSet { key: "counter".into(), value: "7".into() };
		let value = serde_json::to_value(&syscall).unwrap();
		assert_eq!(value["type"], "vatstoreSet");
		assert_eq!(syscall.method_name(), "syscall.vatstoreSet");
	}
}
