// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use serde::{Deserialize, Serialize};

use crate::{CapData, Message, VatRef};

/// One resolution, in vat-local reference space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatResolution {
	pub subject: VatRef,
	pub rejected: bool,
	pub value: CapData<VatRef>,
}

/// A dispatch from the kernel into a vat, already translated into the
/// vat's own reference space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VatDelivery {
	Message {
		target: VatRef,
		message: Message<VatRef>,
	},
	Notify {
		resolutions: Vec<VatResolution>,
	},
	DropExports {
		vrefs: Vec<VatRef>,
	},
	RetireExports {
		vrefs: Vec<VatRef>,
	},
	RetireImports {
		vrefs: Vec<VatRef>,
	},
	BringOutYourDead,
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn message_wire_form() {
		let delivery = VatDelivery::Message {
			target: VatRef::root(),
			message: Message::new("hello", CapData::value(&json!([])), Some(VatRef::promise_import(1))),
		};
		let value = serde_json::to_value(&delivery).unwrap();
		assert_eq!(value["type"], "message");
		assert_eq!(value["target"], "o+0");
		assert_eq!(value["message"]["result"], "p-1");
		let back: VatDelivery = serde_json::from_value(value).unwrap();
		assert_eq!(back, delivery);
	}

	#[test]
	fn notify_wire_form() {
		let delivery = VatDelivery::Notify {
			resolutions: vec![VatResolution {
				subject: VatRef::promise_export(2),
				rejected: false,
				value: CapData::value(&json!("done")),
			}],
		};
		let value = serde_json::to_value(&delivery).unwrap();
		assert_eq!(value["type"], "notify");
		assert_eq!(value["resolutions"][0]["subject"], "p+2");
	}
}
