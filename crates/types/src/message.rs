// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{CapData, KernelRef, VatId};

/// One method invocation: a verb, its arguments, and an optional result
/// promise the sender wants resolved with the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "R: Deserialize<'de>"))]
pub struct Message<R> {
	pub method: String,
	pub args: CapData<R>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<R>,
}

impl<R> Message<R> {
	pub fn new(method: impl Into<String>, args: CapData<R>, result: Option<R>) -> Self {
		Message { method: method.into(), args, result }
	}
}

/// One entry on the kernel run queue. Every crank consumes exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunQueueItem {
	Send {
		target: KernelRef,
		message: Message<KernelRef>,
	},
	Notify {
		vat_id: VatId,
		kp: KernelRef,
	},
	DropExports {
		vat_id: VatId,
		krefs: Vec<KernelRef>,
	},
	RetireExports {
		vat_id: VatId,
		krefs: Vec<KernelRef>,
	},
	RetireImports {
		vat_id: VatId,
		krefs: Vec<KernelRef>,
	},
	BringOutYourDead {
		vat_id: VatId,
	},
}

impl RunQueueItem {
	/// Krefs the queue entry holds alive while it waits for delivery.
	pub fn held_refs(&self) -> Vec<KernelRef> {
		match self {
			RunQueueItem::Send { target, message } => {
				let mut refs = vec![*target];
				refs.extend(message.args.slots.iter().copied());
				if let Some(result) = message.result {
					refs.push(result);
				}
				refs
			}
			RunQueueItem::Notify { kp, .. } => vec![*kp],
			// GC deliveries carry no additional holds: the counts
			// they act on were already adjusted when queued.
			RunQueueItem::DropExports { .. }
			| RunQueueItem::RetireExports { .. }
			| RunQueueItem::RetireImports { .. }
			| RunQueueItem::BringOutYourDead { .. } => Vec::new(),
		}
	}

	/// The vat the entry is addressed to, when statically known.
	pub fn target_vat(&self) -> Option<VatId> {
		match self {
			RunQueueItem::Send { .. } => None,
			RunQueueItem::Notify { vat_id, .. }
			| RunQueueItem::DropExports { vat_id, .. }
			| RunQueueItem::RetireExports { vat_id, .. }
			| RunQueueItem::RetireImports { vat_id, .. }
			| RunQueueItem::BringOutYourDead { vat_id } => Some(*vat_id),
		}
	}
}

/// The kind of a pending GC action, as persisted in the `gcActions` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GcActionKind {
	DropExports,
	RetireExports,
	RetireImports,
}

impl GcActionKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			GcActionKind::DropExports => "dropExports",
			GcActionKind::RetireExports => "retireExports",
			GcActionKind::RetireImports => "retireImports",
		}
	}

	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"dropExports" => Some(GcActionKind::DropExports),
			"retireExports" => Some(GcActionKind::RetireExports),
			"retireImports" => Some(GcActionKind::RetireImports),
			_ => None,
		}
	}
}

impl fmt::Display for GcActionKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn send_wire_form() {
		let item = RunQueueItem::Send {
			target: KernelRef::Object(1),
			message: Message::new("hello", CapData::value(&json!(["hi"])), Some(KernelRef::Promise(2))),
		};
		let value = serde_json::to_value(&item).unwrap();
		assert_eq!(value["type"], "send");
		assert_eq!(value["target"], "ko1");
		assert_eq!(value["message"]["result"], "kp2");
		let back: RunQueueItem = serde_json::from_value(value).unwrap();
		assert_eq!(back, item);
	}

	#[test]
	fn held_refs_cover_slots_and_result() {
		let item = RunQueueItem::Send {
			target: KernelRef::Promise(1),
			message: Message::new(
				"m",
				CapData::new("{}", vec![KernelRef::Object(3), KernelRef::Object(4)]),
				Some(KernelRef::Promise(5)),
			),
		};
		assert_eq!(
			item.held_refs(),
			vec![
				KernelRef::Promise(1),
				KernelRef::Object(3),
				KernelRef::Object(4),
				KernelRef::Promise(5)
			]
		);
	}

	#[test]
	fn gc_items_hold_nothing() {
		let item = RunQueueItem::DropExports { vat_id: VatId(1), krefs: vec![KernelRef::Object(2)] };
		assert!(item.held_refs().is_empty());
		assert_eq!(item.target_vat(), Some(VatId(1)));
	}
}
