// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Serialized capability data: a JSON body plus the references it carries.
///
/// Slot positions inside the body are written as `{"$slot": <index>}`
/// markers indexing into `slots`. The slot type is generic so the same
/// record carries krefs inside the kernel and vrefs on the vat wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "R: Deserialize<'de>"))]
pub struct CapData<R> {
	pub body: String,
	#[serde(default)]
	pub slots: Vec<R>,
}

impl<R> CapData<R> {
	pub fn new(body: impl Into<String>, slots: Vec<R>) -> Self {
		CapData { body: body.into(), slots }
	}

	/// A body with no slots, e.g. a plain string or error payload.
	pub fn value(body: &Value) -> Self {
		CapData { body: body.to_string(), slots: Vec::new() }
	}

	/// A single-slot record whose body is one `$slot` marker.
	pub fn slot(slot: R) -> Self {
		CapData { body: json!({ "$slot": 0 }).to_string(), slots: vec![slot] }
	}

	/// Rewrite the slot array, preserving the body.
	pub fn map_slots<T>(self, f: impl FnMut(R) -> T) -> CapData<T> {
		CapData { body: self.body, slots: self.slots.into_iter().map(f).collect() }
	}

	/// Fallible slot rewrite for translation layers.
	pub fn try_map_slots<T, E>(self, f: impl FnMut(R) -> Result<T, E>) -> Result<CapData<T>, E> {
		let slots = self.slots.into_iter().map(f).collect::<Result<Vec<_>, E>>()?;
		Ok(CapData { body: self.body, slots })
	}

	pub fn parse_body(&self) -> Option<Value> {
		serde_json::from_str(&self.body).ok()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::KernelRef;

	#[test]
	fn value_round_trip() {
		let data: CapData<KernelRef> = CapData::value(&json!("hello"));
		assert_eq!(data.body, "\"hello\"");
		assert!(data.slots.is_empty());
		let text = serde_json::to_string(&data).unwrap();
		let back: CapData<KernelRef> = serde_json::from_str(&text).unwrap();
		assert_eq!(back, data);
	}

	#[test]
	fn slot_marker_body() {
		let data = CapData::slot(KernelRef::Object(4));
		assert_eq!(data.parse_body().unwrap(), json!({ "$slot": 0 }));
		assert_eq!(data.slots, vec![KernelRef::Object(4)]);
	}

	#[test]
	fn missing_slots_field_defaults_empty() {
		let data: CapData<KernelRef> = serde_json::from_str(r#"{"body":"1"}"#).unwrap();
		assert!(data.slots.is_empty());
	}
}
