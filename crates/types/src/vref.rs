// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::ParseRefError;

/// Whether a vat-local reference names an object or a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefTag {
	Object,
	Promise,
}

/// A vat-local reference.
///
/// The sign carries the allocation side: `+` means this vat allocated the
/// reference (it exports the object, or currently decides the promise),
/// `-` means the kernel allocated it into the vat's c-list as an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VatRef {
	pub tag: RefTag,
	pub export: bool,
	pub index: u64,
}

impl VatRef {
	pub fn object_export(index: u64) -> Self {
		VatRef { tag: RefTag::Object, export: true, index }
	}

	pub fn object_import(index: u64) -> Self {
		VatRef { tag: RefTag::Object, export: false, index }
	}

	pub fn promise_export(index: u64) -> Self {
		VatRef { tag: RefTag::Promise, export: true, index }
	}

	pub fn promise_import(index: u64) -> Self {
		VatRef { tag: RefTag::Promise, export: false, index }
	}

	/// The root object every vat exports as `o+0`.
	pub fn root() -> Self {
		VatRef::object_export(0)
	}

	pub fn is_promise(&self) -> bool {
		self.tag == RefTag::Promise
	}
}

impl fmt::Display for VatRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let tag = match self.tag {
			RefTag::Object => 'o',
			RefTag::Promise => 'p',
		};
		let sign = if self.export { '+' } else { '-' };
		write!(f, "{tag}{sign}{}", self.index)
	}
}

impl FromStr for VatRef {
	type Err = ParseRefError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let bytes = s.as_bytes();
		if bytes.len() < 3 {
			return Err(ParseRefError(s.to_string()));
		}
		let tag = match bytes[0] {
			b'o' => RefTag::Object,
			b'p' => RefTag::Promise,
			_ => return Err(ParseRefError(s.to_string())),
		};
		let export = match bytes[1] {
			b'+' => true,
			b'-' => false,
			_ => return Err(ParseRefError(s.to_string())),
		};
		let index = s[2..].parse::<u64>().map_err(|_| ParseRefError(s.to_string()))?;
		Ok(VatRef { tag, export, index })
	}
}

impl Serialize for VatRef {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for VatRef {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_and_parse() {
		assert_eq!(VatRef::object_export(0).to_string(), "o+0");
		assert_eq!(VatRef::object_import(2).to_string(), "o-2");
		assert_eq!(VatRef::promise_export(5).to_string(), "p+5");
		assert_eq!("p-7".parse::<VatRef>().unwrap(), VatRef::promise_import(7));
	}

	#[test]
	fn rejects_garbage() {
		assert!("o2".parse::<VatRef>().is_err());
		assert!("x+1".parse::<VatRef>().is_err());
		assert!("o+".parse::<VatRef>().is_err());
	}
}
