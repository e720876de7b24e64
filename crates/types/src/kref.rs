// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::ParseRefError;

/// A kernel-unique reference to an object (`ko<N>`) or promise (`kp<N>`).
///
/// Krefs are allocated from monotonic counters and are opaque to every
/// party except the kernel itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KernelRef {
	Object(u64),
	Promise(u64),
}

impl KernelRef {
	pub fn is_object(&self) -> bool {
		matches!(self, KernelRef::Object(_))
	}

	pub fn is_promise(&self) -> bool {
		matches!(self, KernelRef::Promise(_))
	}

	pub fn index(&self) -> u64 {
		match self {
			KernelRef::Object(n) | KernelRef::Promise(n) => *n,
		}
	}
}

impl fmt::Display for KernelRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			KernelRef::Object(n) => write!(f, "ko{n}"),
			KernelRef::Promise(n) => write!(f, "kp{n}"),
		}
	}
}

impl FromStr for KernelRef {
	type Err = ParseRefError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (ctor, digits): (fn(u64) -> KernelRef, &str) = if let Some(rest) = s.strip_prefix("ko") {
			(KernelRef::Object, rest)
		} else if let Some(rest) = s.strip_prefix("kp") {
			(KernelRef::Promise, rest)
		} else {
			return Err(ParseRefError(s.to_string()));
		};
		let n = digits.parse::<u64>().map_err(|_| ParseRefError(s.to_string()))?;
		Ok(ctor(n))
	}
}

impl Serialize for KernelRef {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for KernelRef {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(de::Error::custom)
	}
}
