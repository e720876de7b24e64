// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::ParseRefError;

macro_rules! textual_id {
	($name:ident, $prefix:literal, $doc:literal) => {
		#[doc = $doc]
		#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
		pub struct $name(pub u64);

		impl $name {
			pub const PREFIX: &'static str = $prefix;
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}{}", $prefix, self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseRefError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				let digits = s.strip_prefix($prefix).ok_or_else(|| ParseRefError(s.to_string()))?;
				let n = digits.parse::<u64>().map_err(|_| ParseRefError(s.to_string()))?;
				Ok($name(n))
			}
		}

		impl Serialize for $name {
			fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
				serializer.collect_str(self)
			}
		}

		impl<'de> Deserialize<'de> for $name {
			fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
				let s = String::deserialize(deserializer)?;
				s.parse().map_err(de::Error::custom)
			}
		}
	};
}

textual_id!(VatId, "v", "Identifier of a vat, rendered as `v<N>`.");
textual_id!(SubclusterId, "s", "Identifier of a subcluster, rendered as `s<N>`.");
textual_id!(RemoteId, "r", "Identifier of a remote peer, rendered as `r<N>`.");

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_and_parse() {
		assert_eq!(VatId(3).to_string(), "v3");
		assert_eq!("v3".parse::<VatId>().unwrap(), VatId(3));
		assert_eq!(SubclusterId(1).to_string(), "s1");
		assert_eq!("r12".parse::<RemoteId>().unwrap(), RemoteId(12));
	}

	#[test]
	fn rejects_foreign_prefix() {
		assert!("s3".parse::<VatId>().is_err());
		assert!("v".parse::<VatId>().is_err());
		assert!("v-1".parse::<VatId>().is_err());
	}

	#[test]
	fn serde_is_textual() {
		let json = serde_json::to_string(&VatId(7)).unwrap();
		assert_eq!(json, "\"v7\"");
		let back: VatId = serde_json::from_str(&json).unwrap();
		assert_eq!(back, VatId(7));
	}
}
