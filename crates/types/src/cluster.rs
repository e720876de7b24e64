// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Configuration for one vat inside a cluster config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VatSpec {
	pub bundle_spec: String,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub parameters: Value,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub endowments: Vec<String>,
}

/// A named group of vats launched together.
///
/// The map is ordered by vat name so launches allocate vat ids
/// deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
	pub bootstrap: String,
	pub vats: BTreeMap<String, VatSpec>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub services: Vec<String>,
}

/// Config problems detected before any vat is spawned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterConfigError {
	#[error("bootstrap vat `{0}` is not defined in the cluster")]
	UnknownBootstrap(String),
	#[error("vat `{vat}` lists endowment `{endowment}` twice")]
	DuplicateEndowment { vat: String, endowment: String },
	#[error("cluster defines no vats")]
	Empty,
}

impl ClusterConfig {
	pub fn validate(&self) -> Result<(), ClusterConfigError> {
		if self.vats.is_empty() {
			return Err(ClusterConfigError::Empty);
		}
		if !self.vats.contains_key(&self.bootstrap) {
			return Err(ClusterConfigError::UnknownBootstrap(self.bootstrap.clone()));
		}
		for (name, spec) in &self.vats {
			let mut seen = BTreeSet::new();
			for endowment in &spec.endowments {
				if !seen.insert(endowment.as_str()) {
					return Err(ClusterConfigError::DuplicateEndowment {
						vat: name.clone(),
						endowment: endowment.clone(),
					});
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn sample() -> ClusterConfig {
		serde_json::from_value(json!({
			"bootstrap": "alice",
			"vats": {
				"alice": { "bundleSpec": "test:alice" },
				"bob": { "bundleSpec": "test:bob", "endowments": ["clock"] }
			}
		}))
		.unwrap()
	}

	#[test]
	fn parses_and_validates() {
		let config = sample();
		assert_eq!(config.bootstrap, "alice");
		assert_eq!(config.vats["bob"].endowments, vec!["clock"]);
		config.validate().unwrap();
	}

	#[test]
	fn rejects_unknown_bootstrap() {
		let mut config = sample();
		config.bootstrap = "mallory".into();
		assert_eq!(config.validate(), Err(ClusterConfigError::UnknownBootstrap("mallory".into())));
	}

	#[test]
	fn rejects_duplicate_endowment() {
		let mut config = sample();
		config.vats.get_mut("bob").unwrap().endowments = vec!["clock".into(), "clock".into()];
		assert!(matches!(config.validate(), Err(ClusterConfigError::DuplicateEndowment { .. })));
	}
}
