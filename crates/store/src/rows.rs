// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::fmt;

use ocap_types::{CapData, KernelRef, Message, VatId};

use crate::Error;

/// The two per-object counts: invokable now vs still nameable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefCounts {
	pub reachable: u64,
	pub recognizable: u64,
}

impl RefCounts {
	/// Parse the persisted `"<reachable>,<recognizable>"` pair.
	pub fn parse(raw: &str) -> Result<Self, Error> {
		let (reachable, recognizable) =
			raw.split_once(',').ok_or_else(|| Error::Corrupt(format!("refCount `{raw}`")))?;
		let parse = |s: &str| {
			s.parse::<u64>().map_err(|_| Error::Corrupt(format!("refCount `{raw}`")))
		};
		Ok(RefCounts { reachable: parse(reachable)?, recognizable: parse(recognizable)? })
	}

	pub fn is_zero(&self) -> bool {
		self.reachable == 0 && self.recognizable == 0
	}
}

impl fmt::Display for RefCounts {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{},{}", self.reachable, self.recognizable)
	}
}

/// One kernel object row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRow {
	pub kref: KernelRef,
	pub owner: VatId,
	pub ref_counts: RefCounts,
	pub revoked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
	Unresolved,
	Fulfilled,
	Rejected,
}

impl PromiseState {
	pub fn as_str(&self) -> &'static str {
		match self {
			PromiseState::Unresolved => "unresolved",
			PromiseState::Fulfilled => "fulfilled",
			PromiseState::Rejected => "rejected",
		}
	}

	pub fn parse(raw: &str) -> Result<Self, Error> {
		match raw {
			"unresolved" => Ok(PromiseState::Unresolved),
			"fulfilled" => Ok(PromiseState::Fulfilled),
			"rejected" => Ok(PromiseState::Rejected),
			other => Err(Error::Corrupt(format!("promise state `{other}`"))),
		}
	}

	pub fn is_settled(&self) -> bool {
		!matches!(self, PromiseState::Unresolved)
	}
}

impl fmt::Display for PromiseState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One kernel promise row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromiseRow {
	pub kref: KernelRef,
	pub state: PromiseState,
	pub decider: Option<VatId>,
	pub subscribers: Vec<VatId>,
	pub queue: Vec<Message<KernelRef>>,
	pub value: Option<CapData<KernelRef>>,
	pub ref_count: u64,
}
