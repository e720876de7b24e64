// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use ocap_types::{ErrorKind, ErrorRecord, KernelRef, SubclusterId, VatId, cluster::ClusterConfigError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("vat {0} not found")]
	VatNotFound(VatId),
	#[error("subcluster {0} not found")]
	SubclusterNotFound(SubclusterId),
	#[error("vat {0} already exists")]
	VatAlreadyExists(VatId),
	#[error("vat {0} has been terminated")]
	VatDeleted(VatId),
	#[error("no such kernel reference {0}")]
	UnknownTarget(KernelRef),
	#[error("worker stream failed: {0}")]
	StreamRead(String),
	#[error("resource limit exceeded: {0}")]
	ResourceLimit(String),
	#[error("operation aborted: {0}")]
	Abort(String),
	#[error("internal kernel failure: {0}")]
	Internal(String),
	#[error("vat {vat} violated the syscall contract: {reason}")]
	SyscallViolation { vat: VatId, reason: String },
	#[error(transparent)]
	Cluster(#[from] ClusterConfigError),
	#[error(transparent)]
	Store(#[from] ocap_store::Error),
}

impl Error {
	/// The host-boundary classification of this error.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Error::VatNotFound(_) | Error::UnknownTarget(_) => ErrorKind::VatNotFound,
			Error::SubclusterNotFound(_) => ErrorKind::SubclusterNotFound,
			Error::VatAlreadyExists(_) => ErrorKind::VatAlreadyExists,
			Error::VatDeleted(_) => ErrorKind::VatDeleted,
			Error::Cluster(ClusterConfigError::DuplicateEndowment { .. }) => {
				ErrorKind::DuplicateEndowment
			}
			Error::Cluster(_) => ErrorKind::Internal,
			Error::StreamRead(_) => ErrorKind::StreamRead,
			Error::ResourceLimit(_) => ErrorKind::ResourceLimit,
			Error::Abort(_) => ErrorKind::Abort,
			Error::Internal(_) | Error::SyscallViolation { .. } | Error::Store(_) => {
				ErrorKind::Internal
			}
		}
	}

	/// Marshal for the host boundary.
	pub fn to_record(&self) -> ErrorRecord {
		ErrorRecord::new(self.kind(), self.to_string())
	}

	/// Errors that are fatal to the vat being delivered to, rather than
	/// to the operation or the kernel.
	pub(crate) fn is_vat_fatal(&self) -> bool {
		matches!(self, Error::SyscallViolation { .. } | Error::StreamRead(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn kinds_map_to_stable_codes() {
		assert_eq!(Error::VatNotFound(VatId(1)).kind().code(), -32001);
		assert_eq!(Error::VatDeleted(VatId(1)).kind().code(), -32004);
		assert_eq!(
			Error::Cluster(ClusterConfigError::DuplicateEndowment {
				vat: "alice".into(),
				endowment: "clock".into(),
			})
			.kind()
			.code(),
			-32005
		);
		assert_eq!(Error::StreamRead("eof".into()).kind().code(), -32006);
	}

	#[test]
	fn record_round_trips_kind() {
		let record = Error::ResourceLimit("queue full".into()).to_record();
		assert_eq!(record.kind(), Some(ErrorKind::ResourceLimit));
		assert!(record.message.contains("queue full"));
	}
}
