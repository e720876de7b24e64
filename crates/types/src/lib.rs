// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

pub use capdata::CapData;
pub use cluster::{ClusterConfig, VatSpec};
pub use delivery::{VatDelivery, VatResolution};
pub use error::{ErrorKind, ErrorRecord, ERROR_SENTINEL};
pub use id::{RemoteId, SubclusterId, VatId};
pub use kref::KernelRef;
pub use message::{GcActionKind, Message, RunQueueItem};
pub use syscall::VatSyscall;
pub use vref::{RefTag, VatRef};

pub mod capdata;
pub mod cluster;
pub mod delivery;
pub mod error;
pub mod id;
pub mod jsonrpc;
pub mod kref;
pub mod message;
pub mod syscall;
pub mod vref;

/// Parse failure for any of the textual reference forms.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed reference `{0}`")]
pub struct ParseRefError(pub String);
