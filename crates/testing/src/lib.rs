// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Test support: vats that run as plain threads speaking the real worker
//! frame protocol over channels, so the whole kernel stack is exercised
//! without spawning processes.

pub use behaviors::{EchoVat, FnVat, NullVat, RecordingVat};
pub use worker::{ChannelWorkerService, SyscallClient, VatBehavior};

mod behaviors;
mod worker;

use ocap_kernel::{Kernel, KernelConfig};
use ocap_storage::MemoryDatabase;

/// A kernel over a fresh in-memory store and a channel worker service.
pub fn testing_kernel(service: ChannelWorkerService) -> Kernel {
	Kernel::new(Box::new(MemoryDatabase::new()), Box::new(service), KernelConfig::default())
		.expect("kernel opens on empty store")
}
