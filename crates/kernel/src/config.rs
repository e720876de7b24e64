// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::time::Duration;

/// Explicit kernel construction parameters. There is no process-global
/// configuration; hosts pass one of these to [`crate::Kernel::new`].
#[derive(Debug, Clone)]
pub struct KernelConfig {
	/// `queueMessage` is refused once the run queue reaches this depth.
	pub max_queue_depth: u64,
	/// Hard cap on the serialized size of one message's arguments.
	pub max_message_bytes: usize,
	/// How long a worker may sit on a dispatch before the vat is
	/// declared stuck and terminated.
	pub worker_reply_timeout: Duration,
	/// Deliveries between `bringOutYourDead` sweeps of a vat.
	pub reap_interval: u64,
	/// Default deadline for host operations that drive to quiescence.
	pub quiescence_timeout: Duration,
}

impl Default for KernelConfig {
	fn default() -> Self {
		KernelConfig {
			max_queue_depth: 10_000,
			max_message_bytes: 1 << 20,
			worker_reply_timeout: Duration::from_secs(10),
			reap_interval: 100,
			quiescence_timeout: Duration::from_secs(30),
		}
	}
}
