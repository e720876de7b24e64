// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use ocap_types::VatDelivery;
use serde_json::Value;

use crate::worker::{SyscallClient, VatBehavior};

/// Accepts every delivery and never syscalls. Useful as a message sink.
#[derive(Default)]
pub struct NullVat;

impl VatBehavior for NullVat {
	fn deliver(&mut self, _delivery: VatDelivery, _syscalls: &mut SyscallClient<'_>) {}
}

/// Fulfills every message's result promise with the message's own
/// arguments.
#[derive(Default)]
pub struct EchoVat;

impl VatBehavior for EchoVat {
	fn deliver(&mut self, delivery: VatDelivery, syscalls: &mut SyscallClient<'_>) {
		if let VatDelivery::Message { message, .. } = delivery {
			if let Some(result) = message.result {
				syscalls.fulfill(result, message.args);
			}
		}
	}
}

/// Wraps a closure as a behavior; the workhorse for scripted tests.
pub struct FnVat<F>(pub F);

impl<F> VatBehavior for FnVat<F>
where
	F: FnMut(VatDelivery, &mut SyscallClient<'_>) + Send,
{
	fn deliver(&mut self, delivery: VatDelivery, syscalls: &mut SyscallClient<'_>) {
		(self.0)(delivery, syscalls);
	}
}

/// A behavior with start-parameter capture, for tests asserting the
/// `startVat` payload.
pub struct RecordingVat<F> {
	pub on_deliver: F,
	pub parameters: Value,
}

impl<F> VatBehavior for RecordingVat<F>
where
	F: FnMut(VatDelivery, &mut SyscallClient<'_>) + Send,
{
	fn start(&mut self, parameters: &Value) {
		self.parameters = parameters.clone();
	}

	fn deliver(&mut self, delivery: VatDelivery, syscalls: &mut SyscallClient<'_>) {
		(self.on_deliver)(delivery, syscalls);
	}
}
