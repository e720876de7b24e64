// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use ocap_types::KernelRef;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
	#[error("url `{0}` is not an ocap url for this peer")]
	BadUrl(String),
	#[error("remote peer failed: {0}")]
	Peer(String),
}

/// Translates krefs into network-redeemable URLs and back. Provided by
/// the remote-comms collaborator; the kernel works without one, failing
/// url operations with a clear error.
pub trait RemoteGateway: Send {
	fn issue(&mut self, kref: KernelRef) -> Result<String, GatewayError>;

	fn redeem(&mut self, url: &str) -> Result<KernelRef, GatewayError>;
}
