// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! The outward face of the kernel: JSON-RPC 2.0 method dispatch onto the
//! kernel's host operations, with stable error codes per kind, plus the
//! optional remote gateway behind ocap URLs.

pub use gateway::{GatewayError, RemoteGateway};
pub use handler::RpcHandler;

mod gateway;
mod handler;
