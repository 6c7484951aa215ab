// SPDX-License-Identifier:

//! Types and helpers shared by the enclave server and the host client.

pub mod document;
pub mod types;

/// Vsock port the enclave listens on.
pub const DEFAULT_VSOCK_PORT: u32 = 5000;

/// Upper bound of a request read by the enclave in a single call.
pub const MAX_REQUEST_SIZE: usize = 4096;

/// Upper bound of a response read by the host.
pub const MAX_RESPONSE_SIZE: usize = 65536;
