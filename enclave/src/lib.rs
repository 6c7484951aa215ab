// SPDX-License-Identifier:

//! Enclave side of the attestation relay: the security module device codec,
//! document acquisition and the per-connection session protocol.

pub mod acquire;
pub mod codec;
pub mod config;
pub mod error;
pub mod oneshot;
pub mod server;
pub mod session;
