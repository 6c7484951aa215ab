// SPDX-License-Identifier:

//! Immutable server configuration, built once at startup.

use nsm_attest_common::{DEFAULT_VSOCK_PORT, MAX_REQUEST_SIZE};
use std::path::PathBuf;

pub const DEFAULT_DEVICE_PATH: &str = "/dev/nsm";

pub const DEFAULT_HELPER: &str = "nsm-cli";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Vsock port to listen on (any CID).
    pub vsock_port: u32,

    /// Security module character device.
    pub device_path: PathBuf,

    /// Helper program for CLI requests, looked up on `PATH` if relative.
    pub helper_program: PathBuf,

    /// Size of the buffer a request is read into.
    pub max_request_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vsock_port: DEFAULT_VSOCK_PORT,
            device_path: PathBuf::from(DEFAULT_DEVICE_PATH),
            helper_program: PathBuf::from(DEFAULT_HELPER),
            max_request_size: MAX_REQUEST_SIZE,
        }
    }
}
