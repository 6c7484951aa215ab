// SPDX-License-Identifier:

//! Error types surfaced by the enclave-side layers.

use std::io;
use std::path::PathBuf;

/// Failures of the binary security module protocol.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("nonce is {len} bytes, the device accepts at most {max}")]
    NonceTooLong { len: usize, max: usize },

    #[error("request frame is {actual} bytes, expected {expected}")]
    FrameLength { actual: usize, expected: usize },

    #[error("declared body length {declared} does not match expected {expected}")]
    BodyLength { declared: u32, expected: usize },

    #[error("document length {len} exceeds capacity {capacity}")]
    DocumentTooLong { len: usize, capacity: usize },

    #[error("device returned status {0}")]
    Status(u32),

    #[error("failed to write request frame: {0}")]
    Write(#[source] io::Error),

    #[error("failed to read response frame: {0}")]
    Read(#[source] io::Error),
}

/// Failures while obtaining a signed document.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("helper `{program}` not found")]
    HelperNotFound { program: String },

    #[error("helper failed ({status}): {output}")]
    HelperExecutionFailed { status: String, output: String },

    #[error("helper output could not be parsed: {0}")]
    HelperOutputUnparseable(String),

    #[error("failed to stage public key for helper: {0}")]
    KeyStaging(#[source] io::Error),

    #[error("failed to open security module device {}: {source}", .path.display())]
    DeviceOpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("security module protocol error: {0}")]
    DeviceProtocolError(#[source] CodecError),

    #[error("security module returned status {status}")]
    DeviceStatusError { status: u32 },
}

impl From<CodecError> for AcquireError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Status(status) => AcquireError::DeviceStatusError { status },
            other => AcquireError::DeviceProtocolError(other),
        }
    }
}

/// A request that could not be turned into an attestation request.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("public_key is not valid base64: {0}")]
    PublicKey(#[from] base64::DecodeError),
}
