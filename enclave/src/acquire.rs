// SPDX-License-Identifier:

//! Obtaining signed attestation documents, either through the `nsm-cli`
//! helper or by talking to the security module device directly.

use crate::codec;
use crate::error::AcquireError;
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use log::{debug, warn};
use serde::Deserialize;
use std::ffi::{OsStr, OsString};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Invoke the external helper, falling back to the device if it is absent.
    Cli,
    #[default]
    DirectDevice,
}

/// One attestation request, fixed for the lifetime of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttestationRequest {
    pub user_data: Vec<u8>,
    /// Raw DER key material.
    pub public_key: Vec<u8>,
    pub nonce: Vec<u8>,
    pub strategy: Strategy,
    pub output_path: Option<PathBuf>,
    pub want_parsed: bool,
}

/// Something that can produce a signed document for a request.
pub trait AttestationSource {
    fn attest(&self, request: &AttestationRequest) -> Result<Vec<u8>, AcquireError>;
}

/// Dispatches a request to the strategy it asks for.
pub struct Acquirer<C, D> {
    cli: C,
    device: D,
}

impl<C: AttestationSource, D: AttestationSource> Acquirer<C, D> {
    pub fn new(cli: C, device: D) -> Self {
        Self { cli, device }
    }

    /// A CLI request whose helper cannot be found is served by the device
    /// with the same parameters.
    pub fn acquire(&self, request: &AttestationRequest) -> Result<Vec<u8>, AcquireError> {
        match request.strategy {
            Strategy::DirectDevice => self.device.attest(request),
            Strategy::Cli => match self.cli.attest(request) {
                Err(AcquireError::HelperNotFound { program }) => {
                    warn!("{program} is not available, falling back to direct device access");
                    self.device.attest(request)
                }
                other => other,
            },
        }
    }
}

/// Helper-based strategy: `<program> attest [--user-data ..] [--public-key ..] [--nonce ..]`.
pub struct NsmCli {
    program: PathBuf,
}

#[derive(Debug, Deserialize)]
struct HelperOutput {
    attestation_doc: String,
}

impl NsmCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(request: &AttestationRequest, public_key_path: Option<&Path>) -> Vec<OsString> {
        let mut args = vec![OsString::from("attest")];
        if !request.user_data.is_empty() {
            args.push("--user-data".into());
            args.push(OsStr::from_bytes(&request.user_data).to_owned());
        }
        if let Some(path) = public_key_path {
            args.push("--public-key".into());
            args.push(path.as_os_str().to_owned());
        }
        if !request.nonce.is_empty() {
            args.push("--nonce".into());
            args.push(OsStr::from_bytes(&request.nonce).to_owned());
        }
        args
    }
}

/// Write the key to a private temporary file. The file is removed when the
/// returned handle is dropped.
fn stage_public_key(public_key: &[u8]) -> Result<Option<NamedTempFile>, AcquireError> {
    if public_key.is_empty() {
        return Ok(None);
    }
    let mut file = tempfile::Builder::new()
        .prefix("nsm-public-key-")
        .suffix(".der")
        .tempfile()
        .map_err(AcquireError::KeyStaging)?;
    file.write_all(public_key)
        .and_then(|()| file.flush())
        .map_err(AcquireError::KeyStaging)?;
    Ok(Some(file))
}

/// Accepts either `{"attestation_doc": "<base64>"}` or the raw document.
fn parse_helper_output(stdout: &[u8]) -> Result<Vec<u8>, AcquireError> {
    let trimmed = stdout.trim_ascii();
    if trimmed.is_empty() {
        return Err(AcquireError::HelperOutputUnparseable(
            "helper produced no output".into(),
        ));
    }

    if trimmed.starts_with(b"{") {
        let output: HelperOutput = serde_json::from_slice(trimmed)
            .map_err(|e| AcquireError::HelperOutputUnparseable(format!("invalid JSON: {e}")))?;
        return B64.decode(output.attestation_doc.trim()).map_err(|e| {
            AcquireError::HelperOutputUnparseable(format!("attestation_doc is not base64: {e}"))
        });
    }

    Ok(stdout.to_vec())
}

impl AttestationSource for NsmCli {
    fn attest(&self, request: &AttestationRequest) -> Result<Vec<u8>, AcquireError> {
        let key_file = stage_public_key(&request.public_key)?;
        let args = Self::args(request, key_file.as_ref().map(|f| f.path()));
        debug!("running {} {:?}", self.program.display(), args);

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => AcquireError::HelperNotFound {
                    program: self.program.display().to_string(),
                },
                _ => AcquireError::HelperExecutionFailed {
                    status: format!("spawn failed: {e}"),
                    output: String::new(),
                },
            })?;
        drop(key_file);

        if !output.status.success() {
            let mut combined = output.stdout;
            combined.extend_from_slice(&output.stderr);
            return Err(AcquireError::HelperExecutionFailed {
                status: output.status.to_string(),
                output: String::from_utf8_lossy(&combined).trim().to_string(),
            });
        }
        if !output.stderr.is_empty() {
            debug!("helper stderr: {}", String::from_utf8_lossy(&output.stderr).trim());
        }

        parse_helper_output(&output.stdout)
    }
}

/// Direct strategy: one request/response exchange with the device file.
pub struct NsmDevice {
    path: PathBuf,
}

impl NsmDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AttestationSource for NsmDevice {
    fn attest(&self, request: &AttestationRequest) -> Result<Vec<u8>, AcquireError> {
        if !request.user_data.is_empty() || !request.public_key.is_empty() {
            warn!("device requests carry only the nonce; user data and public key are not bound");
        }

        let mut device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|source| AcquireError::DeviceOpenFailed {
                path: self.path.clone(),
                source,
            })?;
        Ok(codec::exchange(&mut device, &request.nonce)?)
    }
}
