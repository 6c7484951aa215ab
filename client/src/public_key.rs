// SPDX-License-Identifier:

use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::Path;

/// Load a public key file as raw DER. PEM armor is stripped; anything else is
/// assumed to be DER already.
pub fn load_der(path: &Path) -> Result<Vec<u8>> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read public key {}", path.display()))?;
    to_der(&bytes)
}

pub fn to_der(bytes: &[u8]) -> Result<Vec<u8>> {
    if !bytes.trim_ascii_start().starts_with(b"-----BEGIN ") {
        return Ok(bytes.to_vec());
    }
    let (_, pem) = x509_parser::pem::parse_x509_pem(bytes)
        .map_err(|e| anyhow!("public key PEM parse failed: {e}"))?;
    Ok(pem.contents)
}
