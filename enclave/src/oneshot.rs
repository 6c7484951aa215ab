// SPDX-License-Identifier:

//! Single acquisition without a listener, for use from a shell inside the
//! enclave.

use crate::acquire::{Acquirer, AttestationRequest, AttestationSource};
use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use log::{info, warn};
use nsm_attest_common::document;
use std::io::Write;

/// Acquire one document, save it to `request.output_path` and print it as
/// base64, followed by the decoded form when `request.want_parsed` is set.
pub fn run_once<C, D>(
    acquirer: &Acquirer<C, D>,
    request: &AttestationRequest,
    out: &mut impl Write,
) -> Result<()>
where
    C: AttestationSource,
    D: AttestationSource,
{
    let doc = acquirer
        .acquire(request)
        .context("failed to obtain attestation document")?;
    info!("obtained attestation document ({} bytes)", doc.len());

    if let Some(path) = &request.output_path {
        match document::persist(&doc, path) {
            Ok(()) => info!("wrote attestation document to {}", path.display()),
            Err(e) => warn!("failed to write {}: {e}", path.display()),
        }
    }

    writeln!(out, "{}", B64.encode(&doc))?;

    if request.want_parsed {
        match document::parse_document(&doc) {
            Some(parsed) => writeln!(out, "{}", serde_json::to_string_pretty(&parsed)?)?,
            None => warn!("attestation document could not be decoded"),
        }
    }
    Ok(())
}
