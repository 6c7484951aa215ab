// SPDX-License-Identifier:

//! Host side of the vsock transport: one request, one response.

use anyhow::{Context, Result, anyhow, ensure};
use log::debug;
use nsm_attest_common::types::{Request, Response};
use nsm_attest_common::{MAX_REQUEST_SIZE, MAX_RESPONSE_SIZE};
use std::io::{Read, Write};
use vsock::{VsockAddr, VsockStream};

pub fn connect(cid: u32, port: u32) -> Result<VsockStream> {
    let addr = VsockAddr::new(cid, port);
    VsockStream::connect(&addr).with_context(|| format!("failed to connect to vsock {cid}:{port}"))
}

/// Send `request` in a single write, then read the reply until the enclave
/// closes the connection.
pub fn exchange<S: Read + Write>(stream: &mut S, request: &Request) -> Result<Response> {
    let body = request.to_json()?;
    ensure!(
        body.len() <= MAX_REQUEST_SIZE,
        "request is {} bytes, the enclave reads at most {MAX_REQUEST_SIZE}",
        body.len()
    );
    debug!("sending {body}");
    stream.write_all(body.as_bytes()).context("failed to send request")?;
    stream.flush()?;

    let mut buf = Vec::new();
    Read::take(&mut *stream, MAX_RESPONSE_SIZE as u64)
        .read_to_end(&mut buf)
        .context("failed to read response")?;
    if buf.is_empty() {
        return Err(anyhow!("enclave closed the connection without a response"));
    }

    Response::from_slice(&buf).context("malformed response from enclave")
}
