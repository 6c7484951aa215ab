// SPDX-License-Identifier:

//! One request/response exchange per connection.

use crate::acquire::{Acquirer, AttestationRequest, AttestationSource, Strategy};
use crate::config::Config;
use crate::error::RequestError;
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use log::{debug, error, info, warn};
use nsm_attest_common::document;
use nsm_attest_common::types::{Request, RequestShape, Response};
use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingRequest,
    RequestParsed,
    AcquiringDocument,
    ResponseSent,
    ErrorSent,
    /// The peer closed the connection before sending anything.
    PeerClosed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::AwaitingRequest => "awaiting-request",
            SessionState::RequestParsed => "request-parsed",
            SessionState::AcquiringDocument => "acquiring-document",
            SessionState::ResponseSent => "response-sent",
            SessionState::ErrorSent => "error-sent",
            SessionState::PeerClosed => "peer-closed",
        };
        f.write_str(name)
    }
}

struct Session<'a, S> {
    stream: &'a mut S,
    state: SessionState,
}

impl<S: Read + Write> Session<'_, S> {
    fn transition(&mut self, next: SessionState) {
        debug!("session {} -> {}", self.state, next);
        self.state = next;
    }

    fn read_request(&mut self, max_request_size: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; max_request_size];
        let n = loop {
            match self.stream.read(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        buf.truncate(n);
        Ok(buf)
    }

    fn send(&mut self, response: &Response) -> io::Result<()> {
        let json = response.to_json().map_err(io::Error::other)?;
        self.stream.write_all(json.as_bytes())?;
        self.stream.flush()
    }

    fn finish(mut self, response: Response) -> SessionState {
        let next = if response.success {
            SessionState::ResponseSent
        } else {
            SessionState::ErrorSent
        };
        if let Err(e) = self.send(&response) {
            error!("failed to send response: {e}");
        }
        self.transition(next);
        self.state
    }

    fn fail(self, message: String) -> SessionState {
        error!("{message}");
        self.finish(Response::error(message))
    }
}

/// Turn the wire request into a domain request.
///
/// When `use_cli` is absent, requests carrying user data or a public key go
/// through the helper since the device frame has no room for them.
pub fn parse_request(bytes: &[u8]) -> Result<AttestationRequest, RequestError> {
    let request = Request::from_slice(bytes)?;

    let strategy = match (request.use_cli, request.shape()) {
        (Some(true), _) | (None, RequestShape::Extended) => Strategy::Cli,
        (Some(false), _) | (None, RequestShape::Legacy) => Strategy::DirectDevice,
    };

    let public_key = match request.public_key.as_deref() {
        Some(encoded) if !encoded.is_empty() => B64.decode(encoded)?,
        _ => Vec::new(),
    };

    Ok(AttestationRequest {
        user_data: request.user_data.map(String::into_bytes).unwrap_or_default(),
        public_key,
        nonce: request.nonce.map(String::into_bytes).unwrap_or_default(),
        strategy,
        output_path: request
            .output_file
            .filter(|path| !path.is_empty())
            .map(PathBuf::from),
        want_parsed: request.parse.unwrap_or(false),
    })
}

/// Serve a single request on `stream` and return the terminal state.
///
/// Every failure is reported to the peer as an error response; nothing here
/// ends the process.
pub fn handle_connection<S, C, D>(
    stream: &mut S,
    acquirer: &Acquirer<C, D>,
    config: &Config,
) -> SessionState
where
    S: Read + Write,
    C: AttestationSource,
    D: AttestationSource,
{
    let mut session = Session {
        stream,
        state: SessionState::AwaitingRequest,
    };

    let bytes = match session.read_request(config.max_request_size) {
        Ok(bytes) if bytes.is_empty() => {
            info!("peer closed the connection without a request");
            session.transition(SessionState::PeerClosed);
            return session.state;
        }
        Ok(bytes) => bytes,
        Err(e) => return session.fail(format!("failed to read request: {e}")),
    };

    let request = match parse_request(&bytes) {
        Ok(request) => request,
        Err(e) => return session.fail(format!("invalid request: {e}")),
    };
    session.transition(SessionState::RequestParsed);
    info!(
        "attestation request: strategy={:?} nonce={}B user_data={}B public_key={}B",
        request.strategy,
        request.nonce.len(),
        request.user_data.len(),
        request.public_key.len()
    );

    session.transition(SessionState::AcquiringDocument);
    let doc = match acquirer.acquire(&request) {
        Ok(doc) => doc,
        Err(e) => return session.fail(format!("failed to obtain attestation document: {e}")),
    };
    info!("obtained attestation document ({} bytes)", doc.len());

    if let Some(path) = &request.output_path {
        match document::persist(&doc, path) {
            Ok(()) => info!("wrote attestation document to {}", path.display()),
            Err(e) => warn!("failed to write {}: {e}", path.display()),
        }
    }

    let parsed_doc = if request.want_parsed {
        let parsed = document::parse_document(&doc);
        if parsed.is_none() {
            warn!("attestation document could not be decoded, omitting parsed_doc");
        }
        parsed
    } else {
        None
    };

    session.finish(Response::success(B64.encode(&doc), parsed_doc))
}
