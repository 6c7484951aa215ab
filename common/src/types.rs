// SPDX-License-Identifier:

//! JSON wire types exchanged over the vsock connection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attestation request sent by the host.
///
/// Every field is optional. Two historical shapes share this type:
///
/// - legacy: `use_cli`, `nonce`, `output_file`, `parse`
/// - extended: additionally `user_data` and `public_key` (base64 of raw DER)
///
/// The server tells them apart by field presence, see [`Request::shape`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_cli: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Path inside the enclave where the raw document is written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestShape {
    Legacy,
    Extended,
}

impl Request {
    pub fn shape(&self) -> RequestShape {
        if self.user_data.is_some() || self.public_key.is_some() {
            RequestShape::Extended
        } else {
            RequestShape::Legacy
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Reply to a [`Request`]. Built only through [`Response::success`] and
/// [`Response::error`], so exactly one of the payload shapes is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Base64 (standard alphabet) of the signed document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_doc: Option<Map<String, Value>>,
}

/// Payload of a successful [`Response`].
#[derive(Debug, Clone, PartialEq)]
pub struct Attested {
    pub document: String,
    pub parsed_doc: Option<Map<String, Value>>,
}

impl Response {
    pub fn success(document: String, parsed_doc: Option<Map<String, Value>>) -> Self {
        Self {
            success: true,
            error_message: None,
            document: Some(document),
            parsed_doc,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            document: None,
            parsed_doc: None,
        }
    }

    /// Split into the success payload or the server's error message.
    pub fn into_result(self) -> Result<Attested, String> {
        match (self.success, self.document) {
            (true, Some(document)) => Ok(Attested {
                document,
                parsed_doc: self.parsed_doc,
            }),
            (true, None) => Err("server reported success without a document".to_string()),
            (false, _) => Err(self
                .error_message
                .unwrap_or_else(|| "server reported failure without a message".to_string())),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
