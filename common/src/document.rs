// SPDX-License-Identifier:

//! Post-processing of signed attestation documents: persistence, display and
//! best-effort decoding. Nothing here verifies signatures.

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use serde_cbor::Value as CborValue;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

/// Documents longer than this are summarised instead of printed in full.
pub const SUMMARY_THRESHOLD: usize = 100;

/// Mode of persisted documents: owner read/write, group/other read.
pub const PERSIST_MODE: u32 = 0o644;

/// COSE_Sign1: `[protected, unprotected, payload, signature]`.
#[derive(Debug, Deserialize)]
struct CoseSign1(ByteBuf, CborValue, ByteBuf, ByteBuf);

#[derive(Debug, Deserialize)]
struct AttestationPayload {
    #[serde(default)]
    module_id: Option<String>,
    #[serde(default)]
    timestamp: Option<u64>,
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    pcrs: BTreeMap<u32, ByteBuf>,
    #[serde(default)]
    certificate: Option<ByteBuf>,
    #[serde(default)]
    cabundle: Option<Vec<ByteBuf>>,
    #[serde(default)]
    public_key: Option<ByteBuf>,
    #[serde(default)]
    user_data: Option<ByteBuf>,
    #[serde(default)]
    nonce: Option<ByteBuf>,
}

#[derive(Debug, Serialize)]
struct AttestationPayloadView {
    #[serde(skip_serializing_if = "Option::is_none")]
    module_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    digest: Option<String>,
    pcrs: BTreeMap<u32, String>, // hex
    #[serde(skip_serializing_if = "Option::is_none")]
    certificate: Option<String>, // hex (DER)
    #[serde(skip_serializing_if = "Option::is_none")]
    cabundle: Option<Vec<String>>, // hex (DER)
    #[serde(skip_serializing_if = "Option::is_none")]
    public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data_decoded: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce_decoded: Option<String>,
}

impl From<AttestationPayload> for AttestationPayloadView {
    fn from(payload: AttestationPayload) -> Self {
        Self {
            module_id: payload.module_id,
            timestamp: payload.timestamp,
            digest: payload.digest,
            pcrs: payload
                .pcrs
                .into_iter()
                .map(|(idx, value)| (idx, hex::encode(value.as_ref())))
                .collect(),
            certificate: payload.certificate.map(|b| hex::encode(b.as_ref())),
            cabundle: payload
                .cabundle
                .map(|v| v.iter().map(|b| hex::encode(b.as_ref())).collect()),
            public_key: payload.public_key.map(|b| hex::encode(b.as_ref())),
            user_data_decoded: payload.user_data.as_ref().and_then(|b| as_text(b)),
            user_data: payload.user_data.map(|b| hex::encode(b.as_ref())),
            nonce_decoded: payload.nonce.as_ref().and_then(|b| as_text(b)),
            nonce: payload.nonce.map(|b| hex::encode(b.as_ref())),
        }
    }
}

fn as_text(bytes: &[u8]) -> Option<String> {
    std::str::from_utf8(bytes)
        .ok()
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

/// How a document is shown to a human.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayForm {
    pub summary: String,
    pub parsed: Option<Map<String, Value>>,
}

pub fn to_display_form(document: &[u8]) -> DisplayForm {
    let encoded = B64.encode(document);
    let summary = if document.len() > SUMMARY_THRESHOLD {
        format!(
            "{} bytes, base64 prefix: {}...",
            document.len(),
            &encoded[..SUMMARY_THRESHOLD]
        )
    } else {
        format!("{} bytes, base64: {}", document.len(), encoded)
    };

    DisplayForm {
        summary,
        parsed: parse_document(document),
    }
}

/// Best-effort structured decode.
///
/// Tries a CBOR COSE_Sign1 envelope around a Nitro attestation payload first,
/// then a plain JSON object. Returns `None` if neither fits.
pub fn parse_document(document: &[u8]) -> Option<Map<String, Value>> {
    parse_cose_payload(document).or_else(|| serde_json::from_slice(document).ok())
}

fn parse_cose_payload(document: &[u8]) -> Option<Map<String, Value>> {
    let CoseSign1(_, _, payload, _) = serde_cbor::from_slice(document).ok()?;
    let payload: AttestationPayload = serde_cbor::from_slice(&payload).ok()?;
    match serde_json::to_value(AttestationPayloadView::from(payload)).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// The COSE_Sign1 envelope without the payload: decoded headers, payload
/// size and the signature in hex.
pub fn envelope_view(document: &[u8]) -> Option<Map<String, Value>> {
    let CoseSign1(protected, unprotected, payload, signature) =
        serde_cbor::from_slice(document).ok()?;

    let protected = match serde_cbor::from_slice::<CborValue>(&protected) {
        Ok(header) => cbor_to_json(&header),
        Err(_) => Value::String(hex::encode(protected.as_ref())),
    };

    let mut view = Map::new();
    view.insert("protected_header".into(), protected);
    view.insert("unprotected_header".into(), cbor_to_json(&unprotected));
    view.insert("payload_len".into(), payload.len().into());
    view.insert("signature".into(), hex::encode(signature.as_ref()).into());
    Some(view)
}

/// Indented outline of the document's CBOR structure, with the protected
/// header and payload byte strings decoded in place.
pub fn describe_structure(document: &[u8]) -> Option<String> {
    let mut root: CborValue = serde_cbor::from_slice(document).ok()?;
    if let CborValue::Array(items) = &mut root {
        if items.len() == 4 {
            for idx in [0, 2] {
                let decoded = match &items[idx] {
                    CborValue::Bytes(bytes) => serde_cbor::from_slice::<CborValue>(bytes).ok(),
                    _ => None,
                };
                if let Some(inner) = decoded {
                    items[idx] = inner;
                }
            }
        }
    }

    let mut out = String::new();
    describe(&root, "", &mut out);
    Some(out)
}

fn describe(value: &CborValue, prefix: &str, out: &mut String) {
    let nested = format!("{prefix}    ");
    match value {
        CborValue::Map(entries) => {
            out.push_str(&format!("{prefix}map, {} entries:\n", entries.len()));
            for (key, value) in entries {
                out.push_str(&format!("{prefix}  key: {}\n", cbor_key(key)));
                describe(value, &nested, out);
            }
        }
        CborValue::Array(items) => {
            out.push_str(&format!("{prefix}array, {} items:\n", items.len()));
            for (idx, item) in items.iter().enumerate() {
                out.push_str(&format!("{prefix}  [{idx}]:\n"));
                describe(item, &nested, out);
            }
        }
        CborValue::Bytes(bytes) => {
            out.push_str(&format!("{prefix}bytes, {} long\n", bytes.len()));
            if bytes.len() <= 32 {
                out.push_str(&format!("{prefix}  value: {}\n", hex::encode(bytes)));
            }
        }
        CborValue::Tag(tag, inner) => {
            out.push_str(&format!("{prefix}tag {tag}:\n"));
            describe(inner, &nested, out);
        }
        other => out.push_str(&format!("{prefix}value: {}\n", cbor_to_json(other))),
    }
}

fn cbor_key(key: &CborValue) -> String {
    match key {
        CborValue::Text(text) => text.clone(),
        CborValue::Bytes(bytes) => format!("bytes({}): {}", bytes.len(), hex::encode(bytes)),
        other => cbor_to_json(other).to_string(),
    }
}

/// JSON rendering of a CBOR value. Byte strings become hex and map keys are
/// stringified.
fn cbor_to_json(value: &CborValue) -> Value {
    match value {
        CborValue::Null => Value::Null,
        CborValue::Bool(b) => Value::Bool(*b),
        CborValue::Integer(n) => i64::try_from(*n)
            .map(Value::from)
            .or_else(|_| u64::try_from(*n).map(Value::from))
            .unwrap_or_else(|_| Value::String(n.to_string())),
        CborValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        CborValue::Bytes(bytes) => Value::String(hex::encode(bytes)),
        CborValue::Text(text) => Value::String(text.clone()),
        CborValue::Array(items) => Value::Array(items.iter().map(cbor_to_json).collect()),
        CborValue::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, value)| (cbor_key(key), cbor_to_json(value)))
                .collect(),
        ),
        CborValue::Tag(_, inner) => cbor_to_json(inner),
        _ => Value::Null,
    }
}

/// Write the raw document bytes to `path`, replacing any existing file.
pub fn persist(document: &[u8], path: impl AsRef<Path>) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(PERSIST_MODE)
        .open(path.as_ref())?;
    file.write_all(document)?;
    // `mode` above is filtered by the umask and ignored for existing files.
    file.set_permissions(fs::Permissions::from_mode(PERSIST_MODE))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct TestPayload {
        module_id: String,
        timestamp: u64,
        digest: String,
        pcrs: BTreeMap<u32, ByteBuf>,
        certificate: ByteBuf,
        cabundle: Vec<ByteBuf>,
        public_key: Option<ByteBuf>,
        user_data: Option<ByteBuf>,
        nonce: Option<ByteBuf>,
    }

    fn cose_document() -> Vec<u8> {
        let payload = TestPayload {
            module_id: "i-0123-enc0123".into(),
            timestamp: 1_700_000_000_000,
            digest: "SHA384".into(),
            pcrs: BTreeMap::from([(0, ByteBuf::from(vec![0xAB; 4]))]),
            certificate: ByteBuf::from(vec![0x30, 0x82]),
            cabundle: vec![ByteBuf::from(vec![0x01])],
            public_key: None,
            user_data: Some(ByteBuf::from(b"hello".to_vec())),
            nonce: Some(ByteBuf::from(vec![0xFF, 0xFE])),
        };
        let payload = serde_cbor::to_vec(&payload).unwrap();
        let envelope = (
            ByteBuf::from(vec![0xA1, 0x01, 0x38, 0x22]),
            BTreeMap::<String, String>::new(),
            ByteBuf::from(payload),
            ByteBuf::from(vec![0u8; 96]),
        );
        serde_cbor::to_vec(&envelope).unwrap()
    }

    #[test]
    fn cose_payload_is_flattened() {
        let parsed = parse_document(&cose_document()).unwrap();
        assert_eq!(parsed["module_id"], "i-0123-enc0123");
        assert_eq!(parsed["timestamp"], 1_700_000_000_000u64);
        assert_eq!(parsed["pcrs"]["0"], "abababab");
        assert_eq!(parsed["certificate"], "3082");
        assert_eq!(parsed["cabundle"][0], "01");
        assert_eq!(parsed["user_data"], "68656c6c6f");
        assert_eq!(parsed["user_data_decoded"], "hello");
        assert_eq!(parsed["nonce"], "fffe");
        assert!(!parsed.contains_key("nonce_decoded"));
        assert!(!parsed.contains_key("public_key"));
    }

    #[test]
    fn empty_byte_strings_have_no_decoded_text() {
        let payload = TestPayload {
            module_id: "m".into(),
            timestamp: 1,
            digest: "SHA384".into(),
            pcrs: BTreeMap::new(),
            certificate: ByteBuf::new(),
            cabundle: Vec::new(),
            public_key: None,
            user_data: Some(ByteBuf::new()),
            nonce: Some(ByteBuf::new()),
        };
        let envelope = (
            ByteBuf::new(),
            BTreeMap::<String, String>::new(),
            ByteBuf::from(serde_cbor::to_vec(&payload).unwrap()),
            ByteBuf::new(),
        );
        let parsed = parse_document(&serde_cbor::to_vec(&envelope).unwrap()).unwrap();
        assert_eq!(parsed["user_data"], "");
        assert!(!parsed.contains_key("user_data_decoded"));
        assert!(!parsed.contains_key("nonce_decoded"));
    }

    #[test]
    fn envelope_view_shows_headers_and_signature() {
        let view = envelope_view(&cose_document()).unwrap();
        assert_eq!(view["protected_header"], serde_json::json!({"1": -35}));
        assert_eq!(view["unprotected_header"], serde_json::json!({}));
        assert_eq!(view["signature"], "00".repeat(96));
        assert!(view["payload_len"].as_u64().unwrap() > 0);

        assert!(envelope_view(b"hello").is_none());
    }

    #[test]
    fn structure_outline_decodes_nested_payload() {
        let outline = describe_structure(&cose_document()).unwrap();
        assert!(outline.starts_with("array, 4 items:\n"));
        assert!(outline.contains("key: module_id"));
        assert!(outline.contains("value: \"i-0123-enc0123\""));
        assert!(outline.contains("bytes, 96 long"));
        // Byte strings longer than 32 are summarised without a value line.
        assert!(!outline.contains(&"00".repeat(96)));
    }

    #[test]
    fn json_object_is_accepted() {
        let parsed = parse_document(br#"{"module_id":"m","pcrs":{}}"#).unwrap();
        assert_eq!(parsed["module_id"], "m");
    }

    #[test]
    fn undecodable_document_yields_none() {
        assert!(parse_document(b"hello").is_none());
        assert!(parse_document(&[]).is_none());
        assert!(parse_document(b"[1,2,3]").is_none());
    }

    #[test]
    fn short_document_is_shown_in_full() {
        let form = to_display_form(b"hello");
        assert_eq!(form.summary, "5 bytes, base64: aGVsbG8=");
        assert!(form.parsed.is_none());
    }

    #[test]
    fn long_document_is_summarised() {
        let doc = vec![0x41u8; 300];
        let form = to_display_form(&doc);
        assert!(form.summary.starts_with("300 bytes, base64 prefix: "));
        assert!(form.summary.ends_with("..."));
        let prefix = form
            .summary
            .trim_start_matches("300 bytes, base64 prefix: ")
            .trim_end_matches("...");
        assert_eq!(prefix.len(), SUMMARY_THRESHOLD);
    }

    #[test]
    fn persist_writes_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.bin");
        let doc = cose_document();

        persist(&doc, &path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), doc);

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, PERSIST_MODE);
    }

    #[test]
    fn persist_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.bin");
        fs::write(&path, vec![0u8; 64]).unwrap();

        persist(b"abc", &path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"abc");
    }

    #[test]
    fn persist_reports_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("doc.bin");
        assert!(persist(b"abc", &path).is_err());
    }
}
