// SPDX-License-Identifier:

//! Fixed-layout binary protocol spoken to the security module device.
//!
//! All integers are little-endian.
//!
//! Request frame (76 bytes):
//!   [message_type:4][message_len:4] [version:4][nonce:64]
//!
//! Response frame (16404 bytes):
//!   [message_type:4][message_len:4] [version:4][status:4][document_len:4][document_data:16384]
//!
//! `message_len` is the size of the body that follows the header.

use crate::error::CodecError;
use std::io::{Read, Write};

/// Message type of a get-attestation-document request.
pub const MSG_GET_ATTESTATION_DOC: u32 = 0x20;

pub const PROTOCOL_VERSION: u32 = 1;

pub const NONCE_SIZE: usize = 64;

/// Size of the fixed document buffer in a response body.
pub const DOCUMENT_CAPACITY: usize = 16384;

pub const HEADER_SIZE: usize = 8;
pub const REQUEST_BODY_SIZE: usize = 4 + NONCE_SIZE;
pub const RESPONSE_BODY_SIZE: usize = 12 + DOCUMENT_CAPACITY;
pub const REQUEST_FRAME_SIZE: usize = HEADER_SIZE + REQUEST_BODY_SIZE;
pub const RESPONSE_FRAME_SIZE: usize = HEADER_SIZE + RESPONSE_BODY_SIZE;

// Header offsets.
const TYPE_OFFSET: usize = 0;
const LEN_OFFSET: usize = 4;

// Body offsets.
const VERSION_OFFSET: usize = 0;
const NONCE_OFFSET: usize = 4;
const STATUS_OFFSET: usize = 4;
const DOC_LEN_OFFSET: usize = 8;
const DOC_DATA_OFFSET: usize = 12;

/// A decoded request frame, as the device sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequest {
    pub message_type: u32,
    pub version: u32,
    pub nonce: [u8; NONCE_SIZE],
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(arr)
}

/// Build a get-attestation-document request frame.
///
/// The nonce is left-aligned and zero-padded. Nonces longer than
/// [`NONCE_SIZE`] are rejected rather than truncated.
pub fn encode_request(nonce: &[u8]) -> Result<Vec<u8>, CodecError> {
    if nonce.len() > NONCE_SIZE {
        return Err(CodecError::NonceTooLong {
            len: nonce.len(),
            max: NONCE_SIZE,
        });
    }

    let mut frame = vec![0u8; REQUEST_FRAME_SIZE];
    put_u32(&mut frame, TYPE_OFFSET, MSG_GET_ATTESTATION_DOC);
    put_u32(&mut frame, LEN_OFFSET, REQUEST_BODY_SIZE as u32);

    let body = &mut frame[HEADER_SIZE..];
    put_u32(body, VERSION_OFFSET, PROTOCOL_VERSION);
    body[NONCE_OFFSET..NONCE_OFFSET + nonce.len()].copy_from_slice(nonce);

    Ok(frame)
}

/// Parse a request frame.
pub fn decode_request(frame: &[u8]) -> Result<DeviceRequest, CodecError> {
    if frame.len() != REQUEST_FRAME_SIZE {
        return Err(CodecError::FrameLength {
            actual: frame.len(),
            expected: REQUEST_FRAME_SIZE,
        });
    }

    let declared = get_u32(frame, LEN_OFFSET);
    if declared as usize != REQUEST_BODY_SIZE {
        return Err(CodecError::BodyLength {
            declared,
            expected: REQUEST_BODY_SIZE,
        });
    }

    let body = &frame[HEADER_SIZE..];
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&body[NONCE_OFFSET..NONCE_OFFSET + NONCE_SIZE]);

    Ok(DeviceRequest {
        message_type: get_u32(frame, TYPE_OFFSET),
        version: get_u32(body, VERSION_OFFSET),
        nonce,
    })
}

/// Build a response frame carrying `document` with the given status.
pub fn encode_response(status: u32, document: &[u8]) -> Result<Vec<u8>, CodecError> {
    if document.len() > DOCUMENT_CAPACITY {
        return Err(CodecError::DocumentTooLong {
            len: document.len(),
            capacity: DOCUMENT_CAPACITY,
        });
    }

    let mut frame = vec![0u8; RESPONSE_FRAME_SIZE];
    put_u32(&mut frame, TYPE_OFFSET, MSG_GET_ATTESTATION_DOC);
    put_u32(&mut frame, LEN_OFFSET, RESPONSE_BODY_SIZE as u32);

    let body = &mut frame[HEADER_SIZE..];
    put_u32(body, VERSION_OFFSET, PROTOCOL_VERSION);
    put_u32(body, STATUS_OFFSET, status);
    put_u32(body, DOC_LEN_OFFSET, document.len() as u32);
    body[DOC_DATA_OFFSET..DOC_DATA_OFFSET + document.len()].copy_from_slice(document);

    Ok(frame)
}

/// Read one response frame and return `document_data[..document_len]`.
///
/// A non-zero status is reported before the document length is looked at, so
/// no document bytes escape from a failed response.
pub fn decode_response<R: Read>(reader: &mut R) -> Result<Vec<u8>, CodecError> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).map_err(CodecError::Read)?;

    let declared = get_u32(&header, LEN_OFFSET);
    if declared as usize != RESPONSE_BODY_SIZE {
        return Err(CodecError::BodyLength {
            declared,
            expected: RESPONSE_BODY_SIZE,
        });
    }

    let mut body = vec![0u8; RESPONSE_BODY_SIZE];
    reader.read_exact(&mut body).map_err(CodecError::Read)?;

    let status = get_u32(&body, STATUS_OFFSET);
    if status != 0 {
        return Err(CodecError::Status(status));
    }

    let document_len = get_u32(&body, DOC_LEN_OFFSET) as usize;
    if document_len > DOCUMENT_CAPACITY {
        return Err(CodecError::DocumentTooLong {
            len: document_len,
            capacity: DOCUMENT_CAPACITY,
        });
    }

    Ok(body[DOC_DATA_OFFSET..DOC_DATA_OFFSET + document_len].to_vec())
}

/// One request/response round trip with the device. No retries.
pub fn exchange<D: Read + Write>(device: &mut D, nonce: &[u8]) -> Result<Vec<u8>, CodecError> {
    let frame = encode_request(nonce)?;
    device.write_all(&frame).map_err(CodecError::Write)?;
    device.flush().map_err(CodecError::Write)?;
    decode_response(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    /// In-memory device: records what is written, replays a canned reply.
    struct FakeDevice {
        written: Vec<u8>,
        reply: Cursor<Vec<u8>>,
    }

    impl FakeDevice {
        fn new(reply: Vec<u8>) -> Self {
            Self {
                written: Vec::new(),
                reply: Cursor::new(reply),
            }
        }
    }

    impl Read for FakeDevice {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reply.read(buf)
        }
    }

    impl Write for FakeDevice {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn request_frame_layout() {
        let frame = encode_request(b"abc").unwrap();
        assert_eq!(frame.len(), REQUEST_FRAME_SIZE);
        assert_eq!(&frame[0..4], &[0x20, 0, 0, 0]);
        assert_eq!(&frame[4..8], &(REQUEST_BODY_SIZE as u32).to_le_bytes());
        assert_eq!(&frame[8..12], &[1, 0, 0, 0]);
        assert_eq!(&frame[12..15], b"abc");
        assert!(frame[15..].iter().all(|&b| b == 0));
    }

    #[test]
    fn nonce_is_zero_padded_to_64_bytes() {
        for len in [0usize, 1, 3, 32, 63, 64] {
            let nonce: Vec<u8> = (1..=len as u8).collect();
            let decoded = decode_request(&encode_request(&nonce).unwrap()).unwrap();

            let mut expected = [0u8; NONCE_SIZE];
            expected[..len].copy_from_slice(&nonce);
            assert_eq!(decoded.nonce, expected, "nonce length {len}");
            assert_eq!(decoded.message_type, MSG_GET_ATTESTATION_DOC);
            assert_eq!(decoded.version, PROTOCOL_VERSION);
        }
    }

    #[test]
    fn oversized_nonce_is_rejected() {
        let err = encode_request(&[7u8; NONCE_SIZE + 1]).unwrap_err();
        assert!(matches!(err, CodecError::NonceTooLong { len: 65, max: 64 }));
    }

    #[test]
    fn decode_request_checks_sizes() {
        assert!(matches!(
            decode_request(&[0u8; 10]),
            Err(CodecError::FrameLength { actual: 10, .. })
        ));

        let mut frame = encode_request(b"n").unwrap();
        frame[4] = 0x10;
        assert!(matches!(
            decode_request(&frame),
            Err(CodecError::BodyLength { declared: 0x10, .. })
        ));
    }

    #[test]
    fn response_returns_exactly_document_len_bytes() {
        let mut frame = encode_response(0, b"hello").unwrap();
        // Garbage in the padding must never be surfaced.
        for b in &mut frame[HEADER_SIZE + DOC_DATA_OFFSET + 5..] {
            *b = 0xEE;
        }
        let doc = decode_response(&mut Cursor::new(frame)).unwrap();
        assert_eq!(doc, b"hello");
    }

    #[test]
    fn full_capacity_document_is_accepted() {
        let document = vec![0x5A; DOCUMENT_CAPACITY];
        let frame = encode_response(0, &document).unwrap();
        assert_eq!(decode_response(&mut Cursor::new(frame)).unwrap(), document);
    }

    #[test]
    fn nonzero_status_hides_document() {
        let frame = encode_response(3, b"secret").unwrap();
        let err = decode_response(&mut Cursor::new(frame)).unwrap_err();
        assert!(matches!(err, CodecError::Status(3)));
    }

    #[test]
    fn document_len_beyond_capacity_is_rejected() {
        let mut frame = encode_response(0, b"x").unwrap();
        put_u32(
            &mut frame[HEADER_SIZE..],
            DOC_LEN_OFFSET,
            DOCUMENT_CAPACITY as u32 + 1,
        );
        let err = decode_response(&mut Cursor::new(frame)).unwrap_err();
        assert!(matches!(
            err,
            CodecError::DocumentTooLong {
                len: 16385,
                capacity: 16384
            }
        ));
    }

    #[test]
    fn short_stream_is_a_decode_error() {
        let frame = encode_response(0, b"hello").unwrap();
        let err = decode_response(&mut Cursor::new(frame[..100].to_vec())).unwrap_err();
        assert!(matches!(err, CodecError::Read(_)));

        let err = decode_response(&mut Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, CodecError::Read(_)));
    }

    #[test]
    fn unexpected_body_length_is_rejected() {
        let mut frame = encode_response(0, b"hello").unwrap();
        put_u32(&mut frame, LEN_OFFSET, 12);
        let err = decode_response(&mut Cursor::new(frame)).unwrap_err();
        assert!(matches!(err, CodecError::BodyLength { declared: 12, .. }));
    }

    #[test]
    fn exchange_writes_one_frame_and_reads_one() {
        let mut device = FakeDevice::new(encode_response(0, b"doc").unwrap());
        let doc = exchange(&mut device, b"abc").unwrap();
        assert_eq!(doc, b"doc");
        assert_eq!(device.written, encode_request(b"abc").unwrap());
    }

    #[test]
    fn exchange_does_not_write_when_nonce_is_too_long() {
        let mut device = FakeDevice::new(encode_response(0, b"doc").unwrap());
        assert!(exchange(&mut device, &[0u8; 100]).is_err());
        assert!(device.written.is_empty());
    }
}
