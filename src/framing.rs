//! Framed stream wire format (§6): used by TCP inputs/outputs and the
//! protobuf-stream file output. Each record is
//!
//! ```text
//! 0x1E  <header_len:1>  <header_bytes>  0x1F  <message_bytes>
//! ```
//!
//! The header itself is a small fixed-order binary record (length-prefixed
//! fields via `byteorder`) carrying `message_length` and, optionally, an
//! HMAC signer/key-version/hash-function/digest. This crate does not depend
//! on a protobuf toolchain for it: the header is four scalar fields, not
//! the recursive `Message` schema. The framing contract itself
//! (separators, verification-on-mismatch) is implemented exactly as
//! specified.

use byteorder::{BigEndian, WriteBytesExt};
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;

use crate::error::FramingError;

pub const RECORD_SEPARATOR: u8 = 0x1E;
pub const UNIT_SEPARATOR: u8 = 0x1F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacHashFunction {
    Md5,
    Sha1,
}

impl HmacHashFunction {
    fn tag(self) -> u8 {
        match self {
            HmacHashFunction::Md5 => 0,
            HmacHashFunction::Sha1 => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, FramingError> {
        match tag {
            0 => Ok(HmacHashFunction::Md5),
            1 => Ok(HmacHashFunction::Sha1),
            other => Err(FramingError::UnknownHashFunction(other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub message_length: u32,
    pub hmac_signer: Option<String>,
    pub hmac_key_version: u32,
    pub hmac_hash_function: Option<HmacHashFunction>,
    pub hmac: Vec<u8>,
}

fn compute_hmac(hash_function: HmacHashFunction, key: &[u8], message: &[u8]) -> Vec<u8> {
    match hash_function {
        HmacHashFunction::Md5 => {
            let mut mac = Hmac::<Md5>::new_from_slice(key).expect("hmac accepts any key length");
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
        HmacHashFunction::Sha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(key).expect("hmac accepts any key length");
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// Serializes the header's fields in a fixed order:
/// `message_length(u32) has_signer(u8) [signer_len(u16) signer_bytes]
/// key_version(u32) has_hash(u8) [hash_tag(u8)] hmac_len(u16) hmac_bytes`.
fn encode_header(header: &FrameHeader) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u32::<BigEndian>(header.message_length).unwrap();
    match &header.hmac_signer {
        Some(signer) => {
            buf.write_u8(1).unwrap();
            buf.write_u16::<BigEndian>(signer.len() as u16).unwrap();
            buf.extend_from_slice(signer.as_bytes());
        }
        None => buf.write_u8(0).unwrap(),
    }
    buf.write_u32::<BigEndian>(header.hmac_key_version).unwrap();
    match header.hmac_hash_function {
        Some(hf) => {
            buf.write_u8(1).unwrap();
            buf.write_u8(hf.tag()).unwrap();
        }
        None => buf.write_u8(0).unwrap(),
    }
    buf.write_u16::<BigEndian>(header.hmac.len() as u16).unwrap();
    buf.extend_from_slice(&header.hmac);
    buf
}

fn decode_header(bytes: &[u8]) -> Result<FrameHeader, FramingError> {
    let mut pos = 0usize;
    let need = |pos: usize, n: usize| -> Result<(), FramingError> {
        if pos + n > bytes.len() {
            Err(FramingError::Header("truncated header".into()))
        } else {
            Ok(())
        }
    };
    need(pos, 4)?;
    let message_length = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap());
    pos += 4;

    need(pos, 1)?;
    let has_signer = bytes[pos] != 0;
    pos += 1;
    let hmac_signer = if has_signer {
        need(pos, 2)?;
        let len = u16::from_be_bytes(bytes[pos..pos + 2].try_into().unwrap()) as usize;
        pos += 2;
        need(pos, len)?;
        let s = String::from_utf8(bytes[pos..pos + len].to_vec())
            .map_err(|e| FramingError::Header(e.to_string()))?;
        pos += len;
        Some(s)
    } else {
        None
    };

    need(pos, 4)?;
    let hmac_key_version = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap());
    pos += 4;

    need(pos, 1)?;
    let has_hash = bytes[pos] != 0;
    pos += 1;
    let hmac_hash_function = if has_hash {
        need(pos, 1)?;
        let tag = bytes[pos];
        pos += 1;
        Some(HmacHashFunction::from_tag(tag)?)
    } else {
        None
    };

    need(pos, 2)?;
    let hmac_len = u16::from_be_bytes(bytes[pos..pos + 2].try_into().unwrap()) as usize;
    pos += 2;
    need(pos, hmac_len)?;
    let hmac = bytes[pos..pos + hmac_len].to_vec();

    Ok(FrameHeader {
        message_length,
        hmac_signer,
        hmac_key_version,
        hmac_hash_function,
        hmac,
    })
}

/// Encodes one framed record. If `signer` is `Some`, the HMAC is computed
/// over `message` with `key` and embedded in the header.
pub fn encode_framed(
    message: &[u8],
    signer: Option<String>,
    key_version: u32,
    hash_function: HmacHashFunction,
    key: &[u8],
) -> Vec<u8> {
    let hmac = if signer.is_some() {
        compute_hmac(hash_function, key, message)
    } else {
        Vec::new()
    };
    let header = FrameHeader {
        message_length: message.len() as u32,
        hmac_signer: signer.clone(),
        hmac_key_version: key_version,
        hmac_hash_function: signer.map(|_| hash_function),
        hmac,
    };
    let header_bytes = encode_header(&header);
    debug_assert!(header_bytes.len() <= u8::MAX as usize, "framed header must fit in one byte of length");

    let mut out = Vec::with_capacity(1 + 1 + header_bytes.len() + 1 + message.len());
    out.push(RECORD_SEPARATOR);
    out.push(header_bytes.len() as u8);
    out.extend_from_slice(&header_bytes);
    out.push(UNIT_SEPARATOR);
    out.extend_from_slice(message);
    out
}

/// Result of parsing one framed record: the message bytes, and whether an
/// HMAC signer was configured and verified.
pub struct ParsedFrame {
    pub message: Vec<u8>,
    pub signer: Option<String>,
}

/// Parses exactly one framed record from the start of `buf`, returning the
/// parsed frame plus the number of bytes consumed. `lookup_key` resolves a
/// `(signer, key_version)` pair to the shared secret used to verify the
/// embedded HMAC. A truncated trailing record yields
/// `FramingError::Truncated`, which callers should treat as "wait for more
/// bytes", not a hard parse failure (§8 boundary behaviours).
pub fn parse_framed(
    buf: &[u8],
    lookup_key: impl Fn(&str, u32) -> Option<Vec<u8>>,
) -> Result<(ParsedFrame, usize), FramingError> {
    if buf.is_empty() {
        return Err(FramingError::Truncated { expected: 1, found: 0 });
    }
    if buf[0] != RECORD_SEPARATOR {
        return Err(FramingError::MissingRecordSeparator);
    }
    if buf.len() < 2 {
        return Err(FramingError::Truncated { expected: 2, found: buf.len() });
    }
    let header_len = buf[1] as usize;
    let header_start = 2;
    let header_end = header_start + header_len;
    if buf.len() < header_end + 1 {
        return Err(FramingError::Truncated {
            expected: header_end + 1,
            found: buf.len(),
        });
    }
    let header = decode_header(&buf[header_start..header_end])?;
    if buf[header_end] != UNIT_SEPARATOR {
        return Err(FramingError::MissingUnitSeparator);
    }
    let message_start = header_end + 1;
    let message_end = message_start + header.message_length as usize;
    if buf.len() < message_end {
        return Err(FramingError::Truncated {
            expected: message_end,
            found: buf.len(),
        });
    }
    let message = buf[message_start..message_end].to_vec();

    if let (Some(signer), Some(hash_function)) = (&header.hmac_signer, header.hmac_hash_function) {
        let key = lookup_key(signer, header.hmac_key_version)
            .ok_or(FramingError::HmacMismatch)?;
        let expected = compute_hmac(hash_function, &key, &message);
        if expected != header.hmac {
            return Err(FramingError::HmacMismatch);
        }
    }

    Ok((
        ParsedFrame {
            message,
            signer: header.hmac_signer,
        },
        message_end,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_without_signer() {
        // P6 without a configured signer.
        let encoded = encode_framed(b"hello world", None, 0, HmacHashFunction::Sha1, b"");
        let (parsed, consumed) = parse_framed(&encoded, |_, _| None).unwrap();
        assert_eq!(parsed.message, b"hello world");
        assert_eq!(consumed, encoded.len());
        assert!(parsed.signer.is_none());
    }

    #[test]
    fn round_trip_with_signer_verifies_hmac() {
        // P6: parse_framed(encode_framed(m, signer=k)) = (m, signer-ok) when
        // the same key is known to the parser.
        let key = b"secret-key".to_vec();
        let encoded = encode_framed(b"payload", Some("input1".into()), 1, HmacHashFunction::Sha1, &key);
        let key_clone = key.clone();
        let (parsed, _) = parse_framed(&encoded, move |signer, version| {
            (signer == "input1" && version == 1).then(|| key_clone.clone())
        })
        .unwrap();
        assert_eq!(parsed.message, b"payload");
        assert_eq!(parsed.signer.as_deref(), Some("input1"));
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let encoded = encode_framed(b"payload", Some("input1".into()), 1, HmacHashFunction::Md5, b"right-key");
        let result = parse_framed(&encoded, |_, _| Some(b"wrong-key".to_vec()));
        assert!(matches!(result, Err(FramingError::HmacMismatch)));
    }

    #[test]
    fn truncated_tail_is_reported_as_truncated_not_corrupt() {
        // Boundary behaviour: truncated tail -> error only for the
        // incomplete record, not a hard parse failure.
        let encoded = encode_framed(b"complete record", None, 0, HmacHashFunction::Sha1, b"");
        let truncated = &encoded[..encoded.len() - 3];
        assert!(matches!(
            parse_framed(truncated, |_, _| None),
            Err(FramingError::Truncated { .. })
        ));
    }

    #[test]
    fn missing_record_separator_is_rejected() {
        let mut encoded = encode_framed(b"x", None, 0, HmacHashFunction::Sha1, b"");
        encoded[0] = b'Z';
        assert!(matches!(
            parse_framed(&encoded, |_, _| None),
            Err(FramingError::MissingRecordSeparator)
        ));
    }
}
