//! Public-key wire envelope
//!
//! The envelope is the SSH public-key blob layout:
//! - type length: 4 bytes (u32, big-endian)
//! - type name: `type length` bytes (e.g. `ssh-ed25519`)
//! - key length: 4 bytes (u32, big-endian)
//! - key bytes: `key length` bytes
//!
//! Authorized-keys lines carry the base64 of this blob after the type name.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Key type name for Ed25519 keys
pub const ED25519_KEY_TYPE: &str = "ssh-ed25519";

/// Errors decoding a key envelope
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyBlobError {
    /// Fewer bytes than a length field promised
    #[error("invalid SSH key length: need {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Bytes left over after the key field
    #[error("invalid SSH key: {0} trailing bytes")]
    TrailingBytes(usize),

    /// Type name was not UTF-8
    #[error("invalid SSH key type name")]
    InvalidKeyType,

    /// Base64 layer could not be decoded
    #[error("invalid base64: {0}")]
    Base64(String),

    /// Line did not have `<type> <base64> [comment]` shape
    #[error("invalid public key format")]
    MalformedLine,
}

/// A decoded key envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlob {
    /// Key type name
    pub key_type: String,
    /// Raw key bytes
    pub key: Vec<u8>,
}

impl KeyBlob {
    /// Envelope for a raw Ed25519 public key
    pub fn ed25519(key: &[u8]) -> Self {
        Self {
            key_type: ED25519_KEY_TYPE.to_string(),
            key: key.to_vec(),
        }
    }

    /// Encode into the binary envelope
    pub fn encode(&self) -> Vec<u8> {
        let mut dst = BytesMut::with_capacity(8 + self.key_type.len() + self.key.len());
        dst.put_u32(self.key_type.len() as u32);
        dst.put_slice(self.key_type.as_bytes());
        dst.put_u32(self.key.len() as u32);
        dst.put_slice(&self.key);
        dst.to_vec()
    }

    /// Decode a binary envelope. Every length field is bounds-checked
    /// before slicing; malformed input yields an error, never a panic.
    pub fn decode(data: &[u8]) -> Result<Self, KeyBlobError> {
        let mut offset = 0;

        let key_type = read_field(data, &mut offset)?;
        let key_type = std::str::from_utf8(key_type)
            .map_err(|_| KeyBlobError::InvalidKeyType)?
            .to_string();
        let key = read_field(data, &mut offset)?.to_vec();

        if offset != data.len() {
            return Err(KeyBlobError::TrailingBytes(data.len() - offset));
        }

        Ok(Self { key_type, key })
    }

    /// Render as an authorized-keys line (without newline)
    pub fn to_line(&self, comment: Option<&str>) -> String {
        let encoded = STANDARD.encode(self.encode());
        match comment {
            Some(c) if !c.is_empty() => format!("{} {} {}", self.key_type, encoded, c),
            _ => format!("{} {}", self.key_type, encoded),
        }
    }

    /// Parse an authorized-keys style line into the envelope and its
    /// trailing comment, if any
    pub fn from_line(line: &str) -> Result<(Self, Option<String>), KeyBlobError> {
        let mut parts = line.trim().splitn(3, char::is_whitespace);
        let (Some(_), Some(encoded)) = (parts.next(), parts.next()) else {
            return Err(KeyBlobError::MalformedLine);
        };
        let comment = parts
            .next()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let blob = Self::from_base64(encoded)?;
        Ok((blob, comment))
    }

    /// Decode the base64 form of the envelope
    pub fn from_base64(encoded: &str) -> Result<Self, KeyBlobError> {
        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| KeyBlobError::Base64(e.to_string()))?;
        Self::decode(&raw)
    }
}

fn read_field<'a>(data: &'a [u8], offset: &mut usize) -> Result<&'a [u8], KeyBlobError> {
    let available = data.len().saturating_sub(*offset);
    let Some(len_bytes) = data.get(*offset..*offset + 4) else {
        return Err(KeyBlobError::Truncated {
            offset: *offset,
            needed: 4,
            available,
        });
    };
    let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;

    let start = *offset + 4;
    let field = start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or(KeyBlobError::Truncated {
            offset: start,
            needed: len,
            available: data.len() - start,
        })?;

    *offset = start + len;
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_layout() {
        let blob = KeyBlob::ed25519(&[7u8; 32]);
        let encoded = blob.encode();

        assert_eq!(&encoded[..4], &[0, 0, 0, 11]);
        assert_eq!(&encoded[4..15], b"ssh-ed25519");
        assert_eq!(&encoded[15..19], &[0, 0, 0, 32]);
        assert_eq!(encoded.len(), 51);
        assert_eq!(KeyBlob::decode(&encoded).unwrap(), blob);
    }

    #[test]
    fn test_truncated_inputs_do_not_panic() {
        let encoded = KeyBlob::ed25519(&[1u8; 32]).encode();

        for len in 0..encoded.len() {
            assert!(
                matches!(
                    KeyBlob::decode(&encoded[..len]),
                    Err(KeyBlobError::Truncated { .. })
                ),
                "prefix of length {} should be truncated",
                len
            );
        }
    }

    #[test]
    fn test_huge_length_field() {
        let data = [0xff, 0xff, 0xff, 0xff, b'a'];
        assert!(matches!(
            KeyBlob::decode(&data),
            Err(KeyBlobError::Truncated { needed: 0xffff_ffff, .. })
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut encoded = KeyBlob::ed25519(&[1u8; 32]).encode();
        encoded.push(0);
        assert_eq!(KeyBlob::decode(&encoded), Err(KeyBlobError::TrailingBytes(1)));
    }

    #[test]
    fn test_line_with_device_comment() {
        let blob = KeyBlob::ed25519(&[9u8; 32]);
        let line = blob.to_line(Some("dev-1"));
        assert!(line.starts_with("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5"));
        assert!(line.ends_with(" dev-1"));

        let (parsed, comment) = KeyBlob::from_line(&line).unwrap();
        assert_eq!(parsed, blob);
        assert_eq!(comment.as_deref(), Some("dev-1"));
    }

    #[test]
    fn test_line_without_comment() {
        let line = KeyBlob::ed25519(&[3u8; 32]).to_line(None);
        let (_, comment) = KeyBlob::from_line(&format!("{}\n", line)).unwrap();
        assert_eq!(comment, None);
    }

    #[test]
    fn test_malformed_line() {
        assert_eq!(KeyBlob::from_line("ssh-ed25519"), Err(KeyBlobError::MalformedLine));
        assert!(matches!(
            KeyBlob::from_line("ssh-ed25519 !!!"),
            Err(KeyBlobError::Base64(_))
        ));
    }
}
