//! Authorized device keys

use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::path::Path;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use dc_core::error::IdentityError;
use dc_protocol::KeyBlob;

/// Device keys that completed a key exchange
#[derive(Debug, Default)]
pub struct AuthorizedKeys {
    fingerprints: HashSet<String>,
    keys: Vec<AuthorizedKey>,
}

/// One authorized-keys entry
#[derive(Debug, Clone)]
pub struct AuthorizedKey {
    /// OpenSSH-style `SHA256:` fingerprint of the key envelope
    pub fingerprint: String,
    /// Raw public key bytes
    pub key: Vec<u8>,
    /// Owning device identifier (the line comment)
    pub device_id: Option<String>,
}

impl AuthorizedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load entries from an authorized-keys file.
    ///
    /// Blank lines and `#` comments are skipped; lines that fail to parse
    /// are logged and ignored.
    pub fn load_from_file(path: &Path) -> Result<Self, IdentityError> {
        let file = std::fs::File::open(path).map_err(|e| IdentityError::io(path, e))?;
        let mut store = Self::new();

        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| IdentityError::io(path, e))?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match KeyBlob::from_line(line) {
                Ok((blob, device_id)) => store.add(&blob, device_id),
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse key on line {} of {:?}: {}",
                        line_num + 1,
                        path,
                        e
                    );
                }
            }
        }

        tracing::debug!("Loaded {} authorized keys from {:?}", store.len(), path);
        Ok(store)
    }

    fn add(&mut self, blob: &KeyBlob, device_id: Option<String>) {
        let fingerprint = fingerprint(blob);
        self.fingerprints.insert(fingerprint.clone());
        self.keys.push(AuthorizedKey {
            fingerprint,
            key: blob.key.clone(),
            device_id,
        });
    }

    /// Whether a raw Ed25519 public key is authorized
    pub fn is_authorized(&self, public_key: &[u8]) -> bool {
        self.fingerprints
            .contains(&fingerprint(&KeyBlob::ed25519(public_key)))
    }

    /// Entries belonging to a device
    pub fn for_device<'a>(&'a self, device_id: &'a str) -> impl Iterator<Item = &'a AuthorizedKey> {
        self.keys
            .iter()
            .filter(move |k| k.device_id.as_deref() == Some(device_id))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn list(&self) -> &[AuthorizedKey] {
        &self.keys
    }
}

/// `SHA256:<unpadded base64>` over the encoded envelope
pub fn fingerprint(blob: &KeyBlob) -> String {
    let digest = Sha256::digest(blob.encode());
    format!("SHA256:{}", STANDARD_NO_PAD.encode(digest))
}
