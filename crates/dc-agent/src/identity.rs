//! Agent key identity
//!
//! The agent owns one Ed25519 keypair, created on first use and reused
//! across restarts, plus the append-only list of device keys that completed
//! a key exchange.

use std::fs::{self, OpenOptions};
use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use ssh_key::private::Ed25519Keypair;

use dc_core::error::IdentityError;
use dc_core::paths::restrict_to_owner;
use dc_core::DataDir;
use dc_protocol::KeyBlob;

use crate::authorized_keys::AuthorizedKeys;

/// Size of an Ed25519 public key
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of the persisted private key (seed followed by public key)
const PRIVATE_KEY_SIZE: usize = 64;

/// File-backed key identity store
#[derive(Debug, Clone)]
pub struct IdentityStore {
    dir: DataDir,
}

impl IdentityStore {
    pub fn new(dir: DataDir) -> Self {
        Self { dir }
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.dir
    }

    /// Make sure the agent keypair exists and return its public key as
    /// base64 of the raw 32 bytes.
    ///
    /// The returned key is always read back from the persisted public key
    /// file, so a corrupted file surfaces as an error rather than a silently
    /// regenerated identity.
    pub fn ensure_identity(&self) -> Result<String, IdentityError> {
        self.dir
            .ensure()
            .map_err(|e| IdentityError::io(self.dir.root(), e))?;

        let private_path = self.dir.private_key();
        let public_path = self.dir.public_key();

        match (private_path.exists(), public_path.exists()) {
            (true, true) => {}
            (true, false) => self.restore_public_key()?,
            (false, _) => self.generate()?,
        }

        let content =
            fs::read_to_string(&public_path).map_err(|e| IdentityError::io(&public_path, e))?;
        let raw = extract_raw_key(&content)?;

        Ok(STANDARD.encode(raw))
    }

    /// Append a device key to the authorized-keys file, tagged with the
    /// device identifier. Existing entries are never rewritten.
    pub fn authorize(&self, public_key: &[u8], device_id: &str) -> Result<(), IdentityError> {
        self.dir
            .ensure()
            .map_err(|e| IdentityError::io(self.dir.root(), e))?;

        let existing = self.authorized_keys()?;
        if existing.is_authorized(public_key)
            && existing
                .for_device(device_id)
                .any(|entry| entry.key == public_key)
        {
            tracing::info!(device = %device_id, "Device key already authorized");
            return Ok(());
        }

        let path = self.dir.authorized_keys();
        let line = KeyBlob::ed25519(public_key).to_line(Some(device_id));

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| IdentityError::io(&path, e))?;
        writeln!(file, "{}", line).map_err(|e| IdentityError::io(&path, e))?;
        restrict_to_owner(&path).map_err(|e| IdentityError::io(&path, e))?;

        tracing::info!(device = %device_id, "Authorized device key");
        Ok(())
    }

    /// Parse the authorized-keys file
    pub fn authorized_keys(&self) -> Result<AuthorizedKeys, IdentityError> {
        let path = self.dir.authorized_keys();
        if !path.exists() {
            return Ok(AuthorizedKeys::new());
        }
        AuthorizedKeys::load_from_file(&path)
    }

    fn generate(&self) -> Result<(), IdentityError> {
        tracing::info!("Generating agent keypair in {:?}", self.dir.root());

        let keypair = Ed25519Keypair::random(&mut OsRng);
        let bytes = keypair.to_bytes();

        let private_path = self.dir.private_key();
        fs::write(&private_path, bytes).map_err(|e| IdentityError::io(&private_path, e))?;
        restrict_to_owner(&private_path).map_err(|e| IdentityError::io(&private_path, e))?;

        self.write_public_key(&keypair.public.0)?;

        // Never truncate an existing list of authorized devices
        let auth_path = self.dir.authorized_keys();
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&auth_path)
            .map_err(|e| IdentityError::io(&auth_path, e))?;
        restrict_to_owner(&auth_path).map_err(|e| IdentityError::io(&auth_path, e))?;

        Ok(())
    }

    fn restore_public_key(&self) -> Result<(), IdentityError> {
        let private_path = self.dir.private_key();
        let bytes = fs::read(&private_path).map_err(|e| IdentityError::io(&private_path, e))?;
        if bytes.len() != PRIVATE_KEY_SIZE {
            return Err(IdentityError::InvalidFormat);
        }

        tracing::warn!("Public key file missing, restoring it from the private key");
        self.write_public_key(&bytes[PRIVATE_KEY_SIZE - PUBLIC_KEY_SIZE..])
    }

    fn write_public_key(&self, public_key: &[u8]) -> Result<(), IdentityError> {
        let path = self.dir.public_key();
        let line = format!("{}\n", KeyBlob::ed25519(public_key).to_line(None));
        fs::write(&path, line).map_err(|e| IdentityError::io(&path, e))?;
        restrict_to_owner(&path).map_err(|e| IdentityError::io(&path, e))
    }
}

/// Raw key bytes from a `<type> <base64 envelope> [comment]` line
fn extract_raw_key(content: &str) -> Result<Vec<u8>, IdentityError> {
    let mut fields = content.split_whitespace();
    let (Some(_), Some(encoded)) = (fields.next(), fields.next()) else {
        return Err(IdentityError::InvalidFormat);
    };
    Ok(KeyBlob::from_base64(encoded)?.key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssh_key::PublicKey;

    fn store() -> (tempfile::TempDir, IdentityStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(DataDir::new(tmp.path().join("data")));
        (tmp, store)
    }

    #[test]
    fn test_identity_created_once() {
        let (_tmp, store) = store();

        let first = store.ensure_identity().unwrap();
        let second = store.ensure_identity().unwrap();
        assert_eq!(first, second);

        let raw = STANDARD.decode(&first).unwrap();
        assert_eq!(raw.len(), PUBLIC_KEY_SIZE);

        let private = fs::read(store.data_dir().private_key()).unwrap();
        assert_eq!(private.len(), PRIVATE_KEY_SIZE);
        assert_eq!(&private[32..], &raw[..]);
    }

    #[test]
    fn test_public_key_file_is_openssh() {
        let (_tmp, store) = store();
        let b64 = store.ensure_identity().unwrap();

        let line = fs::read_to_string(store.data_dir().public_key()).unwrap();
        assert!(line.ends_with('\n'));

        let parsed = PublicKey::from_openssh(line.trim()).unwrap();
        let ed = parsed.key_data().ed25519().unwrap();
        assert_eq!(STANDARD.encode(ed.0), b64);
    }

    #[test]
    fn test_authorized_keys_not_truncated() {
        let (_tmp, store) = store();
        store.data_dir().ensure().unwrap();
        fs::write(store.data_dir().authorized_keys(), "ssh-ed25519 AAAA old\n").unwrap();

        store.ensure_identity().unwrap();

        let content = fs::read_to_string(store.data_dir().authorized_keys()).unwrap();
        assert_eq!(content, "ssh-ed25519 AAAA old\n");
    }

    #[test]
    fn test_restore_missing_public_key() {
        let (_tmp, store) = store();
        let original = store.ensure_identity().unwrap();

        fs::remove_file(store.data_dir().public_key()).unwrap();
        assert_eq!(store.ensure_identity().unwrap(), original);
    }

    #[test]
    fn test_malformed_public_key_file() {
        let (_tmp, store) = store();
        store.ensure_identity().unwrap();

        fs::write(store.data_dir().public_key(), "ssh-ed25519\n").unwrap();
        assert!(matches!(
            store.ensure_identity(),
            Err(IdentityError::InvalidFormat)
        ));

        // 4-byte length claims more than is present
        fs::write(store.data_dir().public_key(), "ssh-ed25519 AAAAC3Nz\n").unwrap();
        assert!(matches!(
            store.ensure_identity(),
            Err(IdentityError::Envelope(_))
        ));
    }

    #[test]
    fn test_authorize_appends() {
        let (_tmp, store) = store();
        store.ensure_identity().unwrap();

        store.authorize(&[1u8; 32], "dev-1").unwrap();
        store.authorize(&[2u8; 32], "dev-2").unwrap();

        let content = fs::read_to_string(store.data_dir().authorized_keys()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ssh-ed25519 ") && lines[0].ends_with(" dev-1"));
        assert!(lines[1].ends_with(" dev-2"));

        let keys = store.authorized_keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.is_authorized(&[1u8; 32]));
        assert!(!keys.is_authorized(&[3u8; 32]));
    }

    #[test]
    fn test_authorize_same_device_key_once() {
        let (_tmp, store) = store();

        store.authorize(&[1u8; 32], "dev-1").unwrap();
        store.authorize(&[1u8; 32], "dev-1").unwrap();
        store.authorize(&[1u8; 32], "dev-2").unwrap();

        let keys = store.authorized_keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys.for_device("dev-1").count(), 1);
        assert_eq!(keys.for_device("dev-2").count(), 1);
    }
}
