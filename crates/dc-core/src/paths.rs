//! Layout of the agent's durable data directory

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Active pairing code file
pub const ACTIVE_PAIR_FILE: &str = "deskconn_active_pair.json";
/// Paired device records
pub const PAIRED_DEVICES_FILE: &str = "deskconn_paired_devices.json";
/// Agent private key (raw 64 bytes: seed followed by public key)
pub const PRIVATE_KEY_FILE: &str = "id_ed25519";
/// Agent public key in authorized-keys format
pub const PUBLIC_KEY_FILE: &str = "id_ed25519.pub";
/// Device keys allowed to connect
pub const AUTHORIZED_KEYS_FILE: &str = "authorized_keys";

/// The agent data directory (`~/.deskconn` by default)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn active_pair(&self) -> PathBuf {
        self.root.join(ACTIVE_PAIR_FILE)
    }

    pub fn paired_devices(&self) -> PathBuf {
        self.root.join(PAIRED_DEVICES_FILE)
    }

    pub fn private_key(&self) -> PathBuf {
        self.root.join(PRIVATE_KEY_FILE)
    }

    pub fn public_key(&self) -> PathBuf {
        self.root.join(PUBLIC_KEY_FILE)
    }

    pub fn authorized_keys(&self) -> PathBuf {
        self.root.join(AUTHORIZED_KEYS_FILE)
    }

    /// Create the directory if needed. A directory created here is
    /// owner-only on Unix; an existing one keeps its permissions.
    pub fn ensure(&self) -> io::Result<()> {
        if self.root.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(&self.root)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.root, fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }
}

/// Restrict a file to owner read/write on Unix
pub fn restrict_to_owner(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;

    Ok(())
}
