//! Durable pairing state
//!
//! The active pairing code and the paired-device list are plain JSON files
//! in the data directory. Device appends within one process are serialized;
//! there is no cross-process locking.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use dc_core::error::PairingError;
use dc_core::DataDir;

/// A persisted pairing code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePair {
    pub code: String,
    pub expiry: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ActivePair {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}

/// A device that successfully claimed a pairing code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedDevice {
    pub id: String,
    pub label: String,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub paired_at: DateTime<Utc>,
}

/// File-backed pairing state
#[derive(Debug, Clone)]
pub struct PairingStore {
    dir: DataDir,
    /// Held across the device-list read-modify-write
    devices_lock: Arc<Mutex<()>>,
}

impl PairingStore {
    pub fn new(dir: DataDir) -> Self {
        Self {
            dir,
            devices_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Persist the active code, replacing any previous one
    pub async fn save_active(&self, pair: &ActivePair) -> Result<(), PairingError> {
        self.ensure_dir()?;
        let path = self.dir.active_pair();
        let json = serde_json::to_vec_pretty(pair).map_err(storage)?;
        write_private(&path, &json).await
    }

    /// The persisted code, if any. An unreadable file counts as absent.
    pub async fn load_active(&self) -> Result<Option<ActivePair>, PairingError> {
        let path = self.dir.active_pair();
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage(e)),
        };

        match serde_json::from_slice(&data) {
            Ok(pair) => Ok(Some(pair)),
            Err(e) => {
                tracing::warn!("Ignoring unreadable pairing file {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    /// Delete the persisted code if it is still `code`
    pub async fn remove_active(&self, code: &str) -> Result<(), PairingError> {
        match self.load_active().await? {
            Some(pair) if pair.code == code => {}
            _ => return Ok(()),
        }

        match tokio::fs::remove_file(self.dir.active_pair()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage(e)),
        }
    }

    /// Append a device record. Duplicates are kept.
    pub async fn append_device(&self, device: PairedDevice) -> Result<(), PairingError> {
        let _guard = self.devices_lock.lock().await;
        self.ensure_dir()?;
        let mut devices = self.paired_devices().await?;
        devices.push(device);

        let json = serde_json::to_vec_pretty(&devices).map_err(storage)?;
        write_private(&self.dir.paired_devices(), &json).await
    }

    pub async fn paired_devices(&self) -> Result<Vec<PairedDevice>, PairingError> {
        let path = self.dir.paired_devices();
        match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data).map_err(storage),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(storage(e)),
        }
    }

    fn ensure_dir(&self) -> Result<(), PairingError> {
        self.dir.ensure().map_err(storage)
    }
}

async fn write_private(path: &Path, data: &[u8]) -> Result<(), PairingError> {
    tokio::fs::write(path, data).await.map_err(storage)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(storage)?;
    }

    Ok(())
}

fn storage(e: impl std::fmt::Display) -> PairingError {
    PairingError::Storage(e.to_string())
}
