//! Pairing code issuance, claims and key exchange

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

use dc_core::config::PairingConfig;
use dc_core::error::PairingError;

use super::store::{ActivePair, PairedDevice, PairingStore};
use crate::identity::{IdentityStore, PUBLIC_KEY_SIZE};

/// Number of digits in a pairing code
pub const CODE_LENGTH: usize = 6;

/// Progress of a claimed pairing session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Code claimed, waiting for key exchange
    Claimed,
    /// Key exchange writing files
    Exchanging,
    /// Keys exchanged; removed after the cleanup delay
    Completed,
}

/// Read-only view of a pairing session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub device_id: String,
    pub status: SessionStatus,
    pub device_key: Option<String>,
    pub agent_key: Option<String>,
}

struct PairingSession {
    device_id: String,
    status: SessionStatus,
    device_key: Option<String>,
    agent_key: Option<String>,
    cleanup: Option<AbortHandle>,
}

/// What the manager knows about the active code
enum CodeSlot {
    /// Nothing issued by this process yet; the persisted file is
    /// authoritative
    Unknown,
    Active(ActivePair),
    /// Claimed or expired
    Cleared,
}

struct PairingState {
    code: CodeSlot,
    sessions: HashMap<String, PairingSession>,
}

/// Issues pairing codes and drives claimed sessions through key exchange.
///
/// The code slot and the session table share one lock, which is never held
/// across file I/O.
pub struct PairingManager {
    state: Arc<Mutex<PairingState>>,
    store: PairingStore,
    identity: IdentityStore,
    config: PairingConfig,
}

impl PairingManager {
    pub fn new(store: PairingStore, identity: IdentityStore, config: PairingConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(PairingState {
                code: CodeSlot::Unknown,
                sessions: HashMap::new(),
            })),
            store,
            identity,
            config,
        }
    }

    /// Issue a new code, superseding any previous one
    pub async fn start_pairing(&self) -> String {
        let code = generate_code();
        let pair = ActivePair {
            code: code.clone(),
            expiry: expiry_after(self.config.code_ttl),
            session_id: None,
        };

        self.state.lock().await.code = CodeSlot::Active(pair.clone());

        // The in-memory code stays usable if persisting fails
        if let Err(e) = self.store.save_active(&pair).await {
            tracing::warn!("Failed to persist pairing code: {}", e);
        }

        tracing::info!(code = %code, "Started new pairing session");
        code
    }

    /// Claim the active code for a device. Returns the new pairing session
    /// identifier.
    pub async fn validate_claim(
        &self,
        device_id: &str,
        code: &str,
        label: &str,
    ) -> Result<String, PairingError> {
        if !is_valid_device_id(device_id) {
            return Err(PairingError::InvalidDeviceId);
        }

        let mut state = self.state.lock().await;

        if matches!(state.code, CodeSlot::Unknown) {
            drop(state);
            let persisted = self.store.load_active().await?;
            state = self.state.lock().await;
            if matches!(state.code, CodeSlot::Unknown) {
                state.code = match persisted {
                    Some(pair) => CodeSlot::Active(pair),
                    None => CodeSlot::Cleared,
                };
            }
        }

        let active = match &state.code {
            CodeSlot::Active(pair) => pair.clone(),
            CodeSlot::Unknown | CodeSlot::Cleared => return Err(PairingError::PairingNotFound),
        };

        if active.code != code {
            return Err(PairingError::InvalidCode);
        }

        let now = Utc::now();
        if active.is_expired(now) {
            state.code = CodeSlot::Cleared;
            drop(state);
            tracing::info!(code = %code, "Pairing code expired");
            self.discard_persisted(code).await;
            return Err(PairingError::CodeExpired);
        }

        // Single use
        state.code = CodeSlot::Cleared;

        let session_id = unique_session_id(&state.sessions, device_id, now);
        state.sessions.insert(
            session_id.clone(),
            PairingSession {
                device_id: device_id.to_string(),
                status: SessionStatus::Claimed,
                device_key: None,
                agent_key: None,
                cleanup: None,
            },
        );
        drop(state);

        self.discard_persisted(code).await;

        let record = PairedDevice {
            id: device_id.to_string(),
            label: label.to_string(),
            last_seen: now,
            public_key: None,
            paired_at: now,
        };
        if let Err(e) = self.store.append_device(record).await {
            tracing::warn!(device = %device_id, "Failed to record paired device: {}", e);
        }

        tracing::info!(device = %device_id, session = %session_id, "Pairing validated successfully");
        Ok(session_id)
    }

    /// Authorize the device key for a claimed session and return the agent's
    /// own public key, base64 encoded.
    pub async fn exchange_keys(
        &self,
        session_id: &str,
        device_id: &str,
        device_key_b64: &str,
    ) -> Result<String, PairingError> {
        let device_key = {
            let mut state = self.state.lock().await;
            let session = state
                .sessions
                .get_mut(session_id)
                .ok_or(PairingError::SessionNotFound)?;

            match session.status {
                SessionStatus::Completed => return Err(PairingError::AlreadyCompleted),
                SessionStatus::Exchanging => return Err(PairingError::ExchangeInProgress),
                SessionStatus::Claimed => {}
            }
            if session.device_id != device_id {
                return Err(PairingError::DeviceMismatch);
            }

            let key = decode_device_key(device_key_b64)?;
            session.status = SessionStatus::Exchanging;
            key
        };

        let result = self.persist_exchange(device_key, device_id.to_string()).await;

        let mut state = self.state.lock().await;
        let agent_key = match result {
            Ok(agent_key) => agent_key,
            Err(e) => {
                if let Some(session) = state.sessions.get_mut(session_id) {
                    session.status = SessionStatus::Claimed;
                }
                tracing::warn!(device = %device_id, session = %session_id, "Key exchange failed: {}", e);
                return Err(e);
            }
        };

        if let Some(session) = state.sessions.get_mut(session_id) {
            session.status = SessionStatus::Completed;
            session.device_key = Some(device_key_b64.to_string());
            session.agent_key = Some(agent_key.clone());
            session.cleanup = Some(self.schedule_cleanup(session_id.to_string()));
        }
        drop(state);

        tracing::info!(device = %device_id, session = %session_id, "Key exchange completed successfully");
        Ok(agent_key)
    }

    /// Drop a pairing session early, cancelling its cleanup timer
    pub async fn remove_session(&self, session_id: &str) -> bool {
        let removed = self.state.lock().await.sessions.remove(session_id);
        match removed {
            Some(session) => {
                if let Some(cleanup) = session.cleanup {
                    cleanup.abort();
                }
                true
            }
            None => false,
        }
    }

    pub async fn session(&self, session_id: &str) -> Option<SessionSnapshot> {
        let state = self.state.lock().await;
        state.sessions.get(session_id).map(|s| SessionSnapshot {
            session_id: session_id.to_string(),
            device_id: s.device_id.clone(),
            status: s.status,
            device_key: s.device_key.clone(),
            agent_key: s.agent_key.clone(),
        })
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    pub async fn paired_devices(&self) -> Result<Vec<PairedDevice>, PairingError> {
        self.store.paired_devices().await
    }

    async fn persist_exchange(
        &self,
        device_key: Vec<u8>,
        device_id: String,
    ) -> Result<String, PairingError> {
        let identity = self.identity.clone();
        tokio::task::spawn_blocking(move || -> Result<String, PairingError> {
            let agent_key = identity.ensure_identity()?;
            identity
                .authorize(&device_key, &device_id)
                .map_err(|e| PairingError::SaveKey(e.to_string()))?;
            Ok(agent_key)
        })
        .await
        .map_err(|e| PairingError::SaveKey(e.to_string()))?
    }

    async fn discard_persisted(&self, code: &str) {
        if let Err(e) = self.store.remove_active(code).await {
            tracing::warn!("Failed to remove persisted pairing code: {}", e);
        }
    }

    fn schedule_cleanup(&self, session_id: String) -> AbortHandle {
        let state: Weak<Mutex<PairingState>> = Arc::downgrade(&self.state);
        let delay = self.config.session_cleanup_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(state) = state.upgrade() else {
                return;
            };
            if state.lock().await.sessions.remove(&session_id).is_some() {
                tracing::info!(session = %session_id, "Cleaned up pairing session");
            }
        })
        .abort_handle()
    }
}

impl Drop for PairingManager {
    fn drop(&mut self) {
        if let Ok(state) = self.state.try_lock() {
            for session in state.sessions.values() {
                if let Some(cleanup) = &session.cleanup {
                    cleanup.abort();
                }
            }
        }
    }
}

fn generate_code() -> String {
    let mut rng = OsRng;
    (0..CODE_LENGTH)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

fn expiry_after(ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `<device>-<unix seconds>`, suffixed when two claims land in the same
/// second
fn unique_session_id(
    sessions: &HashMap<String, PairingSession>,
    device_id: &str,
    now: DateTime<Utc>,
) -> String {
    let base = format!("{}-{}", device_id, now.timestamp());
    if !sessions.contains_key(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{}-{}", base, n))
        .find(|id| !sessions.contains_key(id))
        .unwrap_or(base)
}

fn decode_device_key(encoded: &str) -> Result<Vec<u8>, PairingError> {
    let key = STANDARD
        .decode(encoded)
        .map_err(|e| PairingError::InvalidBase64(e.to_string()))?;
    if key.len() != PUBLIC_KEY_SIZE {
        return Err(PairingError::InvalidKeySize {
            expected: PUBLIC_KEY_SIZE,
            actual: key.len(),
        });
    }
    Ok(key)
}

/// Device identifiers end up as authorized-keys comments, so they must be a
/// single printable token
fn is_valid_device_id(device_id: &str) -> bool {
    !device_id.is_empty()
        && !device_id
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_core::DataDir;

    struct Fixture {
        _tmp: tempfile::TempDir,
        dir: DataDir,
        manager: PairingManager,
    }

    fn fixture_with(config: PairingConfig) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::new(tmp.path().join("deskconn"));
        let manager = PairingManager::new(
            PairingStore::new(dir.clone()),
            IdentityStore::new(dir.clone()),
            config,
        );
        Fixture {
            _tmp: tmp,
            dir,
            manager,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(PairingConfig::default())
    }

    fn device_key(byte: u8) -> String {
        STANDARD.encode([byte; PUBLIC_KEY_SIZE])
    }

    #[tokio::test]
    async fn test_code_shape() {
        let f = fixture();
        let code = f.manager.start_pairing().await;
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code.bytes().all(|b| b.is_ascii_digit()));
        assert!(f.dir.active_pair().exists());
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let f = fixture();
        let code = f.manager.start_pairing().await;

        let session_id = f.manager.validate_claim("dev-1", &code, "Phone").await.unwrap();
        assert!(session_id.starts_with("dev-1-"));
        assert!(!f.dir.active_pair().exists());

        let second = f.manager.validate_claim("dev-1", &code, "Phone").await;
        assert!(matches!(second, Err(PairingError::PairingNotFound)));
    }

    #[tokio::test]
    async fn test_wrong_code() {
        let f = fixture();
        let code = f.manager.start_pairing().await;
        let wrong = if code == "000000" { "111111" } else { "000000" };

        let result = f.manager.validate_claim("dev-1", wrong, "Phone").await;
        assert!(matches!(result, Err(PairingError::InvalidCode)));

        // The real code is still claimable
        assert!(f.manager.validate_claim("dev-1", &code, "Phone").await.is_ok());
    }

    #[tokio::test]
    async fn test_no_code_issued() {
        let f = fixture();
        let result = f.manager.validate_claim("dev-1", "123456", "Phone").await;
        assert!(matches!(result, Err(PairingError::PairingNotFound)));
    }

    #[tokio::test]
    async fn test_expired_code_removed() {
        let f = fixture_with(PairingConfig {
            code_ttl: Duration::ZERO,
            ..Default::default()
        });
        let code = f.manager.start_pairing().await;
        assert!(f.dir.active_pair().exists());

        let result = f.manager.validate_claim("dev-1", &code, "Phone").await;
        assert!(matches!(result, Err(PairingError::CodeExpired)));
        assert!(!f.dir.active_pair().exists());

        let again = f.manager.validate_claim("dev-1", &code, "Phone").await;
        assert!(matches!(again, Err(PairingError::PairingNotFound)));
    }

    #[tokio::test]
    async fn test_persisted_code_survives_restart() {
        let f = fixture();
        let code = f.manager.start_pairing().await;

        let restarted = PairingManager::new(
            PairingStore::new(f.dir.clone()),
            IdentityStore::new(f.dir.clone()),
            PairingConfig::default(),
        );
        let session_id = restarted.validate_claim("dev-9", &code, "Tablet").await.unwrap();
        assert!(session_id.starts_with("dev-9-"));
    }

    #[tokio::test]
    async fn test_persisted_expired_code() {
        let f = fixture();
        let store = PairingStore::new(f.dir.clone());
        store
            .save_active(&ActivePair {
                code: "424242".to_string(),
                expiry: Utc::now() - chrono::Duration::seconds(5),
                session_id: None,
            })
            .await
            .unwrap();

        let result = f.manager.validate_claim("dev-1", "424242", "Phone").await;
        assert!(matches!(result, Err(PairingError::CodeExpired)));
        assert!(!f.dir.active_pair().exists());
    }

    #[tokio::test]
    async fn test_new_code_supersedes_old() {
        let f = fixture();
        let first = f.manager.start_pairing().await;
        let second = f.manager.start_pairing().await;

        if first != second {
            let result = f.manager.validate_claim("dev-1", &first, "Phone").await;
            assert!(matches!(result, Err(PairingError::InvalidCode)));
        }
        assert!(f.manager.validate_claim("dev-1", &second, "Phone").await.is_ok());
    }

    #[tokio::test]
    async fn test_claim_records_device() {
        let f = fixture();
        let code = f.manager.start_pairing().await;
        f.manager.validate_claim("dev-1", &code, "Phone").await.unwrap();
        let code = f.manager.start_pairing().await;
        f.manager.validate_claim("dev-1", &code, "Phone").await.unwrap();

        let devices = f.manager.paired_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|d| d.id == "dev-1" && d.label == "Phone"));
    }

    #[tokio::test]
    async fn test_same_second_claims_get_distinct_ids() {
        let f = fixture();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let code = f.manager.start_pairing().await;
            ids.push(f.manager.validate_claim("dev-1", &code, "Phone").await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_device_id() {
        let f = fixture();
        let code = f.manager.start_pairing().await;

        for bad in ["", "two words", "line\nbreak"] {
            let result = f.manager.validate_claim(bad, &code, "Phone").await;
            assert!(matches!(result, Err(PairingError::InvalidDeviceId)));
        }
        // Code not consumed by rejected claims
        assert!(f.manager.validate_claim("dev-1", &code, "Phone").await.is_ok());
    }

    #[tokio::test]
    async fn test_exchange_keys() {
        let f = fixture();
        let code = f.manager.start_pairing().await;
        let session_id = f.manager.validate_claim("dev-1", &code, "Phone").await.unwrap();

        let agent_key = f
            .manager
            .exchange_keys(&session_id, "dev-1", &device_key(7))
            .await
            .unwrap();
        assert_eq!(STANDARD.decode(&agent_key).unwrap().len(), PUBLIC_KEY_SIZE);

        let auth = std::fs::read_to_string(f.dir.authorized_keys()).unwrap();
        assert_eq!(auth.lines().count(), 1);
        assert!(auth.lines().all(|l| l.ends_with(" dev-1")));

        let snapshot = f.manager.session(&session_id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Completed);
        assert_eq!(snapshot.agent_key.as_deref(), Some(agent_key.as_str()));
        assert_eq!(snapshot.device_key, Some(device_key(7)));
    }

    #[tokio::test]
    async fn test_exchange_twice() {
        let f = fixture();
        let code = f.manager.start_pairing().await;
        let session_id = f.manager.validate_claim("dev-1", &code, "Phone").await.unwrap();

        f.manager
            .exchange_keys(&session_id, "dev-1", &device_key(1))
            .await
            .unwrap();
        let second = f
            .manager
            .exchange_keys(&session_id, "dev-1", &device_key(1))
            .await;
        assert!(matches!(second, Err(PairingError::AlreadyCompleted)));
    }

    #[tokio::test]
    async fn test_exchange_rejections_append_nothing() {
        let f = fixture();
        let code = f.manager.start_pairing().await;
        let session_id = f.manager.validate_claim("dev-1", &code, "Phone").await.unwrap();

        let short = STANDARD.encode([1u8; 31]);
        assert!(matches!(
            f.manager.exchange_keys(&session_id, "dev-1", &short).await,
            Err(PairingError::InvalidKeySize {
                expected: 32,
                actual: 31
            })
        ));
        assert!(matches!(
            f.manager.exchange_keys(&session_id, "dev-1", "@@@").await,
            Err(PairingError::InvalidBase64(_))
        ));
        assert!(matches!(
            f.manager.exchange_keys(&session_id, "dev-2", &device_key(1)).await,
            Err(PairingError::DeviceMismatch)
        ));
        assert!(matches!(
            f.manager.exchange_keys("nope", "dev-1", &device_key(1)).await,
            Err(PairingError::SessionNotFound)
        ));
        assert!(!f.dir.authorized_keys().exists());

        // Session is still usable after rejected attempts
        assert!(f
            .manager
            .exchange_keys(&session_id, "dev-1", &device_key(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_failed_identity_leaves_no_authorized_key() {
        let f = fixture();
        IdentityStore::new(f.dir.clone()).ensure_identity().unwrap();
        std::fs::write(f.dir.public_key(), "ssh-ed25519\n").unwrap();

        let code = f.manager.start_pairing().await;
        let session_id = f.manager.validate_claim("dev-1", &code, "Phone").await.unwrap();

        let first = f
            .manager
            .exchange_keys(&session_id, "dev-1", &device_key(5))
            .await;
        assert!(matches!(first, Err(PairingError::Identity(_))));
        let auth = std::fs::read_to_string(f.dir.authorized_keys()).unwrap();
        assert_eq!(auth.lines().count(), 0);

        // Public key is rebuilt from the private key on retry
        std::fs::remove_file(f.dir.public_key()).unwrap();
        f.manager
            .exchange_keys(&session_id, "dev-1", &device_key(5))
            .await
            .unwrap();
        let auth = std::fs::read_to_string(f.dir.authorized_keys()).unwrap();
        assert_eq!(auth.lines().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_session_cleaned_up() {
        let f = fixture();
        let code = f.manager.start_pairing().await;
        let session_id = f.manager.validate_claim("dev-1", &code, "Phone").await.unwrap();
        f.manager
            .exchange_keys(&session_id, "dev-1", &device_key(3))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(f.manager.session(&session_id).await.is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(f.manager.session(&session_id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_removal_cancels_timer() {
        let f = fixture();
        let code = f.manager.start_pairing().await;
        let session_id = f.manager.validate_claim("dev-1", &code, "Phone").await.unwrap();
        f.manager
            .exchange_keys(&session_id, "dev-1", &device_key(3))
            .await
            .unwrap();

        assert!(f.manager.remove_session(&session_id).await);
        assert!(!f.manager.remove_session(&session_id).await);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.manager.session_count().await, 0);
    }
}
