//! Agent daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Configuration for the deskconn agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Address the RPC listener binds to
    pub bind_address: String,

    /// Directory holding keys and pairing state
    pub data_dir: PathBuf,

    /// Shell to spawn for sessions (falls back to `$SHELL`, then `/bin/sh`)
    pub shell: Option<String>,

    /// Extra environment variables for shell sessions
    pub shell_env: Vec<(String, String)>,

    /// Pairing timing
    pub pairing: PairingConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            data_dir: default_data_dir(),
            shell: None,
            shell_env: vec![("TERM".to_string(), "xterm-256color".to_string())],
            pairing: PairingConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Shell program for new sessions
    pub fn resolve_shell(&self) -> String {
        self.shell
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
}

/// Pairing timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// How long an issued pairing code stays valid
    #[serde(with = "duration_secs")]
    pub code_ttl: Duration,

    /// Delay before a completed pairing session is discarded
    #[serde(with = "duration_secs")]
    pub session_cleanup_delay: Duration,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            code_ttl: Duration::from_secs(180),
            session_cleanup_delay: Duration::from_secs(30),
        }
    }
}

/// `~/.deskconn`, or `./.deskconn` when no home directory is known
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".deskconn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.pairing.code_ttl, Duration::from_secs(180));
        assert_eq!(config.pairing.session_cleanup_delay, Duration::from_secs(30));
        assert!(config.data_dir.ends_with(".deskconn"));
        assert!(config
            .shell_env
            .iter()
            .any(|(k, v)| k == "TERM" && v == "xterm-256color"));
    }

    #[test]
    fn test_partial_toml() {
        let config: AgentConfig = toml::from_str(
            r#"
            bind_address = "127.0.0.1:9000"

            [pairing]
            code_ttl = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.pairing.code_ttl, Duration::from_secs(5));
        assert_eq!(config.pairing.session_cleanup_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_configured_shell_wins() {
        let config = AgentConfig {
            shell: Some("/usr/bin/zsh".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_shell(), "/usr/bin/zsh");
    }
}
