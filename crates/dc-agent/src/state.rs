//! Agent state

use dc_core::config::AgentConfig;
use dc_core::DataDir;

use crate::identity::IdentityStore;
use crate::pairing::{PairingManager, PairingStore};
use crate::shell::{ShellCommand, ShellRegistry};

/// Everything one agent instance owns. Each instance has exactly one shell
/// registry and one pairing manager.
pub struct AgentState {
    pub config: AgentConfig,
    pub identity: IdentityStore,
    pub shells: ShellRegistry,
    pub pairing: PairingManager,
}

impl AgentState {
    pub fn new(config: AgentConfig) -> Self {
        let dir = DataDir::new(config.data_dir.clone());
        let identity = IdentityStore::new(dir.clone());
        let pairing = PairingManager::new(
            PairingStore::new(dir),
            identity.clone(),
            config.pairing.clone(),
        );
        let shells = ShellRegistry::new(ShellCommand::from_config(&config));

        Self {
            config,
            identity,
            shells,
            pairing,
        }
    }
}
