use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::backup::BackupFile;
use crate::bridge::{
    BridgeApi, BridgeExchangeClient, ExchangeLedger, ExchangeStatusTracker, HttpBridge,
    QuoteDebouncer,
};
use crate::config_store::{ConfigStore, WalletConfig};
use crate::errors::WalletResult;
use crate::import::{
    ImportOrchestrator, ProvisionContext, ProvisionError, ProvisionOutcome, ProvisionRequest,
    ProvisionResult,
};
use crate::profiles::ProfileStore;
use crate::rate_limit::{RateLimiter, VaultAttemptStore};
use crate::security::SecurityConfig;
use crate::session::SessionContext;
use crate::storage::{FileVault, WalletPaths, WalletVault};
use secrecy::SecretString;

/// Everything a provisioning or funding action needs, wired from one root
/// directory and one configuration.
pub struct WalletContext {
    paths: WalletPaths,
    config_store: ConfigStore,
    config: WalletConfig,
    vault: Arc<FileVault>,
    limiter: RateLimiter,
    profiles: ProfileStore,
    ledger: Arc<ExchangeLedger>,
    session: SessionContext,
}

impl WalletContext {
    pub fn initialize(root_dir: PathBuf, security: &SecurityConfig) -> WalletResult<Self> {
        let paths = WalletPaths::new(&root_dir)?;
        paths.ensure_directories()?;

        let environment = security.environment().as_str();
        let config_store = ConfigStore::from_paths(&paths);
        let mut config = config_store.load_or_default(environment)?;
        security.apply_overrides(&mut config)?;

        let vault = Arc::new(
            FileVault::new(paths.clone(), config.kdf).with_snapshots_kept(config.snapshots_kept),
        );
        let limiter = RateLimiter::from_config(&config.rate_limit)
            .with_store(Arc::new(VaultAttemptStore::new(vault.clone())))?;
        let profiles = ProfileStore::from_paths(&paths);
        let ledger = Arc::new(ExchangeLedger::from_paths(&paths)?);
        let session = SessionContext::new(vault.clone());

        log::debug!(
            "Wallet context ready at {} ({})",
            paths.root_dir().display(),
            environment
        );

        Ok(Self {
            paths,
            config_store,
            config,
            vault,
            limiter,
            profiles,
            ledger,
            session,
        })
    }

    pub fn paths(&self) -> &WalletPaths {
        &self.paths
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn vault(&self) -> &Arc<FileVault> {
        &self.vault
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn ledger(&self) -> &Arc<ExchangeLedger> {
        &self.ledger
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn orchestrator(&self) -> ImportOrchestrator {
        ImportOrchestrator::new(self.vault.clone(), self.limiter.clone())
    }

    /// Provision wallets and merge whatever was committed into the profile
    /// list, including the committed part of a failed seed-list import.
    pub fn provision(
        &self,
        orchestrator: &ImportOrchestrator,
        request: ProvisionRequest,
        context: &ProvisionContext,
    ) -> ProvisionResult {
        match orchestrator.provision(request, context) {
            Ok(outcome) => match self.profiles.merge(&outcome.wallets) {
                Ok(_) => Ok(outcome),
                Err(source) => Err(ProvisionError {
                    committed: outcome.wallets,
                    source,
                }),
            },
            Err(err) => {
                if !err.committed.is_empty() {
                    if let Err(merge_err) = self.profiles.merge(&err.committed) {
                        log::warn!("Committed wallets not added to profiles: {}", merge_err);
                    }
                }
                Err(err)
            }
        }
    }

    /// Handle the session handoff, creating a wallet on signup.
    pub fn provision_for_session(
        &self,
        orchestrator: &ImportOrchestrator,
        password: SecretString,
    ) -> Result<Option<ProvisionOutcome>, ProvisionError> {
        let outcome = orchestrator.provision_for_session(&self.session, password)?;
        if let Some(outcome) = &outcome {
            self.profiles.merge(&outcome.wallets)?;
        }
        Ok(outcome)
    }

    pub fn export_backup(&self) -> WalletResult<BackupFile> {
        BackupFile::from_stored(&self.vault.list_wallets()?)
    }

    pub fn bridge_api(&self) -> WalletResult<Arc<dyn BridgeApi>> {
        Ok(Arc::new(HttpBridge::from_config(&self.config.bridge)?))
    }

    pub fn bridge_client(&self, api: Arc<dyn BridgeApi>) -> Arc<BridgeExchangeClient> {
        Arc::new(BridgeExchangeClient::from_config(
            api,
            self.ledger.clone(),
            &self.config.bridge,
        ))
    }

    pub fn quote_debouncer(&self, client: Arc<BridgeExchangeClient>) -> QuoteDebouncer {
        QuoteDebouncer::new(
            client,
            Duration::from_millis(self.config.bridge.quote_debounce_ms as u64),
        )
    }

    pub fn status_tracker(&self, client: Arc<BridgeExchangeClient>) -> ExchangeStatusTracker {
        ExchangeStatusTracker::new(
            client,
            Duration::from_secs(self.config.bridge.poll_interval_secs as u64),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Environment;
    use crate::seed::KeyAlgorithm;
    use crate::wallet::WalletBinding;
    use tempfile::TempDir;

    fn context() -> (TempDir, WalletContext) {
        let dir = TempDir::new().unwrap();
        let security = SecurityConfig::new(Environment::Test);
        let ctx = WalletContext::initialize(dir.path().to_path_buf(), &security).unwrap();
        (dir, ctx)
    }

    #[test]
    fn initialize_creates_layout_and_config() {
        let (dir, ctx) = context();
        assert!(dir.path().join("entropy").is_dir());
        assert!(ctx.config_store().path().exists());
        assert_eq!(ctx.config().environment, "test");
    }

    #[test]
    fn provisioned_wallets_land_in_profiles_and_backup() {
        let (_dir, ctx) = context();
        let orchestrator = ctx.orchestrator();
        let context = ProvisionContext {
            binding: WalletBinding::Device {
                credential_id: "dev".into(),
            },
            password: SecretString::from("Sturdy-Passphrase-42".to_string()),
            session_token: None,
        };
        let outcome = ctx
            .provision(
                &orchestrator,
                ProvisionRequest::New {
                    algorithm: KeyAlgorithm::Ed25519,
                },
                &context,
            )
            .unwrap();

        let profiles = ctx.profiles().profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].address, outcome.wallets[0].address);
        assert_eq!(profiles[0].alias, "Account 1");

        let backup = ctx.export_backup().unwrap();
        assert_eq!(backup.wallets.len(), 1);
        assert_eq!(backup.blobs().unwrap().len(), 1);
    }
}
