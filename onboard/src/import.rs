//! Wallet provisioning: create, seed-list import, and backup restore.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};

use crate::backup::BackupFile;
use crate::crypto::WalletFactory;
use crate::errors::{WalletError, WalletResult};
use crate::rate_limit::RateLimiter;
use crate::seed::{detect_algorithm, validate_seed, KeyAlgorithm};
use crate::session::{SessionAction, SessionContext};
use crate::storage::vault::record_from_payload;
use crate::storage::{WalletSecretPayload, WalletVault};
use crate::wallet::{Provenance, WalletBinding, WalletRecord, WalletSummary};

pub const OAUTH_TOKEN_KEY: &str = "oauth_token";

/// One provisioning request. Exactly one mode per invocation.
pub enum ProvisionRequest {
    New { algorithm: KeyAlgorithm },
    SeedList { seeds: Vec<SecretString> },
    BackupFile { backup: BackupFile },
}

impl ProvisionRequest {
    /// Rate-limit operation name.
    pub fn operation(&self) -> &'static str {
        match self {
            ProvisionRequest::New { .. } => "create",
            ProvisionRequest::SeedList { .. } => "import",
            ProvisionRequest::BackupFile { .. } => "restore",
        }
    }
}

/// Credential context shared by every mode.
pub struct ProvisionContext {
    pub binding: WalletBinding,
    pub password: SecretString,
    /// Required for oauth bindings; persisted under [`OAUTH_TOKEN_KEY`].
    pub session_token: Option<SecretString>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub wallets: Vec<WalletSummary>,
}

impl ProvisionOutcome {
    /// The wallet a caller should log in with.
    pub fn active(&self) -> Option<&WalletSummary> {
        self.wallets.first()
    }
}

/// A failed provisioning run. `committed` holds wallets that were stored
/// before the failure and remain stored.
#[derive(Debug)]
pub struct ProvisionError {
    pub committed: Vec<WalletSummary>,
    pub source: WalletError,
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for ProvisionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl From<WalletError> for ProvisionError {
    fn from(source: WalletError) -> Self {
        Self {
            committed: Vec::new(),
            source,
        }
    }
}

impl From<ProvisionError> for WalletError {
    fn from(err: ProvisionError) -> Self {
        err.source
    }
}

pub type ProvisionResult = Result<ProvisionOutcome, ProvisionError>;

/// Progress messages for multi-step flows. Interim and terminal messages are
/// distinct variants so they can be rendered differently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Working(String),
    Done(String),
    Failed(String),
}

impl Progress {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Progress::Working(_))
    }
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn report(&self, progress: Progress) {
        self(progress)
    }
}

struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, progress: Progress) {
        match progress {
            Progress::Working(msg) => log::debug!("{}", msg),
            Progress::Done(msg) => log::info!("{}", msg),
            Progress::Failed(msg) => log::warn!("{}", msg),
        }
    }
}

pub struct ImportOrchestrator {
    vault: Arc<dyn WalletVault>,
    limiter: RateLimiter,
    factory: WalletFactory,
    progress: Arc<dyn ProgressSink>,
}

impl ImportOrchestrator {
    pub fn new(vault: Arc<dyn WalletVault>, limiter: RateLimiter) -> Self {
        Self {
            vault,
            limiter,
            factory: WalletFactory,
            progress: Arc::new(LogProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Single dispatch point for every provisioning mode.
    pub fn provision(&self, request: ProvisionRequest, context: &ProvisionContext) -> ProvisionResult {
        // binding preconditions hold before anything is derived or stored
        if let Err(err) = self.check_binding(context) {
            self.progress.report(Progress::Failed(err.user_message()));
            return Err(err.into());
        }

        let limit_key = format!("{}:{}", request.operation(), context.binding.key());
        // checked before any derivation or decryption
        if let Err(err) = self.limiter.check(&limit_key).into_result() {
            self.progress.report(Progress::Failed(err.user_message()));
            return Err(err.into());
        }

        let result = match request {
            ProvisionRequest::New { algorithm } => self.create(algorithm, context, &limit_key),
            ProvisionRequest::SeedList { seeds } => self.import_seeds(&seeds, context, &limit_key),
            ProvisionRequest::BackupFile { backup } => self.restore(&backup, context, &limit_key),
        };

        let result = match result {
            Ok(outcome) => match self.persist_binding(context) {
                Ok(()) => Ok(outcome),
                Err(source) => Err(ProvisionError {
                    committed: outcome.wallets,
                    source,
                }),
            },
            Err(err) => {
                if !err.committed.is_empty() {
                    if let Err(binding_err) = self.persist_binding(context) {
                        log::warn!("Failed to persist wallet binding: {}", binding_err);
                    }
                }
                Err(err)
            }
        };

        match &result {
            Ok(outcome) => {
                self.limiter.reset(&limit_key);
                self.progress.report(Progress::Done(format!(
                    "{} wallet(s) ready",
                    outcome.wallets.len()
                )));
            }
            Err(err) => self.progress.report(Progress::Failed(err.source.user_message())),
        }
        result
    }

    /// Auto-create a wallet for a freshly signed-up session. Other session
    /// actions provision nothing. The handoff is cleared once handled.
    pub fn provision_for_session(
        &self,
        session: &SessionContext,
        password: SecretString,
    ) -> Result<Option<ProvisionOutcome>, ProvisionError> {
        let identity = session.load()?;
        if identity.action != SessionAction::Signup {
            log::debug!(
                "Session action {} does not create a wallet",
                identity.action.as_str()
            );
            session.clear()?;
            return Ok(None);
        }

        let context = ProvisionContext {
            binding: identity.binding(),
            password,
            session_token: Some(identity.token),
        };
        let outcome = self.provision(
            ProvisionRequest::New {
                algorithm: KeyAlgorithm::default(),
            },
            &context,
        )?;
        session.clear()?;
        Ok(Some(outcome))
    }

    fn create(
        &self,
        algorithm: KeyAlgorithm,
        context: &ProvisionContext,
        limit_key: &str,
    ) -> ProvisionResult {
        self.check_password(&context.password)?;
        self.progress
            .report(Progress::Working("Generating wallet".to_string()));

        let generated = self.factory.generate_new_with(algorithm).map_err(|err| {
            self.limiter.record_failure(limit_key);
            err
        })?;
        let record = WalletRecord::from_identity(
            generated.identity,
            0,
            context.binding.clone(),
            Provenance::Created(Utc::now()),
        );
        let stored = self.vault.store_wallet(&record, &context.password)?;

        if let Err(err) = self
            .vault
            .backup_entropy(&record.address, &generated.entropy[..])
        {
            log::warn!("Entropy backup failed for {}: {}", record.address, err);
        }

        Ok(ProvisionOutcome {
            wallets: vec![stored.summary],
        })
    }

    /// Immediate-commit import: each seed is stored as soon as it derives,
    /// and the first failure stops the list without rolling back.
    fn import_seeds(
        &self,
        seeds: &[SecretString],
        context: &ProvisionContext,
        limit_key: &str,
    ) -> ProvisionResult {
        let seeds: Vec<&SecretString> = seeds
            .iter()
            .filter(|seed| !seed.expose_secret().trim().is_empty())
            .collect();
        if seeds.is_empty() {
            return Err(WalletError::ValidationError("No seeds provided".to_string()).into());
        }
        self.check_password(&context.password)?;

        let total = seeds.len();
        let mut committed = Vec::with_capacity(total);
        for (index, seed) in seeds.into_iter().enumerate() {
            self.progress.report(Progress::Working(format!(
                "Importing seed {} of {}",
                index + 1,
                total
            )));

            match self.import_one(seed, index as u32, context) {
                Ok(summary) => committed.push(summary),
                Err(err) => {
                    if matches!(err, WalletError::Derivation(_)) {
                        self.limiter.record_failure(limit_key);
                    }
                    log::warn!(
                        "Seed import stopped at #{} with {} committed",
                        index + 1,
                        committed.len()
                    );
                    return Err(ProvisionError {
                        committed,
                        source: name_seed(index, err),
                    });
                }
            }
        }

        Ok(ProvisionOutcome { wallets: committed })
    }

    fn import_one(
        &self,
        seed: &SecretString,
        account_index: u32,
        context: &ProvisionContext,
    ) -> WalletResult<WalletSummary> {
        let raw = seed.expose_secret().trim();
        let validation = validate_seed(raw);
        if !validation.valid {
            return Err(WalletError::Format(validation.error));
        }

        let identity = self.factory.derive_from_seed(raw, detect_algorithm(raw))?;
        let record = WalletRecord::from_identity(
            identity,
            account_index,
            context.binding.clone(),
            Provenance::Imported(Utc::now()),
        );
        Ok(self.vault.store_wallet(&record, &context.password)?.summary)
    }

    /// Decrypt-then-commit restore: every blob must open under the password
    /// before anything is stored.
    fn restore(
        &self,
        backup: &BackupFile,
        context: &ProvisionContext,
        limit_key: &str,
    ) -> ProvisionResult {
        let blobs = backup.blobs()?;
        let total = blobs.len();

        let mut payloads = Vec::with_capacity(total);
        for (index, blob) in blobs.iter().enumerate() {
            self.progress.report(Progress::Working(format!(
                "Decrypting wallet {} of {}",
                index + 1,
                total
            )));
            let plaintext = match self.vault.decrypt_data(blob, &context.password) {
                Ok(plaintext) => plaintext,
                Err(WalletError::IncorrectPassword) => {
                    self.limiter.record_failure(limit_key);
                    log::warn!("Restore aborted: wallet {} did not decrypt", index + 1);
                    return Err(WalletError::IncorrectPassword.into());
                }
                Err(err) => return Err(err.into()),
            };
            let payload: WalletSecretPayload =
                serde_json::from_slice(&plaintext).map_err(WalletError::from)?;
            self.verify_payload(&payload, index)?;
            payloads.push(payload);
        }

        let restored_at = Utc::now();
        let mut committed = Vec::with_capacity(total);
        for (index, payload) in payloads.iter().enumerate() {
            self.progress.report(Progress::Working(format!(
                "Restoring wallet {} of {}",
                index + 1,
                total
            )));
            let record = record_from_payload(
                payload,
                context.binding.clone(),
                Provenance::Restored(restored_at),
            );
            match self.vault.store_wallet(&record, &context.password) {
                Ok(stored) => committed.push(stored.summary),
                Err(source) => return Err(ProvisionError { committed, source }),
            }
        }

        Ok(ProvisionOutcome { wallets: committed })
    }

    fn verify_payload(&self, payload: &WalletSecretPayload, index: usize) -> WalletResult<()> {
        let identity = self
            .factory
            .derive_from_seed(&payload.seed, payload.algorithm)
            .map_err(|err| name_backup_entry(index, err))?;
        if identity.address != payload.address {
            return Err(WalletError::Derivation(format!(
                "Backup wallet #{} does not match its recorded address",
                index + 1
            )));
        }
        Ok(())
    }

    fn check_password(&self, password: &SecretString) -> WalletResult<()> {
        self.vault
            .validate_password_strength(password.expose_secret())
            .into_result()
    }

    fn check_binding(&self, context: &ProvisionContext) -> WalletResult<()> {
        match &context.binding {
            WalletBinding::Device { .. } => Ok(()),
            WalletBinding::OAuth { provider, .. } => session_token(context, provider).map(|_| ()),
        }
    }

    fn persist_binding(&self, context: &ProvisionContext) -> WalletResult<()> {
        match &context.binding {
            WalletBinding::Device { credential_id } => self
                .vault
                .store_wallet_credential(credential_id, &context.password),
            WalletBinding::OAuth { provider, .. } => self
                .vault
                .set_secure_item(OAUTH_TOKEN_KEY, session_token(context, provider)?),
        }
    }
}

fn session_token<'a>(
    context: &'a ProvisionContext,
    provider: &str,
) -> WalletResult<&'a SecretString> {
    context.session_token.as_ref().ok_or_else(|| {
        WalletError::PreconditionMissing(format!("No session token for {} binding", provider))
    })
}

fn name_seed(index: usize, err: WalletError) -> WalletError {
    match err {
        WalletError::Format(msg) => WalletError::Format(format!("Seed #{}: {}", index + 1, msg)),
        WalletError::Derivation(msg) => {
            WalletError::Derivation(format!("Seed #{}: {}", index + 1, msg))
        }
        other => other,
    }
}

fn name_backup_entry(index: usize, err: WalletError) -> WalletError {
    match err {
        WalletError::Derivation(msg) => {
            WalletError::Derivation(format!("Backup wallet #{}: {}", index + 1, msg))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::KdfConfig;
    use crate::storage::{FileVault, WalletPaths};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    const GENESIS_SEED: &str = "snoPBrXtMeMyMHUVTgbuqAfg1SUTb";
    const PASSWORD: &str = "Sturdy-Passphrase-42";

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn setup() -> (TempDir, Arc<FileVault>, ImportOrchestrator) {
        let dir = TempDir::new().unwrap();
        let paths = WalletPaths::new(dir.path()).unwrap();
        paths.ensure_directories().unwrap();
        let vault = Arc::new(FileVault::new(paths, KdfConfig::insecure_fast()));
        let limiter = RateLimiter::new(3, Duration::from_secs(60), Duration::from_secs(600));
        let orchestrator = ImportOrchestrator::new(vault.clone(), limiter);
        (dir, vault, orchestrator)
    }

    fn device_context(password: &str) -> ProvisionContext {
        ProvisionContext {
            binding: WalletBinding::Device {
                credential_id: "device-1".into(),
            },
            password: secret(password),
            session_token: None,
        }
    }

    #[test]
    fn create_stores_wallet_and_credential() {
        let (_dir, vault, orchestrator) = setup();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let orchestrator = orchestrator.with_progress(Arc::new(move |p: Progress| sink.lock().push(p)));

        let outcome = orchestrator
            .provision(
                ProvisionRequest::New {
                    algorithm: KeyAlgorithm::Secp256k1,
                },
                &device_context(PASSWORD),
            )
            .unwrap();

        assert_eq!(outcome.wallets.len(), 1);
        let active = outcome.active().unwrap();
        assert!(matches!(active.provenance, Provenance::Created(_)));
        assert_eq!(vault.list_wallets().unwrap().len(), 1);
        assert!(vault.wallet_credential("device-1").unwrap().is_some());
        assert!(vault
            .paths()
            .entropy_dir()
            .join(format!("{}.json", active.address))
            .exists());

        let events = events.lock();
        assert!(matches!(events.last(), Some(Progress::Done(_))));
        assert!(events[..events.len() - 1].iter().all(|p| !p.is_terminal()));
    }

    #[test]
    fn weak_password_is_rejected_before_generation() {
        let (_dir, vault, orchestrator) = setup();
        let err = orchestrator
            .provision(
                ProvisionRequest::New {
                    algorithm: KeyAlgorithm::Secp256k1,
                },
                &device_context("short"),
            )
            .unwrap_err();
        assert!(matches!(err.source, WalletError::ValidationError(_)));
        assert!(vault.list_wallets().unwrap().is_empty());
    }

    #[test]
    fn seed_list_commits_until_first_failure() {
        let (_dir, vault, orchestrator) = setup();
        let other = WalletFactory.generate_new().unwrap().identity.seed;
        let seeds = vec![
            secret(GENESIS_SEED),
            secret("snoPBrXtMeMyMHUVTgbuqAfg1SUTc"),
            other,
        ];

        let err = orchestrator
            .provision(ProvisionRequest::SeedList { seeds }, &device_context(PASSWORD))
            .unwrap_err();

        assert_eq!(err.committed.len(), 1);
        assert_eq!(err.committed[0].address, "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh");
        assert_eq!(err.committed[0].account_index, 0);
        match &err.source {
            WalletError::Derivation(msg) => assert!(msg.starts_with("Seed #2")),
            other => panic!("expected derivation error, got {:?}", other),
        }

        let stored = vault.list_wallets().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(orchestrator.limiter().failures("import:device-1"), 1);
        // committed wallets keep their binding credential
        assert!(vault.wallet_credential("device-1").unwrap().is_some());
    }

    #[test]
    fn seed_list_format_error_names_seed() {
        let (_dir, vault, orchestrator) = setup();
        let seeds = vec![secret("   "), secret("xnoPBrXtMeMyMHUVTgbuqAfg1SUTb")];
        let err = orchestrator
            .provision(ProvisionRequest::SeedList { seeds }, &device_context(PASSWORD))
            .unwrap_err();
        assert_eq!(
            err.source,
            WalletError::Format("Seed #1: Seed must start with \"s\"".to_string())
        );
        assert!(err.committed.is_empty());
        assert!(vault.list_wallets().unwrap().is_empty());
        assert_eq!(orchestrator.limiter().failures("import:device-1"), 0);
    }

    #[test]
    fn seed_list_assigns_indices() {
        let (_dir, _vault, orchestrator) = setup();
        let seeds = vec![
            secret(GENESIS_SEED),
            WalletFactory.generate_new().unwrap().identity.seed,
        ];
        let outcome = orchestrator
            .provision(ProvisionRequest::SeedList { seeds }, &device_context(PASSWORD))
            .unwrap();
        let indices: Vec<u32> = outcome.wallets.iter().map(|w| w.account_index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert!(outcome
            .wallets
            .iter()
            .all(|w| matches!(w.provenance, Provenance::Imported(_))));
    }

    #[test]
    fn rate_limit_blocks_before_any_work() {
        let (_dir, vault, orchestrator) = setup();
        for _ in 0..3 {
            orchestrator.limiter().record_failure("import:device-1");
        }
        let err = orchestrator
            .provision(
                ProvisionRequest::SeedList {
                    seeds: vec![secret(GENESIS_SEED)],
                },
                &device_context(PASSWORD),
            )
            .unwrap_err();
        assert!(matches!(err.source, WalletError::RateLimited(_)));
        assert!(vault.list_wallets().unwrap().is_empty());
    }

    #[test]
    fn oauth_binding_requires_and_stores_token() {
        let (_dir, vault, orchestrator) = setup();
        let mut context = ProvisionContext {
            binding: WalletBinding::OAuth {
                provider: "google".into(),
                subject_id: "sub".into(),
            },
            password: secret(PASSWORD),
            session_token: None,
        };
        let request = || ProvisionRequest::SeedList {
            seeds: vec![secret(GENESIS_SEED)],
        };

        let err = orchestrator.provision(request(), &context).unwrap_err();
        assert!(matches!(err.source, WalletError::PreconditionMissing(_)));
        // nothing derived or stored without the token
        assert!(err.committed.is_empty());
        assert!(vault.list_wallets().unwrap().is_empty());
        assert!(vault.get_secure_item(OAUTH_TOKEN_KEY).unwrap().is_none());
        assert_eq!(orchestrator.limiter().failures("import:google:sub"), 0);

        context.session_token = Some(secret("token-xyz"));
        orchestrator.provision(request(), &context).unwrap();
        assert_eq!(
            vault
                .get_secure_item(OAUTH_TOKEN_KEY)
                .unwrap()
                .unwrap()
                .expose_secret(),
            "token-xyz"
        );
    }
}
