use std::sync::Arc;

use parking_lot::Mutex;
use secrecy::SecretString;
use tempfile::TempDir;
use xrpl_onboard_lib::config_store::KdfConfig;
use xrpl_onboard_lib::crypto::encode_seed;
use xrpl_onboard_lib::import::OAUTH_TOKEN_KEY;
use xrpl_onboard_lib::storage::WalletVault;
use xrpl_onboard_lib::validation::PasswordStrength;
use xrpl_onboard_lib::{
    BackupFile, EncryptedBlob, Environment, FileVault, ImportOrchestrator, KeyAlgorithm,
    Provenance, ProvisionContext, ProvisionRequest, RateLimiter, SecurityConfig, StoredWallet,
    WalletBinding, WalletContext, WalletError, WalletPaths, WalletRecord, WalletResult,
};
use zeroize::Zeroizing;

const GENESIS_SEED: &str = "snoPBrXtMeMyMHUVTgbuqAfg1SUTb";
const GENESIS_ADDRESS: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";
const CORRUPTED_SEED: &str = "snoPBrXtMeMyMHUVTgbuqAfg1SUTc";

fn open_context(dir: &TempDir) -> WalletResult<WalletContext> {
    WalletContext::initialize(
        dir.path().to_path_buf(),
        &SecurityConfig::new(Environment::Test),
    )
}

fn device_context(password: &str) -> ProvisionContext {
    ProvisionContext {
        binding: WalletBinding::Device {
            credential_id: "integration-device".into(),
        },
        password: SecretString::from(password.to_string()),
        session_token: None,
    }
}

/// File vault that remembers every address it was asked to store.
struct RecordingVault {
    inner: FileVault,
    stored: Mutex<Vec<String>>,
}

impl WalletVault for RecordingVault {
    fn store_wallet(
        &self,
        record: &WalletRecord,
        password: &SecretString,
    ) -> WalletResult<StoredWallet> {
        self.stored.lock().push(record.address.clone());
        self.inner.store_wallet(record, password)
    }

    fn encrypt_data(&self, plaintext: &[u8], password: &SecretString) -> WalletResult<EncryptedBlob> {
        self.inner.encrypt_data(plaintext, password)
    }

    fn decrypt_data(
        &self,
        blob: &EncryptedBlob,
        password: &SecretString,
    ) -> WalletResult<Zeroizing<Vec<u8>>> {
        self.inner.decrypt_data(blob, password)
    }

    fn set_secure_item(&self, key: &str, value: &SecretString) -> WalletResult<()> {
        self.inner.set_secure_item(key, value)
    }

    fn get_secure_item(&self, key: &str) -> WalletResult<Option<SecretString>> {
        self.inner.get_secure_item(key)
    }

    fn remove_secure_item(&self, key: &str) -> WalletResult<()> {
        self.inner.remove_secure_item(key)
    }

    fn store_wallet_credential(&self, device_id: &str, password: &SecretString) -> WalletResult<()> {
        self.inner.store_wallet_credential(device_id, password)
    }

    fn backup_entropy(&self, address: &str, entropy: &[u8]) -> WalletResult<()> {
        self.inner.backup_entropy(address, entropy)
    }

    fn list_wallets(&self) -> WalletResult<Vec<StoredWallet>> {
        self.inner.list_wallets()
    }

    fn validate_password_strength(&self, password: &str) -> PasswordStrength {
        self.inner.validate_password_strength(password)
    }
}

#[test]
fn failed_seed_stops_the_batch_before_later_seeds() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let paths = WalletPaths::new(temp_dir.path())?;
    paths.ensure_directories()?;
    let vault = Arc::new(RecordingVault {
        inner: FileVault::new(paths, KdfConfig::insecure_fast()),
        stored: Mutex::new(Vec::new()),
    });
    let orchestrator = ImportOrchestrator::new(vault.clone(), RateLimiter::default());

    let third = encode_seed(&[9u8; 16], KeyAlgorithm::Ed25519);
    let err = orchestrator
        .provision(
            ProvisionRequest::SeedList {
                seeds: vec![
                    SecretString::from(GENESIS_SEED.to_string()),
                    SecretString::from(CORRUPTED_SEED.to_string()),
                    SecretString::from(third),
                ],
            },
            &device_context("Sturdy-Passphrase-42"),
        )
        .expect_err("second seed must fail");

    assert!(matches!(err.source, WalletError::Derivation(_)));
    assert_eq!(*vault.stored.lock(), vec![GENESIS_ADDRESS.to_string()]);
    assert_eq!(vault.list_wallets()?.len(), 1);
    Ok(())
}

#[test]
fn oauth_binding_without_token_stores_nothing() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let context = open_context(&temp_dir)?;
    let oauth = ProvisionContext {
        binding: WalletBinding::OAuth {
            provider: "google".into(),
            subject_id: "sub-1".into(),
        },
        password: SecretString::from("Sturdy-Passphrase-42".to_string()),
        session_token: None,
    };

    let err = context
        .provision(
            &context.orchestrator(),
            ProvisionRequest::SeedList {
                seeds: vec![SecretString::from(GENESIS_SEED.to_string())],
            },
            &oauth,
        )
        .expect_err("token is required");

    assert!(matches!(err.source, WalletError::PreconditionMissing(_)));
    assert!(err.committed.is_empty());
    assert!(context.vault().list_wallets()?.is_empty());
    assert!(context.vault().get_secure_item(OAUTH_TOKEN_KEY)?.is_none());
    assert!(context.profiles().profiles()?.is_empty());
    Ok(())
}

#[test]
fn lockout_holds_across_fresh_contexts() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let bad_import = || ProvisionRequest::SeedList {
        seeds: vec![SecretString::from(CORRUPTED_SEED.to_string())],
    };

    // each attempt runs in its own context, as separate CLI invocations do
    for _ in 0..5 {
        let context = open_context(&temp_dir)?;
        let err = context
            .provision(
                &context.orchestrator(),
                bad_import(),
                &device_context("Sturdy-Passphrase-42"),
            )
            .expect_err("corrupted seed");
        assert!(matches!(err.source, WalletError::Derivation(_)));
    }

    let context = open_context(&temp_dir)?;
    let err = context
        .provision(
            &context.orchestrator(),
            ProvisionRequest::SeedList {
                seeds: vec![SecretString::from(GENESIS_SEED.to_string())],
            },
            &device_context("Sturdy-Passphrase-42"),
        )
        .expect_err("locked out");
    assert!(matches!(err.source, WalletError::RateLimited(_)));
    assert!(context.vault().list_wallets()?.is_empty());
    Ok(())
}

#[test]
fn seed_list_commits_until_first_bad_seed() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let context = open_context(&temp_dir)?;
    let orchestrator = context.orchestrator();

    let third = encode_seed(&[7u8; 16], KeyAlgorithm::Ed25519);
    let request = ProvisionRequest::SeedList {
        seeds: vec![
            SecretString::from(GENESIS_SEED.to_string()),
            SecretString::from(CORRUPTED_SEED.to_string()),
            SecretString::from(third),
        ],
    };

    let err = context
        .provision(&orchestrator, request, &device_context("Sturdy-Passphrase-42"))
        .expect_err("second seed must fail");
    assert!(matches!(err.source, WalletError::Derivation(_)));
    assert!(err.source.to_string().contains("Seed #2"));
    assert_eq!(err.committed.len(), 1);
    assert_eq!(err.committed[0].address, GENESIS_ADDRESS);

    // the committed wallet stays stored and shows up as a profile
    let stored = context.vault().list_wallets()?;
    assert_eq!(stored.len(), 1);
    assert!(matches!(stored[0].summary.provenance, Provenance::Imported(_)));
    let profiles = context.profiles().profiles()?;
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].address, GENESIS_ADDRESS);
    Ok(())
}

#[test]
fn restore_is_all_or_nothing_on_password() -> WalletResult<()> {
    let source_dir = TempDir::new().expect("create temp dir");
    let source = open_context(&source_dir)?;
    let orchestrator = source.orchestrator();

    for password in ["First-Passphrase-42", "Second-Passphrase-42"] {
        source.provision(
            &orchestrator,
            ProvisionRequest::New {
                algorithm: KeyAlgorithm::Secp256k1,
            },
            &device_context(password),
        )?;
    }
    let backup_json = source.export_backup()?.to_json()?;

    let target_dir = TempDir::new().expect("create temp dir");
    let target = open_context(&target_dir)?;
    let err = target
        .provision(
            &target.orchestrator(),
            ProvisionRequest::BackupFile {
                backup: BackupFile::parse(&backup_json)?,
            },
            &device_context("First-Passphrase-42"),
        )
        .expect_err("mixed-password backup must not restore");

    assert_eq!(err.source, WalletError::IncorrectPassword);
    assert!(err.committed.is_empty());
    assert!(target.vault().list_wallets()?.is_empty());
    assert!(target.profiles().profiles()?.is_empty());
    Ok(())
}

#[test]
fn backup_round_trip_restores_same_addresses() -> WalletResult<()> {
    let source_dir = TempDir::new().expect("create temp dir");
    let source = open_context(&source_dir)?;
    let password = "Shared-Passphrase-42";

    let imported = source.provision(
        &source.orchestrator(),
        ProvisionRequest::SeedList {
            seeds: vec![SecretString::from(GENESIS_SEED.to_string())],
        },
        &device_context(password),
    )?;
    let created = source.provision(
        &source.orchestrator(),
        ProvisionRequest::New {
            algorithm: KeyAlgorithm::Ed25519,
        },
        &device_context(password),
    )?;
    let backup = BackupFile::parse(&source.export_backup()?.to_json()?)?;

    let target_dir = TempDir::new().expect("create temp dir");
    let target = open_context(&target_dir)?;
    let restored = target.provision(
        &target.orchestrator(),
        ProvisionRequest::BackupFile { backup },
        &device_context(password),
    )?;

    let mut expected = vec![
        imported.wallets[0].address.clone(),
        created.wallets[0].address.clone(),
    ];
    let mut actual: Vec<String> = restored.wallets.iter().map(|w| w.address.clone()).collect();
    expected.sort();
    actual.sort();
    assert_eq!(actual, expected);
    assert!(restored
        .wallets
        .iter()
        .all(|w| matches!(w.provenance, Provenance::Restored(_))));
    assert_eq!(target.profiles().profiles()?.len(), 2);
    Ok(())
}

#[test]
fn foreign_backup_file_is_rejected_before_decryption() {
    let err = BackupFile::parse(r#"{"type":"something-else","wallets":[{"data":"AAAA"}]}"#)
        .expect_err("marker mismatch");
    assert!(matches!(err, WalletError::ValidationError(_)));
}
