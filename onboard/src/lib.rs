// lib.rs - Core library structure for wallet onboarding

pub mod app_state;
pub mod backup;
pub mod bridge;
pub mod config_store;
pub mod crypto;
pub mod errors;
pub mod import;
pub mod profiles;
pub mod rate_limit;
pub mod security;
pub mod seed;
pub mod session;
pub mod storage;
pub mod validation;
pub mod wallet;

// Re-export common types
pub use app_state::WalletContext;
pub use backup::BackupFile;
pub use bridge::{
    BridgeApi, BridgeExchangeClient, Currency, ExchangeLedger, ExchangeStatus,
    ExchangeStatusTracker, ExchangeTransaction, HttpBridge, Quote, QuoteDebouncer, StatusReport,
};
pub use config_store::{BridgeConfig, ConfigStore, WalletConfig};
pub use crypto::{is_valid_classic_address, Identity, WalletFactory};
pub use errors::{WalletError, WalletResult};
pub use import::{
    ImportOrchestrator, Progress, ProgressSink, ProvisionContext, ProvisionError,
    ProvisionOutcome, ProvisionRequest,
};
pub use profiles::{Profile, ProfileStore};
pub use rate_limit::{AttemptStore, RateLimiter, VaultAttemptStore};
pub use security::{init_security_config_from_env, Environment, SecurityConfig};
pub use seed::{detect_algorithm, validate_seed, KeyAlgorithm, SeedValidation};
pub use session::{SessionAction, SessionContext, SessionIdentity, SessionUser};
pub use storage::{EncryptedBlob, FileVault, StoredWallet, WalletPaths, WalletVault};
pub use validation::InputValidator;
pub use wallet::{Provenance, WalletBinding, WalletRecord, WalletSummary};
