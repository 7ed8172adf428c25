use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::storage::paths::write_atomic;
use crate::storage::WalletPaths;

const CONFIG_VERSION: u16 = 1;

/// Default ordering for the bridge currency picker.
pub const DEFAULT_PRIORITY_CURRENCIES: &[&str] = &[
    "btc", "eth", "usdt", "usdc", "sol", "ltc", "bnb", "doge", "trx", "ada",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Extra attempts after the first; zero means never retry.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 1_000,
            max_delay_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeConfig {
    pub base_url: String,
    pub request_timeout_secs: u32,
    pub poll_interval_secs: u32,
    pub quote_debounce_ms: u32,
    pub priority_currencies: Vec<String>,
    pub retry: RetryConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://bridge.xrpl-onboard.app/api/exchange".to_string(),
            request_timeout_secs: 30,
            poll_interval_secs: 15,
            quote_debounce_ms: 500,
            priority_currencies: DEFAULT_PRIORITY_CURRENCIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Failures tolerated before a key is locked out.
    pub max_attempts: u32,
    pub lockout_base_secs: u32,
    pub lockout_cap_secs: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_base_secs: 30,
            lockout_cap_secs: 15 * 60,
        }
    }
}

/// Argon2id cost parameters for password-derived encryption keys.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfConfig {
    pub m_cost_kib: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            m_cost_kib: 64 * 1024, // 64 MiB
            t_cost: 3,
            p_cost: 1,
        }
    }
}

/// Ceilings for KDF parameters read back from an encrypted blob. A blob may
/// carry stronger settings than the local config, never more than these.
pub const KDF_MAX_M_COST_KIB: u32 = 256 * 1024;
pub const KDF_MAX_T_COST: u32 = 10;
pub const KDF_MAX_P_COST: u32 = 8;

impl KdfConfig {
    /// Reject blob-supplied parameters above the accepted ceilings before any
    /// key derivation runs. The local config raises a ceiling, never lowers it.
    pub fn check_untrusted(&self, m_cost_kib: u32, t_cost: u32, p_cost: u32) -> WalletResult<()> {
        let within = m_cost_kib <= self.m_cost_kib.max(KDF_MAX_M_COST_KIB)
            && t_cost <= self.t_cost.max(KDF_MAX_T_COST)
            && p_cost <= self.p_cost.max(KDF_MAX_P_COST);
        if within {
            Ok(())
        } else {
            Err(WalletError::ValidationError(format!(
                "Encrypted blob KDF cost is too high (m={}KiB, t={}, p={})",
                m_cost_kib, t_cost, p_cost
            )))
        }
    }

    /// Cheap parameters for tests; never use for real wallets.
    pub fn insecure_fast() -> Self {
        Self {
            m_cost_kib: 1024,
            t_cost: 1,
            p_cost: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletConfig {
    pub bridge: BridgeConfig,
    pub rate_limit: RateLimitConfig,
    pub kdf: KdfConfig,
    pub snapshots_kept: usize,
    pub environment: String,
    pub last_updated: DateTime<Utc>,
    pub version: u16,
}

impl WalletConfig {
    pub fn new(environment: impl Into<String>) -> Self {
        let environment = environment.into();
        let kdf = if environment == "test" {
            KdfConfig::insecure_fast()
        } else {
            KdfConfig::default()
        };
        Self {
            bridge: BridgeConfig::default(),
            rate_limit: RateLimitConfig::default(),
            kdf,
            snapshots_kept: 10,
            environment,
            last_updated: Utc::now(),
            version: CONFIG_VERSION,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u16,
    checksum: [u8; 32],
    payload: WalletConfig,
    modified_at_unix: i64,
}

/// Handles persistence of configuration with integrity checks.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_paths(paths: &WalletPaths) -> Self {
        Self {
            path: paths.config_file().to_path_buf(),
        }
    }

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load_or_default(&self, environment: impl Into<String>) -> WalletResult<WalletConfig> {
        if !self.path.exists() {
            let config = WalletConfig::new(environment);
            self.save(&config)?;
            return Ok(config);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != CONFIG_VERSION {
            return Err(WalletError::ValidationError(format!(
                "Unsupported config version {}",
                envelope.version
            )));
        }

        if checksum(&envelope.payload)? != envelope.checksum {
            return Err(WalletError::ValidationError(
                "Config integrity verification failed".to_string(),
            ));
        }

        Ok(envelope.payload)
    }

    pub fn save(&self, config: &WalletConfig) -> WalletResult<()> {
        let mut payload = config.clone();
        payload.touch();

        let envelope = ConfigEnvelope {
            version: CONFIG_VERSION,
            checksum: checksum(&payload)?,
            modified_at_unix: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_err(|e| WalletError::StorageError(e.to_string()))?
                .as_secs() as i64,
            payload,
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        write_atomic(&self.path, &serialized)
    }

    pub fn update<F>(
        &self,
        environment: impl Into<String>,
        updater: F,
    ) -> WalletResult<WalletConfig>
    where
        F: FnOnce(&mut WalletConfig) -> WalletResult<()>,
    {
        let mut config = self.load_or_default(environment)?;
        updater(&mut config)?;
        config.touch();
        self.save(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(config: &WalletConfig) -> WalletResult<[u8; 32]> {
    let mut hasher = Blake3::new();
    let encoded = serde_json::to_vec(config)?;
    hasher.update(&encoded);
    let mut output = [0u8; 32];
    output.copy_from_slice(hasher.finalize().as_bytes());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_and_load_config_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path().join("onboard.config"));

        let mut config = WalletConfig::new("development");
        config.bridge.base_url = "http://localhost:8080".into();
        store.save(&config).unwrap();

        let loaded = store.load_or_default("development").unwrap();
        assert_eq!(loaded.bridge.base_url, "http://localhost:8080");
        assert_eq!(loaded.bridge.poll_interval_secs, 15);
        assert_eq!(loaded.bridge.quote_debounce_ms, 500);
    }

    #[test]
    fn missing_config_is_created_with_defaults() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path().join("onboard.config"));
        let config = store.load_or_default("test").unwrap();
        assert!(store.path().exists());
        assert_eq!(config.kdf, KdfConfig::insecure_fast());
        assert_eq!(config.bridge.retry.max_retries, 0);
    }

    #[test]
    fn tampered_config_detected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("onboard.config");
        let store = ConfigStore::new(&path);
        store.save(&WalletConfig::new("test")).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let tampered = text.replace("\"poll_interval_secs\": 15", "\"poll_interval_secs\": 1");
        assert_ne!(text, tampered);
        fs::write(&path, tampered).unwrap();

        let result = store.load_or_default("test");
        assert!(matches!(result, Err(WalletError::ValidationError(_))));
    }

    #[test]
    fn update_persists_changes() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path().join("onboard.config"));
        store
            .update("test", |config| {
                config.rate_limit.max_attempts = 2;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.load_or_default("test").unwrap().rate_limit.max_attempts, 2);
    }
}
