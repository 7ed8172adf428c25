use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config_store::RateLimitConfig;
use crate::errors::{WalletError, WalletResult};
use crate::storage::WalletVault;

const MAX_BACKOFF_EXPONENT: u32 = 8;
const ATTEMPTS_ITEM_KEY: &str = "rate_limit_attempts";

/// Result of a synchronous rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub error: Option<String>,
}

impl RateLimitDecision {
    /// Convert a rejection into [`WalletError::RateLimited`].
    pub fn into_result(self) -> WalletResult<()> {
        if self.allowed {
            Ok(())
        } else {
            Err(WalletError::RateLimited(
                self.error.unwrap_or_else(|| "Try again later".to_string()),
            ))
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct AttemptState {
    failures: u32,
    locked_until: Option<DateTime<Utc>>,
}

/// Durable home for failure counters so lockouts outlive the process.
pub trait AttemptStore: Send + Sync {
    fn load(&self) -> WalletResult<Option<String>>;
    fn save(&self, snapshot: &str) -> WalletResult<()>;
}

/// Keeps the counters as a sealed vault item.
pub struct VaultAttemptStore {
    vault: Arc<dyn WalletVault>,
}

impl VaultAttemptStore {
    pub fn new(vault: Arc<dyn WalletVault>) -> Self {
        Self { vault }
    }
}

impl AttemptStore for VaultAttemptStore {
    fn load(&self) -> WalletResult<Option<String>> {
        Ok(self
            .vault
            .get_secure_item(ATTEMPTS_ITEM_KEY)?
            .map(|item| item.expose_secret().to_string()))
    }

    fn save(&self, snapshot: &str) -> WalletResult<()> {
        self.vault
            .set_secure_item(ATTEMPTS_ITEM_KEY, &SecretString::from(snapshot.to_string()))
    }
}

/// Keyed limiter for sensitive operations (create, import, restore).
///
/// Checks never block and never do cryptographic work; callers run them
/// before any derivation or decryption. With a store attached, every check
/// reads the persisted counters so separate processes share one lockout.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<RwLock<HashMap<String, AttemptState>>>,
    store: Option<Arc<dyn AttemptStore>>,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_cap", &self.backoff_cap)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_cap: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(HashMap::new())),
            max_attempts: max_attempts.max(1),
            backoff_base,
            backoff_cap,
            store: None,
        }
    }

    /// Attach a durable store and load whatever it already holds.
    pub fn with_store(mut self, store: Arc<dyn AttemptStore>) -> WalletResult<Self> {
        self.store = Some(store);
        self.refresh()?;
        Ok(self)
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_secs(config.lockout_base_secs as u64),
            Duration::from_secs(config.lockout_cap_secs as u64),
        )
    }

    pub fn check(&self, key: &str) -> RateLimitDecision {
        if let Err(err) = self.refresh() {
            log::warn!("Could not read persisted rate-limit state: {}", err);
        }
        let now = Utc::now();
        let state = self.state.read();
        match state.get(key).and_then(|entry| entry.locked_until) {
            Some(until) if now < until => {
                let remaining = (until - now).num_seconds();
                RateLimitDecision {
                    allowed: false,
                    error: Some(format!(
                        "Too many failed attempts. Try again in {} seconds",
                        remaining.max(1)
                    )),
                }
            }
            _ => RateLimitDecision {
                allowed: true,
                error: None,
            },
        }
    }

    /// Record a failed attempt; locks the key once the threshold is reached.
    pub fn record_failure(&self, key: &str) {
        if let Err(err) = self.refresh() {
            log::warn!("Could not read persisted rate-limit state: {}", err);
        }
        let mut state = self.state.write();
        let entry = state.entry(key.to_string()).or_default();
        entry.failures = entry.failures.saturating_add(1);

        if entry.failures >= self.max_attempts {
            let exponent = (entry.failures - self.max_attempts).min(MAX_BACKOFF_EXPONENT);
            let delay = self
                .backoff_base
                .checked_mul(1_u32 << exponent)
                .unwrap_or(self.backoff_cap)
                .min(self.backoff_cap);
            let lockout = chrono::Duration::from_std(delay)
                .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
            entry.locked_until = Some(Utc::now() + lockout);
            log::warn!(
                "Rate limit engaged for {} after {} failures ({}s lockout)",
                key,
                entry.failures,
                delay.as_secs()
            );
        }
        self.persist(&state);
    }

    /// Forget failures for a key after a successful operation.
    pub fn reset(&self, key: &str) {
        let mut state = self.state.write();
        if state.remove(key).is_some() {
            self.persist(&state);
        }
    }

    pub fn failures(&self, key: &str) -> u32 {
        self.state
            .read()
            .get(key)
            .map(|entry| entry.failures)
            .unwrap_or(0)
    }

    fn refresh(&self) -> WalletResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let loaded: HashMap<String, AttemptState> = match store.load()? {
            Some(snapshot) => serde_json::from_str(&snapshot)?,
            None => HashMap::new(),
        };
        *self.state.write() = loaded;
        Ok(())
    }

    fn persist(&self, state: &HashMap<String, AttemptState>) {
        let Some(store) = &self.store else {
            return;
        };
        let result = serde_json::to_string(state)
            .map_err(WalletError::from)
            .and_then(|snapshot| store.save(&snapshot));
        if let Err(err) = result {
            log::warn!("Could not persist rate-limit state: {}", err);
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_until_threshold() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60), Duration::from_secs(600));
        assert!(limiter.check("import:dev").allowed);
        limiter.record_failure("import:dev");
        limiter.record_failure("import:dev");
        assert!(limiter.check("import:dev").allowed);
        limiter.record_failure("import:dev");

        let decision = limiter.check("import:dev");
        assert!(!decision.allowed);
        assert!(decision.error.unwrap().contains("Try again"));
        assert!(matches!(
            limiter.check("import:dev").into_result(),
            Err(WalletError::RateLimited(_))
        ));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60), Duration::from_secs(600));
        limiter.record_failure("restore:a");
        assert!(!limiter.check("restore:a").allowed);
        assert!(limiter.check("restore:b").allowed);
    }

    #[test]
    fn lockout_expires() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10), Duration::from_millis(40));
        limiter.record_failure("create");
        assert!(!limiter.check("create").allowed);
        std::thread::sleep(Duration::from_millis(25));
        assert!(limiter.check("create").allowed);
    }

    #[derive(Default)]
    struct MemoryStore {
        snapshot: parking_lot::Mutex<Option<String>>,
    }

    impl AttemptStore for MemoryStore {
        fn load(&self) -> WalletResult<Option<String>> {
            Ok(self.snapshot.lock().clone())
        }

        fn save(&self, snapshot: &str) -> WalletResult<()> {
            *self.snapshot.lock() = Some(snapshot.to_string());
            Ok(())
        }
    }

    #[test]
    fn lockout_survives_a_new_limiter_on_the_same_store() {
        let store = Arc::new(MemoryStore::default());
        let first = RateLimiter::new(2, Duration::from_secs(60), Duration::from_secs(600))
            .with_store(store.clone())
            .unwrap();
        first.record_failure("import:dev");
        first.record_failure("import:dev");
        assert!(!first.check("import:dev").allowed);
        drop(first);

        let second = RateLimiter::new(2, Duration::from_secs(60), Duration::from_secs(600))
            .with_store(store.clone())
            .unwrap();
        assert_eq!(second.failures("import:dev"), 2);
        assert!(!second.check("import:dev").allowed);

        second.reset("import:dev");
        let third = RateLimiter::new(2, Duration::from_secs(60), Duration::from_secs(600))
            .with_store(store)
            .unwrap();
        assert!(third.check("import:dev").allowed);
    }

    #[test]
    fn corrupt_snapshot_fails_attach() {
        let store = Arc::new(MemoryStore::default());
        store.save("not json").unwrap();
        let err = RateLimiter::default().with_store(store).unwrap_err();
        assert!(matches!(err, WalletError::ValidationError(_)));
    }

    #[test]
    fn reset_clears_failures() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60), Duration::from_secs(600));
        limiter.record_failure("create");
        assert_eq!(limiter.failures("create"), 1);
        limiter.reset("create");
        assert_eq!(limiter.failures("create"), 0);
        assert!(limiter.check("create").allowed);
    }
}
