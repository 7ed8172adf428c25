use crate::config_store::WalletConfig;
use crate::errors::{WalletError, WalletResult};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const KEY_LOG_LEVEL: &str = "LOG_LEVEL";
pub const KEY_BRIDGE_ENDPOINT: &str = "BRIDGE_ENDPOINT";
pub const KEY_POLL_INTERVAL_SECS: &str = "POLL_INTERVAL_SECS";
pub const KEY_QUOTE_DEBOUNCE_MS: &str = "QUOTE_DEBOUNCE_MS";
pub const KEY_REQUEST_TIMEOUT_SECS: &str = "REQUEST_TIMEOUT_SECS";
pub const KEY_RATE_LIMIT_MAX_ATTEMPTS: &str = "RATE_LIMIT_MAX_ATTEMPTS";
pub const KEY_RATE_LIMIT_LOCKOUT_SECS: &str = "RATE_LIMIT_LOCKOUT_SECS";
pub const KEY_PRIORITY_CURRENCIES: &str = "PRIORITY_CURRENCIES";

const ENV_PREFIX: &str = "XRPL_ONBOARD_";

/// Environment types for different security configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" | "testing" => Environment::Test,
            _ => Environment::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

/// Environment-derived settings layered over the persisted config.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    environment: Environment,
    config_map: HashMap<String, String>,
}

impl SecurityConfig {
    pub fn new(environment: Environment) -> Self {
        let mut config = SecurityConfig {
            environment,
            config_map: HashMap::new(),
        };
        config.load_defaults();
        config
    }

    /// Load configuration from `XRPL_ONBOARD_*` environment variables.
    pub fn from_env() -> WalletResult<Self> {
        let env_str = std::env::var(format!("{}ENV", ENV_PREFIX))
            .unwrap_or_else(|_| "development".to_string());
        let mut config = Self::new(Environment::parse(&env_str));
        config.load_from_env_vars()?;
        Ok(config)
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.config_map.get(key)
    }

    pub fn get_or_default(&self, key: &str, default: &str) -> String {
        self.config_map
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_u32_with_default(&self, key: &str, default: u32) -> WalletResult<u32> {
        match self.config_map.get(key) {
            Some(value) => value.trim().parse::<u32>().map_err(|_| {
                WalletError::ValidationError(format!(
                    "Configuration key '{}' must be an unsigned integer",
                    key
                ))
            }),
            None => Ok(default),
        }
    }

    /// Retrieve a comma-separated list of strings, guaranteeing at least one entry.
    pub fn get_string_list(&self, key: &str) -> WalletResult<Vec<String>> {
        match self.config_map.get(key) {
            Some(value) => {
                let entries: Vec<String> = value
                    .split(',')
                    .map(|item| item.trim())
                    .filter(|item| !item.is_empty())
                    .map(|item| item.to_lowercase())
                    .collect();
                if entries.is_empty() {
                    return Err(WalletError::ValidationError(format!(
                        "Configuration key '{}' cannot be an empty list",
                        key
                    )));
                }
                Ok(entries)
            }
            None => Err(WalletError::ValidationError(format!(
                "Configuration key '{}' not found",
                key
            ))),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.config_map.insert(key.into(), value.into());
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn log_level(&self) -> log::LevelFilter {
        match self.get_or_default(KEY_LOG_LEVEL, "INFO").to_uppercase().as_str() {
            "TRACE" => log::LevelFilter::Trace,
            "DEBUG" => log::LevelFilter::Debug,
            "WARN" => log::LevelFilter::Warn,
            "ERROR" => log::LevelFilter::Error,
            "OFF" => log::LevelFilter::Off,
            _ => log::LevelFilter::Info,
        }
    }

    /// Overlay explicitly configured values onto a loaded config.
    pub fn apply_overrides(&self, config: &mut WalletConfig) -> WalletResult<()> {
        if let Some(endpoint) = self.get(KEY_BRIDGE_ENDPOINT) {
            if self.is_production() && !endpoint.starts_with("https://") {
                return Err(WalletError::ValidationError(
                    "Bridge endpoint must use https in production".to_string(),
                ));
            }
            config.bridge.base_url = endpoint.trim_end_matches('/').to_string();
        }

        config.bridge.poll_interval_secs = self
            .get_u32_with_default(KEY_POLL_INTERVAL_SECS, config.bridge.poll_interval_secs)?
            .max(1);
        config.bridge.quote_debounce_ms =
            self.get_u32_with_default(KEY_QUOTE_DEBOUNCE_MS, config.bridge.quote_debounce_ms)?;
        config.bridge.request_timeout_secs = self
            .get_u32_with_default(KEY_REQUEST_TIMEOUT_SECS, config.bridge.request_timeout_secs)?
            .max(1);
        config.rate_limit.max_attempts = self
            .get_u32_with_default(KEY_RATE_LIMIT_MAX_ATTEMPTS, config.rate_limit.max_attempts)?
            .max(1);
        config.rate_limit.lockout_base_secs = self.get_u32_with_default(
            KEY_RATE_LIMIT_LOCKOUT_SECS,
            config.rate_limit.lockout_base_secs,
        )?;

        if self.get(KEY_PRIORITY_CURRENCIES).is_some() {
            config.bridge.priority_currencies = self.get_string_list(KEY_PRIORITY_CURRENCIES)?;
        }

        Ok(())
    }

    fn load_defaults(&mut self) {
        let level = match self.environment {
            Environment::Production => "INFO",
            Environment::Development => "DEBUG",
            Environment::Test => "WARN",
        };
        self.config_map
            .insert(KEY_LOG_LEVEL.to_string(), level.to_string());
    }

    fn load_from_env_vars(&mut self) -> WalletResult<()> {
        let keys = [
            KEY_LOG_LEVEL,
            KEY_BRIDGE_ENDPOINT,
            KEY_POLL_INTERVAL_SECS,
            KEY_QUOTE_DEBOUNCE_MS,
            KEY_REQUEST_TIMEOUT_SECS,
            KEY_RATE_LIMIT_MAX_ATTEMPTS,
            KEY_RATE_LIMIT_LOCKOUT_SECS,
            KEY_PRIORITY_CURRENCIES,
        ];

        for key in keys {
            let env_var = format!("{}{}", ENV_PREFIX, key);
            if let Ok(value) = std::env::var(&env_var) {
                if value.trim().is_empty() {
                    log::warn!("Environment variable {} is empty", env_var);
                    continue;
                }

                if value.chars().any(|c| c.is_control()) {
                    log::warn!(
                        "Environment variable {} contains control characters, ignoring",
                        env_var
                    );
                    continue;
                }

                self.config_map.insert(key.to_string(), value);
                log::debug!("Loaded configuration {} from {}", key, env_var);
            }
        }

        Ok(())
    }
}

static SECURITY_CONFIG: OnceCell<SecurityConfig> = OnceCell::new();

/// Initialise the process-wide security configuration from the environment.
pub fn init_security_config_from_env() -> WalletResult<&'static SecurityConfig> {
    SECURITY_CONFIG.get_or_try_init(SecurityConfig::from_env)
}
