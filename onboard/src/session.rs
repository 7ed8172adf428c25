//! Session handoff from the external authentication step.
//!
//! The authentication step leaves four ephemeral keys behind; provisioning
//! reads them through [`SessionContext::load`] and clears them once it is
//! done or cancelled.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::storage::{FileVault, WalletVault};
use crate::wallet::WalletBinding;

pub const KEY_AUTH_TOKEN: &str = "auth_token";
pub const KEY_AUTH_PROVIDER: &str = "auth_provider";
pub const KEY_AUTH_USER: &str = "auth_user";
pub const KEY_AUTH_ACTION: &str = "auth_action";

const SESSION_KEYS: [&str; 4] = [KEY_AUTH_TOKEN, KEY_AUTH_PROVIDER, KEY_AUTH_USER, KEY_AUTH_ACTION];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionAction {
    Signup,
    Login,
    Connect,
}

impl SessionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionAction::Signup => "signup",
            SessionAction::Login => "login",
            SessionAction::Connect => "connect",
        }
    }

    pub fn parse(value: &str) -> WalletResult<Self> {
        match value.trim().to_lowercase().as_str() {
            "signup" => Ok(SessionAction::Signup),
            "login" => Ok(SessionAction::Login),
            "connect" => Ok(SessionAction::Connect),
            other => Err(WalletError::ValidationError(format!(
                "Unknown session action: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug)]
pub struct SessionIdentity {
    pub token: SecretString,
    pub provider: String,
    pub user: SessionUser,
    pub action: SessionAction,
}

impl SessionIdentity {
    pub fn binding(&self) -> WalletBinding {
        WalletBinding::OAuth {
            provider: self.provider.clone(),
            subject_id: self.user.id.clone(),
        }
    }
}

/// Key-value store for short-lived handoff state.
pub trait EphemeralStore: Send + Sync {
    fn get(&self, key: &str) -> WalletResult<Option<SecretString>>;
    fn set(&self, key: &str, value: &SecretString) -> WalletResult<()>;
    fn remove(&self, key: &str) -> WalletResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryEphemeralStore {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EphemeralStore for MemoryEphemeralStore {
    fn get(&self, key: &str) -> WalletResult<Option<SecretString>> {
        Ok(self
            .items
            .read()
            .get(key)
            .map(|value| SecretString::from(value.clone())))
    }

    fn set(&self, key: &str, value: &SecretString) -> WalletResult<()> {
        self.items
            .write()
            .insert(key.to_string(), value.expose_secret().to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> WalletResult<()> {
        self.items.write().remove(key);
        Ok(())
    }
}

/// Handoff keys kept in the vault's secure store so they survive between
/// CLI invocations.
impl EphemeralStore for FileVault {
    fn get(&self, key: &str) -> WalletResult<Option<SecretString>> {
        self.get_secure_item(key)
    }

    fn set(&self, key: &str, value: &SecretString) -> WalletResult<()> {
        self.set_secure_item(key, value)
    }

    fn remove(&self, key: &str) -> WalletResult<()> {
        self.remove_secure_item(key)
    }
}

/// Explicit load/clear lifecycle over the handoff keys.
#[derive(Clone)]
pub struct SessionContext {
    store: Arc<dyn EphemeralStore>,
}

impl SessionContext {
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        Self { store }
    }

    /// Record a session, as the authentication step does.
    pub fn begin(&self, identity: &SessionIdentity) -> WalletResult<()> {
        let user = serde_json::to_string(&identity.user)?;
        self.store.set(KEY_AUTH_TOKEN, &identity.token)?;
        self.store
            .set(KEY_AUTH_PROVIDER, &SecretString::from(identity.provider.clone()))?;
        self.store.set(KEY_AUTH_USER, &SecretString::from(user))?;
        self.store.set(
            KEY_AUTH_ACTION,
            &SecretString::from(identity.action.as_str().to_string()),
        )
    }

    /// Read the handoff. Any missing key means the authentication flow has to
    /// be restarted.
    pub fn load(&self) -> WalletResult<SessionIdentity> {
        let token = self.require(KEY_AUTH_TOKEN)?;
        let provider = self.require(KEY_AUTH_PROVIDER)?;
        let user = self.require(KEY_AUTH_USER)?;
        let action = self.require(KEY_AUTH_ACTION)?;

        let user: SessionUser = serde_json::from_str(user.expose_secret()).map_err(|_| {
            WalletError::PreconditionMissing("Session user data is unreadable".to_string())
        })?;
        let action = SessionAction::parse(action.expose_secret())
            .map_err(|e| WalletError::PreconditionMissing(e.to_string()))?;

        Ok(SessionIdentity {
            token,
            provider: provider.expose_secret().to_string(),
            user,
            action,
        })
    }

    pub fn is_present(&self) -> bool {
        matches!(self.store.get(KEY_AUTH_TOKEN), Ok(Some(_)))
    }

    /// Drop every handoff key. Called on success and on cancel.
    pub fn clear(&self) -> WalletResult<()> {
        for key in SESSION_KEYS {
            self.store.remove(key)?;
        }
        log::debug!("Session handoff cleared");
        Ok(())
    }

    fn require(&self, key: &str) -> WalletResult<SecretString> {
        self.store.get(key)?.ok_or_else(|| {
            WalletError::PreconditionMissing(format!("Session key '{}' is missing", key))
        })
    }
}
