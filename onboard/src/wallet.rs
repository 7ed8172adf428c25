//! Wallet records as they move between orchestration and the vault.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::crypto::Identity;
use crate::seed::KeyAlgorithm;

/// What a wallet's credential is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum WalletBinding {
    /// Device-local credential; no session token is persisted.
    Device { credential_id: String },
    /// External provider subject; the session token is persisted separately.
    #[serde(rename = "oauth")]
    OAuth {
        provider: String,
        subject_id: String,
    },
}

impl WalletBinding {
    pub fn mode(&self) -> &'static str {
        match self {
            WalletBinding::Device { .. } => "device",
            WalletBinding::OAuth { .. } => "oauth",
        }
    }

    /// Stable key used for credential storage and rate limiting.
    pub fn key(&self) -> String {
        match self {
            WalletBinding::Device { credential_id } => credential_id.clone(),
            WalletBinding::OAuth {
                provider,
                subject_id,
            } => format!("{}:{}", provider, subject_id),
        }
    }
}

/// How a record came to exist. Exactly one timestamp is ever set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "at", rename_all = "lowercase")]
pub enum Provenance {
    Created(DateTime<Utc>),
    Imported(DateTime<Utc>),
    Restored(DateTime<Utc>),
}

impl Provenance {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Provenance::Created(at) | Provenance::Imported(at) | Provenance::Restored(at) => *at,
        }
    }
}

/// A provisioned wallet, seed still in memory.
///
/// The seed is only ever written out through
/// [`crate::storage::WalletVault::store_wallet`], which encrypts it.
#[derive(Debug)]
pub struct WalletRecord {
    pub address: String,
    pub public_key: String,
    pub seed: SecretString,
    pub algorithm: KeyAlgorithm,
    pub account_index: u32,
    pub binding: WalletBinding,
    pub provenance: Provenance,
}

impl WalletRecord {
    pub fn from_identity(
        identity: Identity,
        account_index: u32,
        binding: WalletBinding,
        provenance: Provenance,
    ) -> Self {
        Self {
            address: identity.address,
            public_key: identity.public_key,
            seed: identity.seed,
            algorithm: identity.algorithm,
            account_index,
            binding,
            provenance,
        }
    }

    pub fn summary(&self) -> WalletSummary {
        WalletSummary {
            address: self.address.clone(),
            public_key: self.public_key.clone(),
            algorithm: self.algorithm,
            account_index: self.account_index,
            binding: self.binding.clone(),
            provenance: self.provenance,
        }
    }
}

/// Public, serializable view of a wallet record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSummary {
    pub address: String,
    pub public_key: String,
    pub algorithm: KeyAlgorithm,
    pub account_index: u32,
    pub binding: WalletBinding,
    pub provenance: Provenance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_keys_distinguish_modes() {
        let device = WalletBinding::Device {
            credential_id: "cred-1".into(),
        };
        let oauth = WalletBinding::OAuth {
            provider: "google".into(),
            subject_id: "1234".into(),
        };
        assert_eq!(device.mode(), "device");
        assert_eq!(device.key(), "cred-1");
        assert_eq!(oauth.mode(), "oauth");
        assert_eq!(oauth.key(), "google:1234");
    }

    #[test]
    fn binding_serializes_with_mode_tag() {
        let oauth = WalletBinding::OAuth {
            provider: "apple".into(),
            subject_id: "sub".into(),
        };
        let json = serde_json::to_value(&oauth).unwrap();
        assert_eq!(json["mode"], "oauth");
        assert_eq!(json["provider"], "apple");
    }

    #[test]
    fn provenance_exposes_single_timestamp() {
        let now = Utc::now();
        assert_eq!(Provenance::Restored(now).timestamp(), now);
        let json = serde_json::to_value(Provenance::Imported(now)).unwrap();
        assert_eq!(json["kind"], "imported");
    }
}
