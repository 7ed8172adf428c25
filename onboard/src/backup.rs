//! Backup file format shared by restore and export.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::storage::{EncryptedBlob, StoredWallet};

pub const BACKUP_MARKER: &str = "xrpl-wallet-backup";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Base64 text of an [`EncryptedBlob`].
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFile {
    #[serde(rename = "type")]
    pub kind: String,
    pub exported: DateTime<Utc>,
    pub wallets: Vec<BackupEntry>,
}

impl BackupFile {
    /// Parse and validate a backup document. The marker is checked before
    /// anything else so a foreign file never reaches decryption.
    pub fn parse(text: &str) -> WalletResult<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let marker = value.get("type").and_then(|v| v.as_str()).unwrap_or_default();
        if marker != BACKUP_MARKER {
            return Err(WalletError::ValidationError(
                "Invalid backup file format".to_string(),
            ));
        }

        let backup: BackupFile = serde_json::from_value(value)?;
        if backup.wallets.is_empty() {
            return Err(WalletError::ValidationError(
                "Backup file contains no wallets".to_string(),
            ));
        }
        Ok(backup)
    }

    /// Build a backup from stored wallets. Blobs are exported as-is, so the
    /// backup opens with the password each wallet was stored under.
    pub fn from_stored(wallets: &[StoredWallet]) -> WalletResult<Self> {
        let wallets = wallets
            .iter()
            .map(|stored| {
                Ok(BackupEntry {
                    data: stored.blob.to_base64()?,
                })
            })
            .collect::<WalletResult<Vec<_>>>()?;

        Ok(Self {
            kind: BACKUP_MARKER.to_string(),
            exported: Utc::now(),
            wallets,
        })
    }

    pub fn blobs(&self) -> WalletResult<Vec<EncryptedBlob>> {
        self.wallets
            .iter()
            .map(|entry| EncryptedBlob::from_base64(&entry.data))
            .collect()
    }

    pub fn to_json(&self) -> WalletResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
