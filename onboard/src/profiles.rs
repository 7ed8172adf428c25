//! Session account list, deduplicated by address.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::seed::KeyAlgorithm;
use crate::storage::paths::write_atomic;
use crate::storage::WalletPaths;
use crate::validation::InputValidator;
use crate::wallet::{Provenance, WalletBinding, WalletSummary};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub address: String,
    pub public_key: String,
    pub algorithm: KeyAlgorithm,
    pub account_index: u32,
    pub binding: WalletBinding,
    pub provenance: Provenance,
    pub alias: String,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    fn from_summary(wallet: &WalletSummary, alias: String, created_at: DateTime<Utc>) -> Self {
        Self {
            address: wallet.address.clone(),
            public_key: wallet.public_key.clone(),
            algorithm: wallet.algorithm,
            account_index: wallet.account_index,
            binding: wallet.binding.clone(),
            provenance: wallet.provenance,
            alias,
            created_at,
        }
    }
}

/// Append each new wallet whose address is not yet listed.
///
/// Existing entries are returned untouched and in their original order; a
/// duplicate address later in `new_wallets` is skipped as well.
pub fn merge_into_profiles(existing: &[Profile], new_wallets: &[WalletSummary]) -> Vec<Profile> {
    let mut merged = existing.to_vec();
    let mut seen: HashSet<String> = existing.iter().map(|p| p.address.clone()).collect();
    let now = Utc::now();

    for wallet in new_wallets {
        if !seen.insert(wallet.address.clone()) {
            continue;
        }
        let alias = format!("Account {}", merged.len() + 1);
        merged.push(Profile::from_summary(wallet, alias, now));
    }
    merged
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileBook {
    profiles: Vec<Profile>,
    active_address: Option<String>,
}

/// Durable profile list with the currently active address.
pub struct ProfileStore {
    path: PathBuf,
    validator: InputValidator,
    lock: Mutex<()>,
}

impl ProfileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            validator: InputValidator::default(),
            lock: Mutex::new(()),
        }
    }

    pub fn from_paths(paths: &WalletPaths) -> Self {
        Self::new(paths.profiles_file())
    }

    pub fn profiles(&self) -> WalletResult<Vec<Profile>> {
        Ok(self.read()?.profiles)
    }

    pub fn active_address(&self) -> WalletResult<Option<String>> {
        Ok(self.read()?.active_address)
    }

    /// Merge a provisioned batch and make its first wallet active.
    pub fn merge(&self, new_wallets: &[WalletSummary]) -> WalletResult<Vec<Profile>> {
        let _guard = self.lock.lock();
        let mut book = self.read()?;
        let before = book.profiles.len();
        book.profiles = merge_into_profiles(&book.profiles, new_wallets);
        if let Some(first) = new_wallets.first() {
            book.active_address = Some(first.address.clone());
        }
        self.write(&book)?;

        log::info!(
            "Merged {} new profile(s); {} total",
            book.profiles.len() - before,
            book.profiles.len()
        );
        Ok(book.profiles)
    }

    pub fn set_active(&self, address: &str) -> WalletResult<()> {
        let _guard = self.lock.lock();
        let mut book = self.read()?;
        if !book.profiles.iter().any(|p| p.address == address) {
            return Err(WalletError::NotFound(format!("Profile {}", address)));
        }
        book.active_address = Some(address.to_string());
        self.write(&book)
    }

    pub fn rename(&self, address: &str, alias: &str) -> WalletResult<Profile> {
        self.validator.validate_alias(alias)?;
        let _guard = self.lock.lock();
        let mut book = self.read()?;
        let profile = book
            .profiles
            .iter_mut()
            .find(|p| p.address == address)
            .ok_or_else(|| WalletError::NotFound(format!("Profile {}", address)))?;
        profile.alias = alias.trim().to_string();
        let updated = profile.clone();
        self.write(&book)?;
        Ok(updated)
    }

    fn read(&self) -> WalletResult<ProfileBook> {
        if !self.path.exists() {
            return Ok(ProfileBook::default());
        }
        let bytes = fs::read(&self.path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write(&self, book: &ProfileBook) -> WalletResult<()> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(book)?)
    }
}
