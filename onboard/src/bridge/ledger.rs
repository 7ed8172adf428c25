//! Local record of created exchanges, durable across restarts.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::types::{ExchangeStatus, ExchangeTransaction, StatusReport};
use crate::errors::{WalletError, WalletResult};
use crate::storage::paths::write_atomic;
use crate::storage::WalletPaths;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub transaction: ExchangeTransaction,
    #[serde(default)]
    pub last_status: Option<ExchangeStatus>,
    #[serde(default)]
    pub payout_hash: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerState {
    exchanges: BTreeMap<String, LedgerEntry>,
    /// Ids that still want a completion notification.
    #[serde(default)]
    notify: BTreeSet<String>,
}

/// Exchanges keyed by their remote id, plus the notification registry.
#[derive(Debug)]
pub struct ExchangeLedger {
    path: Option<PathBuf>,
    state: Mutex<LedgerState>,
}

impl ExchangeLedger {
    /// Open the ledger at `path`, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> WalletResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            serde_json::from_slice(&fs::read(&path)?)?
        } else {
            LedgerState::default()
        };
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    pub fn from_paths(paths: &WalletPaths) -> WalletResult<Self> {
        Self::open(paths.exchanges_file())
    }

    /// A ledger that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Record a newly created exchange. Ids are immutable: a second record
    /// for a known id is rejected.
    pub fn record(&self, transaction: ExchangeTransaction) -> WalletResult<()> {
        let mut state = self.state.lock();
        if state.exchanges.contains_key(&transaction.id) {
            return Err(WalletError::AlreadyExists(format!(
                "Exchange {}",
                transaction.id
            )));
        }
        let id = transaction.id.clone();
        state.exchanges.insert(
            id.clone(),
            LedgerEntry {
                transaction,
                last_status: None,
                payout_hash: None,
                updated_at: None,
            },
        );
        self.persist(&state)?;
        log::info!("Recorded exchange {}", id);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<LedgerEntry> {
        self.state.lock().exchanges.get(id).cloned()
    }

    /// All entries, newest first.
    pub fn list(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self.state.lock().exchanges.values().cloned().collect();
        entries.sort_by(|a, b| b.transaction.created_at.cmp(&a.transaction.created_at));
        entries
    }

    /// Store the latest observed status. Terminal statuses leave the
    /// notification registry.
    pub fn record_status(&self, id: &str, report: &StatusReport) -> WalletResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .exchanges
            .get_mut(id)
            .ok_or_else(|| WalletError::NotFound(format!("Exchange {}", id)))?;
        entry.last_status = Some(report.status.clone());
        if report.payout_hash.is_some() {
            entry.payout_hash = report.payout_hash.clone();
        }
        entry.updated_at = Some(Utc::now());
        if report.status.is_terminal() {
            state.notify.remove(id);
        }
        self.persist(&state)
    }

    pub fn register_notification(&self, id: &str) -> WalletResult<()> {
        let mut state = self.state.lock();
        if state.notify.insert(id.to_string()) {
            self.persist(&state)?;
        }
        Ok(())
    }

    pub fn unregister_notification(&self, id: &str) -> WalletResult<()> {
        let mut state = self.state.lock();
        if state.notify.remove(id) {
            self.persist(&state)?;
        }
        Ok(())
    }

    pub fn pending_notifications(&self) -> Vec<String> {
        self.state.lock().notify.iter().cloned().collect()
    }

    fn persist(&self, state: &LedgerState) -> WalletResult<()> {
        match &self.path {
            Some(path) => write_atomic(path, &serde_json::to_vec_pretty(state)?),
            None => Ok(()),
        }
    }
}
