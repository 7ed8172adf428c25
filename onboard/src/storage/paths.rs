use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::errors::{WalletError, WalletResult};

/// Manages filesystem paths used by the onboarding backend.
#[derive(Debug, Clone)]
pub struct WalletPaths {
    /// Root directory for all data.
    root_dir: PathBuf,
    /// Encrypted wallet records.
    wallets_file: PathBuf,
    /// Secure key-value items (session tokens, credentials).
    secure_store_file: PathBuf,
    /// One file per backed-up generation entropy.
    entropy_dir: PathBuf,
    /// Locally recorded funding exchanges.
    exchanges_file: PathBuf,
    /// Session account list.
    profiles_file: PathBuf,
    /// Snapshots of the wallets file taken before each rewrite.
    snapshot_dir: PathBuf,
    /// Persisted configuration.
    config_file: PathBuf,
}

impl WalletPaths {
    pub const WALLETS_FILENAME: &'static str = "wallets.json";
    /// Extension appended to timestamped wallet-store snapshots.
    pub const SNAPSHOT_EXTENSION: &'static str = "wallets.bak";

    /// Create a new path manager rooted at the provided directory.
    pub fn new(root: impl AsRef<Path>) -> WalletResult<Self> {
        let root_dir = root.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(WalletError::StorageError(
                "Wallet root directory cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            wallets_file: root_dir.join(Self::WALLETS_FILENAME),
            secure_store_file: root_dir.join("secure_store.json"),
            entropy_dir: root_dir.join("entropy"),
            exchanges_file: root_dir.join("exchanges.json"),
            profiles_file: root_dir.join("profiles.json"),
            snapshot_dir: root_dir.join("snapshots"),
            config_file: root_dir.join("onboard.config"),
            root_dir,
        })
    }

    /// Ensure the directory structure exists, creating missing folders.
    pub fn ensure_directories(&self) -> WalletResult<()> {
        fs::create_dir_all(&self.root_dir)?;
        fs::create_dir_all(&self.entropy_dir)?;
        fs::create_dir_all(&self.snapshot_dir)?;
        Ok(())
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn wallets_file(&self) -> &Path {
        &self.wallets_file
    }

    pub fn secure_store_file(&self) -> &Path {
        &self.secure_store_file
    }

    pub fn entropy_dir(&self) -> &Path {
        &self.entropy_dir
    }

    pub fn exchanges_file(&self) -> &Path {
        &self.exchanges_file
    }

    pub fn profiles_file(&self) -> &Path {
        &self.profiles_file
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Copy the wallets file aside before it is rewritten.
    /// Returns `None` when there is nothing to snapshot yet.
    pub fn snapshot_wallets(&self) -> WalletResult<Option<PathBuf>> {
        if !self.wallets_file.exists() {
            return Ok(None);
        }
        fs::create_dir_all(&self.snapshot_dir)?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let snapshot_path = self
            .snapshot_dir
            .join(format!("wallets_{}.{}", timestamp, Self::SNAPSHOT_EXTENSION));

        fs::copy(&self.wallets_file, &snapshot_path)?;

        let original_size = fs::metadata(&self.wallets_file)?.len();
        let snapshot_size = fs::metadata(&snapshot_path)?.len();
        if original_size != snapshot_size {
            fs::remove_file(&snapshot_path)?;
            return Err(WalletError::StorageError(
                "Snapshot verification failed: size mismatch".to_string(),
            ));
        }

        Ok(Some(snapshot_path))
    }

    /// All snapshots, newest first.
    pub fn list_snapshots(&self) -> WalletResult<Vec<PathBuf>> {
        if !self.snapshot_dir.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.snapshot_dir)? {
            let path = entry?.path();
            let is_snapshot = path.is_file()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.ends_with(Self::SNAPSHOT_EXTENSION))
                    .unwrap_or(false);
            if is_snapshot {
                snapshots.push(path);
            }
        }

        // file names embed a sortable timestamp
        snapshots.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        Ok(snapshots)
    }

    /// Delete old snapshots, keeping only the `keep_count` most recent.
    pub fn prune_snapshots(&self, keep_count: usize) -> WalletResult<usize> {
        let snapshots = self.list_snapshots()?;
        let mut deleted = 0;
        for path in snapshots.iter().skip(keep_count) {
            fs::remove_file(path)?;
            deleted += 1;
        }
        Ok(deleted)
    }
}

/// Write `bytes` to a sibling temp file and rename it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> WalletResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| WalletError::StorageError("Invalid storage path".to_string()))?;
    fs::create_dir_all(dir)?;

    let tmp_path = path.with_extension("new");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths_with_wallets(content: &[u8]) -> (TempDir, WalletPaths) {
        let temp_dir = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp_dir.path()).unwrap();
        paths.ensure_directories().unwrap();
        fs::write(paths.wallets_file(), content).unwrap();
        (temp_dir, paths)
    }

    #[test]
    fn test_wallet_paths_creation() {
        let temp_dir = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp_dir.path()).unwrap();

        assert_eq!(paths.wallets_file(), temp_dir.path().join("wallets.json"));
        assert_eq!(paths.snapshot_dir(), temp_dir.path().join("snapshots"));
        assert_eq!(paths.config_file(), temp_dir.path().join("onboard.config"));
        assert_eq!(paths.profiles_file(), temp_dir.path().join("profiles.json"));
    }

    #[test]
    fn test_empty_root_directory_rejected() {
        match WalletPaths::new("") {
            Err(WalletError::StorageError(msg)) => assert!(msg.contains("cannot be empty")),
            other => panic!("Expected StorageError for empty root, got {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_without_wallets_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp_dir.path()).unwrap();
        paths.ensure_directories().unwrap();
        assert!(paths.snapshot_wallets().unwrap().is_none());
    }

    #[test]
    fn test_snapshot_copies_content() {
        let (_dir, paths) = paths_with_wallets(b"[]");
        let snapshot = paths.snapshot_wallets().unwrap().expect("snapshot taken");
        assert!(snapshot.starts_with(paths.snapshot_dir()));
        assert_eq!(fs::read(&snapshot).unwrap(), b"[]");

        let filename = snapshot.file_name().unwrap().to_string_lossy().to_string();
        assert!(filename.starts_with("wallets_"));
        assert!(filename.ends_with(".wallets.bak"));
    }

    #[test]
    fn test_list_snapshots_filters_other_files() {
        let (_dir, paths) = paths_with_wallets(b"[]");
        paths.snapshot_wallets().unwrap();
        fs::write(paths.snapshot_dir().join("notes.txt"), b"x").unwrap();
        assert_eq!(paths.list_snapshots().unwrap().len(), 1);
    }

    #[test]
    fn test_prune_snapshots_keeps_newest() {
        let (_dir, paths) = paths_with_wallets(b"[]");
        for _ in 0..4 {
            paths.snapshot_wallets().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let before = paths.list_snapshots().unwrap();
        assert_eq!(before.len(), 4);

        assert_eq!(paths.prune_snapshots(2).unwrap(), 2);
        let after = paths.list_snapshots().unwrap();
        assert_eq!(after, before[..2].to_vec());
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("file.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!path.with_extension("new").exists());
    }
}
