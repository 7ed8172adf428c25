use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use argon2::{Algorithm, Argon2, Params, Version};
use blake3::Hasher as Blake3;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::paths::write_atomic;
use super::WalletPaths;
use crate::config_store::KdfConfig;
use crate::errors::{WalletError, WalletResult};
use crate::seed::KeyAlgorithm;
use crate::validation::{InputValidator, PasswordStrength};
use crate::wallet::{Provenance, WalletBinding, WalletRecord, WalletSummary};

const BLOB_MAGIC: &str = "XRPLWLT1";
const BLOB_VERSION: u16 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const DEVICE_KEY_FILENAME: &str = "device.key";
const CREDENTIAL_KEY_PREFIX: &str = "credential:";

/// Password-encrypted payload. Serialized as JSON; its base64 text is the
/// opaque `data` entry of a backup file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedBlob {
    magic: String,
    version: u16,
    kdf: KdfParameters,
    /// Hex-encoded AES-256-GCM nonce.
    nonce: String,
    /// Hex-encoded blake3 checksum of the plaintext.
    checksum: String,
    /// Hex-encoded ciphertext with appended tag.
    ciphertext: String,
}

impl EncryptedBlob {
    pub fn to_base64(&self) -> WalletResult<String> {
        Ok(BASE64.encode(serde_json::to_vec(self)?))
    }

    pub fn from_base64(text: &str) -> WalletResult<Self> {
        let bytes = BASE64
            .decode(text.trim())
            .map_err(|e| WalletError::ValidationError(format!("Backup entry is not base64: {e}")))?;
        let blob: EncryptedBlob = serde_json::from_slice(&bytes)?;
        blob.check_header()?;
        Ok(blob)
    }

    fn check_header(&self) -> WalletResult<()> {
        if self.magic != BLOB_MAGIC {
            return Err(WalletError::ValidationError(
                "Invalid encrypted blob marker".to_string(),
            ));
        }
        if self.version != BLOB_VERSION {
            return Err(WalletError::ValidationError(format!(
                "Unsupported encrypted blob version: {}",
                self.version
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct KdfParameters {
    m_cost_kib: u32,
    t_cost: u32,
    p_cost: u32,
    /// Hex-encoded salt.
    salt: String,
}

/// Secret material encrypted inside a stored wallet's blob.
#[derive(Serialize, Deserialize)]
pub struct WalletSecretPayload {
    pub address: String,
    pub public_key: String,
    pub seed: String,
    pub algorithm: KeyAlgorithm,
    pub account_index: u32,
}

impl Drop for WalletSecretPayload {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.seed.zeroize();
    }
}

/// A wallet as persisted: public fields in the clear, seed encrypted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredWallet {
    #[serde(flatten)]
    pub summary: WalletSummary,
    pub blob: EncryptedBlob,
}

/// Password-based wallet persistence consumed by orchestration.
pub trait WalletVault: Send + Sync {
    /// Encrypt the record's seed under `password` and persist it, replacing
    /// any stored wallet with the same address.
    fn store_wallet(&self, record: &WalletRecord, password: &SecretString)
        -> WalletResult<StoredWallet>;

    fn encrypt_data(&self, plaintext: &[u8], password: &SecretString)
        -> WalletResult<EncryptedBlob>;

    /// Fails with [`WalletError::IncorrectPassword`] when authentication fails.
    fn decrypt_data(
        &self,
        blob: &EncryptedBlob,
        password: &SecretString,
    ) -> WalletResult<Zeroizing<Vec<u8>>>;

    fn set_secure_item(&self, key: &str, value: &SecretString) -> WalletResult<()>;

    fn get_secure_item(&self, key: &str) -> WalletResult<Option<SecretString>>;

    fn remove_secure_item(&self, key: &str) -> WalletResult<()>;

    /// Remember the wallet password for a device credential.
    fn store_wallet_credential(&self, device_id: &str, password: &SecretString)
        -> WalletResult<()>;

    /// Keep the generation entropy of a new wallet as a recovery aid.
    fn backup_entropy(&self, address: &str, entropy: &[u8]) -> WalletResult<()>;

    fn list_wallets(&self) -> WalletResult<Vec<StoredWallet>>;

    fn validate_password_strength(&self, password: &str) -> PasswordStrength;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedItem {
    nonce: String,
    ciphertext: String,
}

/// File-backed [`WalletVault`] rooted at a [`WalletPaths`] layout.
pub struct FileVault {
    paths: WalletPaths,
    kdf: KdfConfig,
    snapshots_kept: usize,
    validator: InputValidator,
    write_lock: Mutex<()>,
}

impl FileVault {
    pub fn new(paths: WalletPaths, kdf: KdfConfig) -> Self {
        Self {
            paths,
            kdf,
            snapshots_kept: 10,
            validator: InputValidator::default(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_snapshots_kept(mut self, keep: usize) -> Self {
        self.snapshots_kept = keep;
        self
    }

    pub fn paths(&self) -> &WalletPaths {
        &self.paths
    }

    /// Decrypt the seed of a stored wallet.
    pub fn reveal_seed(
        &self,
        stored: &StoredWallet,
        password: &SecretString,
    ) -> WalletResult<SecretString> {
        let plaintext = self.decrypt_data(&stored.blob, password)?;
        let payload: WalletSecretPayload = serde_json::from_slice(&plaintext)?;
        Ok(SecretString::from(payload.seed.clone()))
    }

    /// Credential previously stored for a device, if any.
    pub fn wallet_credential(&self, device_id: &str) -> WalletResult<Option<SecretString>> {
        self.get_secure_item(&format!("{}{}", CREDENTIAL_KEY_PREFIX, device_id))
    }

    fn read_wallets(&self) -> WalletResult<Vec<StoredWallet>> {
        let path = self.paths.wallets_file();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_wallets(&self, wallets: &[StoredWallet]) -> WalletResult<()> {
        self.paths.snapshot_wallets()?;
        self.paths.prune_snapshots(self.snapshots_kept)?;
        let serialized = serde_json::to_vec_pretty(wallets)?;
        write_atomic(self.paths.wallets_file(), &serialized)
    }

    fn read_secure_items(&self) -> WalletResult<BTreeMap<String, SealedItem>> {
        let path = self.paths.secure_store_file();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_secure_items(&self, items: &BTreeMap<String, SealedItem>) -> WalletResult<()> {
        let path = self.paths.secure_store_file();
        write_atomic(path, &serde_json::to_vec_pretty(items)?)?;
        restrict_permissions(path)
    }

    /// Random key kept beside the data, used for items that have no password.
    fn device_key(&self) -> WalletResult<Zeroizing<[u8; KEY_LEN]>> {
        let path = self.paths.root_dir().join(DEVICE_KEY_FILENAME);
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        if path.exists() {
            let bytes = Zeroizing::new(fs::read(&path)?);
            if bytes.len() != KEY_LEN {
                return Err(WalletError::StorageError(
                    "Device key has unexpected length".to_string(),
                ));
            }
            key.copy_from_slice(&bytes);
        } else {
            OsRng.fill_bytes(&mut key[..]);
            write_atomic(&path, &key[..])?;
            restrict_permissions(&path)?;
        }
        Ok(key)
    }

    fn seal(&self, plaintext: &[u8]) -> WalletResult<SealedItem> {
        let key = self.device_key()?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = encrypt_aes_gcm(
            &key,
            Nonce::assume_unique_for_key(nonce_bytes),
            plaintext,
        )?;
        Ok(SealedItem {
            nonce: hex::encode(nonce_bytes),
            ciphertext: hex::encode(ciphertext),
        })
    }

    fn unseal(&self, item: &SealedItem) -> WalletResult<Zeroizing<Vec<u8>>> {
        let key = self.device_key()?;
        let nonce = decode_nonce(&item.nonce)?;
        let ciphertext = decode_hex(&item.ciphertext, "ciphertext")?;
        decrypt_aes_gcm(&key, nonce, &ciphertext).map_err(|_| {
            WalletError::CryptoError("Secure item could not be decrypted".to_string())
        })
    }
}

impl WalletVault for FileVault {
    fn store_wallet(
        &self,
        record: &WalletRecord,
        password: &SecretString,
    ) -> WalletResult<StoredWallet> {
        let payload = WalletSecretPayload {
            address: record.address.clone(),
            public_key: record.public_key.clone(),
            seed: record.seed.expose_secret().to_string(),
            algorithm: record.algorithm,
            account_index: record.account_index,
        };
        let plaintext = Zeroizing::new(serde_json::to_vec(&payload)?);
        let blob = self.encrypt_data(&plaintext, password)?;
        let stored = StoredWallet {
            summary: record.summary(),
            blob,
        };

        let _guard = self.write_lock.lock();
        let mut wallets = self.read_wallets()?;
        match wallets
            .iter_mut()
            .find(|existing| existing.summary.address == stored.summary.address)
        {
            Some(existing) => *existing = stored.clone(),
            None => wallets.push(stored.clone()),
        }
        self.write_wallets(&wallets)?;

        log::info!(
            "Stored wallet {} ({} binding, index {})",
            record.address,
            record.binding.mode(),
            record.account_index
        );
        Ok(stored)
    }

    fn encrypt_data(
        &self,
        plaintext: &[u8],
        password: &SecretString,
    ) -> WalletResult<EncryptedBlob> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let kdf = KdfParameters {
            m_cost_kib: self.kdf.m_cost_kib,
            t_cost: self.kdf.t_cost,
            p_cost: self.kdf.p_cost,
            salt: hex::encode(salt),
        };
        let key = derive_key(password, &kdf, &salt)?;
        let ciphertext = encrypt_aes_gcm(&key, Nonce::assume_unique_for_key(nonce_bytes), plaintext)?;

        Ok(EncryptedBlob {
            magic: BLOB_MAGIC.to_string(),
            version: BLOB_VERSION,
            kdf,
            nonce: hex::encode(nonce_bytes),
            checksum: hex::encode(blake3_checksum(plaintext)),
            ciphertext: hex::encode(ciphertext),
        })
    }

    fn decrypt_data(
        &self,
        blob: &EncryptedBlob,
        password: &SecretString,
    ) -> WalletResult<Zeroizing<Vec<u8>>> {
        blob.check_header()?;
        self.kdf
            .check_untrusted(blob.kdf.m_cost_kib, blob.kdf.t_cost, blob.kdf.p_cost)?;
        let salt = decode_hex(&blob.kdf.salt, "salt")?;
        let nonce = decode_nonce(&blob.nonce)?;
        let ciphertext = decode_hex(&blob.ciphertext, "ciphertext")?;

        let key = derive_key(password, &blob.kdf, &salt)?;
        let plaintext =
            decrypt_aes_gcm(&key, nonce, &ciphertext).map_err(|_| WalletError::IncorrectPassword)?;

        if hex::encode(blake3_checksum(&plaintext)) != blob.checksum {
            return Err(WalletError::ValidationError(
                "Encrypted blob integrity verification failed".to_string(),
            ));
        }
        Ok(plaintext)
    }

    fn set_secure_item(&self, key: &str, value: &SecretString) -> WalletResult<()> {
        let sealed = self.seal(value.expose_secret().as_bytes())?;
        let _guard = self.write_lock.lock();
        let mut items = self.read_secure_items()?;
        items.insert(key.to_string(), sealed);
        self.write_secure_items(&items)
    }

    fn get_secure_item(&self, key: &str) -> WalletResult<Option<SecretString>> {
        let items = self.read_secure_items()?;
        match items.get(key) {
            Some(item) => {
                let plaintext = self.unseal(item)?;
                let text = String::from_utf8(plaintext.to_vec()).map_err(|_| {
                    WalletError::CryptoError("Secure item is not valid UTF-8".to_string())
                })?;
                Ok(Some(SecretString::from(text)))
            }
            None => Ok(None),
        }
    }

    fn remove_secure_item(&self, key: &str) -> WalletResult<()> {
        let _guard = self.write_lock.lock();
        let mut items = self.read_secure_items()?;
        if items.remove(key).is_some() {
            self.write_secure_items(&items)?;
        }
        Ok(())
    }

    fn store_wallet_credential(
        &self,
        device_id: &str,
        password: &SecretString,
    ) -> WalletResult<()> {
        if device_id.trim().is_empty() {
            return Err(WalletError::ValidationError(
                "Device credential id cannot be empty".to_string(),
            ));
        }
        self.set_secure_item(&format!("{}{}", CREDENTIAL_KEY_PREFIX, device_id), password)
    }

    fn backup_entropy(&self, address: &str, entropy: &[u8]) -> WalletResult<()> {
        let sealed = self.seal(entropy)?;
        let path = self.paths.entropy_dir().join(format!("{}.json", address));
        write_atomic(&path, &serde_json::to_vec(&sealed)?)?;
        restrict_permissions(&path)?;
        log::debug!("Backed up generation entropy for {}", address);
        Ok(())
    }

    fn list_wallets(&self) -> WalletResult<Vec<StoredWallet>> {
        self.read_wallets()
    }

    fn validate_password_strength(&self, password: &str) -> PasswordStrength {
        self.validator.validate_password_strength(password)
    }
}

/// Rebuild a [`WalletRecord`] from decrypted blob contents.
pub fn record_from_payload(
    payload: &WalletSecretPayload,
    binding: WalletBinding,
    provenance: Provenance,
) -> WalletRecord {
    WalletRecord {
        address: payload.address.clone(),
        public_key: payload.public_key.clone(),
        seed: SecretString::from(payload.seed.clone()),
        algorithm: payload.algorithm,
        account_index: payload.account_index,
        binding,
        provenance,
    }
}

fn derive_key(
    password: &SecretString,
    params: &KdfParameters,
    salt: &[u8],
) -> WalletResult<Zeroizing<[u8; KEY_LEN]>> {
    let argon_params = Params::new(params.m_cost_kib, params.t_cost, params.p_cost, Some(KEY_LEN))
        .map_err(|e| WalletError::CryptoError(format!("Invalid Argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, &mut key[..])
        .map_err(|e| WalletError::CryptoError(format!("KDF failed: {e}")))?;
    Ok(key)
}

fn encrypt_aes_gcm(
    key: &Zeroizing<[u8; KEY_LEN]>,
    nonce: Nonce,
    plaintext: &[u8],
) -> WalletResult<Vec<u8>> {
    let unbound_key = UnboundKey::new(&aead::AES_256_GCM, &key[..])
        .map_err(|e| WalletError::CryptoError(format!("Invalid encryption key: {e}")))?;
    let key = LessSafeKey::new(unbound_key);

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| WalletError::CryptoError("Encryption failure".to_string()))?;
    Ok(in_out)
}

fn decrypt_aes_gcm(
    key: &Zeroizing<[u8; KEY_LEN]>,
    nonce: Nonce,
    ciphertext: &[u8],
) -> WalletResult<Zeroizing<Vec<u8>>> {
    let unbound_key = UnboundKey::new(&aead::AES_256_GCM, &key[..])
        .map_err(|e| WalletError::CryptoError(format!("Invalid encryption key: {e}")))?;
    let key = LessSafeKey::new(unbound_key);

    if ciphertext.len() < aead::AES_256_GCM.tag_len() {
        return Err(WalletError::CryptoError(
            "Ciphertext shorter than authentication tag".to_string(),
        ));
    }

    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| WalletError::CryptoError("Decryption failure".to_string()))?
        .len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

fn decode_hex(text: &str, field: &str) -> WalletResult<Vec<u8>> {
    hex::decode(text).map_err(|e| WalletError::ValidationError(format!("Invalid {field} hex: {e}")))
}

fn decode_nonce(text: &str) -> WalletResult<Nonce> {
    let bytes = decode_hex(text, "nonce")?;
    let array: [u8; NONCE_LEN] = bytes.as_slice().try_into().map_err(|_| {
        WalletError::ValidationError(format!(
            "Invalid nonce length: expected {}, got {}",
            NONCE_LEN,
            bytes.len()
        ))
    })?;
    Ok(Nonce::assume_unique_for_key(array))
}

fn blake3_checksum(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake3::new();
    hasher.update(data);
    let mut output = [0u8; 32];
    output.copy_from_slice(hasher.finalize().as_bytes());
    output
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> WalletResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> WalletResult<()> {
    Ok(())
}
