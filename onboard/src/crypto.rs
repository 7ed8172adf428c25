//! Key generation and deterministic derivation for XRP Ledger accounts.
//!
//! Seeds are XRPL "family seeds": 16 bytes of entropy wrapped in a
//! base58check envelope whose version prefix selects the signing family.
//! Derivation follows the ledger's rules so a seed imported here resolves
//! to the same classic address any other XRPL wallet would show.

use ed25519_dalek::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{FieldBytes, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use ripemd::Ripemd160;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256, Sha512};
use zeroize::{Zeroize, Zeroizing};

use crate::errors::{WalletError, WalletResult};
use crate::seed::KeyAlgorithm;

/// Bytes of OS entropy drawn for a brand new wallet.
pub const ENTROPY_LEN: usize = 32;
/// Bytes of entropy carried inside a family seed.
pub const SEED_ENTROPY_LEN: usize = 16;

const SECP256K1_SEED_PREFIX: &[u8] = &[0x21];
const ED25519_SEED_PREFIX: &[u8] = &[0x01, 0xE1, 0x4B];
const ACCOUNT_ID_PREFIX: &[u8] = &[0x00];
const ED25519_KEY_PREFIX: u8 = 0xED;
const CHECKSUM_LEN: usize = 4;

/// A ledger identity: classic address, public key and the seed it came from.
pub struct Identity {
    pub address: String,
    /// Uppercase hex, 33 bytes (`02`/`03` for secp256k1, `ED` for ed25519).
    pub public_key: String,
    pub seed: SecretString,
    pub algorithm: KeyAlgorithm,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .field("algorithm", &self.algorithm)
            .field("seed", &"<redacted>")
            .finish()
    }
}

/// A freshly generated identity together with the raw entropy behind it.
#[derive(Debug)]
pub struct GeneratedIdentity {
    pub identity: Identity,
    pub entropy: Zeroizing<[u8; ENTROPY_LEN]>,
}

/// Produces new identities or re-derives existing ones from seeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalletFactory;

impl WalletFactory {
    /// Generate a new secp256k1 identity from OS randomness.
    pub fn generate_new(&self) -> WalletResult<GeneratedIdentity> {
        self.generate_new_with(KeyAlgorithm::default())
    }

    pub fn generate_new_with(&self, algorithm: KeyAlgorithm) -> WalletResult<GeneratedIdentity> {
        let mut entropy = Zeroizing::new([0u8; ENTROPY_LEN]);
        OsRng
            .try_fill_bytes(&mut entropy[..])
            .map_err(|e| WalletError::CryptoError(format!("Failed to generate entropy: {}", e)))?;

        let mut digest = sha512_half(&[&entropy[..]]);
        let mut seed_entropy = Zeroizing::new([0u8; SEED_ENTROPY_LEN]);
        seed_entropy.copy_from_slice(&digest[..SEED_ENTROPY_LEN]);
        digest.zeroize();

        let identity = identity_from_entropy(&seed_entropy, algorithm)?;
        Ok(GeneratedIdentity { identity, entropy })
    }

    /// Deterministically derive the identity a seed encodes.
    ///
    /// Fails with [`WalletError::Derivation`] when the seed decodes to the
    /// wrong length, carries an unknown version, or its checksum does not match.
    pub fn derive_from_seed(&self, seed: &str, algorithm: KeyAlgorithm) -> WalletResult<Identity> {
        let entropy = decode_seed(seed.trim())?;
        identity_from_entropy(&entropy, algorithm)
    }
}

fn identity_from_entropy(
    entropy: &[u8; SEED_ENTROPY_LEN],
    algorithm: KeyAlgorithm,
) -> WalletResult<Identity> {
    let public_key = match algorithm {
        KeyAlgorithm::Ed25519 => ed25519_public_key(entropy),
        KeyAlgorithm::Secp256k1 => secp256k1_public_key(entropy)?,
    };

    Ok(Identity {
        address: encode_account_id(&account_id(&public_key)),
        public_key: hex::encode_upper(&public_key),
        seed: SecretString::from(encode_seed(entropy, algorithm)),
        algorithm,
    })
}

fn ed25519_public_key(entropy: &[u8; SEED_ENTROPY_LEN]) -> Vec<u8> {
    let private = sha512_half(&[entropy.as_slice()]);
    let signing_key = SigningKey::from_bytes(&private);
    let mut public = Vec::with_capacity(33);
    public.push(ED25519_KEY_PREFIX);
    public.extend_from_slice(signing_key.verifying_key().as_bytes());
    public
}

fn secp256k1_public_key(entropy: &[u8; SEED_ENTROPY_LEN]) -> WalletResult<Vec<u8>> {
    let root = derive_scalar(entropy, None)?;
    let root_public = root.public_key().to_encoded_point(true);

    // account family 0; the wallet's list position is not a derivation input
    let tweak = derive_scalar(root_public.as_bytes(), Some(0))?;
    let sum = *root.to_nonzero_scalar() + *tweak.to_nonzero_scalar();
    let account = SecretKey::from_bytes(&sum.to_bytes())
        .map_err(|_| WalletError::Derivation("Derived account key is zero".to_string()))?;

    Ok(account.public_key().to_encoded_point(true).as_bytes().to_vec())
}

/// First SHA-512Half of `bytes || discriminator? || sequence` that is a valid scalar.
fn derive_scalar(bytes: &[u8], discriminator: Option<u32>) -> WalletResult<SecretKey> {
    for sequence in 0..=u32::MAX {
        let mut hasher = Sha512::new();
        hasher.update(bytes);
        if let Some(discriminator) = discriminator {
            hasher.update(discriminator.to_be_bytes());
        }
        hasher.update(sequence.to_be_bytes());
        let digest = hasher.finalize();
        if let Ok(key) = SecretKey::from_bytes(FieldBytes::from_slice(&digest[..32])) {
            return Ok(key);
        }
    }

    Err(WalletError::Derivation(
        "No valid secp256k1 scalar for seed".to_string(),
    ))
}

fn sha512_half(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut half = [0u8; 32];
    half.copy_from_slice(&digest[..32]);
    half
}

fn account_id(public_key: &[u8]) -> [u8; 20] {
    let digest = Ripemd160::digest(Sha256::digest(public_key));
    let mut id = [0u8; 20];
    id.copy_from_slice(&digest);
    id
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(Sha256::digest(payload));
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

fn encode_check(prefix: &[u8], body: &[u8]) -> String {
    let mut payload = Zeroizing::new(Vec::with_capacity(prefix.len() + body.len() + CHECKSUM_LEN));
    payload.extend_from_slice(prefix);
    payload.extend_from_slice(body);
    let check = checksum(&payload);
    payload.extend_from_slice(&check);
    bs58::encode(payload.as_slice())
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .into_string()
}

fn encode_account_id(id: &[u8; 20]) -> String {
    encode_check(ACCOUNT_ID_PREFIX, id)
}

/// Encode 16 bytes of entropy as a family seed for the given algorithm.
pub fn encode_seed(entropy: &[u8; SEED_ENTROPY_LEN], algorithm: KeyAlgorithm) -> String {
    let prefix = match algorithm {
        KeyAlgorithm::Secp256k1 => SECP256K1_SEED_PREFIX,
        KeyAlgorithm::Ed25519 => ED25519_SEED_PREFIX,
    };
    encode_check(prefix, entropy)
}

fn decode_seed(seed: &str) -> WalletResult<Zeroizing<[u8; SEED_ENTROPY_LEN]>> {
    let decoded = Zeroizing::new(
        bs58::decode(seed)
            .with_alphabet(bs58::Alphabet::RIPPLE)
            .into_vec()
            .map_err(|e| WalletError::Derivation(format!("Seed is not valid base58: {}", e)))?,
    );

    let prefix_len = if decoded.len() == SECP256K1_SEED_PREFIX.len() + SEED_ENTROPY_LEN + CHECKSUM_LEN
        && decoded.starts_with(SECP256K1_SEED_PREFIX)
    {
        SECP256K1_SEED_PREFIX.len()
    } else if decoded.len() == ED25519_SEED_PREFIX.len() + SEED_ENTROPY_LEN + CHECKSUM_LEN
        && decoded.starts_with(ED25519_SEED_PREFIX)
    {
        ED25519_SEED_PREFIX.len()
    } else {
        return Err(WalletError::Derivation(
            "Seed has an unknown version or length".to_string(),
        ));
    };

    let (payload, check) = decoded.split_at(decoded.len() - CHECKSUM_LEN);
    if checksum(payload).as_slice() != check {
        return Err(WalletError::Derivation("Seed checksum mismatch".to_string()));
    }

    let mut entropy = Zeroizing::new([0u8; SEED_ENTROPY_LEN]);
    entropy.copy_from_slice(&payload[prefix_len..]);
    Ok(entropy)
}

/// Check that a classic address is well-formed base58check.
pub fn is_valid_classic_address(address: &str) -> bool {
    let Ok(decoded) = bs58::decode(address)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .into_vec()
    else {
        return false;
    };
    if decoded.len() != ACCOUNT_ID_PREFIX.len() + 20 + CHECKSUM_LEN
        || !decoded.starts_with(ACCOUNT_ID_PREFIX)
    {
        return false;
    }
    let (payload, check) = decoded.split_at(decoded.len() - CHECKSUM_LEN);
    checksum(payload).as_slice() == check
}

/// Re-derive and compare, used when restoring records whose address is known.
pub fn seed_matches_address(seed: &SecretString, algorithm: KeyAlgorithm, address: &str) -> bool {
    WalletFactory
        .derive_from_seed(seed.expose_secret(), algorithm)
        .map(|identity| identity.address == address)
        .unwrap_or(false)
}
