//! Format checks for XRPL family seeds.
//!
//! These run before any derivation work and never touch the network or an
//! RNG. A seed that passes here can still fail derivation (bad checksum),
//! which is reported separately by [`crate::crypto`].

use serde::{Deserialize, Serialize};

/// Base58 alphabet used by the XRP Ledger.
pub const XRPL_ALPHABET: &str = "rpshnaf39wBUDNEGHJKLM4PQRST7VWXYZ2bcdeCg65jkm8oFqi1tuvAxyz";

pub const MIN_SEED_LENGTH: usize = 20;
pub const MAX_SEED_LENGTH: usize = 35;

const ED25519_SEED_PREFIX: &str = "sEd";

/// Signing algorithm family a seed derives keys for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    #[default]
    Secp256k1,
    Ed25519,
}

impl KeyAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::Secp256k1 => "secp256k1",
            KeyAlgorithm::Ed25519 => "ed25519",
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KeyAlgorithm {
    type Err = crate::errors::WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secp256k1" => Ok(KeyAlgorithm::Secp256k1),
            "ed25519" => Ok(KeyAlgorithm::Ed25519),
            other => Err(crate::errors::WalletError::ValidationError(format!(
                "Unknown key algorithm: {}",
                other
            ))),
        }
    }
}

/// Outcome of [`validate_seed`]. An empty seed is invalid with an empty message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedValidation {
    pub valid: bool,
    pub error: String,
}

impl SeedValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            error: String::new(),
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: error.into(),
        }
    }
}

/// Validate the shape of a raw seed string. First failing check wins.
pub fn validate_seed(seed: &str) -> SeedValidation {
    let seed = seed.trim();

    if seed.is_empty() {
        return SeedValidation::fail("");
    }

    if !seed.starts_with('s') {
        return SeedValidation::fail("Seed must start with \"s\"");
    }

    let length = seed.chars().count();
    if !(MIN_SEED_LENGTH..=MAX_SEED_LENGTH).contains(&length) {
        return SeedValidation::fail("Invalid seed length");
    }

    if let Some(bad) = seed.chars().find(|c| !XRPL_ALPHABET.contains(*c)) {
        return SeedValidation::fail(format!("Invalid character \"{}\" in seed", bad));
    }

    SeedValidation::ok()
}

/// Map a seed to its signing family by prefix. Never fails.
pub fn detect_algorithm(seed: &str) -> KeyAlgorithm {
    if seed.trim().starts_with(ED25519_SEED_PREFIX) {
        KeyAlgorithm::Ed25519
    } else {
        KeyAlgorithm::Secp256k1
    }
}
