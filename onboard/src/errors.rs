use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum WalletError {
    // Seed and key errors
    Format(String),
    Derivation(String),
    IncorrectPassword,
    CryptoError(String),

    // Sensitive-operation throttling
    RateLimited(String),

    // Funding bridge errors
    Quote(String),
    MinimumNotMet { min_amount: f64 },
    ExchangeCreation(String),
    NetworkError(String),
    InvalidResponse(String),

    // Session handoff
    PreconditionMissing(String),

    // Storage errors
    StorageError(String),
    FileNotFound(String),
    PermissionDenied(String),

    // Validation errors
    ValidationError(String),
    InvalidAddress(String),
    InvalidAmount(String),

    // Application errors
    AlreadyExists(String),
    NotFound(String),

    // Generic errors
    Unknown(String),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WalletError::Format(msg) => write!(f, "Invalid seed: {}", msg),
            WalletError::Derivation(msg) => write!(f, "Key derivation failed: {}", msg),
            WalletError::IncorrectPassword => write!(f, "Incorrect password"),
            WalletError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),

            WalletError::RateLimited(msg) => write!(f, "Too many attempts: {}", msg),

            WalletError::Quote(msg) => write!(f, "Quote unavailable: {}", msg),
            WalletError::MinimumNotMet { min_amount } => {
                write!(f, "Amount is below the minimum of {}", min_amount)
            }
            WalletError::ExchangeCreation(msg) => write!(f, "Exchange creation failed: {}", msg),
            WalletError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            WalletError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),

            WalletError::PreconditionMissing(msg) => {
                write!(f, "Session context missing: {}", msg)
            }

            WalletError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            WalletError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            WalletError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),

            WalletError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            WalletError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            WalletError::InvalidAmount(msg) => write!(f, "Invalid amount: {}", msg),

            WalletError::AlreadyExists(msg) => write!(f, "Already exists: {}", msg),
            WalletError::NotFound(msg) => write!(f, "Not found: {}", msg),

            WalletError::Unknown(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}

impl WalletError {
    /// Single message shown to the user at the top of an action.
    pub fn user_message(&self) -> String {
        match self {
            WalletError::IncorrectPassword => {
                "Incorrect password. No wallets were restored.".to_string()
            }
            WalletError::ExchangeCreation(msg) => msg.clone(),
            WalletError::PreconditionMissing(_) => {
                "Your sign-in session has expired. Please sign in again.".to_string()
            }
            WalletError::MinimumNotMet { min_amount } => {
                format!("Minimum amount is {}", min_amount)
            }
            other => other.to_string(),
        }
    }

    /// Whether the caller can recover by waiting or editing input.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, WalletError::PreconditionMissing(_))
    }
}

pub type WalletResult<T> = Result<T, WalletError>;

// Helper macro for easy error creation
#[macro_export]
macro_rules! wallet_error {
    ($variant:ident, $msg:expr) => {
        $crate::errors::WalletError::$variant($msg.to_string())
    };
    ($variant:ident) => {
        $crate::errors::WalletError::$variant
    };
}

// Conversion helpers
impl From<std::io::Error> for WalletError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => WalletError::FileNotFound(error.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                WalletError::PermissionDenied(error.to_string())
            }
            _ => WalletError::StorageError(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(error: serde_json::Error) -> Self {
        WalletError::ValidationError(format!("JSON error: {}", error))
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            WalletError::NetworkError("request timed out".to_string())
        } else if error.is_decode() {
            WalletError::InvalidResponse(error.to_string())
        } else {
            WalletError::NetworkError(error.to_string())
        }
    }
}
