use crate::crypto::is_valid_classic_address;
use crate::errors::{WalletError, WalletResult};
use regex::Regex;
use serde::Serialize;

const MIN_PASSWORD_LENGTH: usize = 12;
const MAX_PASSWORD_LENGTH: usize = 256;
const MAX_ALIAS_LENGTH: usize = 50;

const COMMON_PASSWORDS: &[&str] = &[
    "password123!",
    "password1234",
    "qwerty123456",
    "administrator",
    "welcome12345",
    "letmein12345",
    "iloveyou1234",
    "xrpl-wallet1",
];

/// Outcome of a password strength check, shaped like the vault contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordStrength {
    pub valid: bool,
    pub error: Option<String>,
}

impl PasswordStrength {
    pub fn into_result(self) -> WalletResult<()> {
        match self.error {
            Some(msg) if !self.valid => Err(WalletError::ValidationError(msg)),
            _ => Ok(()),
        }
    }
}

/// Input validation for user-supplied fields.
pub struct InputValidator {
    classic_address_pattern: Regex,
    amount_pattern: Regex,
    alias_pattern: Regex,
    malicious_patterns: Vec<Regex>,
}

impl InputValidator {
    pub fn new() -> WalletResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| WalletError::ValidationError(format!("Invalid regex {}: {}", pattern, e)))
        };

        Ok(InputValidator {
            classic_address_pattern: compile(r"^r[1-9A-HJ-NP-Za-km-z]{24,34}$")?,
            amount_pattern: compile(r"^\d+(\.\d{1,18})?$")?,
            alias_pattern: compile(r"^[\p{L}\p{N}\s\-_.']+$")?,
            malicious_patterns: vec![
                compile(r"<script")?,
                compile(r"javascript:")?,
                compile(r"data:text/html")?,
                compile(r"onerror=")?,
            ],
        })
    }

    /// Check a password before it is used to derive an encryption key.
    pub fn validate_password_strength(&self, password: &str) -> PasswordStrength {
        let fail = |msg: &str| PasswordStrength {
            valid: false,
            error: Some(msg.to_string()),
        };

        let length = password.chars().count();
        if length < MIN_PASSWORD_LENGTH {
            return fail("Password must be at least 12 characters");
        }
        if length > MAX_PASSWORD_LENGTH {
            return fail("Password too long");
        }

        let has_upper = password.chars().any(|c| c.is_uppercase());
        let has_lower = password.chars().any(|c| c.is_lowercase());
        let has_digit = password.chars().any(|c| c.is_ascii_digit());
        let has_symbol = password.chars().any(|c| !c.is_alphanumeric());
        if !(has_upper && has_lower && has_digit && has_symbol) {
            return fail("Password must contain uppercase, lowercase, number, and symbol");
        }

        if COMMON_PASSWORDS.contains(&password.to_lowercase().as_str()) {
            return fail("Password is too common, please choose a stronger password");
        }

        PasswordStrength {
            valid: true,
            error: None,
        }
    }

    /// Validate a classic XRPL destination address.
    pub fn validate_destination(&self, address: &str) -> WalletResult<()> {
        let address = address.trim();
        if address.is_empty() {
            return Err(WalletError::InvalidAddress(
                "Destination address cannot be empty".to_string(),
            ));
        }
        if !self.classic_address_pattern.is_match(address) || !is_valid_classic_address(address) {
            return Err(WalletError::InvalidAddress(format!(
                "{} is not a valid XRP Ledger address",
                address
            )));
        }
        Ok(())
    }

    /// Parse a positive decimal amount.
    pub fn parse_amount(&self, amount: &str) -> WalletResult<f64> {
        let amount = amount.trim();
        if amount.is_empty() {
            return Err(WalletError::InvalidAmount("Amount cannot be empty".to_string()));
        }
        if !self.amount_pattern.is_match(amount) {
            return Err(WalletError::InvalidAmount("Amount format is invalid".to_string()));
        }

        let parsed: f64 = amount
            .parse()
            .map_err(|_| WalletError::InvalidAmount("Invalid number format".to_string()))?;
        if parsed <= 0.0 {
            return Err(WalletError::InvalidAmount("Amount must be positive".to_string()));
        }
        Ok(parsed)
    }

    /// Validate a profile display alias.
    pub fn validate_alias(&self, alias: &str) -> WalletResult<()> {
        let lowered = alias.to_lowercase();
        if self.malicious_patterns.iter().any(|p| p.is_match(&lowered)) {
            return Err(WalletError::ValidationError(
                "Alias contains potentially malicious content".to_string(),
            ));
        }
        if alias.trim().is_empty() {
            return Err(WalletError::ValidationError("Alias cannot be empty".to_string()));
        }
        if alias.chars().count() > MAX_ALIAS_LENGTH {
            return Err(WalletError::ValidationError("Alias too long".to_string()));
        }
        if !self.alias_pattern.is_match(alias) {
            return Err(WalletError::ValidationError(
                "Alias contains invalid characters".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new().expect("built-in validation patterns compile")
    }
}
