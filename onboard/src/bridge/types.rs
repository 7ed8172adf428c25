use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target asset every exchange converts into.
pub const TARGET_CURRENCY: &str = "xrp";
pub const TARGET_NETWORK: &str = "xrp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Currency {
    pub ticker: String,
    pub network: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
}

impl Currency {
    /// A currency known only by ticker and network.
    pub fn pair(ticker: impl Into<String>, network: impl Into<String>) -> Self {
        let ticker = ticker.into().to_lowercase();
        Self {
            name: ticker.to_uppercase(),
            network: network.into().to_lowercase(),
            ticker,
            image: None,
        }
    }

    pub fn is_target(&self) -> bool {
        self.ticker.eq_ignore_ascii_case(TARGET_CURRENCY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub min_amount: f64,
    pub estimated_target: f64,
}

/// A funding exchange as recorded locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeTransaction {
    pub id: String,
    pub from_currency: String,
    pub from_network: String,
    pub from_amount: f64,
    pub to_address: String,
    pub payin_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payin_extra_id: Option<String>,
    /// Target amount the service expects to deliver, when it reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_amount: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Remote exchange state, adopted verbatim from the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExchangeStatus {
    Waiting,
    Confirming,
    Exchanging,
    Sending,
    Finished,
    Failed,
    Refunded,
    /// A value this build does not recognise.
    Unknown(String),
}

impl ExchangeStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ExchangeStatus::Waiting => "waiting",
            ExchangeStatus::Confirming => "confirming",
            ExchangeStatus::Exchanging => "exchanging",
            ExchangeStatus::Sending => "sending",
            ExchangeStatus::Finished => "finished",
            ExchangeStatus::Failed => "failed",
            ExchangeStatus::Refunded => "refunded",
            ExchangeStatus::Unknown(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExchangeStatus::Finished | ExchangeStatus::Failed | ExchangeStatus::Refunded
        )
    }

    /// Position on the success path, if the status is on it.
    pub fn progress_rank(&self) -> Option<u8> {
        match self {
            ExchangeStatus::Waiting => Some(0),
            ExchangeStatus::Confirming => Some(1),
            ExchangeStatus::Exchanging => Some(2),
            ExchangeStatus::Sending => Some(3),
            ExchangeStatus::Finished => Some(4),
            _ => None,
        }
    }

    /// Short line for status displays.
    pub fn describe(&self) -> &str {
        match self {
            ExchangeStatus::Waiting => "Waiting for your deposit",
            ExchangeStatus::Confirming => "Deposit received, waiting for confirmations",
            ExchangeStatus::Exchanging => "Exchanging to XRP",
            ExchangeStatus::Sending => "Sending XRP to your wallet",
            ExchangeStatus::Finished => "XRP delivered",
            ExchangeStatus::Failed => "Exchange failed",
            ExchangeStatus::Refunded => "Deposit refunded",
            ExchangeStatus::Unknown(_) => "Unrecognised exchange status",
        }
    }
}

impl From<String> for ExchangeStatus {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "waiting" => ExchangeStatus::Waiting,
            "confirming" => ExchangeStatus::Confirming,
            "exchanging" => ExchangeStatus::Exchanging,
            "sending" => ExchangeStatus::Sending,
            "finished" => ExchangeStatus::Finished,
            "failed" => ExchangeStatus::Failed,
            "refunded" => ExchangeStatus::Refunded,
            _ => ExchangeStatus::Unknown(value),
        }
    }
}

impl From<ExchangeStatus> for String {
    fn from(status: ExchangeStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: ExchangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_hash: Option<String>,
}

// Wire shapes of the bridge service.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MinAmountResponse {
    pub min_amount: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EstimateResponse {
    pub to_amount: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateExchangeRequest<'a> {
    pub from_currency: &'a str,
    pub to_currency: &'a str,
    pub from_network: &'a str,
    pub to_network: &'a str,
    pub from_amount: f64,
    pub address: &'a str,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedExchange {
    pub id: String,
    pub payin_address: String,
    #[serde(default)]
    pub payin_extra_id: Option<String>,
    #[serde(default)]
    pub to_amount: Option<f64>,
}
