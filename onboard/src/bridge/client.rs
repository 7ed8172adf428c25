//! Funding-bridge client.
//!
//! [`HttpBridge`] speaks the service's HTTP surface; [`BridgeExchangeClient`]
//! layers currency ordering, minimum checks, local persistence and the retry
//! policy on top of any [`BridgeApi`].

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use super::ledger::ExchangeLedger;
use super::retry::RetryPolicy;
use super::types::{
    CreateExchangeRequest, CreatedExchange, Currency, EstimateResponse, ExchangeTransaction,
    MinAmountResponse, Quote, StatusReport, TARGET_CURRENCY, TARGET_NETWORK,
};
use crate::config_store::{BridgeConfig, DEFAULT_PRIORITY_CURRENCIES};
use crate::errors::{WalletError, WalletResult};
use crate::validation::InputValidator;

/// Raw calls against the bridge service.
#[async_trait]
pub trait BridgeApi: Send + Sync {
    async fn currencies(&self) -> WalletResult<Vec<Currency>>;
    async fn min_amount(&self, currency: &Currency) -> WalletResult<f64>;
    async fn estimate(&self, currency: &Currency, amount: f64) -> WalletResult<f64>;
    async fn create(
        &self,
        currency: &Currency,
        amount: f64,
        address: &str,
    ) -> WalletResult<CreatedExchange>;
    async fn status(&self, id: &str) -> WalletResult<StatusReport>;
}

/// HTTP client for the bridge service
pub struct HttpBridge {
    client: Client,
    base_url: String,
}

impl HttpBridge {
    pub fn new(base_url: &str, timeout: Duration) -> WalletResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            WalletError::NetworkError(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &BridgeConfig) -> WalletResult<Self> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.request_timeout_secs as u64),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> WalletResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| WalletError::NetworkError(format!("GET {} failed: {}", path, e)))?;
        read_json(path, response).await
    }

    fn pair_query(currency: &Currency) -> Vec<(&'static str, String)> {
        vec![
            ("fromCurrency", currency.ticker.clone()),
            ("toCurrency", TARGET_CURRENCY.to_string()),
            ("fromNetwork", currency.network.clone()),
            ("toNetwork", TARGET_NETWORK.to_string()),
        ]
    }
}

#[async_trait]
impl BridgeApi for HttpBridge {
    async fn currencies(&self) -> WalletResult<Vec<Currency>> {
        self.get_json("/currencies", &[]).await
    }

    async fn min_amount(&self, currency: &Currency) -> WalletResult<f64> {
        let response: MinAmountResponse = self
            .get_json("/min-amount", &Self::pair_query(currency))
            .await?;
        Ok(response.min_amount)
    }

    async fn estimate(&self, currency: &Currency, amount: f64) -> WalletResult<f64> {
        let mut query = Self::pair_query(currency);
        query.push(("fromAmount", amount.to_string()));
        let response: EstimateResponse = self.get_json("/estimate", &query).await?;
        Ok(response.to_amount)
    }

    async fn create(
        &self,
        currency: &Currency,
        amount: f64,
        address: &str,
    ) -> WalletResult<CreatedExchange> {
        let body = CreateExchangeRequest {
            from_currency: &currency.ticker,
            to_currency: TARGET_CURRENCY,
            from_network: &currency.network,
            to_network: TARGET_NETWORK,
            from_amount: amount,
            address,
        };
        let response = self
            .client
            .post(format!("{}/create", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| WalletError::NetworkError(format!("POST /create failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(WalletError::ExchangeCreation(
                remote_message(&text)
                    .unwrap_or_else(|| format!("Exchange service returned HTTP {}", status)),
            ));
        }
        read_json("/create", response).await
    }

    async fn status(&self, id: &str) -> WalletResult<StatusReport> {
        self.get_json("/status", &[("id", id.to_string())]).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &str, response: Response) -> WalletResult<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(WalletError::NetworkError(
            remote_message(&text).unwrap_or_else(|| format!("{} returned HTTP {}", path, status)),
        ));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| WalletError::InvalidResponse(format!("{}: {}", path, e)))
}

/// Pull a human-readable message out of an error body.
fn remote_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .filter_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(|msg| msg.trim().to_string())
        .find(|msg| !msg.is_empty())
}

/// Currency catalog, quotes, exchange creation and status for the funding
/// flow.
pub struct BridgeExchangeClient {
    api: Arc<dyn BridgeApi>,
    ledger: Arc<ExchangeLedger>,
    priority: Vec<String>,
    retry: RetryPolicy,
    validator: InputValidator,
}

impl BridgeExchangeClient {
    pub fn new(api: Arc<dyn BridgeApi>, ledger: Arc<ExchangeLedger>) -> Self {
        Self {
            api,
            ledger,
            priority: DEFAULT_PRIORITY_CURRENCIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            retry: RetryPolicy::default(),
            validator: InputValidator::default(),
        }
    }

    pub fn from_config(
        api: Arc<dyn BridgeApi>,
        ledger: Arc<ExchangeLedger>,
        config: &BridgeConfig,
    ) -> Self {
        Self::new(api, ledger)
            .with_priority(config.priority_currencies.clone())
            .with_retry(RetryPolicy::from_config(&config.retry))
    }

    pub fn with_priority(mut self, priority: Vec<String>) -> Self {
        self.priority = priority.into_iter().map(|c| c.to_lowercase()).collect();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn ledger(&self) -> &Arc<ExchangeLedger> {
        &self.ledger
    }

    /// Catalog without XRP; priority tickers first, the rest by name.
    pub async fn list_currencies(&self) -> WalletResult<Vec<Currency>> {
        let api = &self.api;
        let catalog = self.retry.run("currencies", move || api.currencies()).await?;
        Ok(order_currencies(catalog, &self.priority))
    }

    /// Minimum check, then an estimate only when the amount clears it.
    pub async fn quote(&self, currency: &Currency, amount: f64) -> WalletResult<Quote> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(WalletError::InvalidAmount("Amount must be positive".to_string()));
        }
        let api = &self.api;

        let min_amount = self
            .retry
            .run("min-amount", move || api.min_amount(currency))
            .await
            .map_err(quote_error)?;
        if !min_amount.is_finite() || min_amount < 0.0 {
            return Err(WalletError::Quote(format!(
                "Exchange service returned an invalid minimum amount for {}",
                currency.ticker
            )));
        }
        if amount < min_amount {
            log::debug!(
                "Quote for {} {} below minimum {}",
                amount,
                currency.ticker,
                min_amount
            );
            return Err(WalletError::MinimumNotMet { min_amount });
        }

        let estimated_target = self
            .retry
            .run("estimate", move || api.estimate(currency, amount))
            .await
            .map_err(quote_error)?;
        if !estimated_target.is_finite() {
            return Err(WalletError::Quote(
                "Exchange service returned an invalid estimate".to_string(),
            ));
        }

        Ok(Quote {
            min_amount,
            estimated_target,
        })
    }

    /// Create an exchange, record it locally and register it for completion
    /// notification. Creation is never retried.
    pub async fn create_exchange(
        &self,
        currency: &Currency,
        amount: f64,
        destination: &str,
    ) -> WalletResult<ExchangeTransaction> {
        self.validator.validate_destination(destination)?;
        if !(amount.is_finite() && amount > 0.0) {
            return Err(WalletError::InvalidAmount("Amount must be positive".to_string()));
        }

        let created = self
            .api
            .create(currency, amount, destination.trim())
            .await
            .map_err(|err| match err {
                WalletError::ExchangeCreation(msg) => WalletError::ExchangeCreation(msg),
                other => WalletError::ExchangeCreation(format!(
                    "Could not create exchange: {}",
                    other
                )),
            })?;

        if created.id.trim().is_empty() || created.payin_address.trim().is_empty() {
            return Err(WalletError::ExchangeCreation(
                "Exchange service returned an incomplete exchange".to_string(),
            ));
        }

        let transaction = ExchangeTransaction {
            id: created.id,
            from_currency: currency.ticker.clone(),
            from_network: currency.network.clone(),
            from_amount: amount,
            to_address: destination.trim().to_string(),
            payin_address: created.payin_address,
            payin_extra_id: created.payin_extra_id.filter(|extra| !extra.is_empty()),
            expected_amount: created.to_amount,
            created_at: Utc::now(),
        };
        // the exchange exists remotely now; a local bookkeeping failure must
        // not hide its deposit address from the caller
        if let Err(err) = self.ledger.record(transaction.clone()) {
            log::warn!("Could not record exchange {} locally: {}", transaction.id, err);
        }
        if let Err(err) = self.ledger.register_notification(&transaction.id) {
            log::warn!(
                "Could not register exchange {} for notification: {}",
                transaction.id,
                err
            );
        }

        log::info!(
            "Created exchange {}: {} {} -> {}",
            transaction.id,
            amount,
            currency.ticker,
            transaction.to_address
        );
        Ok(transaction)
    }

    pub async fn get_status(&self, id: &str) -> WalletResult<StatusReport> {
        let api = &self.api;
        self.retry.run("status", move || api.status(id)).await
    }
}

fn quote_error(err: WalletError) -> WalletError {
    match err {
        WalletError::MinimumNotMet { .. } | WalletError::Quote(_) => err,
        other => WalletError::Quote(format!("Could not fetch a quote: {}", other)),
    }
}

fn order_currencies(catalog: Vec<Currency>, priority: &[String]) -> Vec<Currency> {
    let rank = |currency: &Currency| {
        priority
            .iter()
            .position(|p| p.eq_ignore_ascii_case(&currency.ticker))
    };

    let mut currencies: Vec<Currency> = catalog.into_iter().filter(|c| !c.is_target()).collect();
    currencies.sort_by(|a, b| match (rank(a), rank(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a
            .name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.ticker.cmp(&b.ticker)),
    });
    currencies
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn currency(ticker: &str, name: &str) -> Currency {
        Currency {
            ticker: ticker.into(),
            network: ticker.into(),
            name: name.into(),
            image: None,
        }
    }

    #[derive(Default)]
    struct FakeBridge {
        min: f64,
        calls: Mutex<Vec<String>>,
        reject_create: Option<String>,
    }

    #[async_trait]
    impl BridgeApi for FakeBridge {
        async fn currencies(&self) -> WalletResult<Vec<Currency>> {
            self.calls.lock().push("currencies".into());
            Ok(vec![
                currency("zec", "Zcash"),
                currency("xrp", "Ripple"),
                currency("eth", "Ethereum"),
                currency("atom", "cosmos"),
                currency("btc", "Bitcoin"),
            ])
        }

        async fn min_amount(&self, _currency: &Currency) -> WalletResult<f64> {
            self.calls.lock().push("min".into());
            Ok(self.min)
        }

        async fn estimate(&self, _currency: &Currency, amount: f64) -> WalletResult<f64> {
            self.calls.lock().push(format!("estimate:{}", amount));
            Ok(amount * 100.0)
        }

        async fn create(
            &self,
            _currency: &Currency,
            _amount: f64,
            _address: &str,
        ) -> WalletResult<CreatedExchange> {
            self.calls.lock().push("create".into());
            match &self.reject_create {
                Some(msg) => Err(WalletError::ExchangeCreation(msg.clone())),
                None => Ok(CreatedExchange {
                    id: "ex-1".into(),
                    payin_address: "bc1qpayin".into(),
                    payin_extra_id: Some(String::new()),
                    to_amount: Some(42.0),
                }),
            }
        }

        async fn status(&self, _id: &str) -> WalletResult<StatusReport> {
            Err(WalletError::NetworkError("unreachable".into()))
        }
    }

    fn client(fake: FakeBridge) -> (Arc<FakeBridge>, BridgeExchangeClient) {
        let fake = Arc::new(fake);
        let client = BridgeExchangeClient::new(fake.clone(), Arc::new(ExchangeLedger::in_memory()));
        (fake, client)
    }

    #[tokio::test]
    async fn currencies_drop_xrp_and_order_by_priority() {
        let (_fake, client) = client(FakeBridge::default());
        let tickers: Vec<String> = client
            .list_currencies()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.ticker)
            .collect();
        assert_eq!(tickers, vec!["btc", "eth", "atom", "zec"]);
    }

    #[tokio::test]
    async fn below_minimum_skips_estimate() {
        let (fake, client) = client(FakeBridge {
            min: 0.5,
            ..Default::default()
        });
        let err = client
            .quote(&Currency::pair("btc", "btc"), 0.1)
            .await
            .unwrap_err();
        assert_eq!(err, WalletError::MinimumNotMet { min_amount: 0.5 });
        assert_eq!(*fake.calls.lock(), vec!["min".to_string()]);
    }

    #[tokio::test]
    async fn quote_returns_estimate() {
        let (fake, client) = client(FakeBridge {
            min: 0.5,
            ..Default::default()
        });
        let quote = client.quote(&Currency::pair("btc", "btc"), 2.0).await.unwrap();
        assert_eq!(quote.min_amount, 0.5);
        assert_eq!(quote.estimated_target, 200.0);
        assert_eq!(fake.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn create_records_and_registers() {
        let (_fake, client) = client(FakeBridge::default());
        let tx = client
            .create_exchange(
                &Currency::pair("btc", "btc"),
                0.02,
                "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh",
            )
            .await
            .unwrap();
        assert_eq!(tx.id, "ex-1");
        assert_eq!(tx.payin_extra_id, None);
        assert_eq!(tx.expected_amount, Some(42.0));
        assert!(client.ledger().get("ex-1").is_some());
        assert_eq!(client.ledger().pending_notifications(), vec!["ex-1"]);
    }

    #[tokio::test]
    async fn non_finite_minimum_is_a_quote_error() {
        for min in [f64::NAN, f64::INFINITY, -1.0] {
            let (fake, client) = client(FakeBridge {
                min,
                ..Default::default()
            });
            let err = client
                .quote(&Currency::pair("btc", "btc"), 2.0)
                .await
                .unwrap_err();
            assert!(matches!(err, WalletError::Quote(_)), "min {} gave {:?}", min, err);
            assert_eq!(*fake.calls.lock(), vec!["min".to_string()]);
        }
    }

    #[tokio::test]
    async fn ledger_failure_still_returns_created_exchange() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let ledger = Arc::new(ExchangeLedger::open(blocker.join("exchanges.json")).unwrap());
        let client = BridgeExchangeClient::new(Arc::new(FakeBridge::default()), ledger);

        let tx = client
            .create_exchange(
                &Currency::pair("btc", "btc"),
                0.02,
                "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh",
            )
            .await
            .unwrap();
        assert_eq!(tx.id, "ex-1");
        assert_eq!(tx.payin_address, "bc1qpayin");
    }

    #[tokio::test]
    async fn create_surfaces_remote_message_verbatim() {
        let (_fake, client) = client(FakeBridge {
            reject_create: Some("Amount is out of range".into()),
            ..Default::default()
        });
        let err = client
            .create_exchange(
                &Currency::pair("btc", "btc"),
                0.02,
                "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh",
            )
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Amount is out of range");
        assert!(client.ledger().list().is_empty());
    }

    #[tokio::test]
    async fn create_validates_destination_first() {
        let (fake, client) = client(FakeBridge::default());
        let err = client
            .create_exchange(&Currency::pair("btc", "btc"), 0.02, "not-an-address")
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidAddress(_)));
        assert!(fake.calls.lock().is_empty());
    }

    #[test]
    fn remote_message_prefers_message_field() {
        assert_eq!(
            remote_message(r#"{"error":"bad_request","message":"Pair is inactive"}"#).as_deref(),
            Some("Pair is inactive")
        );
        assert_eq!(remote_message(r#"{"error":"out of range"}"#).as_deref(), Some("out of range"));
        assert_eq!(remote_message("<html>"), None);
    }
}
