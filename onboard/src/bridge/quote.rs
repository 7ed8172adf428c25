use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::client::BridgeExchangeClient;
use super::types::{Currency, Quote};
use crate::errors::WalletResult;

/// Debounced quoting with last-input-wins semantics.
///
/// Every request takes a new generation number and waits out the debounce
/// window. A request whose generation has been superseded, either during the
/// wait or while its remote calls were in flight, resolves to `None`.
pub struct QuoteDebouncer {
    client: Arc<BridgeExchangeClient>,
    window: Duration,
    generation: AtomicU64,
}

impl QuoteDebouncer {
    pub fn new(client: Arc<BridgeExchangeClient>, window: Duration) -> Self {
        Self {
            client,
            window,
            generation: AtomicU64::new(0),
        }
    }

    pub async fn request(&self, currency: &Currency, amount: f64) -> Option<WalletResult<Quote>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        tokio::time::sleep(self.window).await;
        if !self.is_current(generation) {
            log::trace!("Quote request {} superseded before fetch", generation);
            return None;
        }

        let result = self.client.quote(currency, amount).await;
        if !self.is_current(generation) {
            log::trace!("Quote request {} superseded in flight", generation);
            return None;
        }
        Some(result)
    }

    /// Invalidate any pending request, e.g. when the amount field is cleared.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::client::BridgeApi;
    use crate::bridge::ledger::ExchangeLedger;
    use crate::bridge::types::{CreatedExchange, StatusReport};
    use crate::errors::WalletError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct SlowEstimates {
        estimates: Mutex<Vec<f64>>,
        latency: Duration,
    }

    #[async_trait]
    impl BridgeApi for SlowEstimates {
        async fn currencies(&self) -> WalletResult<Vec<Currency>> {
            Ok(Vec::new())
        }

        async fn min_amount(&self, _currency: &Currency) -> WalletResult<f64> {
            Ok(0.001)
        }

        async fn estimate(&self, _currency: &Currency, amount: f64) -> WalletResult<f64> {
            self.estimates.lock().push(amount);
            tokio::time::sleep(self.latency).await;
            Ok(amount * 10.0)
        }

        async fn create(
            &self,
            _currency: &Currency,
            _amount: f64,
            _address: &str,
        ) -> WalletResult<CreatedExchange> {
            Err(WalletError::ExchangeCreation("unused".into()))
        }

        async fn status(&self, _id: &str) -> WalletResult<StatusReport> {
            Err(WalletError::NetworkError("unused".into()))
        }
    }

    fn debouncer(api: Arc<SlowEstimates>) -> Arc<QuoteDebouncer> {
        let client = BridgeExchangeClient::new(api, Arc::new(ExchangeLedger::in_memory()));
        Arc::new(QuoteDebouncer::new(Arc::new(client), Duration::from_millis(500)))
    }

    #[tokio::test(start_paused = true)]
    async fn single_request_resolves_after_window() {
        let api = Arc::new(SlowEstimates::default());
        let debouncer = debouncer(api.clone());

        let start = tokio::time::Instant::now();
        let quote = debouncer
            .request(&Currency::pair("eth", "eth"), 1.5)
            .await
            .unwrap()
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(quote.estimated_target, 15.0);
        assert_eq!(*api.estimates.lock(), vec![1.5]);
    }

    #[tokio::test(start_paused = true)]
    async fn response_superseded_in_flight_is_discarded() {
        let api = Arc::new(SlowEstimates {
            latency: Duration::from_millis(300),
            ..Default::default()
        });
        let debouncer = debouncer(api.clone());

        let first = {
            let debouncer = debouncer.clone();
            tokio::spawn(async move { debouncer.request(&Currency::pair("eth", "eth"), 1.0).await })
        };
        // first request is mid-estimate at 600ms
        tokio::time::sleep(Duration::from_millis(600)).await;
        let second = debouncer.request(&Currency::pair("eth", "eth"), 2.0).await;

        assert!(first.await.unwrap().is_none());
        assert_eq!(second.unwrap().unwrap().estimated_target, 20.0);
        assert_eq!(*api.estimates.lock(), vec![1.0, 2.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_pending_request() {
        let api = Arc::new(SlowEstimates::default());
        let debouncer = debouncer(api.clone());

        let pending = {
            let debouncer = debouncer.clone();
            tokio::spawn(async move { debouncer.request(&Currency::pair("btc", "btc"), 1.0).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.cancel();

        assert!(pending.await.unwrap().is_none());
        assert!(api.estimates.lock().is_empty());
    }
}
