use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::client::BridgeExchangeClient;
use super::types::{ExchangeStatus, StatusReport};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// One status observation for the active exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusObservation {
    pub id: String,
    pub report: StatusReport,
    pub observed_at: DateTime<Utc>,
}

struct ActivePoll {
    id: String,
    handle: JoinHandle<()>,
}

/// Publishes observations for one poll task. Every switch of the active id
/// bumps the shared generation, so a task that outlives its id publishes
/// nothing.
struct Publisher {
    sender: watch::Sender<Option<StatusObservation>>,
    generation: Arc<AtomicU64>,
    issued: u64,
}

impl Publisher {
    /// Returns false once the task's id is no longer active.
    fn publish(&self, observation: StatusObservation) -> bool {
        // compared under the channel lock, which set_active takes after bumping
        self.sender.send_if_modified(|slot| {
            if self.generation.load(Ordering::SeqCst) != self.issued {
                return false;
            }
            *slot = Some(observation);
            true
        })
    }

    fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.issued
    }
}

/// Polls the bridge for the active exchange's status.
///
/// Remote statuses are adopted as reported. Polling starts immediately when
/// an id becomes active and stops on a terminal status, when the id changes
/// or is cleared, or when the tracker is shut down or dropped.
pub struct ExchangeStatusTracker {
    client: Arc<BridgeExchangeClient>,
    interval: Duration,
    sender: watch::Sender<Option<StatusObservation>>,
    generation: Arc<AtomicU64>,
    active: Mutex<Option<ActivePoll>>,
}

impl ExchangeStatusTracker {
    pub fn new(client: Arc<BridgeExchangeClient>, interval: Duration) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            client,
            interval: interval.max(Duration::from_millis(1)),
            sender,
            generation: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<StatusObservation>> {
        self.sender.subscribe()
    }

    /// Latest observation for the active id, if any.
    pub fn latest(&self) -> Option<StatusObservation> {
        let active = self.active_id()?;
        self.sender
            .borrow()
            .as_ref()
            .filter(|observation| observation.id == active)
            .cloned()
    }

    pub fn active_id(&self) -> Option<String> {
        self.active.lock().as_ref().map(|poll| poll.id.clone())
    }

    /// Whether a poll task is still running.
    pub fn is_polling(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .map(|poll| !poll.handle.is_finished())
            .unwrap_or(false)
    }

    /// Switch the tracked exchange. Must be called within a tokio runtime.
    ///
    /// Setting the id that is already active leaves its poll untouched.
    pub fn set_active(&self, id: Option<String>) {
        let mut active = self.active.lock();
        if let (Some(current), Some(next)) = (active.as_ref(), id.as_ref()) {
            if &current.id == next {
                return;
            }
        }

        let issued = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = active.take() {
            previous.handle.abort();
            log::debug!("Stopped polling exchange {}", previous.id);
        }
        self.sender.send_replace(None);

        if let Some(id) = id {
            let publisher = Publisher {
                sender: self.sender.clone(),
                generation: self.generation.clone(),
                issued,
            };
            let handle = tokio::spawn(poll_status(
                self.client.clone(),
                id.clone(),
                self.interval,
                publisher,
            ));
            log::info!("Tracking exchange {}", id);
            *active = Some(ActivePoll { id, handle });
        }
    }

    pub fn shutdown(&self) {
        let mut active = self.active.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = active.take() {
            previous.handle.abort();
            log::debug!("Tracker shut down while polling {}", previous.id);
        }
    }
}

impl Drop for ExchangeStatusTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn poll_status(
    client: Arc<BridgeExchangeClient>,
    id: String,
    interval: Duration,
    publisher: Publisher,
) {
    // first tick fires immediately
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut previous: Option<ExchangeStatus> = None;

    loop {
        ticker.tick().await;
        if !publisher.is_current() {
            break;
        }
        let report = match client.get_status(&id).await {
            Ok(report) => report,
            Err(err) => {
                log::warn!("Status poll for exchange {} failed: {}", id, err);
                continue;
            }
        };

        if let Some(prev) = &previous {
            if let (Some(before), Some(now)) = (prev.progress_rank(), report.status.progress_rank()) {
                if now < before {
                    log::debug!(
                        "Exchange {} moved back from {} to {}",
                        id,
                        prev,
                        report.status
                    );
                }
            }
        }
        if let Err(err) = client.ledger().record_status(&id, &report) {
            log::debug!("Status for {} not recorded locally: {}", id, err);
        }

        let terminal = report.status.is_terminal();
        previous = Some(report.status.clone());
        let published = publisher.publish(StatusObservation {
            id: id.clone(),
            report,
            observed_at: Utc::now(),
        });
        if !published {
            log::debug!("Dropped status for exchange {} after it went inactive", id);
            break;
        }

        if terminal {
            log::info!(
                "Exchange {} reached {}",
                id,
                previous.as_ref().map(|s| s.as_str()).unwrap_or_default()
            );
            break;
        }
    }
}
