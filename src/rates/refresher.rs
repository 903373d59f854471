//! Background refresh of the rate table.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::fetcher::{HttpRateFetcher, RateFetcher};
use super::table::RateTable;
use crate::config::RatesConfig;
use crate::error::Result;

/// Periodically refreshes a [`RateTable`] from a [`RateFetcher`].
///
/// Failures are logged by the table and retried on the next tick only.
pub struct RateRefresher {
    table: Arc<RateTable>,
    fetcher: Arc<dyn RateFetcher>,
    base: String,
    interval: Duration,
}

impl RateRefresher {
    pub fn new(
        table: Arc<RateTable>,
        fetcher: Arc<dyn RateFetcher>,
        base: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            table,
            fetcher,
            base: base.into(),
            interval,
        }
    }

    /// Create a refresher that polls the HTTP quote provider in `config`.
    pub fn from_config(table: Arc<RateTable>, config: &RatesConfig) -> Result<Self> {
        let fetcher = HttpRateFetcher::new(config.api_url.clone(), config.request_timeout())?;
        Ok(Self::new(
            table,
            Arc::new(fetcher),
            config.base_currency.clone(),
            config.refresh_interval(),
        ))
    }

    /// Refresh once, now. Returns whether the table was updated.
    pub async fn refresh_now(&self) -> bool {
        self.table
            .refresh(self.fetcher.as_ref(), &self.base)
            .await
            .is_ok()
    }

    /// Spawn the refresh loop. The first refresh happens one interval from
    /// now; call [`refresh_now`](Self::refresh_now) first for an immediate one.
    pub fn spawn(self) -> RefreshHandle {
        info!(
            base = %self.base,
            interval_secs = self.interval.as_secs(),
            "Starting exchange rate refresher"
        );

        let task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                debug!("Scheduled exchange rate refresh");
                self.refresh_now().await;
            }
        });
        RefreshHandle { task }
    }
}

/// A running refresh loop.
pub struct RefreshHandle {
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Cancel the loop and wait for it to finish.
    ///
    /// A refresh in flight is dropped; the table keeps its last snapshot.
    pub async fn stop(self) {
        self.task.abort();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "Exchange rate refresher exited abnormally");
            }
        }
        info!("Exchange rate refresher stopped");
    }
}
