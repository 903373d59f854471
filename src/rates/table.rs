//! Shared exchange rate table.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::fetcher::RateFetcher;
use crate::error::FetchError;

/// Currency code to rate, all quoted against one base currency.
pub type RateMap = HashMap<String, Decimal>;

/// One complete, immutable set of rates from a single fetch.
#[derive(Debug, Clone, Default)]
pub struct RateSnapshot {
    base: String,
    rates: RateMap,
    fetched_at: Option<DateTime<Utc>>,
}

impl RateSnapshot {
    pub fn new(base: impl Into<String>, rates: RateMap, fetched_at: DateTime<Utc>) -> Self {
        Self {
            base: base.into(),
            rates,
            fetched_at: Some(fetched_at),
        }
    }

    /// Rate for an upper-case currency code.
    pub fn get(&self, code: &str) -> Option<Decimal> {
        self.rates.get(code).copied()
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// When this snapshot was fetched; `None` for the initial empty table.
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// The rate table shared by every connection.
///
/// Readers take a cheap `Arc` clone of the current snapshot. A refresh builds
/// the new snapshot outside the lock and only takes the write lock to swap
/// the pointer, so readers never wait on the network and never observe a
/// partially applied update.
pub struct RateTable {
    current: RwLock<Arc<RateSnapshot>>,
}

impl RateTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(RateSnapshot::default())),
        }
    }

    /// Create a table already holding `snapshot`.
    pub fn with_snapshot(snapshot: RateSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<RateSnapshot> {
        self.current.read().clone()
    }

    /// Look up a single rate in the current snapshot.
    pub fn lookup(&self, code: &str) -> Option<Decimal> {
        self.current.read().get(code)
    }

    /// Replace the whole table.
    pub fn replace(&self, snapshot: RateSnapshot) -> Arc<RateSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.current.write() = snapshot.clone();
        snapshot
    }

    /// Fetch fresh rates for `base` and swap them in.
    ///
    /// On failure the previous snapshot stays in place and the error is
    /// returned to the caller.
    pub async fn refresh(
        &self,
        fetcher: &dyn RateFetcher,
        base: &str,
    ) -> Result<Arc<RateSnapshot>, FetchError> {
        debug!(base = %base, "Refreshing exchange rates");

        match fetcher.fetch(base).await {
            Ok(rates) => {
                let snapshot = self.replace(RateSnapshot::new(base, rates, Utc::now()));
                info!(
                    base = %base,
                    entries = snapshot.len(),
                    "Exchange rates updated"
                );
                Ok(snapshot)
            }
            Err(e) => {
                warn!(
                    base = %base,
                    error = %e,
                    "Exchange rate refresh failed, keeping previous table"
                );
                Err(e)
            }
        }
    }
}

impl Default for RateTable {
    fn default() -> Self {
        Self::new()
    }
}
