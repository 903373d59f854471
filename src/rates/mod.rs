//! Exchange rate table and its sources.

mod fetcher;
mod refresher;
mod table;

pub use fetcher::{parse_rates, HttpRateFetcher, RateFetcher, DEFAULT_API_URL};
pub use refresher::{RateRefresher, RefreshHandle};
pub use table::{RateMap, RateSnapshot, RateTable};

#[cfg(test)]
pub(crate) use fetcher::StaticRateFetcher;
