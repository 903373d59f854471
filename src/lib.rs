//! Currency Exchange - line-based exchange rate service
//!
//! Clients send `RATE`, `CONVERT` and `ATTEMPTS` commands over a persistent
//! TCP connection. Every client identity gets a fixed number of attempts and
//! is blocked for a retry window once they are used up. Rates come from a
//! periodically refreshed table that requests read without waiting on the
//! network.

pub mod admission;
pub mod config;
pub mod error;
pub mod processor;
pub mod rates;
pub mod server;
