//! Request evaluation.

use rust_decimal::prelude::*;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

use super::command::{Command, RequestError};
use crate::admission::{AdmissionController, Decision, Rejection};
use crate::rates::{RateSnapshot, RateTable};

/// Decimal places shown for a rate.
const RATE_SCALE: u32 = 4;
/// Decimal places shown for a converted amount.
const AMOUNT_SCALE: u32 = 2;

/// A successful result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Cross rate between two currencies
    Rate {
        from: String,
        to: String,
        rate: Decimal,
    },
    /// Converted amount in the target currency
    Converted { amount: Decimal, currency: String },
    /// Attempts left for the calling client
    Attempts { remaining: u32 },
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Rate { from, to, rate } => {
                write!(f, "1 {} = {} {}", from, display(*rate, RATE_SCALE), to)
            }
            Reply::Converted { amount, currency } => {
                write!(f, "{} {}", display(*amount, AMOUNT_SCALE), currency)
            }
            Reply::Attempts { remaining } => write!(f, "Attempts remaining: {}", remaining),
        }
    }
}

/// Round half away from zero and pad to exactly `scale` places.
fn display(value: Decimal, scale: u32) -> String {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);
    rounded.to_string()
}

/// Everything a request line can produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Reply(Reply),
    Error(RequestError),
    Rejected(Rejection),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Reply(reply) => fmt::Display::fmt(reply, f),
            Response::Error(err) => write!(f, "Error: {}", err),
            Response::Rejected(rejection) => fmt::Display::fmt(rejection, f),
        }
    }
}

/// Turns request lines into responses.
///
/// `ATTEMPTS` is answered without charging the client. Every other line is
/// charged through the admission controller first and, if admitted,
/// evaluated against a single rate table snapshot.
pub struct RequestProcessor {
    admission: Arc<AdmissionController>,
    rates: Arc<RateTable>,
}

impl RequestProcessor {
    pub fn new(admission: Arc<AdmissionController>, rates: Arc<RateTable>) -> Self {
        Self { admission, rates }
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn rates(&self) -> &Arc<RateTable> {
        &self.rates
    }

    /// Process one line from `client` at the current time.
    pub fn process(&self, client: &str, line: &str) -> Response {
        self.process_at(client, line, Instant::now())
    }

    /// Process one line from `client` at `now`.
    pub fn process_at(&self, client: &str, line: &str, now: Instant) -> Response {
        let parsed = Command::parse(line);

        if let Ok(Command::Attempts) = parsed {
            let remaining = self.admission.remaining_at(client, now);
            return Response::Reply(Reply::Attempts { remaining });
        }

        let epoch = match self.admission.check_at(client, now) {
            Decision::Allow { epoch, .. } => epoch,
            Decision::Reject(rejection) => return Response::Rejected(rejection),
        };

        let result = parsed.and_then(|command| self.evaluate(&command));
        match result {
            Ok(reply) => {
                debug!(client = %client, reply = %reply, "Request served");
                Response::Reply(reply)
            }
            Err(err) => {
                debug!(client = %client, error = %err, "Request failed");
                self.admission.refund(client, epoch);
                Response::Error(err)
            }
        }
    }

    /// Evaluate a rate command against the current table.
    pub fn evaluate(&self, command: &Command) -> Result<Reply, RequestError> {
        let snapshot = self.rates.snapshot();

        match command {
            Command::Rate { from, to } => {
                let rate = cross_rate(&snapshot, from, to)?;
                Ok(Reply::Rate {
                    from: from.clone(),
                    to: to.clone(),
                    rate,
                })
            }
            Command::Convert { amount, from, to } => {
                let from_rate = lookup(&snapshot, from)?;
                let to_rate = lookup(&snapshot, to)?;
                let converted = amount
                    .checked_mul(to_rate)
                    .and_then(|v| v.checked_div(from_rate))
                    .ok_or_else(|| {
                        RequestError::MalformedRequest("amount out of range".to_string())
                    })?;
                Ok(Reply::Converted {
                    amount: converted,
                    currency: to.clone(),
                })
            }
            Command::Attempts => Err(RequestError::MalformedRequest(
                "ATTEMPTS does not use the rate table".to_string(),
            )),
        }
    }
}

fn lookup(snapshot: &RateSnapshot, code: &str) -> Result<Decimal, RequestError> {
    let rate = snapshot
        .get(code)
        .ok_or_else(|| RequestError::UnknownCurrency(code.to_string()))?;
    trace!(code = %code, rate = %rate, "Resolved rate");
    Ok(rate)
}

fn cross_rate(snapshot: &RateSnapshot, from: &str, to: &str) -> Result<Decimal, RequestError> {
    let from_rate = lookup(snapshot, from)?;
    let to_rate = lookup(snapshot, to)?;
    to_rate
        .checked_div(from_rate)
        .ok_or_else(|| RequestError::MalformedRequest("rate out of range".to_string()))
}
