//! Per-client admission controller.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use super::record::{ClientRecord, ClientState};

/// Which admitted requests consume an attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptCharging {
    /// Every request that passes admission consumes an attempt
    #[default]
    Admitted,
    /// Admitted requests that fail processing are refunded
    Successful,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed; `epoch` identifies the window the attempt
    /// was charged in and is needed to refund it
    Allow { remaining: u32, epoch: u64 },
    /// The request is refused
    Reject(Rejection),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The client just ran out of attempts and is now blocked
    LimitExceeded { retry_after: Duration },
    /// The client is still serving an earlier block
    StillBlocked { retry_after: Duration },
}

impl Rejection {
    pub fn retry_after(&self) -> Duration {
        match self {
            Rejection::LimitExceeded { retry_after } | Rejection::StillBlocked { retry_after } => {
                *retry_after
            }
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Round up so a client never retries a moment too early.
        let after = self.retry_after();
        let secs = after.as_secs() + u64::from(after.subsec_nanos() > 0);
        match self {
            Rejection::LimitExceeded { .. } => {
                write!(f, "Request limit exceeded. Try again in {} seconds.", secs)
            }
            Rejection::StillBlocked { .. } => {
                write!(f, "Still blocked. Try again in {} seconds.", secs)
            }
        }
    }
}

/// Tracks attempts and blocks per client identity.
///
/// Each check holds the client's map entry for the whole read-modify-write,
/// so concurrent requests from one identity are serialized while different
/// identities proceed independently. Blocks use a fixed window: rejected
/// requests do not move `blocked_at`.
pub struct AdmissionController {
    /// Records indexed by client identity
    clients: DashMap<String, ClientRecord>,
    /// Requests allowed before a client is blocked
    max_attempts: u32,
    /// How long a block lasts
    retry_window: Duration,
    /// Which requests consume attempts
    charging: AttemptCharging,
}

impl AdmissionController {
    /// Create a controller with the default charging policy.
    pub fn new(max_attempts: u32, retry_window: Duration) -> Self {
        Self::with_charging(max_attempts, retry_window, AttemptCharging::default())
    }

    pub fn with_charging(
        max_attempts: u32,
        retry_window: Duration,
        charging: AttemptCharging,
    ) -> Self {
        Self {
            clients: DashMap::new(),
            max_attempts,
            retry_window,
            charging,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retry_window(&self) -> Duration {
        self.retry_window
    }

    pub fn charging(&self) -> AttemptCharging {
        self.charging
    }

    /// Check and charge a request from `client` at the current time.
    pub fn check(&self, client: &str) -> Decision {
        self.check_at(client, Instant::now())
    }

    /// Check and charge a request from `client` at `now`.
    pub fn check_at(&self, client: &str, now: Instant) -> Decision {
        let max_attempts = self.max_attempts;
        let retry_window = self.retry_window;

        self.with_record(client, |record| {
            match record.state(now, retry_window) {
                ClientState::Blocked { retry_after } => {
                    debug!(client = %client, ?retry_after, "Client still blocked");
                    return Decision::Reject(Rejection::StillBlocked { retry_after });
                }
                ClientState::CooledDown => {
                    info!(client = %client, "Client unblocked");
                    record.unblock();
                }
                ClientState::Allowed => {}
            }

            if record.attempts >= max_attempts {
                record.block(now);
                info!(
                    client = %client,
                    max_attempts = max_attempts,
                    "Client blocked for exceeding attempts"
                );
                return Decision::Reject(Rejection::LimitExceeded {
                    retry_after: retry_window,
                });
            }

            record.attempts += 1;
            let remaining = record.remaining(max_attempts);
            debug!(
                client = %client,
                attempts = record.attempts,
                remaining = remaining,
                "Request admitted"
            );
            Decision::Allow {
                remaining,
                epoch: record.epoch,
            }
        })
    }

    /// Attempts left for `client` at the current time, without consuming one.
    pub fn remaining(&self, client: &str) -> u32 {
        self.remaining_at(client, Instant::now())
    }

    /// Attempts left for `client` at `now`, without consuming one.
    ///
    /// A cooled-down client reports the full allowance it will get back on
    /// its next request; the record itself is left untouched.
    pub fn remaining_at(&self, client: &str, now: Instant) -> u32 {
        let Some(record) = self.clients.get(client) else {
            return self.max_attempts;
        };
        match record.state(now, self.retry_window) {
            ClientState::Allowed => record.remaining(self.max_attempts),
            ClientState::Blocked { .. } => 0,
            ClientState::CooledDown => self.max_attempts,
        }
    }

    /// Give back the attempt charged for a request that failed processing.
    ///
    /// `epoch` is the one returned by the admitting [`Decision::Allow`]. Only
    /// has an effect under [`AttemptCharging::Successful`], never touches a
    /// blocked client, and is ignored once the client has been reset since
    /// the charge.
    pub fn refund(&self, client: &str, epoch: u64) {
        if self.charging != AttemptCharging::Successful {
            return;
        }
        if let Some(mut record) = self.clients.get_mut(client) {
            if record.epoch != epoch {
                trace!(client = %client, "Refund skipped for a previous window");
                return;
            }
            if record.blocked_at.is_none() && record.attempts > 0 {
                record.attempts -= 1;
                trace!(client = %client, attempts = record.attempts, "Attempt refunded");
            }
        }
    }

    /// Copy of the record for `client`, if one exists.
    pub fn record(&self, client: &str) -> Option<ClientRecord> {
        self.clients.get(client).map(|r| r.clone())
    }

    /// Get the number of tracked clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Forget all clients.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.clients.clear();
    }

    /// Run `f` with exclusive access to the record for `client`, creating it
    /// on first sight.
    fn with_record<R>(&self, client: &str, f: impl FnOnce(&mut ClientRecord) -> R) -> R {
        if let Some(mut record) = self.clients.get_mut(client) {
            return f(&mut *record);
        }
        let mut record = self.clients.entry(client.to_string()).or_default();
        f(&mut *record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_first_request_creates_record() {
        let controller = AdmissionController::new(3, WINDOW);
        assert_eq!(controller.client_count(), 0);

        let decision = controller.check("10.0.0.1");

        assert_eq!(
            decision,
            Decision::Allow {
                remaining: 2,
                epoch: 0
            }
        );
        assert_eq!(controller.client_count(), 1);
        assert_eq!(controller.record("10.0.0.1").unwrap().attempts, 1);
    }

    #[test]
    fn test_limit_exceeded_after_max_attempts() {
        let controller = AdmissionController::new(2, WINDOW);
        let now = Instant::now();

        assert_eq!(
            controller.check_at("a", now),
            Decision::Allow {
                remaining: 1,
                epoch: 0
            }
        );
        assert_eq!(
            controller.check_at("a", now),
            Decision::Allow {
                remaining: 0,
                epoch: 0
            }
        );
        assert_eq!(
            controller.check_at("a", now),
            Decision::Reject(Rejection::LimitExceeded {
                retry_after: WINDOW
            })
        );
        assert_eq!(controller.record("a").unwrap().blocked_at, Some(now));
    }

    #[test]
    fn test_still_blocked_within_window() {
        let controller = AdmissionController::new(1, WINDOW);
        let start = Instant::now();

        controller.check_at("a", start);
        controller.check_at("a", start);

        let decision = controller.check_at("a", start + Duration::from_secs(20));
        assert_eq!(
            decision,
            Decision::Reject(Rejection::StillBlocked {
                retry_after: Duration::from_secs(40)
            })
        );
    }

    #[test]
    fn test_block_window_is_fixed() {
        let controller = AdmissionController::new(1, WINDOW);
        let start = Instant::now();

        controller.check_at("a", start);
        controller.check_at("a", start);
        for secs in [10, 30, 59] {
            let decision = controller.check_at("a", start + Duration::from_secs(secs));
            assert!(!decision.is_allowed());
        }

        assert_eq!(controller.record("a").unwrap().blocked_at, Some(start));
        assert!(controller.check_at("a", start + WINDOW).is_allowed());
    }

    #[test]
    fn test_cooled_down_client_is_reset() {
        let controller = AdmissionController::new(2, WINDOW);
        let start = Instant::now();

        controller.check_at("a", start);
        controller.check_at("a", start);
        controller.check_at("a", start);

        let later = start + WINDOW + Duration::from_secs(1);
        assert_eq!(
            controller.check_at("a", later),
            Decision::Allow {
                remaining: 1,
                epoch: 1
            }
        );
        let record = controller.record("a").unwrap();
        assert_eq!(record.attempts, 1);
        assert_eq!(record.blocked_at, None);
        assert_eq!(record.epoch, 1);
    }

    #[test]
    fn test_remaining_does_not_consume() {
        let controller = AdmissionController::new(3, WINDOW);
        let now = Instant::now();

        assert_eq!(controller.remaining_at("a", now), 3);
        assert_eq!(controller.client_count(), 0);

        controller.check_at("a", now);
        assert_eq!(controller.remaining_at("a", now), 2);
        assert_eq!(controller.remaining_at("a", now), 2);
        assert_eq!(controller.record("a").unwrap().attempts, 1);
    }

    #[test]
    fn test_remaining_while_blocked_and_after() {
        let controller = AdmissionController::new(1, WINDOW);
        let start = Instant::now();

        controller.check_at("a", start);
        controller.check_at("a", start);

        assert_eq!(controller.remaining_at("a", start + Duration::from_secs(5)), 0);
        assert_eq!(controller.remaining_at("a", start + WINDOW), 1);
        // The query does not clear the block itself.
        assert_eq!(controller.record("a").unwrap().blocked_at, Some(start));
    }

    #[test]
    fn test_refund_only_under_successful_charging() {
        let admitted = AdmissionController::new(3, WINDOW);
        assert_eq!(admitted.charging(), AttemptCharging::Admitted);
        admitted.check("a");
        admitted.refund("a", 0);
        assert_eq!(admitted.record("a").unwrap().attempts, 1);

        let successful =
            AdmissionController::with_charging(3, WINDOW, AttemptCharging::Successful);
        assert_eq!(successful.charging(), AttemptCharging::Successful);
        successful.check("a");
        successful.refund("a", 0);
        assert_eq!(successful.record("a").unwrap().attempts, 0);
        successful.refund("a", 0);
        assert_eq!(successful.record("a").unwrap().attempts, 0);
    }

    #[test]
    fn test_refund_ignores_blocked_client() {
        let controller =
            AdmissionController::with_charging(1, WINDOW, AttemptCharging::Successful);
        controller.check("a");
        controller.check("a");
        controller.refund("a", 0);

        let record = controller.record("a").unwrap();
        assert_eq!(record.attempts, 1);
        assert!(record.blocked_at.is_some());
    }

    #[test]
    fn test_refund_from_previous_window_is_ignored() {
        let controller =
            AdmissionController::with_charging(1, WINDOW, AttemptCharging::Successful);
        let start = Instant::now();

        // Admitted in the first window; its processing is still in flight.
        let Decision::Allow { epoch: stale, .. } = controller.check_at("a", start) else {
            panic!("first request should be admitted");
        };
        assert!(!controller.check_at("a", start).is_allowed());

        // The block expires and the client is charged again in a new window.
        let Decision::Allow { epoch: fresh, .. } = controller.check_at("a", start + WINDOW) else {
            panic!("request after the window should be admitted");
        };
        assert_ne!(stale, fresh);

        // The late refund for the first request must not free the new attempt.
        controller.refund("a", stale);
        assert_eq!(controller.record("a").unwrap().attempts, 1);
        assert!(!controller.check_at("a", start + WINDOW).is_allowed());
    }

    #[test]
    fn test_refund_in_current_window_after_reset() {
        let controller =
            AdmissionController::with_charging(1, WINDOW, AttemptCharging::Successful);
        let start = Instant::now();

        controller.check_at("a", start);
        controller.check_at("a", start);
        let Decision::Allow { epoch, .. } = controller.check_at("a", start + WINDOW) else {
            panic!("request after the window should be admitted");
        };

        controller.refund("a", epoch);
        assert_eq!(controller.record("a").unwrap().attempts, 0);
    }

    #[test]
    fn test_clients_are_independent() {
        let controller = AdmissionController::new(1, WINDOW);
        let now = Instant::now();

        controller.check_at("a", now);
        assert!(!controller.check_at("a", now).is_allowed());
        assert!(controller.check_at("b", now).is_allowed());
    }

    #[test]
    fn test_rejection_messages() {
        let exceeded = Rejection::LimitExceeded {
            retry_after: Duration::from_secs(60),
        };
        assert_eq!(
            exceeded.to_string(),
            "Request limit exceeded. Try again in 60 seconds."
        );

        let blocked = Rejection::StillBlocked {
            retry_after: Duration::from_millis(12_300),
        };
        assert_eq!(blocked.to_string(), "Still blocked. Try again in 13 seconds.");
    }

    #[test]
    fn test_clear() {
        let controller = AdmissionController::new(3, WINDOW);
        controller.check("a");
        controller.check("b");
        assert_eq!(controller.client_count(), 2);

        controller.clear();
        assert_eq!(controller.client_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_same_client_admit_exactly_max() {
        let controller = Arc::new(AdmissionController::new(5, WINDOW));
        let now = Instant::now();

        let tasks = (0..64).map(|_| {
            let controller = controller.clone();
            tokio::spawn(async move { controller.check_at("shared", now) })
        });
        let decisions: Vec<Decision> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let allowed = decisions.iter().filter(|d| d.is_allowed()).count();
        assert_eq!(allowed, 5);
        assert_eq!(controller.record("shared").unwrap().attempts, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_distinct_clients_are_independent() {
        let controller = Arc::new(AdmissionController::new(2, WINDOW));
        let now = Instant::now();

        let tasks = (0..32).map(|i| {
            let controller = controller.clone();
            tokio::spawn(async move {
                let client = format!("10.0.0.{}", i);
                (
                    controller.check_at(&client, now),
                    controller.check_at(&client, now),
                )
            })
        });

        for result in join_all(tasks).await {
            let (first, second) = result.unwrap();
            assert!(first.is_allowed());
            assert!(second.is_allowed());
        }
        assert_eq!(controller.client_count(), 32);
    }
}
