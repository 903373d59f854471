//! Per-client admission record.

use std::time::{Duration, Instant};

/// Admission state of a client at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// The client may proceed while it has attempts left
    Allowed,
    /// The client is blocked for the remaining duration
    Blocked { retry_after: Duration },
    /// The block has expired but has not been cleared yet
    CooledDown,
}

/// Bookkeeping for one client identity.
///
/// `blocked_at` is set exactly while the client is blocked (or cooled down
/// and waiting for its next request to clear the block).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientRecord {
    /// Requests consumed since the last reset
    pub attempts: u32,
    /// When the client was blocked
    pub blocked_at: Option<Instant>,
    /// Number of blocks this client has served; attempts charged under an
    /// earlier epoch cannot be refunded
    pub epoch: u64,
}

impl ClientRecord {
    /// Derive the state of this record at `now`.
    pub fn state(&self, now: Instant, retry_window: Duration) -> ClientState {
        match self.blocked_at {
            None => ClientState::Allowed,
            Some(blocked_at) => {
                let elapsed = now.saturating_duration_since(blocked_at);
                if elapsed < retry_window {
                    ClientState::Blocked {
                        retry_after: retry_window - elapsed,
                    }
                } else {
                    ClientState::CooledDown
                }
            }
        }
    }

    /// Place the client in the blocked state.
    pub fn block(&mut self, now: Instant) {
        self.blocked_at = Some(now);
    }

    /// Clear an expired block and start counting afresh.
    pub fn unblock(&mut self) {
        self.blocked_at = None;
        self.attempts = 0;
        self.epoch += 1;
    }

    /// Attempts left before the client is blocked.
    pub fn remaining(&self, max_attempts: u32) -> u32 {
        max_attempts.saturating_sub(self.attempts)
    }
}
