//! Rolling record of grant timestamps.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Grant timestamps still inside the rolling window, oldest first.
///
/// Entries are only appended at the back with non-decreasing instants, so
/// expired grants always form a prefix and purging is a front trim.
#[derive(Debug)]
pub struct GrantLog {
    grants: VecDeque<Instant>,
    window: Duration,
}

impl GrantLog {
    /// Create an empty log for the given window length.
    pub fn new(window: Duration) -> Self {
        Self {
            grants: VecDeque::new(),
            window,
        }
    }

    /// Drop every grant with `now - grant >= window`.
    ///
    /// Returns how many grants were removed.
    pub fn purge(&mut self, now: Instant) -> usize {
        let mut purged = 0;
        while let Some(&front) = self.grants.front() {
            if now.saturating_duration_since(front) >= self.window {
                self.grants.pop_front();
                purged += 1;
            } else {
                break;
            }
        }
        purged
    }

    /// Record a grant issued at `at`.
    pub fn record(&mut self, at: Instant) {
        self.grants.push_back(at);
    }

    /// Return the grant issued at `at` to the window.
    ///
    /// Returns false when no such grant is live, e.g. it has already expired.
    pub fn revoke(&mut self, at: Instant) -> bool {
        match self.grants.iter().rposition(|&grant| grant == at) {
            Some(index) => {
                self.grants.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of grants currently held, without purging.
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// The oldest live grant, if any.
    pub fn oldest(&self) -> Option<Instant> {
        self.grants.front().copied()
    }

    /// How long until the oldest grant leaves the window.
    ///
    /// Zero when the log is empty or the oldest grant is already stale.
    pub fn until_next_expiry(&self, now: Instant) -> Duration {
        match self.oldest() {
            Some(oldest) => (oldest + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}
