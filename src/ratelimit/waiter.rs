//! Queued admission requests.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::time::Instant;

static NEXT_WAITER: AtomicU64 = AtomicU64::new(1);

/// Identifier of a queued caller, used only in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId {
    /// Process-wide monotonic sequence number
    pub seq: u64,
    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
}

impl WaiterId {
    fn next() -> Self {
        Self {
            seq: NEXT_WAITER.fetch_add(1, Ordering::Relaxed),
            created_at: Utc::now(),
        }
    }
}

impl fmt::Display for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req_{}_{}", self.seq, self.created_at.timestamp_millis())
    }
}

/// Outcome of handing a permit to a waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The caller was unblocked.
    Granted,
    /// The caller dropped its future before the permit arrived.
    Withdrawn,
}

/// One caller blocked in `acquire()`.
///
/// Ordering is positional in the limiter's queue; `enqueued_at` only feeds
/// the queued-time diagnostics.
#[derive(Debug)]
pub struct Waiter {
    id: WaiterId,
    enqueued_at: Instant,
    completion: oneshot::Sender<Instant>,
}

impl Waiter {
    /// Create a waiter and the receiver its caller suspends on.
    pub fn new(enqueued_at: Instant) -> (Self, oneshot::Receiver<Instant>) {
        let (completion, rx) = oneshot::channel();
        let waiter = Self {
            id: WaiterId::next(),
            enqueued_at,
            completion,
        };
        (waiter, rx)
    }

    pub fn id(&self) -> WaiterId {
        self.id
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Whether the caller has already given up.
    pub fn is_withdrawn(&self) -> bool {
        self.completion.is_closed()
    }

    /// Hand the caller the grant issued at `granted_at`. Consumes the
    /// waiter so it fires at most once.
    pub fn complete(self, granted_at: Instant) -> Delivery {
        match self.completion.send(granted_at) {
            Ok(()) => Delivery::Granted,
            Err(_) => Delivery::Withdrawn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let (a, _rx_a) = Waiter::new(Instant::now());
        let (b, _rx_b) = Waiter::new(Instant::now());
        assert!(b.id().seq > a.id().seq);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_id_display() {
        let (waiter, _rx) = Waiter::new(Instant::now());
        let rendered = waiter.id().to_string();
        assert!(rendered.starts_with(&format!("req_{}_", waiter.id().seq)));
    }

    #[tokio::test]
    async fn test_complete_unblocks_receiver() {
        let now = Instant::now();
        let (waiter, rx) = Waiter::new(now);
        assert!(!waiter.is_withdrawn());
        assert_eq!(waiter.complete(now), Delivery::Granted);
        assert_eq!(rx.await.unwrap(), now);
    }

    #[test]
    fn test_complete_after_receiver_dropped() {
        let (waiter, rx) = Waiter::new(Instant::now());
        drop(rx);
        assert!(waiter.is_withdrawn());
        assert_eq!(waiter.complete(Instant::now()), Delivery::Withdrawn);
    }
}
