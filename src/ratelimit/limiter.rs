//! Sliding-window admission controller.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::waiter::{Delivery, Waiter};
use super::window::GrantLog;
use crate::config::LimiterConfig;
use crate::error::{Result, SluiceError};

/// A limiter admitting at most `limit` callers per rolling `window`.
///
/// Callers that cannot be admitted immediately queue up and are released in
/// arrival order by a single background pump task. Cloning is cheap and every
/// clone shares the same quota.
#[derive(Clone)]
pub struct WindowLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    /// Permits per window; zero disables limiting
    limit: usize,
    /// Length of the rolling window
    window: Duration,
    state: Mutex<State>,
    /// Pokes a sleeping pump when a grant is handed back early
    wakeup: Notify,
}

/// Everything the pump mutates. Never locked across an await point.
struct State {
    grants: GrantLog,
    queue: VecDeque<Waiter>,
    /// Set while a pump task owns the queue
    pumping: bool,
}

/// What the pump should do after one step.
enum Step {
    /// Re-check right away.
    Continue,
    /// Quota exhausted; sleep until the oldest grant expires.
    Wait(Instant),
    /// Queue drained.
    Idle,
}

impl WindowLimiter {
    /// Create a limiter granting `limit` permits per `window`.
    ///
    /// A `limit` of zero disables limiting. A zero `window` is rejected when
    /// limiting is enabled.
    pub fn new(limit: usize, window: Duration) -> Result<Self> {
        if limit > 0 && window.is_zero() {
            return Err(SluiceError::Config(format!(
                "window must be greater than zero when limit is {}",
                limit
            )));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                limit,
                window,
                state: Mutex::new(State {
                    grants: GrantLog::new(window),
                    queue: VecDeque::new(),
                    pumping: false,
                }),
                wakeup: Notify::new(),
            }),
        })
    }

    /// Create a limiter from its configuration section.
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        Self::new(config.limit, config.window())
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Whether limiting is turned off (`limit == 0`).
    pub fn is_disabled(&self) -> bool {
        self.inner.limit == 0
    }

    /// Wait for a permit.
    ///
    /// Completes immediately when nobody is queued and the window has room,
    /// otherwise queues behind earlier callers. Dropping the returned future
    /// withdraws the caller without consuming quota.
    pub async fn acquire(&self) -> Result<()> {
        if self.is_disabled() {
            return Ok(());
        }

        let (rx, start_pump) = {
            let mut state = self.inner.state.lock();
            let now = Instant::now();
            state.grants.purge(now);

            if state.queue.is_empty() && state.grants.len() < self.inner.limit {
                state.grants.record(now);
                trace!(active = state.grants.len(), "Permit granted without queueing");
                return Ok(());
            }

            let (waiter, rx) = Waiter::new(now);
            debug!(
                waiter = %waiter.id(),
                queued = state.queue.len() + 1,
                "Queued for a permit"
            );
            state.queue.push_back(waiter);

            let start_pump = !state.pumping;
            state.pumping = true;
            (rx, start_pump)
        };

        if start_pump {
            tokio::spawn(pump(self.inner.clone()));
        }

        PendingPermit {
            rx,
            inner: &self.inner,
            observed: false,
        }
        .wait()
        .await
    }

    /// Wait for a permit for at most `timeout`.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => {
                debug!(timeout = ?timeout, "Gave up waiting for a permit");
                Err(SluiceError::Timeout(timeout))
            }
        }
    }

    /// Number of callers still waiting for a permit.
    pub fn queue_length(&self) -> usize {
        self.inner.state.lock().waiting()
    }

    /// Number of grants still inside the window.
    pub fn active_count(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.grants.purge(Instant::now());
        state.grants.len()
    }
}

impl fmt::Debug for WindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("WindowLimiter")
            .field("limit", &self.inner.limit)
            .field("window", &self.inner.window)
            .field("queued", &state.waiting())
            .field("grants", &state.grants.len())
            .field("pumping", &state.pumping)
            .finish()
    }
}

impl State {
    /// Queued waiters whose callers are still listening.
    fn waiting(&self) -> usize {
        self.queue.iter().filter(|w| !w.is_withdrawn()).count()
    }

    /// Advance the queue by at most one waiter.
    fn step(&mut self, limit: usize, now: Instant) -> Step {
        self.grants.purge(now);

        match self.queue.front().map(Waiter::is_withdrawn) {
            None => return Step::Idle,
            Some(true) => {
                if let Some(waiter) = self.queue.pop_front() {
                    debug!(waiter = %waiter.id(), "Discarding withdrawn waiter");
                }
                return Step::Continue;
            }
            Some(false) => {}
        }

        if self.grants.len() < limit {
            if let Some(waiter) = self.queue.pop_front() {
                let id = waiter.id();
                let queued_for = now.saturating_duration_since(waiter.enqueued_at());
                self.grants.record(now);

                match waiter.complete(now) {
                    Delivery::Granted => {
                        debug!(waiter = %id, queued_for = ?queued_for, "Permit granted");
                    }
                    Delivery::Withdrawn => {
                        self.grants.revoke(now);
                        debug!(waiter = %id, "Waiter withdrew before grant");
                    }
                }
            }
            return Step::Continue;
        }

        let wait = self.grants.until_next_expiry(now);
        if wait.is_zero() {
            Step::Continue
        } else {
            Step::Wait(now + wait)
        }
    }
}

/// Drain the queue, granting permits as the window frees up.
async fn pump(inner: Arc<Inner>) {
    let mut guard = PumpGuard {
        inner: &inner,
        armed: true,
    };
    trace!("Pump started");

    loop {
        let deadline = {
            let mut state = inner.state.lock();
            match state.step(inner.limit, Instant::now()) {
                Step::Continue => continue,
                Step::Wait(deadline) => deadline,
                Step::Idle => {
                    // Lowered under the lock that observed the empty queue.
                    state.pumping = false;
                    guard.armed = false;
                    trace!("Pump idle");
                    return;
                }
            }
        };

        trace!(deadline = ?deadline, "Quota exhausted, waiting for oldest grant to expire");
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = inner.wakeup.notified() => trace!("Pump woken by a returned grant"),
        }
    }
}

/// A queued caller's end of the completion channel.
///
/// If the caller goes away after the pump delivered its grant but before the
/// grant was observed, the grant goes back to the window.
struct PendingPermit<'a> {
    rx: oneshot::Receiver<Instant>,
    inner: &'a Inner,
    observed: bool,
}

impl PendingPermit<'_> {
    async fn wait(mut self) -> Result<()> {
        let delivered = (&mut self.rx).await;
        self.observed = true;
        delivered.map(|_| ()).map_err(|_| SluiceError::Closed)
    }
}

impl Drop for PendingPermit<'_> {
    fn drop(&mut self) {
        if self.observed {
            return;
        }
        self.rx.close();
        if let Ok(granted_at) = self.rx.try_recv() {
            let returned = self.inner.state.lock().grants.revoke(granted_at);
            debug!(returned = returned, "Caller left before observing its grant");
            self.inner.wakeup.notify_one();
        }
    }
}

/// Lowers the pumping flag if the pump exits other than by draining the queue.
///
/// Waiters left behind are dropped so their callers fail with `Closed`
/// instead of hanging.
struct PumpGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for PumpGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.inner.state.lock();
        let stranded = state.queue.len();
        state.queue.clear();
        state.pumping = false;
        warn!(stranded = stranded, "Pump stopped with callers still queued");
    }
}
