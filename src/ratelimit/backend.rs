//! Admission trait for abstracting over limiter implementations.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use super::limiter::WindowLimiter;
use crate::error::Result;

/// Something that admits units of work.
///
/// Dispatchers and request handlers depend on this trait rather than on
/// `WindowLimiter` directly.
#[async_trait]
pub trait Admission: Send + Sync {
    /// Wait until one unit of work may proceed.
    async fn admit(&self) -> Result<()>;

    /// Like `admit`, but give up after `timeout`.
    async fn admit_timeout(&self, timeout: Duration) -> Result<()>;

    /// Admit, then run `work` to completion.
    async fn run<F>(&self, work: F) -> Result<F::Output>
    where
        Self: Sized,
        F: Future + Send,
        F::Output: Send,
    {
        self.admit().await?;
        Ok(work.await)
    }
}

#[async_trait]
impl Admission for WindowLimiter {
    async fn admit(&self) -> Result<()> {
        self.acquire().await
    }

    async fn admit_timeout(&self, timeout: Duration) -> Result<()> {
        self.acquire_timeout(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_for_admission() {
        let limiter = Arc::new(WindowLimiter::new(1, Duration::from_millis(400)).unwrap());
        let start = Instant::now();

        let first = limiter.run(async { 1 }).await.unwrap();
        let second = limiter.run(async move { start.elapsed() }).await.unwrap();

        assert_eq!(first, 1);
        assert!(second >= Duration::from_millis(400), "{:?}", second);
    }

    #[tokio::test]
    async fn test_trait_object_admits() {
        let limiter: Arc<dyn Admission> =
            Arc::new(WindowLimiter::new(0, Duration::ZERO).unwrap());
        limiter.admit().await.unwrap();
        limiter.admit_timeout(Duration::from_millis(1)).await.unwrap();
    }
}
