//! Admission trait for abstracting over locked and worker-owned limiters.

use async_trait::async_trait;
use std::fmt::Debug;
use std::hash::Hash;

use super::clock::Clock;
use super::limiter::WindowLimiter;
use super::worker::LimiterHandle;
use crate::error::Result;

/// Trait for admission control implementations.
///
/// This trait abstracts over both the shared [`WindowLimiter`] and the
/// [`LimiterHandle`] of a worker task, so callers can work with either.
#[async_trait]
pub trait AdmissionControl<K>: Send + Sync
where
    K: Send + 'static,
{
    /// Register one hit for `key` and report whether it was admitted.
    async fn add(&self, key: K) -> Result<bool>;

    /// Report whether `key` is under its limit without registering a hit.
    async fn ask(&self, key: K) -> Result<bool>;

    /// Forget any record for `key`.
    async fn clear(&self, key: K) -> Result<()>;
}

#[async_trait]
impl<K, C> AdmissionControl<K> for WindowLimiter<K, C>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    C: Clock + 'static,
{
    async fn add(&self, key: K) -> Result<bool> {
        Ok(WindowLimiter::add(self, key))
    }

    async fn ask(&self, key: K) -> Result<bool> {
        Ok(WindowLimiter::ask(self, &key))
    }

    async fn clear(&self, key: K) -> Result<()> {
        WindowLimiter::clear(self, &key);
        Ok(())
    }
}

#[async_trait]
impl<K> AdmissionControl<K> for LimiterHandle<K>
where
    K: Send + 'static,
{
    async fn add(&self, key: K) -> Result<bool> {
        LimiterHandle::add(self, key).await
    }

    async fn ask(&self, key: K) -> Result<bool> {
        LimiterHandle::ask(self, key).await
    }

    async fn clear(&self, key: K) -> Result<()> {
        LimiterHandle::clear(self, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterConfig;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::worker::LimiterWorker;

    fn test_limiter() -> WindowLimiter<String, ManualClock> {
        WindowLimiter::with_clock(LimiterConfig::new(60, 2), ManualClock::new(1_700_000_000))
    }

    /// Drives any backend through the same sequence of calls.
    async fn exercise<A: AdmissionControl<String>>(backend: &A) -> Vec<bool> {
        let mut results = Vec::new();
        for _ in 0..3 {
            results.push(backend.add("client".to_string()).await.unwrap());
        }
        results.push(backend.ask("client".to_string()).await.unwrap());
        backend.clear("client".to_string()).await.unwrap();
        results.push(backend.ask("client".to_string()).await.unwrap());
        results
    }

    #[tokio::test]
    async fn test_locked_limiter_backend() {
        let limiter = test_limiter();
        assert_eq!(exercise(&limiter).await, vec![true, true, false, false, true]);
    }

    #[tokio::test]
    async fn test_worker_backend_matches_locked_limiter() {
        let (handle, _task) = LimiterWorker::spawn(test_limiter(), 8);
        assert_eq!(exercise(&handle).await, vec![true, true, false, false, true]);
    }

    #[test]
    fn test_locked_limiter_needs_no_runtime() {
        let limiter = test_limiter();
        let admitted = tokio_test::block_on(AdmissionControl::add(&limiter, "a".to_string()));
        assert!(admitted.unwrap());
    }

    #[tokio::test]
    async fn test_backend_behind_trait_object() {
        let backend: Box<dyn AdmissionControl<String>> = Box::new(test_limiter());
        assert!(backend.add("a".to_string()).await.unwrap());
        assert!(backend.ask("b".to_string()).await.unwrap());
    }
}
