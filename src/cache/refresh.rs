//! Background revalidation of stale entries.
//!
//! A stale hit is answered immediately; the refresh re-issues the same
//! request against the public listener with the bypass header so it lands
//! on the fill path instead of reading the stale entry again.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Url};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    lock::{DistributedLock, LockLease},
    middleware::BYPASS_HEADER,
    stats::CacheStats,
};

#[derive(Debug, Error)]
pub enum RevalidateError {
    #[error("invalid revalidation URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("revalidation request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("origin answered {0}")]
    Status(u16),
    #[error("revalidation timed out after {0:?}")]
    Timeout(Duration),
}

/// The request to replay for a stale key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevalidationRequest {
    pub key: String,
    pub path_and_query: String,
}

#[async_trait]
pub trait Revalidator: Send + Sync {
    async fn revalidate(&self, request: &RevalidationRequest) -> Result<(), RevalidateError>;
}

/// Replays requests over HTTP against this process's public listener.
#[derive(Clone, Debug)]
pub struct HttpRevalidator {
    client: Client,
    base: Url,
}

impl HttpRevalidator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RevalidateError> {
        let base = Url::parse(base_url)?.join("/")?;
        let client = Client::builder()
            .user_agent(concat!("motorway-revalidate/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client, base })
    }
}

#[async_trait]
impl Revalidator for HttpRevalidator {
    async fn revalidate(&self, request: &RevalidationRequest) -> Result<(), RevalidateError> {
        let url = self.base.join(&request.path_and_query)?;
        let response = self
            .client
            .get(url)
            .header(BYPASS_HEADER, "1")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RevalidateError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Run one revalidation in the background and release `lease` when it
/// finishes, whatever the outcome.
pub fn spawn_revalidation(
    revalidator: Arc<dyn Revalidator>,
    lock: DistributedLock,
    lease: LockLease,
    stats: Arc<CacheStats>,
    request: RevalidationRequest,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let outcome = match tokio::time::timeout(timeout, revalidator.revalidate(&request)).await {
            Ok(result) => result,
            Err(_) => Err(RevalidateError::Timeout(timeout)),
        };

        match &outcome {
            Ok(()) => debug!(
                cache = "response",
                key = %request.key,
                "stale entry revalidated"
            ),
            Err(err) => warn!(
                cache = "response",
                key = %request.key,
                error = %err,
                "background revalidation failed"
            ),
        }
        stats.record_revalidation(outcome.is_ok());
        lock.release(&lease).await;
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::store::{KvStore, MemoryStore};

    struct Slow {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Revalidator for Slow {
        async fn revalidate(&self, _request: &RevalidationRequest) -> Result<(), RevalidateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    fn request() -> RevalidationRequest {
        RevalidationRequest {
            key: "cache:v2:cars:/api/cars:".to_string(),
            path_and_query: "/api/cars".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lock_released_after_success() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let lock = DistributedLock::new(store.clone());
        let stats = Arc::new(CacheStats::new());
        let revalidator = Arc::new(Slow {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(5),
        });
        let request = request();

        let lease = lock
            .try_acquire(&request.key, Duration::from_secs(10))
            .await
            .unwrap()
            .expect("free lock");
        spawn_revalidation(
            revalidator.clone(),
            lock.clone(),
            lease,
            stats.clone(),
            request.clone(),
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        assert_eq!(revalidator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot().revalidations, 1);
        assert!(
            lock.try_acquire(&request.key, Duration::from_secs(10))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_recorded_and_releases_lock() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let lock = DistributedLock::new(store);
        let stats = Arc::new(CacheStats::new());
        let revalidator = Arc::new(Slow {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(120),
        });
        let request = request();

        let lease = lock
            .try_acquire(&request.key, Duration::from_secs(300))
            .await
            .unwrap()
            .expect("free lock");
        spawn_revalidation(
            revalidator,
            lock.clone(),
            lease,
            stats.clone(),
            request.clone(),
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        assert_eq!(stats.snapshot().revalidation_failures, 1);
        assert!(
            lock.try_acquire(&request.key, Duration::from_secs(10))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn http_revalidator_rejects_bad_base() {
        assert!(matches!(
            HttpRevalidator::new("not a url", Duration::from_secs(1)),
            Err(RevalidateError::Url(_))
        ));
    }
}
