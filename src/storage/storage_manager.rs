use super::{BatchDeleteResult, Container, ObjectPage, Storage};
use crate::config::RetrySettings;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub request_timeout: Duration,
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: settings.initial_backoff(),
            request_timeout: settings.request_timeout(),
        }
    }
}

/// Wraps a backend so every call gets a timeout and bounded retries for
/// transient failures. Permanent rejections pass straight through.
pub struct StorageManager {
    inner: Arc<dyn Storage>,
    policy: RetryPolicy,
}

impl StorageManager {
    pub fn new(inner: Arc<dyn Storage>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        resource: &str,
        mut call: F,
    ) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let result = match time::timeout(self.policy.request_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::Timeout(self.policy.request_timeout)),
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        operation,
                        resource,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Transient storage failure, retrying in {:?}",
                        delay
                    );
                    time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl Storage for StorageManager {
    async fn list_containers(&self) -> StorageResult<Vec<Container>> {
        self.with_retry("list_containers", "*", || self.inner.list_containers())
            .await
    }

    async fn list_objects(
        &self,
        container: &str,
        continuation_token: Option<&str>,
    ) -> StorageResult<ObjectPage> {
        self.with_retry("list_objects", container, || {
            self.inner.list_objects(container, continuation_token)
        })
        .await
    }

    async fn delete_objects(
        &self,
        container: &str,
        keys: &[String],
    ) -> StorageResult<BatchDeleteResult> {
        self.with_retry("delete_objects", container, || {
            self.inner.delete_objects(container, keys)
        })
        .await
    }

    async fn delete_container(&self, container: &str) -> StorageResult<()> {
        self.with_retry("delete_container", container, || {
            self.inner.delete_container(container)
        })
        .await
    }
}
