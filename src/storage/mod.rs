mod listing;
mod local_storage;
mod s3_storage;
mod storage_manager;

pub use listing::ObjectListing;
pub use local_storage::LocalStorage;
pub use s3_storage::S3Storage;
pub use storage_manager::{RetryPolicy, StorageManager};

use crate::error::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A bucket as reported by the storage service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Container {
    pub name: String,
}

impl Container {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObject {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of an object listing. `next_token` is `None` on the last page.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<StorageObject>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedKey {
    pub key: String,
    pub code: String,
    pub message: String,
}

impl FailedKey {
    /// Per-key codes that will not go away by asking again.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self.code.as_str(),
            "AccessDenied" | "AllAccessDisabled" | "AccountProblem" | "InvalidAccessKeyId"
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchDeleteResult {
    pub deleted: Vec<String>,
    pub failed: Vec<FailedKey>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn list_containers(&self) -> StorageResult<Vec<Container>>;
    async fn list_objects(
        &self,
        container: &str,
        continuation_token: Option<&str>,
    ) -> StorageResult<ObjectPage>;
    async fn delete_objects(
        &self,
        container: &str,
        keys: &[String],
    ) -> StorageResult<BatchDeleteResult>;
    async fn delete_container(&self, container: &str) -> StorageResult<()>;
}
