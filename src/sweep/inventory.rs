use crate::error::StorageResult;
use crate::storage::{Container, Storage};
use std::sync::Arc;
use tracing::{error, info};

pub struct InventoryLister {
    storage: Arc<dyn Storage>,
}

impl InventoryLister {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn list_containers(&self) -> StorageResult<Vec<Container>> {
        let containers = self.storage.list_containers().await.map_err(|e| {
            error!("Failed to list buckets: {}", e);
            e
        })?;
        info!("Found {} buckets", containers.len());
        Ok(containers)
    }
}
