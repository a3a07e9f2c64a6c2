use super::{Storage, StorageObject};
use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Lazily walks every page of one container's object listing.
///
/// Pages are fetched on demand by following continuation tokens until the
/// service stops handing one out. `restart` rewinds to the first page so the
/// same listing can be driven again against fresh service state.
pub struct ObjectListing<'a> {
    storage: &'a dyn Storage,
    container: &'a str,
    token: Option<String>,
    exhausted: bool,
    pages_fetched: usize,
}

impl<'a> ObjectListing<'a> {
    pub fn new(storage: &'a dyn Storage, container: &'a str) -> Self {
        Self {
            storage,
            container,
            token: None,
            exhausted: false,
            pages_fetched: 0,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn restart(&mut self) {
        self.token = None;
        self.exhausted = false;
        self.pages_fetched = 0;
    }

    /// Returns the next page, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> StorageResult<Option<Vec<StorageObject>>> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self
            .storage
            .list_objects(self.container, self.token.as_deref())
            .await?;
        self.pages_fetched += 1;

        match page.next_token {
            Some(next) if self.token.as_deref() == Some(next.as_str()) => {
                self.exhausted = true;
                return Err(StorageError::service_unavailable(
                    "list_objects",
                    format!(
                        "continuation token repeated for {} after {} page(s)",
                        self.container, self.pages_fetched
                    ),
                ));
            }
            Some(next) => self.token = Some(next),
            None => {
                self.token = None;
                self.exhausted = true;
            }
        }

        Ok(Some(page.objects))
    }

    /// Every key in the container, from the first page on.
    pub async fn collect_keys(&mut self) -> StorageResult<Vec<String>> {
        self.restart();
        let mut keys = Vec::new();
        while let Some(objects) = self.next_page().await? {
            keys.extend(objects.into_iter().map(|o| o.key));
        }
        debug!(
            container = self.container,
            keys = keys.len(),
            pages = self.pages_fetched,
            "Collected object keys"
        );
        Ok(keys)
    }

    /// Maximum `last_modified` across every page, from the first page on.
    pub async fn latest_modification(&mut self) -> StorageResult<Option<DateTime<Utc>>> {
        self.restart();
        let mut latest: Option<DateTime<Utc>> = None;
        while let Some(objects) = self.next_page().await? {
            let page_max = objects.iter().filter_map(|o| o.last_modified).max();
            latest = latest.max(page_max);
        }
        Ok(latest)
    }
}
