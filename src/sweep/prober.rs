use crate::storage::{Container, ObjectListing, Storage};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbsenceReason {
    /// The container holds nothing with a modification time.
    Empty,
    /// The listing itself failed, so emptiness could not be established.
    ProbeFailed(String),
}

/// Most recent object modification in a container, if one could be observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivitySignal {
    Present(DateTime<Utc>),
    Absent(AbsenceReason),
}

impl ActivitySignal {
    pub fn absent() -> Self {
        Self::Absent(AbsenceReason::Empty)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Present(ts) => Some(*ts),
            Self::Absent(_) => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

impl AbsenceReason {
    pub fn describe(&self) -> String {
        match self {
            Self::Empty => "no activity signal".to_string(),
            Self::ProbeFailed(message) => {
                format!("no activity signal: object listing failed ({})", message)
            }
        }
    }
}

pub struct ActivityProber {
    storage: Arc<dyn Storage>,
}

impl ActivityProber {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn probe(&self, container: &Container) -> ActivitySignal {
        let mut listing = ObjectListing::new(self.storage.as_ref(), &container.name);
        match listing.latest_modification().await {
            Ok(Some(ts)) => {
                debug!(
                    container = %container.name,
                    pages = listing.pages_fetched(),
                    "Last modification at {}",
                    ts
                );
                ActivitySignal::Present(ts)
            }
            Ok(None) => {
                info!("Bucket {} is empty or has no objects", container.name);
                ActivitySignal::absent()
            }
            Err(e) => {
                warn!(
                    container = %container.name,
                    error = %e,
                    "Could not list objects; treating as no activity signal"
                );
                ActivitySignal::Absent(AbsenceReason::ProbeFailed(e.to_string()))
            }
        }
    }
}
