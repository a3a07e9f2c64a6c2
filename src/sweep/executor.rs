use super::prober::ActivitySignal;
use super::summary::{ContainerOutcome, RetentionDecision, SweepError};
use crate::config::{Settings, MAX_DELETE_BATCH};
use crate::error::StorageError;
use crate::storage::{Container, ObjectListing, Storage};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub dry_run: bool,
    pub purge_attempts: u32,
    pub delete_batch_size: usize,
    /// Pause before the second purge round, doubled for each round after it.
    pub round_backoff: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            dry_run: true,
            purge_attempts: 3,
            delete_batch_size: MAX_DELETE_BATCH,
            round_backoff: Duration::from_millis(200),
        }
    }
}

impl From<&Settings> for ExecutorSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            dry_run: settings.sweep.dry_run,
            purge_attempts: settings.sweep.purge_attempts,
            delete_batch_size: settings.sweep.delete_batch_size,
            round_backoff: settings.retry.initial_backoff(),
        }
    }
}

fn round_delay(base: Duration, completed_rounds: u32) -> Duration {
    base.saturating_mul(1 << completed_rounds.saturating_sub(1).min(16))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    NoSignal(String),
    Active(i64),
    Stale(i64),
}

/// Whole days between `last_activity` and `now`, rounded down.
pub fn age_in_days(now: DateTime<Utc>, last_activity: DateTime<Utc>) -> i64 {
    (now - last_activity).num_days()
}

/// Stale only when a signal exists and its age strictly exceeds the threshold.
pub fn decide(signal: &ActivitySignal, now: DateTime<Utc>, threshold_days: u32) -> Verdict {
    match signal {
        ActivitySignal::Absent(reason) => Verdict::NoSignal(reason.describe()),
        ActivitySignal::Present(ts) => {
            let age = age_in_days(now, *ts);
            if age > i64::from(threshold_days) {
                Verdict::Stale(age)
            } else {
                Verdict::Active(age)
            }
        }
    }
}

struct PurgeFailure {
    reason: String,
    objects_deleted: u64,
}

pub struct RetentionExecutor {
    storage: Arc<dyn Storage>,
    settings: ExecutorSettings,
}

impl RetentionExecutor {
    pub fn new(storage: Arc<dyn Storage>, settings: ExecutorSettings) -> Self {
        Self {
            storage,
            settings: ExecutorSettings {
                purge_attempts: settings.purge_attempts.max(1),
                delete_batch_size: settings.delete_batch_size.clamp(1, MAX_DELETE_BATCH),
                ..settings
            },
        }
    }

    pub fn dry_run(&self) -> bool {
        self.settings.dry_run
    }

    pub async fn evaluate_and_maybe_delete(
        &self,
        container: &Container,
        signal: &ActivitySignal,
        now: DateTime<Utc>,
        threshold_days: u32,
    ) -> ContainerOutcome {
        let name = container.name.as_str();
        match decide(signal, now, threshold_days) {
            Verdict::NoSignal(reason) => {
                ContainerOutcome::new(RetentionDecision::keep(name, None, reason))
            }
            Verdict::Active(age) => {
                info!(
                    "Bucket {} is still active (last modified {} days ago).",
                    name, age
                );
                ContainerOutcome::new(RetentionDecision::keep(name, Some(age), "active"))
            }
            Verdict::Stale(age) if self.settings.dry_run => {
                info!(
                    container = name,
                    age_days = age,
                    threshold_days,
                    "DRY RUN: Would delete stale bucket and all its objects"
                );
                ContainerOutcome::new(RetentionDecision {
                    dry_run: true,
                    ..RetentionDecision::delete(name, age, "stale (dry run, nothing deleted)")
                })
            }
            Verdict::Stale(age) => {
                info!(
                    "Bucket {} is stale (last modified {} days ago). Deleting...",
                    name, age
                );
                self.cascade_delete(name, age).await
            }
        }
    }

    async fn cascade_delete(&self, name: &str, age: i64) -> ContainerOutcome {
        let mut errors = Vec::new();

        let purged = match self.purge(name, &mut errors).await {
            Ok(purged) => purged,
            Err(failure) => {
                warn!(container = name, reason = %failure.reason, "Leaving bucket in place");
                let decision = RetentionDecision {
                    objects_deleted: failure.objects_deleted,
                    ..RetentionDecision::skip(name, Some(age), failure.reason)
                };
                return ContainerOutcome { decision, errors };
            }
        };

        // A fresh listing came back empty; the container is removed exactly once.
        let decision = match self.storage.delete_container(name).await {
            Ok(()) => {
                info!("Bucket {} deleted successfully.", name);
                RetentionDecision::delete(
                    name,
                    age,
                    format!("stale: removed after purging {} object(s)", purged),
                )
            }
            Err(StorageError::NotFound(_)) => {
                info!("Bucket {} was already removed", name);
                RetentionDecision::delete(name, age, "stale: already removed")
            }
            Err(e) => {
                error!("Error deleting bucket {}: {}", name, e);
                errors.push(SweepError::new(Some(name), "delete_container", &e));
                RetentionDecision::skip(name, Some(age), e.to_string())
            }
        };

        ContainerOutcome {
            decision: RetentionDecision {
                objects_deleted: purged,
                ..decision
            },
            errors,
        }
    }

    /// Deletes every object, re-listing between rounds, until a fresh listing
    /// is empty. Returns the number of objects removed.
    async fn purge(&self, name: &str, errors: &mut Vec<SweepError>) -> Result<u64, PurgeFailure> {
        let mut listing = ObjectListing::new(self.storage.as_ref(), name);
        let mut objects_deleted = 0u64;
        let mut rounds = 0u32;

        loop {
            let keys = match listing.collect_keys().await {
                Ok(keys) => keys,
                Err(e) => {
                    errors.push(SweepError::new(Some(name), "list_objects", &e));
                    return Err(PurgeFailure {
                        reason: format!("purge incomplete: {}", e),
                        objects_deleted,
                    });
                }
            };

            if keys.is_empty() {
                info!("All objects deleted from bucket {}.", name);
                return Ok(objects_deleted);
            }

            if rounds == self.settings.purge_attempts {
                let err = StorageError::PartialBatchFailure {
                    container: name.to_string(),
                    remaining: keys.len(),
                };
                errors.push(SweepError::new(Some(name), "delete_objects", &err));
                return Err(PurgeFailure {
                    reason: "purge incomplete".to_string(),
                    objects_deleted,
                });
            }

            if rounds > 0 {
                let delay = round_delay(self.settings.round_backoff, rounds);
                info!(
                    container = name,
                    remaining = keys.len(),
                    delay_ms = delay.as_millis() as u64,
                    "Retrying object deletes after backoff"
                );
                tokio::time::sleep(delay).await;
            }
            rounds += 1;

            for batch in keys.chunks(self.settings.delete_batch_size) {
                let result = match self.storage.delete_objects(name, batch).await {
                    Ok(result) => result,
                    Err(e) => {
                        errors.push(SweepError::new(Some(name), "delete_objects", &e));
                        return Err(PurgeFailure {
                            reason: format!("purge incomplete: {}", e),
                            objects_deleted,
                        });
                    }
                };
                objects_deleted += result.deleted.len() as u64;

                if let Some(denied) = result.failed.iter().find(|f| f.is_permanent()) {
                    errors.push(SweepError::new(
                        Some(name),
                        "delete_objects",
                        format!("{}: {}: {}", denied.key, denied.code, denied.message),
                    ));
                    return Err(PurgeFailure {
                        reason: format!(
                            "purge incomplete: {} rejected for key {}",
                            denied.code, denied.key
                        ),
                        objects_deleted,
                    });
                }

                for failed in &result.failed {
                    warn!(
                        container = name,
                        key = %failed.key,
                        code = %failed.code,
                        round = rounds,
                        "Object delete failed: {}",
                        failed.message
                    );
                }
            }
        }
    }
}
