//! The retention sweep: list every bucket, probe its most recent activity,
//! and remove the ones that have been idle past the threshold.
//!
//! Containers are processed through a bounded pool. A failure inside one
//! container's pipeline becomes a `SKIP` or error entry in the summary; only a
//! failed inventory listing aborts the run.

mod executor;
mod inventory;
mod prober;
mod summary;

pub use executor::{age_in_days, decide, ExecutorSettings, RetentionExecutor, Verdict};
pub use inventory::InventoryLister;
pub use prober::{AbsenceReason, ActivityProber, ActivitySignal};
pub use summary::{Action, ContainerOutcome, RetentionDecision, RunSummary, SweepError};

use crate::prelude::*;
use crate::storage::{Container, Storage};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Sweeper {
    lister: InventoryLister,
    prober: ActivityProber,
    executor: RetentionExecutor,
    interrupted: Arc<AtomicBool>,
}

impl Sweeper {
    pub fn new(storage: Arc<dyn Storage>, settings: ExecutorSettings) -> Self {
        Self {
            lister: InventoryLister::new(storage.clone()),
            prober: ActivityProber::new(storage.clone()),
            executor: RetentionExecutor::new(storage, settings),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Raising this flag stops new containers from starting. Containers
    /// already being purged still run to a final decision.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    pub async fn run_sweep(
        &self,
        now: DateTime<Utc>,
        threshold_days: u32,
        concurrency: usize,
    ) -> Result<RunSummary> {
        let containers = self.lister.list_containers().await?;

        info!(
            containers = containers.len(),
            threshold_days,
            concurrency,
            dry_run = self.executor.dry_run(),
            "Starting retention sweep"
        );

        let outcomes: Vec<ContainerOutcome> = stream::iter(containers)
            .map(|container| self.process(container, now, threshold_days))
            .buffered(concurrency.max(1))
            .collect()
            .await;

        let mut summary = RunSummary::new(self.executor.dry_run());
        for outcome in outcomes {
            summary.record(outcome);
        }

        info!(
            evaluated = summary.evaluated,
            deleted = summary.deleted,
            would_delete = summary.would_delete,
            kept = summary.kept,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            dry_run = summary.dry_run,
            "Retention sweep complete"
        );
        Ok(summary)
    }

    async fn process(
        &self,
        container: Container,
        now: DateTime<Utc>,
        threshold_days: u32,
    ) -> ContainerOutcome {
        if self.interrupted.load(Ordering::SeqCst) {
            warn!("Sweep interrupted before bucket {} was evaluated", container.name);
            return ContainerOutcome::new(RetentionDecision::skip(
                &container.name,
                None,
                "sweep interrupted",
            ));
        }

        let signal = self.prober.probe(&container).await;
        let mut outcome = self
            .executor
            .evaluate_and_maybe_delete(&container, &signal, now, threshold_days)
            .await;

        if let ActivitySignal::Absent(AbsenceReason::ProbeFailed(message)) = &signal {
            outcome
                .errors
                .insert(0, SweepError::new(Some(container.name.as_str()), "probe", message));
        }
        outcome
    }
}
