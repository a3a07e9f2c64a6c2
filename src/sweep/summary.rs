use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Delete,
    Keep,
    Skip,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delete => write!(f, "DELETE"),
            Self::Keep => write!(f, "KEEP"),
            Self::Skip => write!(f, "SKIP"),
        }
    }
}

/// Final verdict for one container in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionDecision {
    pub container: String,
    pub age_days: Option<i64>,
    pub action: Action,
    pub reason: String,
    pub objects_deleted: u64,
    /// Set when the decision was reached in dry-run mode and nothing was deleted.
    pub dry_run: bool,
}

impl RetentionDecision {
    pub fn keep(container: &str, age_days: Option<i64>, reason: impl Into<String>) -> Self {
        Self {
            container: container.to_string(),
            age_days,
            action: Action::Keep,
            reason: reason.into(),
            objects_deleted: 0,
            dry_run: false,
        }
    }

    pub fn skip(container: &str, age_days: Option<i64>, reason: impl Into<String>) -> Self {
        Self {
            action: Action::Skip,
            ..Self::keep(container, age_days, reason)
        }
    }

    pub fn delete(container: &str, age_days: i64, reason: impl Into<String>) -> Self {
        Self {
            action: Action::Delete,
            ..Self::keep(container, Some(age_days), reason)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepError {
    pub container: Option<String>,
    pub operation: String,
    pub message: String,
}

impl SweepError {
    pub fn new(container: Option<&str>, operation: &str, message: impl fmt::Display) -> Self {
        Self {
            container: container.map(str::to_string),
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }
}

/// A decision plus whatever went wrong on the way to it.
#[derive(Debug, Clone)]
pub struct ContainerOutcome {
    pub decision: RetentionDecision,
    pub errors: Vec<SweepError>,
}

impl ContainerOutcome {
    pub fn new(decision: RetentionDecision) -> Self {
        Self {
            decision,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub evaluated: usize,
    pub deleted: usize,
    /// Stale containers a dry run left in place; never counted in `deleted`.
    pub would_delete: usize,
    pub kept: usize,
    pub skipped: usize,
    pub dry_run: bool,
    pub errors: Vec<SweepError>,
    pub decisions: Vec<RetentionDecision>,
}

impl RunSummary {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: ContainerOutcome) {
        self.evaluated += 1;
        match outcome.decision.action {
            Action::Delete if outcome.decision.dry_run => self.would_delete += 1,
            Action::Delete => self.deleted += 1,
            Action::Keep => self.kept += 1,
            Action::Skip => self.skipped += 1,
        }
        self.errors.extend(outcome.errors);
        self.decisions.push(outcome.decision);
    }

    pub fn decision(&self, container: &str) -> Option<&RetentionDecision> {
        self.decisions.iter().find(|d| d.container == container)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
