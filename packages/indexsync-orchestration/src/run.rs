use crate::error::{ErrorCategory, OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How INDEX walks the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Every trackable object, cursor ignored
    Full,
    /// Feed events after the cursor
    #[default]
    Delta,
}

impl TrackingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingMode::Full => "full",
            TrackingMode::Delta => "delta",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(TrackingMode::Full),
            "delta" => Ok(TrackingMode::Delta),
            _ => Err(OrchestratorError::parse(format!("Invalid tracking mode: {}", s))),
        }
    }
}

impl std::fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trigger action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "action", content = "mode", rename_all = "snake_case")]
pub enum Action {
    Index(TrackingMode),
    /// Reset tracking state of the repository
    Init,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Index(_) => "INDEX",
            Action::Init => "INIT",
        }
    }

    /// Parse the wire form (`INDEX` / `INIT`, any case). INDEX takes `mode`.
    pub fn parse(action: &str, mode: Option<&str>) -> Result<Self> {
        match action.to_ascii_uppercase().as_str() {
            "INDEX" => {
                let mode = mode.map(TrackingMode::from_str).transpose()?;
                Ok(Action::Index(mode.unwrap_or_default()))
            }
            "INIT" => Ok(Action::Init),
            _ => Err(OrchestratorError::parse(format!("Invalid action: {}", action))),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Index(mode) => write!(f, "INDEX({})", mode),
            Action::Init => f.write_str("INIT"),
        }
    }
}

/// Counters of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Feed events pulled (delta) or object ids listed (full)
    pub events_seen: usize,
    /// Events dropped because a later event for the same object followed
    pub superseded: usize,
    pub indexed: usize,
    pub removed: usize,
    /// Filtered out: mime type, base type, security-only events
    pub skipped: usize,
    pub failed: usize,
    pub batches: usize,
    pub cursor_before: u64,
    pub cursor_after: u64,
    pub cancelled: bool,
}

impl RunStats {
    pub fn merge(&mut self, other: &RunStats) {
        self.events_seen += other.events_seen;
        self.superseded += other.superseded;
        self.indexed += other.indexed;
        self.removed += other.removed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.batches += other.batches;
        self.cancelled |= other.cancelled;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunState {
    Queued {
        queued_at: DateTime<Utc>,
    },
    Running {
        started_at: DateTime<Utc>,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
    },
    Failed {
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
        error: String,
        error_category: ErrorCategory,
    },
    Cancelled {
        cancelled_at: DateTime<Utc>,
        reason: String,
    },
}

impl RunState {
    pub fn state_name(&self) -> &'static str {
        match self {
            RunState::Queued { .. } => "queued",
            RunState::Running { .. } => "running",
            RunState::Completed { .. } => "completed",
            RunState::Failed { .. } => "failed",
            RunState::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed { .. } | RunState::Failed { .. } | RunState::Cancelled { .. }
        )
    }
}

/// One INDEX or INIT execution for one repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRun {
    pub id: Uuid,
    pub repository_id: String,
    pub action: Action,
    pub state: RunState,
    pub stats: RunStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexRun {
    pub fn new_queued(repository_id: impl Into<String>, action: Action) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            repository_id: repository_id.into(),
            action,
            state: RunState::Queued { queued_at: now },
            stats: RunStats::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running { .. })
    }
}

/// Run state machine for transitions
pub struct RunStateMachine {
    run: IndexRun,
}

impl RunStateMachine {
    pub fn new(run: IndexRun) -> Self {
        Self { run }
    }

    pub fn run(&self) -> &IndexRun {
        &self.run
    }

    pub fn into_run(self) -> IndexRun {
        self.run
    }

    fn invalid(&self, to: &str) -> OrchestratorError {
        OrchestratorError::InvalidStateTransition {
            from: self.run.state.state_name().to_string(),
            to: to.to_string(),
        }
    }

    /// Transition: QUEUED → RUNNING
    pub fn start(&mut self) -> Result<()> {
        match &self.run.state {
            RunState::Queued { .. } => {
                let now = Utc::now();
                self.run.state = RunState::Running { started_at: now };
                self.run.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("running")),
        }
    }

    /// Transition: RUNNING → COMPLETED
    pub fn complete(&mut self, stats: RunStats) -> Result<()> {
        match &self.run.state {
            RunState::Running { started_at } => {
                let now = Utc::now();
                let duration_ms = (now - *started_at).num_milliseconds().max(0) as u64;
                self.run.state = RunState::Completed {
                    started_at: *started_at,
                    completed_at: now,
                    duration_ms,
                };
                self.run.stats = stats;
                self.run.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("completed")),
        }
    }

    /// Transition: RUNNING → FAILED
    pub fn fail(&mut self, error: &OrchestratorError) -> Result<()> {
        match &self.run.state {
            RunState::Running { started_at } => {
                let now = Utc::now();
                self.run.state = RunState::Failed {
                    started_at: *started_at,
                    failed_at: now,
                    error: error.to_string(),
                    error_category: error.category(),
                };
                self.run.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("failed")),
        }
    }

    /// Transition: * → CANCELLED
    pub fn cancel(&mut self, reason: impl Into<String>, stats: RunStats) -> Result<()> {
        if self.run.state.is_terminal() {
            return Err(self.invalid("cancelled"));
        }
        let now = Utc::now();
        self.run.state = RunState::Cancelled {
            cancelled_at: now,
            reason: reason.into(),
        };
        self.run.stats = stats;
        self.run.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parse() {
        assert_eq!(
            Action::parse("index", Some("FULL")).unwrap(),
            Action::Index(TrackingMode::Full)
        );
        assert_eq!(
            Action::parse("INDEX", None).unwrap(),
            Action::Index(TrackingMode::Delta)
        );
        assert_eq!(Action::parse("init", None).unwrap(), Action::Init);
        assert!(Action::parse("REBUILD", None).is_err());
        assert!(Action::parse("INDEX", Some("partial")).is_err());
    }

    #[test]
    fn test_run_lifecycle() {
        let run = IndexRun::new_queued("r", Action::Index(TrackingMode::Delta));
        let mut sm = RunStateMachine::new(run);

        sm.start().unwrap();
        assert!(sm.run().is_running());

        let stats = RunStats {
            indexed: 2,
            cursor_after: 3,
            ..Default::default()
        };
        sm.complete(stats.clone()).unwrap();
        assert!(matches!(sm.run().state, RunState::Completed { .. }));
        assert_eq!(sm.run().stats, stats);
    }

    #[test]
    fn test_failed_run_keeps_category() {
        let mut sm = RunStateMachine::new(IndexRun::new_queued("r", Action::Init));
        sm.start().unwrap();
        sm.fail(&OrchestratorError::Transport("timeout".into()))
            .unwrap();

        match &sm.run().state {
            RunState::Failed { error_category, .. } => {
                assert_eq!(*error_category, ErrorCategory::Transient)
            }
            other => panic!("Expected Failed state, got {:?}", other),
        }
    }

    #[test]
    fn test_cannot_cancel_terminal_run() {
        let mut sm = RunStateMachine::new(IndexRun::new_queued("r", Action::Init));
        sm.start().unwrap();
        sm.complete(RunStats::default()).unwrap();
        assert!(sm.cancel("too late", RunStats::default()).is_err());
        assert!(sm.start().is_err());
    }

    #[test]
    fn test_stats_merge() {
        let mut total = RunStats::default();
        total.merge(&RunStats {
            indexed: 1,
            failed: 1,
            ..Default::default()
        });
        total.merge(&RunStats {
            indexed: 2,
            cancelled: true,
            ..Default::default()
        });
        assert_eq!(total.indexed, 3);
        assert_eq!(total.failed, 1);
        assert!(total.cancelled);
    }
}
