use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::run::{Action, IndexRun, RunStateMachine, RunStats};
use crate::tracker::ChangeTracker;

/// Exclusive right to run against one repository. Released on drop.
pub struct RunGuard {
    active: Arc<DashMap<String, CancellationToken>>,
    repository_id: String,
    cancel: CancellationToken,
}

impl RunGuard {
    /// Fails with `ConcurrentRun` while another guard for the repository lives.
    pub fn acquire(
        active: &Arc<DashMap<String, CancellationToken>>,
        repository_id: &str,
    ) -> Result<Self> {
        match active.entry(repository_id.to_string()) {
            Entry::Occupied(_) => Err(OrchestratorError::ConcurrentRun {
                repository_id: repository_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                let cancel = CancellationToken::new();
                slot.insert(cancel.clone());
                Ok(Self {
                    active: Arc::clone(active),
                    repository_id: repository_id.to_string(),
                    cancel,
                })
            }
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active.remove(&self.repository_id);
    }
}

/// Entry point for INDEX and INIT triggers.
///
/// At most one run per repository at a time; a second trigger for a busy
/// repository is rejected with `ConcurrentRun` instead of queued.
pub struct SyncOrchestrator {
    tracker: Arc<ChangeTracker>,
    repositories: Vec<String>,
    active: Arc<DashMap<String, CancellationToken>>,
    runs: DashMap<String, IndexRun>,
}

impl SyncOrchestrator {
    pub fn new(tracker: Arc<ChangeTracker>, repositories: Vec<String>) -> Self {
        Self {
            tracker,
            repositories,
            active: Arc::new(DashMap::new()),
            runs: DashMap::new(),
        }
    }

    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    pub fn repositories(&self) -> &[String] {
        &self.repositories
    }

    /// Run `action` for one repository, or for every configured one.
    ///
    /// A named busy repository is an error. When all repositories are
    /// targeted, busy ones are skipped with a warning and left out of the
    /// result.
    pub async fn trigger(
        &self,
        action: Action,
        repository_id: Option<&str>,
    ) -> Result<Vec<IndexRun>> {
        match repository_id {
            Some(repository_id) => {
                if !self.repositories.iter().any(|r| r == repository_id) {
                    return Err(OrchestratorError::UnknownRepository(
                        repository_id.to_string(),
                    ));
                }
                Ok(vec![self.run(action, repository_id).await?])
            }
            None => {
                let mut runs = Vec::with_capacity(self.repositories.len());
                for repository_id in &self.repositories {
                    match self.run(action, repository_id).await {
                        Ok(run) => runs.push(run),
                        Err(err @ OrchestratorError::ConcurrentRun { .. }) => {
                            warn!(repository_id = %repository_id, "{}", err);
                        }
                        Err(err) => return Err(err),
                    }
                }
                Ok(runs)
            }
        }
    }

    /// Current or last run of a repository.
    pub fn status(&self, repository_id: &str) -> Option<IndexRun> {
        self.runs.get(repository_id).map(|r| r.value().clone())
    }

    pub fn is_running(&self, repository_id: &str) -> bool {
        self.active.contains_key(repository_id)
    }

    /// Ask the active run to stop after its current batch.
    ///
    /// Returns false when nothing is running for the repository.
    pub fn cancel(&self, repository_id: &str) -> bool {
        match self.active.get(repository_id) {
            Some(token) => {
                token.cancel();
                info!(repository_id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    async fn run(&self, action: Action, repository_id: &str) -> Result<IndexRun> {
        let guard = RunGuard::acquire(&self.active, repository_id)?;
        let start_time = Instant::now();

        let mut sm = RunStateMachine::new(IndexRun::new_queued(repository_id, action));
        sm.start()?;
        self.runs
            .insert(repository_id.to_string(), sm.run().clone());
        info!(
            run_id = %sm.run().id,
            repository_id,
            action = %action,
            "Starting run"
        );

        let result = match action {
            Action::Init => self.tracker.init(repository_id).await,
            Action::Index(mode) => {
                self.tracker
                    .index(repository_id, mode, guard.cancel_token())
                    .await
            }
        };

        match result {
            Ok(stats) if stats.cancelled => {
                sm.cancel("cancelled by request", stats)?;
                info!(repository_id, "Run cancelled");
            }
            Ok(stats) => {
                log_completed(repository_id, &stats, start_time);
                sm.complete(stats)?;
            }
            Err(err) => {
                error!(
                    repository_id,
                    category = %err.category(),
                    "Run failed: {}",
                    err
                );
                sm.fail(&err)?;
            }
        }

        let run = sm.into_run();
        self.runs.insert(repository_id.to_string(), run.clone());
        drop(guard);
        Ok(run)
    }
}

fn log_completed(repository_id: &str, stats: &RunStats, start_time: Instant) {
    info!(
        repository_id,
        indexed = stats.indexed,
        removed = stats.removed,
        failed = stats.failed,
        cursor = stats.cursor_after,
        duration_ms = start_time.elapsed().as_millis() as u64,
        "Run completed"
    );
}
