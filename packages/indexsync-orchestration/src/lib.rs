/*
 * Indexsync Orchestration - change-feed tracking into a search index
 *
 * Architecture:
 * - Run state machine per INDEX / INIT trigger
 * - One active run per repository (RunGuard)
 * - Durable, monotonic cursor per repository
 * - Delta (feed after cursor) and full (every object) passes
 * - Token broker + HTTP adapters for the content service
 */

// Public modules
pub mod auth;
pub mod coalesce;
pub mod cursor;
pub mod document;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod retry;
pub mod run;
pub mod tracker;

// Re-exports
pub use auth::{AuthTokenBroker, HttpTokenRegistrar, TokenRegistrar};
pub use coalesce::{coalesce, CoalescedChange, MimeTypeFilter};
pub use cursor::CursorManager;
pub use document::build_document;
pub use error::{ErrorCategory, OrchestratorError, Result};
pub use http::{ContentServiceClient, HttpChangeFeed, HttpContentSource};
pub use orchestrator::{RunGuard, SyncOrchestrator};
pub use retry::RetryPolicy;
pub use run::{Action, IndexRun, RunState, RunStateMachine, RunStats, TrackingMode};
pub use tracker::{ChangeTracker, ObjectOutcome};
