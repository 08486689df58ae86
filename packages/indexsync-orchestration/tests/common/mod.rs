//! Common test utilities for indexsync-orchestration
//!
//! In-memory harness for tracker/orchestrator tests and a minimal HTTP
//! responder for the content-service adapters.

#![allow(dead_code)]

mod fixtures;
mod http_stub;

pub use fixtures::*;
pub use http_stub::*;
