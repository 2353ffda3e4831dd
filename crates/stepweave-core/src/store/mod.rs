//! Session state storage.
//!
//! [`StateStore`] is the sole mutation path for a session document: a write
//! carries the version the caller read and is rejected with
//! `EngineError::Conflict` when the stored version has moved on. Backends
//! differ only in where the document lives; both apply writes through
//! [`apply_mutations`].

pub mod memory_store;
pub mod mutation;
pub mod sqlite_store;
pub mod turn_store;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::models::session::SessionSummary;
use crate::models::state::WorkflowState;

pub use memory_store::MemoryStateStore;
pub use mutation::{apply_mutations, Mutation};
pub use sqlite_store::SqliteStateStore;
pub use turn_store::TurnStore;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Create an empty session and return its id. A generated UUID is used
    /// when `session_id` is `None`.
    async fn create_session(&self, session_id: Option<&str>) -> Result<String, EngineError>;

    /// Current document and version. Fails with `NotFound` for unknown ids.
    async fn read(&self, session_id: &str) -> Result<(WorkflowState, u64), EngineError>;

    /// Apply `mutations` atomically if the stored version still equals
    /// `expected_version`; returns the new version.
    async fn write(
        &self,
        session_id: &str,
        expected_version: u64,
        mutations: &[Mutation],
    ) -> Result<u64, EngineError>;

    async fn delete(&self, session_id: &str) -> Result<(), EngineError>;

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, EngineError>;
}

fn session_not_found(session_id: &str) -> EngineError {
    EngineError::NotFound(format!("session '{}'", session_id))
}

fn duplicate_session(session_id: &str) -> EngineError {
    EngineError::Protocol(format!("session '{}' already exists", session_id))
}
