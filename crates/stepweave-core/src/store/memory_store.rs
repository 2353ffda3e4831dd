use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{duplicate_session, session_not_found, StateStore};
use crate::error::EngineError;
use crate::models::session::SessionSummary;
use crate::models::state::WorkflowState;
use crate::store::mutation::{apply_mutations, Mutation};
use crate::workflow::catalog::Catalog;
use crate::workflow::schema::WorkflowSchema;

struct MemorySession {
    state: WorkflowState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// In-memory state store for tests and replay.
pub struct MemoryStateStore {
    schema: Arc<WorkflowSchema>,
    catalog: Arc<dyn Catalog>,
    sessions: RwLock<HashMap<String, MemorySession>>,
}

impl MemoryStateStore {
    pub fn new(schema: Arc<WorkflowSchema>, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            schema,
            catalog,
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> EngineError {
    EngineError::Database(format!("Lock poisoned: {}", e))
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn create_session(&self, session_id: Option<&str>) -> Result<String, EngineError> {
        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        if sessions.contains_key(&id) {
            return Err(duplicate_session(&id));
        }
        let now = Utc::now();
        sessions.insert(
            id.clone(),
            MemorySession {
                state: WorkflowState::new(),
                created_at: now,
                updated_at: now,
            },
        );
        tracing::debug!("[StateStore] Created in-memory session {}", id);
        Ok(id)
    }

    async fn read(&self, session_id: &str) -> Result<(WorkflowState, u64), EngineError> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| session_not_found(session_id))?;
        Ok((session.state.clone(), session.state.version))
    }

    async fn write(
        &self,
        session_id: &str,
        expected_version: u64,
        mutations: &[Mutation],
    ) -> Result<u64, EngineError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| session_not_found(session_id))?;
        if session.state.version != expected_version {
            return Err(EngineError::Conflict {
                session_id: session_id.to_string(),
                expected: expected_version,
                actual: session.state.version,
            });
        }
        let next = apply_mutations(&self.schema, self.catalog.as_ref(), &session.state, mutations)?;
        let version = next.version;
        session.state = next;
        session.updated_at = Utc::now();
        Ok(version)
    }

    async fn delete(&self, session_id: &str) -> Result<(), EngineError> {
        self.sessions
            .write()
            .map_err(poisoned)?
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| session_not_found(session_id))
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, EngineError> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .map(|(id, s)| SessionSummary {
                id: id.clone(),
                workflow: self.schema.name().to_string(),
                version: s.state.version,
                mode: s.state.mode,
                completed_steps: s.state.completed_steps.len(),
                created_at: s.created_at,
                updated_at: s.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::catalog::StaticCatalog;
    use serde_json::json;

    fn store() -> MemoryStateStore {
        let schema = WorkflowSchema::from_yaml(
            r#"
name: "memory"
steps:
  - id: race
    fields: [{ name: race, kind: { type: text } }]
"#,
        )
        .unwrap();
        MemoryStateStore::new(Arc::new(schema), Arc::new(StaticCatalog::new()))
    }

    fn set_race(name: &str) -> Vec<Mutation> {
        vec![Mutation::set("race", json!({ "race": name }).as_object().cloned().unwrap())]
    }

    #[tokio::test]
    async fn test_write_bumps_version_and_detects_conflicts() {
        let store = store();
        let id = store.create_session(Some("s-1")).await.unwrap();
        let (state, version) = store.read(&id).await.unwrap();
        assert_eq!(version, 0);
        assert_eq!(state, WorkflowState::new());

        assert_eq!(store.write(&id, 0, &set_race("Elf")).await.unwrap(), 1);
        let err = store.write(&id, 0, &set_race("Dwarf")).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict { expected: 0, actual: 1, .. }));

        let (state, _) = store.read(&id).await.unwrap();
        assert_eq!(state.field("race", "race"), Some(&json!("Elf")));
    }

    #[tokio::test]
    async fn test_rejected_write_leaves_state_untouched() {
        let store = store();
        let id = store.create_session(None).await.unwrap();
        assert!(store.write(&id, 0, &[Mutation::complete("race")]).await.is_err());
        let (state, version) = store.read(&id).await.unwrap();
        assert_eq!(version, 0);
        assert!(state.completed_steps.is_empty());
    }

    #[tokio::test]
    async fn test_missing_and_duplicate_sessions() {
        let store = store();
        assert!(matches!(store.read("nope").await, Err(EngineError::NotFound(_))));
        store.create_session(Some("dup")).await.unwrap();
        assert!(store.create_session(Some("dup")).await.is_err());
        store.delete("dup").await.unwrap();
        assert!(store.list_sessions().await.unwrap().is_empty());
    }
}
