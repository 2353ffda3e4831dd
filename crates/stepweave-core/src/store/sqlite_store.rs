use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{OptionalExtension, TransactionBehavior};

use super::{duplicate_session, session_not_found, StateStore};
use crate::db::Database;
use crate::error::EngineError;
use crate::models::session::SessionSummary;
use crate::models::state::WorkflowState;
use crate::store::mutation::{apply_mutations, Mutation};
use crate::workflow::catalog::Catalog;
use crate::workflow::schema::WorkflowSchema;

/// SQLite-backed state store. Documents survive the process; a write is a
/// compare-and-swap on the `version` column inside an immediate transaction.
pub struct SqliteStateStore {
    db: Database,
    schema: Arc<WorkflowSchema>,
    catalog: Arc<dyn Catalog>,
}

impl SqliteStateStore {
    pub fn new(db: Database, schema: Arc<WorkflowSchema>, catalog: Arc<dyn Catalog>) -> Self {
        Self { db, schema, catalog }
    }

    /// Workflow name a stored session was created with.
    pub async fn workflow_of(&self, session_id: &str) -> Result<String, EngineError> {
        let id = session_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    "SELECT workflow FROM sessions WHERE id = ?1",
                    rusqlite::params![id],
                    |row| row.get::<_, String>(0),
                )
                .optional()
            })
            .await?
            .ok_or_else(|| session_not_found(session_id))
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn create_session(&self, session_id: Option<&str>) -> Result<String, EngineError> {
        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let document = WorkflowState::new().to_json()?;
        let workflow = self.schema.name().to_string();
        let now = Utc::now().timestamp_millis();
        let row_id = id.clone();

        let inserted = self
            .db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO sessions (id, workflow, document, version, created_at, updated_at)
                     VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                    rusqlite::params![row_id, workflow, document, now],
                )
            })
            .await?;
        if inserted == 0 {
            return Err(duplicate_session(&id));
        }
        tracing::info!("[StateStore] Created session {}", id);
        Ok(id)
    }

    async fn read(&self, session_id: &str) -> Result<(WorkflowState, u64), EngineError> {
        let id = session_id.to_string();
        let row = self
            .db
            .with_conn_async(move |conn| {
                conn.query_row(
                    "SELECT workflow, document, version FROM sessions WHERE id = ?1",
                    rusqlite::params![id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()
            })
            .await?;

        let (workflow, document, version) = row.ok_or_else(|| session_not_found(session_id))?;
        self.check_workflow(session_id, &workflow)?;
        let mut state = WorkflowState::from_json(&document)?;
        state.version = version as u64;
        Ok((state, version as u64))
    }

    async fn write(
        &self,
        session_id: &str,
        expected_version: u64,
        mutations: &[Mutation],
    ) -> Result<u64, EngineError> {
        let id = session_id.to_string();
        let schema = self.schema.clone();
        let catalog = self.catalog.clone();
        let mutations = mutations.to_vec();
        let now = Utc::now().timestamp_millis();

        // The inner result carries engine errors raised while the
        // transaction is open; the outer one is the SQLite failure channel.
        let outcome = self
            .db
            .with_conn_async(move |conn| {
                let tx = rusqlite::Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
                let row = tx
                    .query_row(
                        "SELECT workflow, document, version FROM sessions WHERE id = ?1",
                        rusqlite::params![id],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, i64>(2)?,
                            ))
                        },
                    )
                    .optional()?;

                let Some((workflow, document, version)) = row else {
                    return Ok(Err(session_not_found(&id)));
                };
                if workflow != schema.name() {
                    return Ok(Err(workflow_mismatch(&id, &workflow, schema.name())));
                }
                if version as u64 != expected_version {
                    return Ok(Err(EngineError::Conflict {
                        session_id: id,
                        expected: expected_version,
                        actual: version as u64,
                    }));
                }

                let mut current = match WorkflowState::from_json(&document) {
                    Ok(state) => state,
                    Err(e) => return Ok(Err(e)),
                };
                current.version = version as u64;
                let next = match apply_mutations(&schema, catalog.as_ref(), &current, &mutations) {
                    Ok(next) => next,
                    Err(e) => return Ok(Err(e)),
                };
                let document = match next.to_json() {
                    Ok(json) => json,
                    Err(e) => return Ok(Err(e)),
                };

                let updated = tx.execute(
                    "UPDATE sessions SET document = ?1, version = ?2, updated_at = ?3
                     WHERE id = ?4 AND version = ?5",
                    rusqlite::params![document, next.version as i64, now, id, version],
                )?;
                if updated == 0 {
                    return Ok(Err(EngineError::Conflict {
                        session_id: id,
                        expected: expected_version,
                        actual: expected_version + 1,
                    }));
                }
                tx.commit()?;
                Ok(Ok(next.version))
            })
            .await?;

        match &outcome {
            Ok(version) => tracing::debug!("[StateStore] Session {} now at version {}", session_id, version),
            Err(EngineError::Conflict { .. }) => {
                tracing::warn!("[StateStore] Stale write on session {} at version {}", session_id, expected_version)
            }
            Err(_) => {}
        }
        outcome
    }

    async fn delete(&self, session_id: &str) -> Result<(), EngineError> {
        let id = session_id.to_string();
        let deleted = self
            .db
            .with_conn_async(move |conn| {
                conn.execute("DELETE FROM session_turns WHERE session_id = ?1", rusqlite::params![id])?;
                conn.execute("DELETE FROM sessions WHERE id = ?1", rusqlite::params![id])
            })
            .await?;
        if deleted == 0 {
            return Err(session_not_found(session_id));
        }
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, EngineError> {
        let rows = self
            .db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, workflow, document, version, created_at, updated_at
                     FROM sessions ORDER BY created_at DESC, id ASC",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                            row.get::<_, i64>(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(id, workflow, document, version, created_at, updated_at)| -> Result<SessionSummary, EngineError> {
                let state = WorkflowState::from_json(&document)?;
                Ok(SessionSummary {
                    id,
                    workflow,
                    version: version as u64,
                    mode: state.mode,
                    completed_steps: state.completed_steps.len(),
                    created_at: from_millis(created_at),
                    updated_at: from_millis(updated_at),
                })
            })
            .collect()
    }
}

impl SqliteStateStore {
    fn check_workflow(&self, session_id: &str, workflow: &str) -> Result<(), EngineError> {
        if workflow != self.schema.name() {
            return Err(workflow_mismatch(session_id, workflow, self.schema.name()));
        }
        Ok(())
    }
}

fn workflow_mismatch(session_id: &str, stored: &str, loaded: &str) -> EngineError {
    EngineError::InvalidWorkflow(format!(
        "session '{}' belongs to workflow '{}', not '{}'",
        session_id, stored, loaded
    ))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::catalog::StaticCatalog;
    use serde_json::json;

    const WORKFLOW: &str = r#"
name: "sqlite"
steps:
  - id: race
    fields: [{ name: race, kind: { type: text } }]
"#;

    fn store_on(db: Database, yaml: &str) -> SqliteStateStore {
        let schema = WorkflowSchema::from_yaml(yaml).unwrap();
        SqliteStateStore::new(db, Arc::new(schema), Arc::new(StaticCatalog::new()))
    }

    fn set_race(name: &str) -> Vec<Mutation> {
        vec![
            Mutation::set("race", json!({ "race": name }).as_object().cloned().unwrap()),
            Mutation::complete("race"),
        ]
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = store_on(Database::open_in_memory().unwrap(), WORKFLOW);
        let id = store.create_session(Some("s-1")).await.unwrap();

        assert_eq!(store.write(&id, 0, &set_race("Elf")).await.unwrap(), 1);
        let err = store.write(&id, 0, &set_race("Dwarf")).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict { actual: 1, .. }));

        let (state, version) = store.read(&id).await.unwrap();
        assert_eq!(version, 1);
        assert_eq!(state.completed_steps, vec!["race".to_string()]);
        assert_eq!(store.list_sessions().await.unwrap()[0].completed_steps, 1);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        let path = path.to_str().unwrap();

        {
            let store = store_on(Database::open(path).unwrap(), WORKFLOW);
            store.create_session(Some("keep")).await.unwrap();
            store.write("keep", 0, &set_race("Gnome")).await.unwrap();
        }

        let store = store_on(Database::open(path).unwrap(), WORKFLOW);
        let (state, version) = store.read("keep").await.unwrap();
        assert_eq!(version, 1);
        assert_eq!(state.field("race", "race"), Some(&json!("Gnome")));
    }

    #[tokio::test]
    async fn test_rejects_session_of_other_workflow() {
        let db = Database::open_in_memory().unwrap();
        let store = store_on(db.clone(), WORKFLOW);
        store.create_session(Some("s")).await.unwrap();

        let other = store_on(db, &WORKFLOW.replace("\"sqlite\"", "\"other\""));
        assert!(matches!(other.read("s").await, Err(EngineError::InvalidWorkflow(_))));
        assert!(matches!(other.delete("missing").await, Err(EngineError::NotFound(_))));
    }
}
