use chrono::Utc;

use crate::db::Database;
use crate::error::EngineError;
use crate::models::session::{TurnRecord, UserInput};

/// Audit trail of dispatched turns, one row per hand-back.
pub struct TurnStore {
    db: Database,
}

impl TurnStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append turns after the last recorded sequence number of the session.
    /// Returns the sequence numbers actually stored.
    pub async fn append(&self, session_id: &str, turns: &[TurnRecord]) -> Result<Vec<u32>, EngineError> {
        if turns.is_empty() {
            return Ok(Vec::new());
        }
        let id = session_id.to_string();
        let mut rows = Vec::with_capacity(turns.len());
        for turn in turns {
            rows.push((
                turn.step_id.clone(),
                turn.input.as_ref().map(|i| i.as_str().to_string()),
                turn.resolution.reason.clone(),
                serde_json::to_string(turn)?,
            ));
        }
        let now = Utc::now().timestamp_millis();

        self.db
            .with_conn_async(move |conn| {
                let last: i64 = conn.query_row(
                    "SELECT COALESCE(MAX(seq), 0) FROM session_turns WHERE session_id = ?1",
                    rusqlite::params![id],
                    |row| row.get(0),
                )?;
                let mut stored = Vec::with_capacity(rows.len());
                for (offset, (step_id, input, reason, record)) in rows.into_iter().enumerate() {
                    let seq = last + offset as i64 + 1;
                    conn.execute(
                        "INSERT INTO session_turns (session_id, seq, step_id, input, reason, record, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        rusqlite::params![id, seq, step_id, input, reason, record, now],
                    )?;
                    stored.push(seq as u32);
                }
                Ok(stored)
            })
            .await
    }

    pub async fn list(&self, session_id: &str) -> Result<Vec<TurnRecord>, EngineError> {
        let id = session_id.to_string();
        let rows = self
            .db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT seq, record FROM session_turns WHERE session_id = ?1 ORDER BY seq ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![id], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(seq, record)| -> Result<TurnRecord, EngineError> {
                let mut turn: TurnRecord = serde_json::from_str(&record)?;
                turn.seq = seq as u32;
                Ok(turn)
            })
            .collect()
    }

    /// Inputs consumed by a session, in order.
    pub async fn inputs(&self, session_id: &str) -> Result<Vec<UserInput>, EngineError> {
        Ok(self
            .list(session_id)
            .await?
            .into_iter()
            .filter_map(|t| t.input)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::models::step::NextStep;
    use crate::orchestration::HandBack;
    use crate::store::{SqliteStateStore, StateStore};
    use crate::workflow::builtin::{wizard_catalog, wizard_schema};

    fn turn(step: &str, input: Option<&str>) -> TurnRecord {
        TurnRecord {
            seq: 1,
            step_id: step.to_string(),
            input: input.map(UserInput::from),
            resolution: NextStep::forward(step, "next", Vec::new()),
            hand_back: HandBack::completed(),
            version_after: 1,
        }
    }

    #[tokio::test]
    async fn test_append_continues_sequence() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteStateStore::new(
            db.clone(),
            Arc::new(wizard_schema().unwrap()),
            Arc::new(wizard_catalog().unwrap()),
        );
        let id = store.create_session(Some("s1")).await.unwrap();
        let turns = TurnStore::new(db);

        let first = turns
            .append(&id, &[turn("race", Some("race=Elf")), turn("spellcasting", None)])
            .await
            .unwrap();
        assert_eq!(first, vec![1, 2]);
        let second = turns.append(&id, &[turn("class", Some("keep"))]).await.unwrap();
        assert_eq!(second, vec![3]);

        let listed = turns.list(&id).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[2].seq, 3);
        assert_eq!(listed[1].step_id, "spellcasting");
        assert_eq!(
            turns.inputs(&id).await.unwrap(),
            vec![UserInput::from("race=Elf"), UserInput::from("keep")]
        );
        assert!(turns.list("other").await.unwrap().is_empty());
    }
}
