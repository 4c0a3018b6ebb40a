//! # State Store
//!
//! Append-only, versioned snapshots of pipeline state for audit and replay.
//! Every save appends a deep copy as the next version; rollback re-appends an
//! older version on top instead of rewriting history.

use super::db::StateDb;
use super::types::{PipelineState, PipelineStatus, RefinementStatus, StateVersion, VersionSummary};
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

/// Raw row as stored in `state_versions`
struct VersionRow {
    version: i64,
    timestamp: String,
    status: String,
    refinement_status: String,
    rolled_back_from: Option<i64>,
    state: String,
}

/// Versioned state store for one case.
///
/// Safe to share between tasks: the version increment and the append happen
/// under one lock, so concurrent readers of `history()` never observe a gap.
pub struct StateStore {
    conn: Arc<Mutex<Connection>>,
}

impl StateStore {
    /// Create an empty store backed by a fresh in-memory database
    pub fn new() -> anyhow::Result<Self> {
        let db = StateDb::open_in_memory()?;
        Ok(Self {
            conn: db.connection(),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Deep-copy `state` and append it as the next version
    pub fn save(&self, state: &PipelineState) -> StoreResult<u64> {
        let conn = self.lock()?;
        let version = Self::append(&conn, state, None)?;

        tracing::info!(
            case_id = %state.case_id,
            version,
            status = state.status.as_str(),
            "State version saved"
        );

        Ok(version)
    }

    /// Fetch a version's state; `None` means the latest version
    pub fn get(&self, version: Option<u64>) -> StoreResult<PipelineState> {
        Ok(self.get_version(version)?.state)
    }

    /// Fetch a full version record; `None` means the latest version
    pub fn get_version(&self, version: Option<u64>) -> StoreResult<StateVersion> {
        let conn = self.lock()?;
        let row = Self::load_row(&conn, version)?;
        Self::row_to_version(row)
    }

    /// Summaries of every version, oldest first
    pub fn history(&self) -> StoreResult<Vec<VersionSummary>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT version, timestamp, status, refinement_status, rolled_back_from, state
            FROM state_versions
            ORDER BY version ASC
            "#,
        )?;

        let rows = stmt
            .query_map([], Self::read_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| {
                Ok(VersionSummary {
                    version: row.version as u64,
                    timestamp: parse_timestamp(&row.timestamp),
                    status: decode_label::<PipelineStatus>(&row.status)?,
                    refinement_status: decode_label::<RefinementStatus>(&row.refinement_status)?,
                    rolled_back_from: row.rolled_back_from.map(|v| v as u64),
                })
            })
            .collect()
    }

    /// Re-append version `version` as a brand-new latest version.
    ///
    /// History is never deleted or rewritten.
    pub fn rollback(&self, version: u64) -> StoreResult<u64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let row = Self::load_row(&tx, Some(version))?;
        let state: PipelineState = serde_json::from_str(&row.state)?;
        let new_version = Self::append(&tx, &state, Some(version))?;

        tx.commit()?;

        tracing::info!(
            case_id = %state.case_id,
            from = version,
            version = new_version,
            "State rolled back"
        );

        Ok(new_version)
    }

    /// Highest version number, if anything was saved
    pub fn latest_version(&self) -> StoreResult<Option<u64>> {
        let conn = self.lock()?;
        Self::latest(&conn)
    }

    /// Number of versions in the log
    pub fn len(&self) -> StoreResult<usize> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM state_versions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn append(
        conn: &Connection,
        state: &PipelineState,
        rolled_back_from: Option<u64>,
    ) -> StoreResult<u64> {
        let state_json = serde_json::to_string(state)?;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);

        conn.execute(
            r#"
            INSERT INTO state_versions (case_id, timestamp, status, refinement_status, rolled_back_from, state)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                state.case_id,
                timestamp,
                encode_label(&state.status)?,
                encode_label(&state.refinement_status)?,
                rolled_back_from.map(|v| v as i64),
                state_json,
            ],
        )
        .map_err(StoreError::from_backend)?;

        Ok(conn.last_insert_rowid() as u64)
    }

    fn latest(conn: &Connection) -> StoreResult<Option<u64>> {
        let latest: Option<i64> =
            conn.query_row("SELECT MAX(version) FROM state_versions", [], |row| {
                row.get(0)
            })?;
        Ok(latest.map(|v| v as u64))
    }

    fn load_row(conn: &Connection, version: Option<u64>) -> StoreResult<VersionRow> {
        let latest = Self::latest(conn)?;
        let target = match (version, latest) {
            (_, None) => return Err(StoreError::Empty),
            (Some(v), _) => v,
            (None, Some(v)) => v,
        };

        conn.query_row(
            r#"
            SELECT version, timestamp, status, refinement_status, rolled_back_from, state
            FROM state_versions WHERE version = ?1
            "#,
            params![target as i64],
            Self::read_row,
        )
        .optional()?
        .ok_or(StoreError::VersionNotFound {
            version: target,
            latest,
        })
    }

    fn read_row(row: &rusqlite::Row) -> rusqlite::Result<VersionRow> {
        Ok(VersionRow {
            version: row.get(0)?,
            timestamp: row.get(1)?,
            status: row.get(2)?,
            refinement_status: row.get(3)?,
            rolled_back_from: row.get(4)?,
            state: row.get(5)?,
        })
    }

    fn row_to_version(row: VersionRow) -> StoreResult<StateVersion> {
        Ok(StateVersion {
            version: row.version as u64,
            timestamp: parse_timestamp(&row.timestamp),
            state: serde_json::from_str(&row.state)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Serialize a unit enum to its serde label (`"refining"`)
fn encode_label<T: Serialize>(value: &T) -> StoreResult<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(label) => Ok(label),
        other => Ok(other.to_string()),
    }
}

fn decode_label<T: DeserializeOwned>(label: &str) -> StoreResult<T> {
    Ok(serde_json::from_value(serde_json::Value::String(
        label.to_string(),
    ))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::{Finding, FindingKind, Intent, WorkerId, WorkerOutput};

    fn sample_state() -> PipelineState {
        let mut state = PipelineState::new(
            "case-1",
            Intent::new("explain_variance"),
            0.4,
            vec![WorkerId::new("cam"), WorkerId::new("pm")],
        );
        state.worker_outputs.insert(
            WorkerId::new("cam"),
            WorkerOutput::new(
                "cam",
                vec![Finding::new("cam", FindingKind::Analysis, "CPI at 0.87, worsening")
                    .with_confidence(0.85)
                    .with_evidence("evm:cpr-format-1")],
                0.85,
            ),
        );
        state
    }

    #[test]
    fn test_save_then_get_round_trips() {
        let store = StateStore::new().unwrap();
        let state = sample_state();

        let version = store.save(&state).unwrap();
        assert_eq!(version, 1);
        assert_eq!(store.get(Some(version)).unwrap(), state);
        assert_eq!(store.get(None).unwrap(), state);
    }

    #[test]
    fn test_get_returns_isolated_copies() {
        let store = StateStore::new().unwrap();
        let state = sample_state();
        let version = store.save(&state).unwrap();

        let mut copy = store.get(Some(version)).unwrap();
        copy.iteration_count = 99;
        copy.worker_outputs.clear();

        assert_eq!(store.get(Some(version)).unwrap(), state);
    }

    #[test]
    fn test_saving_does_not_alias_caller_state() {
        let store = StateStore::new().unwrap();
        let mut state = sample_state();
        let version = store.save(&state).unwrap();

        state.status = PipelineStatus::Complete;

        assert_eq!(
            store.get(Some(version)).unwrap().status,
            PipelineStatus::Triaging
        );
    }

    #[test]
    fn test_versions_increase_from_one() {
        let store = StateStore::new().unwrap();
        let mut state = sample_state();

        assert_eq!(store.save(&state).unwrap(), 1);
        state.status = PipelineStatus::Analyzing;
        assert_eq!(store.save(&state).unwrap(), 2);
        state.status = PipelineStatus::Refining;
        assert_eq!(store.save(&state).unwrap(), 3);

        let history = store.history().unwrap();
        let versions: Vec<u64> = history.iter().map(|h| h.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(history[2].status, PipelineStatus::Refining);
    }

    #[test]
    fn test_rollback_appends_copy() {
        let store = StateStore::new().unwrap();
        let mut state = sample_state();
        store.save(&state).unwrap();
        state.status = PipelineStatus::Complete;
        state.iteration_count = 2;
        store.save(&state).unwrap();

        let before = store.history().unwrap().len();
        let new_version = store.rollback(1).unwrap();

        assert_eq!(new_version, 3);
        assert_eq!(store.get(None).unwrap(), store.get(Some(1)).unwrap());
        assert_eq!(store.get(Some(2)).unwrap().status, PipelineStatus::Complete);

        let history = store.history().unwrap();
        assert!(history.len() > before);
        assert_eq!(history[2].rolled_back_from, Some(1));
    }

    #[test]
    fn test_missing_version_is_an_error() {
        let store = StateStore::new().unwrap();
        assert!(matches!(store.get(None), Err(StoreError::Empty)));

        store.save(&sample_state()).unwrap();
        assert!(matches!(
            store.get(Some(42)),
            Err(StoreError::VersionNotFound {
                version: 42,
                latest: Some(1)
            })
        ));
        assert!(matches!(
            store.rollback(42),
            Err(StoreError::VersionNotFound { .. })
        ));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_saved_versions_cannot_be_mutated() {
        let store = StateStore::new().unwrap();
        store.save(&sample_state()).unwrap();

        let conn = store.lock().unwrap();
        let update = conn
            .execute("UPDATE state_versions SET status = 'complete' WHERE version = 1", [])
            .map_err(StoreError::from_backend);
        assert!(matches!(update, Err(StoreError::ImmutableVersion(_))));

        let delete = conn
            .execute("DELETE FROM state_versions WHERE version = 1", [])
            .map_err(StoreError::from_backend);
        assert!(matches!(delete, Err(StoreError::ImmutableVersion(_))));
    }

    #[tokio::test]
    async fn test_concurrent_saves_get_distinct_versions() {
        let store = Arc::new(StateStore::new().unwrap());
        let mut handles = Vec::new();

        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.save(&sample_state()).unwrap()
            }));
        }

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap());
        }
        versions.sort_unstable();

        assert_eq!(versions, (1..=16).collect::<Vec<u64>>());
    }
}
