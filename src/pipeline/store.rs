//! SQLite index of pipeline runs.
//!
//! The run directory's `state.json` is authoritative for a single run; this
//! database mirrors it so runs can be listed without walking the data dir.

use super::state::PipelineState;
use crate::error::{KlippError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS runs (
        source_key TEXT PRIMARY KEY,
        origin TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        state_json TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_runs_updated_at ON runs(updated_at);
"#;

/// Summary row for `klipp list`.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub source_key: String,
    pub origin: String,
    pub updated_at: DateTime<Utc>,
    pub state: PipelineState,
}

/// SQLite-backed run index.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Opened run index at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| KlippError::Config(format!("Failed to acquire run index lock: {}", e)))
    }

    pub fn save(&self, state: &PipelineState) -> Result<()> {
        let conn = self.lock()?;
        let json = serde_json::to_string(state)?;

        conn.execute(
            r#"
            INSERT INTO runs (source_key, origin, updated_at, state_json)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(source_key) DO UPDATE SET
                origin = excluded.origin,
                updated_at = excluded.updated_at,
                state_json = excluded.state_json
            "#,
            params![state.source_key, state.origin, Utc::now().to_rfc3339(), json],
        )?;

        debug!("Saved state for {}", state.source_key);
        Ok(())
    }

    pub fn load(&self, source_key: &str) -> Result<Option<PipelineState>> {
        let conn = self.lock()?;

        let json: Option<String> = conn
            .query_row(
                "SELECT state_json FROM runs WHERE source_key = ?1",
                params![source_key],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| serde_json::from_str(&j).map_err(KlippError::from))
            .transpose()
    }

    /// Runs by most recent update. Rows with unreadable state are skipped.
    pub fn list(&self) -> Result<Vec<RunSummary>> {
        let conn = self.lock()?;

        let mut stmt =
            conn.prepare("SELECT source_key, origin, updated_at, state_json FROM runs ORDER BY updated_at DESC")?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (source_key, origin, updated_at, state_json) = row?;
            let Ok(state) = serde_json::from_str::<PipelineState>(&state_json) else {
                debug!("Skipping unreadable state for {}", source_key);
                continue;
            };
            let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            runs.push(RunSummary {
                source_key,
                origin,
                updated_at,
                state,
            });
        }

        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::{Stage, StageReport, StageStatus};

    #[test]
    fn test_save_load_upsert() {
        let store = SqliteStateStore::in_memory().unwrap();
        assert!(store.load("yt_x").unwrap().is_none());

        let mut state = PipelineState::new("yt_x", "https://youtu.be/x");
        store.save(&state).unwrap();
        state.mark(&StageReport::new(Stage::Download, StageStatus::Done));
        store.save(&state).unwrap();

        let loaded = store.load("yt_x").unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_list_skips_unreadable_rows() {
        let store = SqliteStateStore::in_memory().unwrap();
        store.save(&PipelineState::new("a", "one")).unwrap();
        store.save(&PipelineState::new("b", "two")).unwrap();

        let keys: Vec<String> = store.list().unwrap().into_iter().map(|r| r.source_key).collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"a".to_string()));

        store
            .lock()
            .unwrap()
            .execute("UPDATE runs SET state_json = '{' WHERE source_key = 'a'", [])
            .unwrap();
        let keys: Vec<String> = store.list().unwrap().into_iter().map(|r| r.source_key).collect();
        assert_eq!(keys, vec!["b".to_string()]);
    }

    #[test]
    fn test_on_disk_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/klipp.db");
        {
            let store = SqliteStateStore::new(&path).unwrap();
            store.save(&PipelineState::new("k", "o")).unwrap();
        }
        let store = SqliteStateStore::new(&path).unwrap();
        assert_eq!(store.load("k").unwrap().unwrap().origin, "o");
    }
}
