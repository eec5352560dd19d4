use std::path::Path;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::dataset::{Dataset, DatasetKind, Record};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS datasets (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    num_rows INTEGER NOT NULL,
    rows TEXT NOT NULL
);";

/// SQLite mirror of the dataset store, so datasets survive a restart.
pub struct Snapshot {
    conn: Mutex<Connection>,
}

impl Snapshot {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open snapshot {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create snapshot schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn save(&self, dataset: &Dataset) -> Result<()> {
        let rows = serde_json::to_string(dataset.rows())?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO datasets (id, kind, num_rows, rows) VALUES (?1, ?2, ?3, ?4)",
                params![
                    dataset.id,
                    dataset.kind.as_str(),
                    dataset.num_rows() as i64,
                    rows
                ],
            )
            .with_context(|| format!("Failed to save dataset {:?}", dataset.id))?;
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM datasets WHERE id = ?1", params![id])
            .with_context(|| format!("Failed to delete dataset {:?}", id))?;
        Ok(())
    }

    pub fn load_all(&self) -> Result<Vec<Dataset>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, kind, num_rows, rows FROM datasets ORDER BY id")?;
        let stored = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        stored
            .into_iter()
            .map(|(id, kind, num_rows, rows)| {
                let kind: DatasetKind = kind.parse()?;
                let rows: Vec<Record> = serde_json::from_str(&rows)
                    .with_context(|| format!("Corrupt rows for dataset {:?}", id))?;
                if rows.len() as i64 != num_rows {
                    return Err(anyhow!(
                        "dataset {:?} has {} rows, expected {}",
                        id,
                        rows.len(),
                        num_rows
                    ));
                }
                Ok(Dataset::new(id, kind, rows))
            })
            .collect()
    }
}
