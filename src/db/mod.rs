pub mod helpers;
pub mod migrations;
pub mod schema;
pub use helpers::with_connection;

use rusqlite::{Connection, Result};
use std::path::Path;
use std::time::Duration;

/// The host process, the reconciler and CLI invocations may open the same file concurrently.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    /// Open and migrate in one step.
    pub fn open_migrated(path: &Path) -> Result<Self> {
        let db = Self::open(path)?;
        migrations::run(db.connection())?;
        Ok(db)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_database_opens() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let _db = Database::open(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_all_tables_created() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open_migrated(&db_path).unwrap();

        let expected_tables = ["preferences", "callbacks", "work_tasks"];
        for table in &expected_tables {
            let count: i32 = db
                .connection()
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {table} should exist");
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(&db_path).unwrap();

        migrations::run(db.connection()).unwrap();
        db.connection()
            .execute("INSERT INTO preferences (key, value) VALUES ('k', 7)", [])
            .unwrap();
        migrations::run(db.connection()).unwrap();

        let value: i64 = db
            .connection()
            .query_row("SELECT value FROM preferences WHERE key = 'k'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(value, 7, "Re-running migrations must not drop data");
    }
}
