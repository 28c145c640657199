use rusqlite::{params, Connection, OptionalExtension, Result, Row};

/// A uniquely-named periodic task tracked by the work scheduler. Times are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkTask {
    pub name: String,
    pub interval_secs: i64,
    /// Phase origin: successful runs are rescheduled onto `enqueued_at + n * interval_secs`.
    pub enqueued_at: i64,
    pub next_run_at: i64,
    pub run_attempt: i64,
    pub last_run_at: Option<i64>,
    pub last_outcome: Option<String>,
}

impl WorkTask {
    /// A task eligible to run right away.
    pub fn new(name: &str, interval_secs: i64, now: i64) -> Self {
        Self {
            name: name.to_string(),
            interval_secs,
            enqueued_at: now,
            next_run_at: now,
            run_attempt: 0,
            last_run_at: None,
            last_outcome: None,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            interval_secs: row.get(1)?,
            enqueued_at: row.get(2)?,
            next_run_at: row.get(3)?,
            run_attempt: row.get(4)?,
            last_run_at: row.get(5)?,
            last_outcome: row.get(6)?,
        })
    }

    /// Insert unless a task with this name exists. Returns whether a row was written.
    pub fn insert_if_absent(&self, conn: &Connection) -> Result<bool> {
        let rows_affected = conn.execute(
            "INSERT OR IGNORE INTO work_tasks
                (name, interval_secs, enqueued_at, next_run_at, run_attempt, last_run_at, last_outcome)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.name,
                self.interval_secs,
                self.enqueued_at,
                self.next_run_at,
                self.run_attempt,
                self.last_run_at,
                self.last_outcome,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Insert or overwrite the whole row.
    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO work_tasks
                (name, interval_secs, enqueued_at, next_run_at, run_attempt, last_run_at, last_outcome)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.name,
                self.interval_secs,
                self.enqueued_at,
                self.next_run_at,
                self.run_attempt,
                self.last_run_at,
                self.last_outcome,
            ],
        )?;
        Ok(())
    }

    /// Persist the run bookkeeping columns. Returns false if the task was cancelled meanwhile.
    pub fn update_run_state(&self, conn: &Connection) -> Result<bool> {
        let rows_affected = conn.execute(
            "UPDATE work_tasks
             SET next_run_at = ?1, run_attempt = ?2, last_run_at = ?3, last_outcome = ?4
             WHERE name = ?5",
            params![
                self.next_run_at,
                self.run_attempt,
                self.last_run_at,
                self.last_outcome,
                self.name,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Self>> {
        conn.query_row(
            "SELECT name, interval_secs, enqueued_at, next_run_at, run_attempt, last_run_at, last_outcome
             FROM work_tasks WHERE name = ?1",
            params![name],
            Self::from_row,
        )
        .optional()
    }

    pub fn find_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT name, interval_secs, enqueued_at, next_run_at, run_attempt, last_run_at, last_outcome
             FROM work_tasks ORDER BY name",
        )?;
        let rows = stmt.query_map([], Self::from_row)?;
        rows.collect()
    }

    /// Tasks whose next run is at or before `now`, earliest first.
    pub fn find_due(conn: &Connection, now: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT name, interval_secs, enqueued_at, next_run_at, run_attempt, last_run_at, last_outcome
             FROM work_tasks WHERE next_run_at <= ?1 ORDER BY next_run_at, name",
        )?;
        let rows = stmt.query_map(params![now], Self::from_row)?;
        rows.collect()
    }

    pub fn delete(conn: &Connection, name: &str) -> Result<bool> {
        let rows_affected = conn.execute("DELETE FROM work_tasks WHERE name = ?1", params![name])?;
        Ok(rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::setup_test_db;

    #[test]
    fn test_insert_if_absent_keeps_existing_row() {
        let (db, _dir) = setup_test_db();
        let conn = db.connection();

        assert!(WorkTask::new("sync", 900, 1_000).insert_if_absent(conn).unwrap());
        assert!(!WorkTask::new("sync", 1_800, 5_000).insert_if_absent(conn).unwrap());

        let task = WorkTask::find_by_name(conn, "sync").unwrap().unwrap();
        assert_eq!(task.interval_secs, 900);
        assert_eq!(task.enqueued_at, 1_000);
    }

    #[test]
    fn test_find_due() {
        let (db, _dir) = setup_test_db();
        let conn = db.connection();

        WorkTask::new("early", 900, 100).upsert(conn).unwrap();
        WorkTask::new("late", 900, 500).upsert(conn).unwrap();

        let due: Vec<String> = WorkTask::find_due(conn, 200)
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(due, vec!["early".to_string()]);
    }

    #[test]
    fn test_update_run_state_on_deleted_task() {
        let (db, _dir) = setup_test_db();
        let conn = db.connection();

        let task = WorkTask::new("sync", 900, 100);
        task.upsert(conn).unwrap();
        assert!(WorkTask::delete(conn, "sync").unwrap());

        assert!(!task.update_run_state(conn).unwrap());
        assert!(WorkTask::find_all(conn).unwrap().is_empty());
    }
}
