use crate::constants::CALLBACK_HANDLE_KEY;
use crate::models::Preference;
use rusqlite::{params, Connection, OptionalExtension, Result};
use serde::{Deserialize, Serialize};

/// Opaque handle into the consumer engine. Exactly one is stored at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackReference {
    pub handle: i64,
}

impl CallbackReference {
    pub fn new(handle: i64) -> Self {
        Self { handle }
    }

    /// Load the stored reference. A stored 0 counts as absent.
    pub fn load(conn: &Connection) -> Result<Option<Self>> {
        let handle = Preference::get_i64(conn, CALLBACK_HANDLE_KEY)?;
        Ok(handle.filter(|h| *h != 0).map(Self::new))
    }

    /// Persist, replacing whatever was stored before.
    pub fn store(&self, conn: &Connection) -> Result<()> {
        Preference::put_i64(conn, CALLBACK_HANDLE_KEY, self.handle)
    }

    pub fn clear(conn: &Connection) -> Result<bool> {
        Preference::remove(conn, CALLBACK_HANDLE_KEY)
    }
}

/// What a handle resolves to: the program hosting the engine and the entry point it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackInfo {
    pub handle: i64,
    pub program: String,
    pub entry_point: String,
}

impl CallbackInfo {
    /// Register an entry point, returning its handle. Registering the same pair twice
    /// returns the original handle.
    pub fn register(conn: &Connection, program: &str, entry_point: &str) -> Result<i64> {
        conn.execute(
            "INSERT OR IGNORE INTO callbacks (program, entry_point) VALUES (?1, ?2)",
            params![program, entry_point],
        )?;
        conn.query_row(
            "SELECT handle FROM callbacks WHERE program = ?1 AND entry_point = ?2",
            params![program, entry_point],
            |row| row.get(0),
        )
    }

    pub fn find_by_handle(conn: &Connection, handle: i64) -> Result<Option<Self>> {
        conn.query_row(
            "SELECT handle, program, entry_point FROM callbacks WHERE handle = ?1",
            params![handle],
            |row| {
                Ok(Self {
                    handle: row.get(0)?,
                    program: row.get(1)?,
                    entry_point: row.get(2)?,
                })
            },
        )
        .optional()
    }

    pub fn delete(conn: &Connection, handle: i64) -> Result<bool> {
        let rows_affected = conn.execute("DELETE FROM callbacks WHERE handle = ?1", params![handle])?;
        Ok(rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::setup_test_db;

    #[test]
    fn test_reference_last_write_wins() {
        let (db, _dir) = setup_test_db();
        let conn = db.connection();

        CallbackReference::new(11).store(conn).unwrap();
        CallbackReference::new(22).store(conn).unwrap();

        assert_eq!(CallbackReference::load(conn).unwrap(), Some(CallbackReference::new(22)));
    }

    #[test]
    fn test_zero_handle_reads_as_absent() {
        let (db, _dir) = setup_test_db();
        let conn = db.connection();

        Preference::put_i64(conn, CALLBACK_HANDLE_KEY, 0).unwrap();
        assert_eq!(CallbackReference::load(conn).unwrap(), None);
    }

    #[test]
    fn test_register_is_idempotent_per_entry_point() {
        let (db, _dir) = setup_test_db();
        let conn = db.connection();

        let first = CallbackInfo::register(conn, "/usr/bin/consumer", "main").unwrap();
        let again = CallbackInfo::register(conn, "/usr/bin/consumer", "main").unwrap();
        let other = CallbackInfo::register(conn, "/usr/bin/consumer", "background").unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_ne!(first, 0, "handles must never collide with the absent marker");
    }

    #[test]
    fn test_deleted_entry_no_longer_resolves() {
        let (db, _dir) = setup_test_db();
        let conn = db.connection();

        let handle = CallbackInfo::register(conn, "consumer", "main").unwrap();
        let info = CallbackInfo::find_by_handle(conn, handle).unwrap().unwrap();
        assert_eq!(info.entry_point, "main");

        assert!(CallbackInfo::delete(conn, handle).unwrap());
        assert_eq!(CallbackInfo::find_by_handle(conn, handle).unwrap(), None);
    }
}
