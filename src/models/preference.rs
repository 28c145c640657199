use rusqlite::{params, Connection, OptionalExtension, Result};

/// Durable integer key/value record. Writes overwrite.
pub struct Preference;

impl Preference {
    pub fn get_i64(conn: &Connection, key: &str) -> Result<Option<i64>> {
        conn.query_row(
            "SELECT value FROM preferences WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
    }

    pub fn put_i64(conn: &Connection, key: &str, value: i64) -> Result<()> {
        conn.execute(
            "INSERT INTO preferences (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn remove(conn: &Connection, key: &str) -> Result<bool> {
        let rows_affected = conn.execute("DELETE FROM preferences WHERE key = ?1", params![key])?;
        Ok(rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::setup_test_db;

    #[test]
    fn test_missing_key_is_none() {
        let (db, _dir) = setup_test_db();
        assert_eq!(Preference::get_i64(db.connection(), "nope").unwrap(), None);
    }

    #[test]
    fn test_put_overwrites() {
        let (db, _dir) = setup_test_db();
        let conn = db.connection();

        Preference::put_i64(conn, "handle", 1).unwrap();
        Preference::put_i64(conn, "handle", 2).unwrap();

        assert_eq!(Preference::get_i64(conn, "handle").unwrap(), Some(2));
        let rows: i32 = conn
            .query_row("SELECT COUNT(*) FROM preferences", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_remove() {
        let (db, _dir) = setup_test_db();
        let conn = db.connection();

        Preference::put_i64(conn, "handle", 1).unwrap();
        assert!(Preference::remove(conn, "handle").unwrap());
        assert!(!Preference::remove(conn, "handle").unwrap());
        assert_eq!(Preference::get_i64(conn, "handle").unwrap(), None);
    }
}
