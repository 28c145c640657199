// src/db/helpers.rs

use crate::db::Database;
use crate::error::AppError;
use crate::safe_lock;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

/// Execute a database operation with poison-tolerant locking and error mapping.
///
/// # Example
/// ```ignore
/// with_connection(&db, "load callback handle", |conn| {
///     Preference::get_i64(conn, CALLBACK_HANDLE_KEY)
/// })
/// ```
pub fn with_connection<F, T>(db: &Arc<Mutex<Database>>, operation: &str, f: F) -> Result<T, AppError>
where
    F: FnOnce(&Connection) -> rusqlite::Result<T>,
{
    let db = safe_lock(db, "Database");
    f(db.connection()).map_err(|e| {
        log::error!("Failed to {operation}: {e}");
        AppError::Storage(e)
    })
}
