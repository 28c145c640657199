use super::engine::CallbackLookup;
use crate::db::{with_connection, Database};
use crate::error::AppError;
use crate::models::{CallbackInfo, CallbackReference};
use std::sync::{Arc, Mutex};

/// Durable home of the single callback reference.
#[derive(Clone)]
pub struct CallbackStore {
    db: Arc<Mutex<Database>>,
}

impl CallbackStore {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Persist `handle`, replacing any earlier registration.
    pub fn register(&self, handle: i64) -> Result<(), AppError> {
        if handle == 0 {
            return Err(AppError::InvalidArgument {
                field: "handle",
                reason: "must be non-zero".into(),
            });
        }
        with_connection(&self.db, "store callback handle", |conn| {
            CallbackReference::new(handle).store(conn)
        })
    }

    pub fn load(&self) -> Result<Option<CallbackReference>, AppError> {
        with_connection(&self.db, "load callback handle", CallbackReference::load)
    }

    pub fn clear(&self) -> Result<bool, AppError> {
        with_connection(&self.db, "clear callback handle", CallbackReference::clear)
    }
}

/// Table of entry points that handles resolve to.
#[derive(Clone)]
pub struct CallbackRegistry {
    db: Arc<Mutex<Database>>,
}

impl CallbackRegistry {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Register `entry_point` inside `program` and return its handle.
    pub fn register_entry(&self, program: &str, entry_point: &str) -> Result<i64, AppError> {
        let program = program.trim();
        let entry_point = entry_point.trim();
        if program.is_empty() {
            return Err(AppError::InvalidArgument {
                field: "program",
                reason: "cannot be empty".into(),
            });
        }
        if entry_point.is_empty() {
            return Err(AppError::InvalidArgument {
                field: "entry_point",
                reason: "cannot be empty".into(),
            });
        }
        with_connection(&self.db, "register entry point", |conn| {
            CallbackInfo::register(conn, program, entry_point)
        })
    }

    pub fn remove_entry(&self, handle: i64) -> Result<bool, AppError> {
        with_connection(&self.db, "remove entry point", |conn| CallbackInfo::delete(conn, handle))
    }
}

impl CallbackLookup for CallbackRegistry {
    fn lookup(&self, handle: i64) -> Result<Option<CallbackInfo>, AppError> {
        with_connection(&self.db, "look up callback", |conn| CallbackInfo::find_by_handle(conn, handle))
    }
}
