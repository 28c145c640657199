pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS preferences (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS callbacks (
    handle INTEGER PRIMARY KEY AUTOINCREMENT,
    program TEXT NOT NULL,
    entry_point TEXT NOT NULL,
    UNIQUE (program, entry_point)
);

CREATE TABLE IF NOT EXISTS work_tasks (
    name TEXT PRIMARY KEY,
    interval_secs INTEGER NOT NULL,
    enqueued_at INTEGER NOT NULL,
    next_run_at INTEGER NOT NULL,
    run_attempt INTEGER NOT NULL DEFAULT 0,
    last_run_at INTEGER,
    last_outcome TEXT
);

CREATE INDEX IF NOT EXISTS idx_work_tasks_next_run ON work_tasks(next_run_at);
";
