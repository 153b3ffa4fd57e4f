/// Schema for the snapshot cache and the scheduled work registry.
pub const SCHEMA: &str = r#"
-- One row per entity type: metadata of the current snapshot
CREATE TABLE IF NOT EXISTS snapshot_meta (
    entity_type TEXT PRIMARY KEY,
    last_synced_at TEXT,
    record_count INTEGER NOT NULL,
    written_at TEXT NOT NULL
);

-- Records of the current snapshot (serialized JSON, display order)
CREATE TABLE IF NOT EXISTS snapshot_records (
    entity_type TEXT NOT NULL,
    record_key TEXT NOT NULL,
    position INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    pending INTEGER NOT NULL DEFAULT 0,
    data BLOB NOT NULL,
    PRIMARY KEY (entity_type, record_key)
);

CREATE INDEX IF NOT EXISTS idx_snapshot_records_position
    ON snapshot_records(entity_type, position);

-- Durable registrations for recurring work
CREATE TABLE IF NOT EXISTS scheduled_work (
    name TEXT PRIMARY KEY,
    period_secs INTEGER NOT NULL,
    next_run_at TEXT NOT NULL,
    attempt INTEGER NOT NULL DEFAULT 0,
    cycle INTEGER NOT NULL DEFAULT 0,
    last_completed_cycle INTEGER
);
"#;
