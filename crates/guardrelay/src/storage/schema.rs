//! `SQLite` schema definitions for guardrelay.
//!
//! Table and index definitions. Which of them a database has is decided by
//! the migrations in [`super::migrations`].

/// SQL statement to create the nodes table.
///
/// Each row is one leaf of the JSON tree: `path` is the `/`-joined key path
/// (empty for the root) and `value` the leaf serialized as JSON.
pub const CREATE_NODES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS nodes (
    path TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the guardians table.
pub const CREATE_GUARDIANS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS guardians (
    id TEXT PRIMARY KEY,
    paired_device_id TEXT,
    fcm_token TEXT,
    updated_at TEXT NOT NULL
)
";

/// SQL statement to create an index on `paired_device_id` for fan-out lookups.
pub const CREATE_PAIRED_DEVICE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_guardians_paired_device ON guardians(paired_device_id)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";
