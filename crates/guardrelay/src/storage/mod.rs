//! Storage layer for guardrelay.
//!
//! A single `SQLite` database holds both collaborators the relay works with:
//!
//! - the alert tree, a JSON document addressed by `/`-separated paths and
//!   stored as one row per leaf;
//! - the guardian directory.
//!
//! Writes to the tree report the alert records they create, which is how the
//! relay produces its creation events.

pub mod migrations;
pub mod path;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::alert::{AlertEvent, ALERTS_ROOT};
use crate::error::{Error, Result};
use crate::guardian::{GuardianDirectory, GuardianRecord};

pub use path::StorePath;

/// Depth of an alert record path: `alerts/{deviceId}/{timestamp}`.
const RECORD_DEPTH: usize = 3;

/// Storage engine backing the alert tree and the guardian directory.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("storage connection lock poisoned"))
    }

    // === Alert tree ===

    /// Overwrite the value at `path`.
    ///
    /// Everything previously stored at or below `path` is replaced, as is any
    /// scalar stored at an ancestor. Writing `null` deletes the location.
    /// Returns one event per alert record that did not exist before the write
    /// and exists after it.
    ///
    /// # Errors
    ///
    /// Returns an error if the path or a key inside `value` is invalid, or the
    /// database operation fails. Nothing is written on error.
    pub fn set(&self, path: &str, value: &Value) -> Result<Vec<AlertEvent>> {
        let target = StorePath::parse(path)?;
        let target_key = target.key();

        let mut leaves = Vec::new();
        flatten(&target_key, value, &mut leaves)?;
        let candidates = record_candidates(&target, value);

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existed = candidates
            .iter()
            .map(|key| subtree_exists(&tx, key))
            .collect::<Result<Vec<_>>>()?;

        delete_subtree(&tx, &target_key)?;
        for ancestor in target.ancestor_keys() {
            tx.execute("DELETE FROM nodes WHERE path = ?1", [&ancestor])?;
        }
        for (leaf_path, leaf_value) in &leaves {
            tx.execute(
                "INSERT INTO nodes (path, value, updated_at) VALUES (?1, ?2, ?3)",
                params![leaf_path, leaf_value, Utc::now().to_rfc3339()],
            )?;
        }

        let mut created = Vec::new();
        for (key, existed) in candidates.iter().zip(existed) {
            if existed {
                continue;
            }
            if let Some(record) = read_subtree(&tx, key)? {
                if let Some(event) = AlertEvent::from_record(key, &record) {
                    created.push(event);
                }
            }
        }

        tx.commit()?;
        debug!(
            path = %target,
            leaves = leaves.len(),
            created = created.len(),
            "Wrote value"
        );
        Ok(created)
    }

    /// Read the value at `path`, or `None` if nothing is stored there.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the database operation fails.
    pub fn get(&self, path: &str) -> Result<Option<Value>> {
        let target = StorePath::parse(path)?;
        let conn = self.lock()?;
        read_subtree(&conn, &target.key())
    }

    // === Guardian directory ===

    /// Insert or replace a guardian record.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty or the database operation fails.
    pub fn upsert_guardian(&self, guardian: &GuardianRecord) -> Result<()> {
        if guardian.id.is_empty() {
            return Err(Error::internal("guardian id must not be empty"));
        }

        let conn = self.lock()?;
        conn.execute(
            r"
            INSERT INTO guardians (id, paired_device_id, fcm_token, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                paired_device_id = excluded.paired_device_id,
                fcm_token = excluded.fcm_token,
                updated_at = excluded.updated_at
            ",
            params![
                guardian.id,
                guardian.paired_device_id,
                guardian.fcm_token,
                Utc::now().to_rfc3339(),
            ],
        )?;
        debug!(guardian_id = %guardian.id, "Upserted guardian");
        Ok(())
    }

    /// Get a guardian by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_guardian(&self, id: &str) -> Result<Option<GuardianRecord>> {
        let conn = self.lock()?;
        let result = conn
            .query_row(
                r"
                SELECT id, paired_device_id, fcm_token, updated_at
                FROM guardians WHERE id = ?1
                ",
                [id],
                Self::row_to_guardian,
            )
            .optional()?;
        Ok(result)
    }

    /// Every guardian record, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn guardians(&self) -> Result<Vec<GuardianRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r"
            SELECT id, paired_device_id, fcm_token, updated_at
            FROM guardians ORDER BY id
            ",
        )?;
        let guardians = stmt
            .query_map([], Self::row_to_guardian)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(guardians)
    }

    /// Guardians paired with `device_id`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn guardians_for_device(&self, device_id: &str) -> Result<Vec<GuardianRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r"
            SELECT id, paired_device_id, fcm_token, updated_at
            FROM guardians WHERE paired_device_id = ?1 ORDER BY id
            ",
        )?;
        let guardians = stmt
            .query_map([device_id], Self::row_to_guardian)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(guardians)
    }

    /// Clear the push token of one guardian.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GuardianNotFound`] if no record has this id.
    pub fn clear_token(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE guardians SET fcm_token = NULL, updated_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(Error::GuardianNotFound(id.to_string()));
        }
        debug!(guardian_id = %id, "Cleared push token");
        Ok(())
    }

    /// Delete a guardian record. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_guardian(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM guardians WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    /// Get storage statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let conn = self.lock()?;
        let node_count: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        let guardian_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM guardians", [], |row| row.get(0))?;
        let tokenless_guardians: i64 = conn.query_row(
            "SELECT COUNT(*) FROM guardians WHERE fcm_token IS NULL OR fcm_token = ''",
            [],
            |row| row.get(0),
        )?;

        let db_size_bytes = if self.path.as_os_str() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            node_count,
            guardian_count,
            tokenless_guardians,
            db_size_bytes,
        })
    }

    fn row_to_guardian(row: &rusqlite::Row) -> rusqlite::Result<GuardianRecord> {
        let updated_at: String = row.get(3)?;
        Ok(GuardianRecord {
            id: row.get(0)?,
            paired_device_id: row.get(1)?,
            fcm_token: row.get(2)?,
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        })
    }
}

#[async_trait]
impl GuardianDirectory for Storage {
    async fn list_guardians(&self) -> Result<Vec<GuardianRecord>> {
        self.guardians()
    }

    async fn guardians_paired_with(&self, device_id: &str) -> Result<Vec<GuardianRecord>> {
        self.guardians_for_device(device_id)
    }

    async fn remove_token(&self, guardian_id: &str) -> Result<()> {
        self.clear_token(guardian_id)
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of leaf rows in the alert tree.
    pub node_count: i64,
    /// Number of guardian records.
    pub guardian_count: i64,
    /// Guardian records without a push token.
    pub tokenless_guardians: i64,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

/// Flatten `value` into `(path, json)` leaf rows under `prefix`.
///
/// Arrays become index-keyed children; nulls and empty containers produce no
/// rows.
fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, child) in map {
                path::validate_key(key)
                    .map_err(|reason| Error::invalid_path(path::join_key(prefix, key), reason))?;
                flatten(&path::join_key(prefix, key), child, out)?;
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten(&path::join_key(prefix, &index.to_string()), child, out)?;
            }
        }
        scalar => out.push((prefix.to_string(), scalar.to_string())),
    }
    Ok(())
}

/// Keys of the alert records a write of `value` at `target` may create.
fn record_candidates(target: &StorePath, value: &Value) -> Vec<String> {
    let segments = target.segments();
    if segments.first().is_some_and(|root| root != ALERTS_ROOT) {
        return Vec::new();
    }

    match segments.len() {
        0 => value
            .get(ALERTS_ROOT)
            .map(|alerts| grandchild_keys(ALERTS_ROOT, alerts))
            .unwrap_or_default(),
        1 => grandchild_keys(ALERTS_ROOT, value),
        2 => child_keys(&target.key(), value),
        _ => vec![target.prefix(RECORD_DEPTH).key()],
    }
}

fn child_names(value: &Value) -> Vec<String> {
    match value {
        Value::Object(map) => map.keys().cloned().collect(),
        Value::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        _ => Vec::new(),
    }
}

fn child_keys(parent: &str, value: &Value) -> Vec<String> {
    child_names(value)
        .into_iter()
        .map(|name| path::join_key(parent, &name))
        .collect()
}

fn grandchild_keys(parent: &str, value: &Value) -> Vec<String> {
    let mut keys = Vec::new();
    for name in child_names(value) {
        let child = match value {
            Value::Object(map) => map.get(&name),
            Value::Array(items) => name.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        if let Some(child) = child {
            keys.extend(child_keys(&path::join_key(parent, &name), child));
        }
    }
    keys
}

/// Bounds of the half-open key range holding every descendant of `key`.
///
/// `'0'` is the byte after `'/'`, so `[key/, key0)` covers exactly the
/// descendants under binary collation.
fn descendant_range(key: &str) -> (String, String) {
    (format!("{key}/"), format!("{key}0"))
}

fn subtree_exists(conn: &Connection, key: &str) -> Result<bool> {
    let exists: bool = if key.is_empty() {
        conn.query_row("SELECT EXISTS(SELECT 1 FROM nodes)", [], |row| row.get(0))?
    } else {
        let (lower, upper) = descendant_range(key);
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE path = ?1 OR (path >= ?2 AND path < ?3))",
            params![key, lower, upper],
            |row| row.get(0),
        )?
    };
    Ok(exists)
}

fn delete_subtree(conn: &Connection, key: &str) -> Result<usize> {
    let deleted = if key.is_empty() {
        conn.execute("DELETE FROM nodes", [])?
    } else {
        let (lower, upper) = descendant_range(key);
        conn.execute(
            "DELETE FROM nodes WHERE path = ?1 OR (path >= ?2 AND path < ?3)",
            params![key, lower, upper],
        )?
    };
    Ok(deleted)
}

fn read_subtree(conn: &Connection, key: &str) -> Result<Option<Value>> {
    let leaf: Option<String> = conn
        .query_row("SELECT value FROM nodes WHERE path = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?;
    if let Some(json) = leaf {
        return Ok(Some(serde_json::from_str(&json)?));
    }

    let rows: Vec<(String, String)> = if key.is_empty() {
        let mut stmt = conn.prepare("SELECT path, value FROM nodes ORDER BY path")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    } else {
        let (lower, upper) = descendant_range(key);
        let mut stmt = conn.prepare(
            "SELECT path, value FROM nodes WHERE path >= ?1 AND path < ?2 ORDER BY path",
        )?;
        let rows = stmt
            .query_map(params![lower, upper], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    if rows.is_empty() {
        return Ok(None);
    }

    let skip = if key.is_empty() { 0 } else { key.len() + 1 };
    let mut root = Value::Object(Map::new());
    for (leaf_path, json) in rows {
        let leaf_value: Value = serde_json::from_str(&json)?;
        insert_leaf(&mut root, leaf_path[skip..].split('/'), leaf_value);
    }
    Ok(Some(root))
}

fn insert_leaf<'a>(node: &mut Value, mut segments: impl Iterator<Item = &'a str>, leaf: Value) {
    let Some(segment) = segments.next() else {
        *node = leaf;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(segment.to_string()).or_insert(Value::Null);
        insert_leaf(child, segments, leaf);
    }
}
