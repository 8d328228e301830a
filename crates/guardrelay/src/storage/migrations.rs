//! Versioned schema migrations.
//!
//! The schema version lives in the `metadata` table. Each migration runs in
//! its own transaction and bumps the version when it commits, so a crash
//! mid-upgrade resumes from the last completed step.

use rusqlite::Connection;
use tracing::info;

use crate::error::{Error, Result};

use super::schema::{
    CREATE_GUARDIANS_TABLE, CREATE_METADATA_TABLE, CREATE_NODES_TABLE, CREATE_PAIRED_DEVICE_INDEX,
};

/// One schema upgrade step.
#[derive(Debug)]
struct Migration {
    version: i32,
    description: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create tree and guardian tables",
        statements: &[CREATE_NODES_TABLE, CREATE_GUARDIANS_TABLE],
    },
    Migration {
        version: 2,
        description: "index guardians by paired device",
        statements: &[CREATE_PAIRED_DEVICE_INDEX],
    },
];

/// The schema version this build writes.
pub const CURRENT_VERSION: i32 = 2;

const VERSION_KEY: &str = "schema_version";

/// Bring the database up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns an error if the database was written by a newer build, holds an
/// unreadable version, or a migration fails.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute(CREATE_METADATA_TABLE, [])?;

    let version = get_schema_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {version} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > version) {
        apply(conn, migration)?;
    }
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for statement in migration.statements {
        tx.execute(statement, [])?;
    }
    set_schema_version(&tx, migration.version)?;
    tx.commit()?;

    info!(
        version = migration.version,
        description = migration.description,
        "Applied schema migration"
    );
    Ok(())
}

/// Returns 0 for a fresh database.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let result: std::result::Result<String, rusqlite::Error> = conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        [VERSION_KEY],
        |row| row.get(0),
    );

    match result {
        Ok(value) => value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {value}"),
        }),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_exists(conn: &Connection, kind: &str, name: &str) -> bool {
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = ?1 AND name = ?2",
                [kind, name],
                |row| row.get(0),
            )
            .unwrap();
        count == 1
    }

    #[test]
    fn test_migrations_are_ordered_and_end_at_current() {
        for pair in MIGRATIONS.windows(2) {
            assert_eq!(pair[1].version, pair[0].version + 1);
        }
        assert_eq!(MIGRATIONS.last().unwrap().version, CURRENT_VERSION);
    }

    #[test]
    fn test_fresh_database_gets_everything() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        assert!(object_exists(&conn, "table", "nodes"));
        assert!(object_exists(&conn, "table", "guardians"));
        assert!(object_exists(&conn, "table", "metadata"));
        assert!(object_exists(&conn, "index", "idx_guardians_paired_device"));
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_initialize_twice() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_upgrade_from_version_one_adds_index() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(CREATE_METADATA_TABLE, []).unwrap();
        apply(&conn, &MIGRATIONS[0]).unwrap();
        conn.execute(
            "INSERT INTO guardians (id, paired_device_id, fcm_token, updated_at)
             VALUES ('g1', 'child_01', 'T1', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        assert!(!object_exists(&conn, "index", "idx_guardians_paired_device"));

        initialize_schema(&conn).unwrap();

        assert!(object_exists(&conn, "index", "idx_guardians_paired_device"));
        let kept: i32 = conn
            .query_row("SELECT COUNT(*) FROM guardians", [], |row| row.get(0))
            .unwrap();
        assert_eq!(kept, 1);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        set_schema_version(&conn, CURRENT_VERSION + 1).unwrap();

        let err = initialize_schema(&conn).unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[test]
    fn test_invalid_version_value() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        conn.execute(
            "UPDATE metadata SET value = 'abc' WHERE key = ?1",
            [VERSION_KEY],
        )
        .unwrap();

        let err = get_schema_version(&conn).unwrap_err();
        assert!(err.to_string().contains("invalid schema version"));
    }
}
