//! Versioned schema migrations tracked through `PRAGMA user_version`

use super::{StorageError, StorageResult};
use rusqlite::{Connection, Transaction};

pub const CURRENT_SCHEMA_VERSION: i32 = 2;

pub fn run_migrations(conn: &mut Connection) -> StorageResult<()> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(StorageError::Migration(format!(
            "database version ({version}) is newer than supported schema ({CURRENT_SCHEMA_VERSION})"
        )));
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> StorageResult<()> {
    let script = match version {
        1 => include_str!("schemas/schema_v1.sql"),
        2 => include_str!("schemas/schema_v2.sql"),
        _ => {
            return Err(StorageError::Migration(format!(
                "unknown migration target version: {version}"
            )))
        }
    };
    tx.execute_batch(script)
        .map_err(|e| StorageError::Migration(format!("migration to version {version} failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_from_scratch() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();

        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        // A second run is a no-op
        run_migrations(&mut conn).unwrap();
    }

    #[test]
    fn test_v2_backfills_current_mode() {
        let mut conn = Connection::open_in_memory().unwrap();
        {
            let tx = conn.transaction().unwrap();
            apply_migration(&tx, 1).unwrap();
            tx.execute_batch(
                "INSERT INTO Home (ID, UserID) VALUES (1, 1);
                 INSERT INTO Device (ID, DName, DType, APIKey, HomeID) VALUES (1, 'Fan', 'Mini fan', 'k1', 1);
                 INSERT INTO Mode (ID, MType, MTime, UserID) VALUES (1, 'MANUAL', '2024-01-01T00:00:00Z', 1);
                 INSERT INTO Mode (ID, MType, MTime, UserID) VALUES (2, 'AUTO', '2024-01-02T00:00:00Z', 1);
                 INSERT INTO ModeDevice (ModeID, DeviceID) VALUES (1, 1);
                 INSERT INTO ModeDevice (ModeID, DeviceID) VALUES (2, 1);",
            )
            .unwrap();
            tx.pragma_update(None, "user_version", 1).unwrap();
            tx.commit().unwrap();
        }

        run_migrations(&mut conn).unwrap();

        let mode_id: i64 = conn
            .query_row(
                "SELECT ModeID FROM DeviceCurrentMode WHERE DeviceID = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(mode_id, 2);
    }

    #[test]
    fn test_newer_database_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION + 1)
            .unwrap();
        assert!(matches!(
            run_migrations(&mut conn),
            Err(StorageError::Migration(_))
        ));
    }
}
