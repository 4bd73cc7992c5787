use rusqlite::Connection;

const LATEST_VERSION: i64 = 1;

/// Brings the database to the current schema. Version lives in
/// `PRAGMA user_version`.
pub fn migrate(connection: &mut Connection) -> rusqlite::Result<()> {
    connection.pragma_update(None, "foreign_keys", "ON")?;

    let version: i64 =
        connection.query_row("SELECT * FROM pragma_user_version", [], |row| row.get(0))?;

    if version < 1 {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS bundles (
                id TEXT PRIMARY KEY NOT NULL,
                data BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS bundle_metadata (
                id TEXT PRIMARY KEY NOT NULL REFERENCES bundles(id) ON DELETE CASCADE,
                source TEXT NOT NULL,
                destination TEXT NOT NULL,
                creation_time INTEGER NOT NULL,
                size INTEGER NOT NULL,
                constraints INTEGER NOT NULL
            );
            "#,
        )?;
    }

    connection.pragma_update(None, "user_version", LATEST_VERSION)?;
    Ok(())
}
