use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

const LATEST_VERSION: i64 = 1;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (collections)");
        conn.execute_batch(
            "
            CREATE TABLE collections (
                key         TEXT PRIMARY KEY,
                identity    TEXT NOT NULL,
                kind        TEXT NOT NULL,
                body        TEXT NOT NULL,
                revision    INTEGER NOT NULL DEFAULT 1,
                updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_collections_identity
                ON collections(identity);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database schema at v{}", version.max(LATEST_VERSION));
    Ok(())
}
