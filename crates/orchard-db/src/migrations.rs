use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE,
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                changed_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- tree_ids is a JSON array mirroring trees.meadow_id
            CREATE TABLE meadows (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                location    TEXT NOT NULL,
                name        TEXT NOT NULL,
                size        REAL NOT NULL,
                tree_ids    TEXT NOT NULL DEFAULT '[]',
                user_id     INTEGER NOT NULL
            );

            CREATE INDEX idx_meadows_user ON meadows(user_id);

            CREATE TABLE trees (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                plant_date  TEXT NOT NULL,
                meadow_id   INTEGER NOT NULL REFERENCES meadows(id),
                position    TEXT NOT NULL,
                type        TEXT NOT NULL,
                user_id     INTEGER NOT NULL
            );

            CREATE INDEX idx_trees_meadow ON trees(meadow_id, user_id);

            CREATE TABLE images (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                path        TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                datetime    TEXT NOT NULL,
                tree_id     INTEGER NOT NULL REFERENCES trees(id),
                user_id     INTEGER NOT NULL
            );

            CREATE INDEX idx_images_tree ON images(tree_id, user_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
