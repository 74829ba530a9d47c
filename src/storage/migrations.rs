//! Versioned schema for the SQLite store
//!
//! Each migration runs in its own transaction and is recorded in
//! `schema_version`, so reopening a database only applies what is missing.

use chrono::Utc;
use log::info;
use rusqlite::{params, Connection};

use crate::error::Result;

pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

/// All migrations in order
pub fn migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Posts and votes",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                score INTEGER NOT NULL,
                hidden INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,        -- unix micros
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_posts_newest ON posts(hidden, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_posts_score ON posts(hidden, score DESC);

            CREATE TABLE IF NOT EXISTS votes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id INTEGER NOT NULL,
                value INTEGER NOT NULL CHECK(value IN (1, -1)),
                created_at INTEGER NOT NULL,
                FOREIGN KEY (post_id) REFERENCES posts(id)
            );

            CREATE INDEX IF NOT EXISTS idx_votes_post ON votes(post_id);
        "#,
    }]
}

fn current_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version.unwrap_or(0))
}

/// Apply every migration newer than the recorded version. Returns how many
/// were applied.
pub fn migrate(conn: &Connection) -> Result<usize> {
    let current = current_version(conn)?;
    let pending: Vec<_> = migrations()
        .into_iter()
        .filter(|m| m.version > current)
        .collect();

    for migration in &pending {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.up_sql)?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![migration.version, Utc::now().timestamp_millis()],
        )?;
        tx.commit()?;

        info!(
            "Applied store migration v{}: {}",
            migration.version, migration.description
        );
    }

    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables_once() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(migrate(&conn).unwrap(), migrations().len());
        assert_eq!(migrate(&conn).unwrap(), 0);

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert!(tables.contains(&"posts".to_string()));
        assert!(tables.contains(&"votes".to_string()));
        assert_eq!(current_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_vote_value_constrained() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute(
            "INSERT INTO posts (content, score, created_at, updated_at) VALUES ('p', 1, 0, 0)",
            [],
        )
        .unwrap();

        assert!(conn
            .execute(
                "INSERT INTO votes (post_id, value, created_at) VALUES (1, 2, 0)",
                []
            )
            .is_err());
    }
}
