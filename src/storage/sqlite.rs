//! SQLite storage backend
//!
//! Connections come from an r2d2 pool and every call runs on the blocking
//! thread pool. A transaction takes SQLite's write lock with
//! `BEGIN IMMEDIATE` on its first `lock_post`, which serializes writers the
//! way a row lock would; waiting for it is bounded by the busy timeout.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use super::migrations;
use super::traits::*;
use crate::error::{MurmurError, Result};

const POOL_SIZE: u32 = 8;
const POOL_TIMEOUT: Duration = Duration::from_secs(10);
const POST_COLUMNS: &str = "id, content, score, hidden, created_at, updated_at";

/// Durable post storage in a single SQLite file
pub struct SqlitePostStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqlitePostStore {
    /// Open (or create) the database at `path` and bring its schema up to
    /// date. Writers wait at most `lock_timeout` for each other.
    pub fn open(path: impl AsRef<Path>, lock_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                MurmurError::StoreUnavailable(format!(
                    "cannot create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.busy_timeout(lock_timeout)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .connection_timeout(POOL_TIMEOUT)
            .build(manager)?;

        migrations::migrate(&*pool.get()?)?;
        info!("SQLite store ready at {}", path.display());
        Ok(Self { pool })
    }

    async fn run<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            work(&*conn)
        })
        .await
        .map_err(|e| MurmurError::StoreUnavailable(format!("store task failed: {}", e)))?
    }
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

// Posts past i64::MAX cannot exist in SQLite
fn row_id(post_id: PostId) -> Option<i64> {
    i64::try_from(post_id).ok()
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        content: row.get(1)?,
        score: row.get(2)?,
        hidden: row.get(3)?,
        created_at: from_micros(row.get(4)?),
        updated_at: from_micros(row.get(5)?),
    })
}

fn vote_from_row(row: &Row<'_>) -> rusqlite::Result<Vote> {
    let raw: i64 = row.get(2)?;
    let value = VoteValue::try_from(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Integer, Box::new(e)))?;
    Ok(Vote {
        id: row.get(0)?,
        post_id: row.get(1)?,
        value,
        created_at: from_micros(row.get(3)?),
    })
}

#[async_trait]
impl PostStore for SqlitePostStore {
    async fn create_post(&self, content: String, initial_score: i64) -> Result<Post> {
        self.run(move |conn| {
            let now = to_micros(Utc::now());
            let id: PostId = conn.query_row(
                "INSERT INTO posts (content, score, hidden, created_at, updated_at)
                 VALUES (?1, ?2, 0, ?3, ?3) RETURNING id",
                params![content, initial_score, now],
                |row| row.get(0),
            )?;
            Ok(Post {
                id,
                content,
                score: initial_score,
                hidden: false,
                created_at: from_micros(now),
                updated_at: from_micros(now),
            })
        })
        .await
    }

    async fn list_posts(&self) -> Result<Vec<Post>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM posts WHERE hidden = 0 ORDER BY created_at DESC, id DESC",
                POST_COLUMNS
            ))?;
            let posts = stmt
                .query_map([], post_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(posts)
        })
        .await
    }

    async fn trending_posts(&self, limit: usize) -> Result<Vec<Post>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM posts WHERE hidden = 0
                 ORDER BY score DESC, created_at DESC, id DESC LIMIT ?1",
                POST_COLUMNS
            ))?;
            let posts = stmt
                .query_map(params![limit], post_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(posts)
        })
        .await
    }

    async fn get_post(&self, post_id: PostId) -> Result<Option<Post>> {
        let Some(id) = row_id(post_id) else {
            return Ok(None);
        };
        self.run(move |conn| {
            let post = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM posts WHERE id = ?1 AND hidden = 0",
                        POST_COLUMNS
                    ),
                    params![id],
                    post_from_row,
                )
                .optional()?;
            Ok(post)
        })
        .await
    }

    async fn votes_for_post(&self, post_id: PostId) -> Result<Vec<Vote>> {
        let Some(id) = row_id(post_id) else {
            return Ok(Vec::new());
        };
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, post_id, value, created_at FROM votes WHERE post_id = ?1 ORDER BY id",
            )?;
            let votes = stmt
                .query_map(params![id], vote_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(votes)
        })
        .await
    }

    async fn health_check(&self) -> Result<()> {
        self.run(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let pool = self.pool.clone();
        let conn = tokio::task::spawn_blocking(move || pool.get())
            .await
            .map_err(|e| MurmurError::StoreUnavailable(format!("store task failed: {}", e)))??;

        Ok(Box::new(SqliteTransaction {
            conn: Some(TxConnection(conn)),
            locked: HashSet::new(),
        }))
    }
}

/// Pooled connection that never goes back to the pool mid-transaction
struct TxConnection(PooledConnection<SqliteConnectionManager>);

impl Drop for TxConnection {
    fn drop(&mut self) {
        if !self.0.is_autocommit() {
            if let Err(e) = self.0.execute_batch("ROLLBACK") {
                warn!("Rollback of abandoned transaction failed: {}", e);
            }
        }
    }
}

/// Transaction over [`SqlitePostStore`]; holds one pooled connection until
/// commit, rollback or drop
pub struct SqliteTransaction {
    conn: Option<TxConnection>,
    locked: HashSet<PostId>,
}

impl SqliteTransaction {
    async fn run<T, F>(&mut self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.take().ok_or_else(|| {
            MurmurError::StoreUnavailable("transaction connection already lost".to_string())
        })?;

        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = work(&*conn.0);
            (conn, result)
        })
        .await
        .map_err(|e| MurmurError::StoreUnavailable(format!("store task failed: {}", e)))?;

        self.conn = Some(conn);
        result
    }

    fn require_lock(&self, post_id: PostId) -> Result<i64> {
        match row_id(post_id) {
            Some(id) if self.locked.contains(&post_id) => Ok(id),
            _ => Err(MurmurError::Conflict(format!(
                "post {} is not locked by this transaction",
                post_id
            ))),
        }
    }

    async fn finish(mut self, statement: &'static str) -> Result<()> {
        self.run(move |conn| {
            if !conn.is_autocommit() {
                conn.execute_batch(statement)?;
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn lock_post(&mut self, post_id: PostId) -> Result<Option<Post>> {
        let Some(id) = row_id(post_id) else {
            return Ok(None);
        };

        let post = self
            .run(move |conn| {
                if conn.is_autocommit() {
                    conn.execute_batch("BEGIN IMMEDIATE")?;
                }
                let post = conn
                    .query_row(
                        &format!("SELECT {} FROM posts WHERE id = ?1", POST_COLUMNS),
                        params![id],
                        post_from_row,
                    )
                    .optional()?;
                Ok(post)
            })
            .await?;

        if post.is_some() {
            self.locked.insert(post_id);
        }
        Ok(post)
    }

    async fn insert_vote(&mut self, post_id: PostId, value: VoteValue) -> Result<Vote> {
        let id = self.require_lock(post_id)?;
        self.run(move |conn| {
            let now = to_micros(Utc::now());
            let vote_id: VoteId = conn.query_row(
                "INSERT INTO votes (post_id, value, created_at) VALUES (?1, ?2, ?3) RETURNING id",
                params![id, value.delta(), now],
                |row| row.get(0),
            )?;
            Ok(Vote {
                id: vote_id,
                post_id,
                value,
                created_at: from_micros(now),
            })
        })
        .await
    }

    async fn update_score(&mut self, post_id: PostId, score: i64) -> Result<()> {
        let id = self.require_lock(post_id)?;
        self.run(move |conn| {
            conn.execute(
                "UPDATE posts SET score = ?1, updated_at = ?2 WHERE id = ?3",
                params![score, to_micros(Utc::now()), id],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_hidden(&mut self, post_id: PostId, hidden: bool) -> Result<()> {
        let id = self.require_lock(post_id)?;
        self.run(move |conn| {
            conn.execute(
                "UPDATE posts SET hidden = ?1, updated_at = ?2 WHERE id = ?3",
                params![hidden, to_micros(Utc::now()), id],
            )?;
            Ok(())
        })
        .await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        (*self).finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        (*self).finish("ROLLBACK").await
    }
}
