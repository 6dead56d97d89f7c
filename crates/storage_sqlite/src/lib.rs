mod notes;
mod organize;
mod scope;
mod scratch_pad;
mod tasks;

use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use core_types::{Entity, StoreError, StoreResult, User, UserId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

pub use scope::UserScope;

pub const CURRENT_DB_SCHEMA_VERSION: u32 = 1;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        name TEXT,
        created_at TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notebooks (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        name TEXT NOT NULL,
        color TEXT NOT NULL,
        is_default INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notes (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        notebook_id TEXT,
        title TEXT NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        plain_text TEXT NOT NULL DEFAULT '',
        is_pinned INTEGER NOT NULL DEFAULT 0,
        is_favorite INTEGER NOT NULL DEFAULT 0,
        is_trashed INTEGER NOT NULL DEFAULT 0,
        trashed_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE,
        FOREIGN KEY(notebook_id) REFERENCES notebooks(id) ON DELETE SET NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tags (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS note_tags (
        note_id TEXT NOT NULL,
        tag_id TEXT NOT NULL,
        PRIMARY KEY(note_id, tag_id),
        FOREIGN KEY(note_id) REFERENCES notes(id) ON DELETE CASCADE,
        FOREIGN KEY(tag_id) REFERENCES tags(id) ON DELETE CASCADE
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        note_id TEXT,
        title TEXT NOT NULL,
        is_completed INTEGER NOT NULL DEFAULT 0,
        due_date TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE,
        FOREIGN KEY(note_id) REFERENCES notes(id) ON DELETE SET NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scratch_pads (
        user_id TEXT PRIMARY KEY,
        content TEXT NOT NULL DEFAULT '',
        updated_at TEXT NOT NULL,
        FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
    );
    "#,
    "CREATE INDEX IF NOT EXISTS idx_notes_user_updated ON notes(user_id, is_trashed, updated_at);",
    "CREATE INDEX IF NOT EXISTS idx_note_tags_tag ON note_tags(tag_id);",
];

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect_with_pool_size(path, 5).await
    }

    pub async fn connect_with_pool_size(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}",
            path.as_ref().to_string_lossy()
        ))?
        .create_if_missing(true)
        .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<()> {
        for sql in MIGRATIONS {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO metadata(key, value)
            VALUES ('schema_version', ?1)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(CURRENT_DB_SCHEMA_VERSION.to_string())
        .execute(&self.pool)
        .await?;

        debug!(version = CURRENT_DB_SCHEMA_VERSION, "sqlite schema ready");
        Ok(())
    }

    pub async fn schema_version(&self) -> Result<u32> {
        let row = sqlx::query("SELECT value FROM metadata WHERE key = 'schema_version'")
            .fetch_one(&self.pool)
            .await?;
        let version = row.get::<String, _>("value").parse::<u32>()?;
        Ok(version)
    }

    /// Every entity method takes the caller's id; this bundles it once.
    pub fn scope(&self, user_id: UserId) -> UserScope {
        UserScope::new(self.clone(), user_id)
    }

    /// Returns the user registered under `email`, creating the row on first use.
    pub async fn ensure_user(&self, email: &str, name: Option<&str>) -> StoreResult<User> {
        let email = email.trim();
        if email.is_empty() {
            return Err(StoreError::validation("email", "is required"));
        }

        if let Some(user) = self.find_user_by_email(email).await? {
            return Ok(user);
        }

        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: name.map(str::to_string),
            created_at: Utc::now(),
        };
        sqlx::query(r#"INSERT INTO users(id, email, name, created_at) VALUES (?1, ?2, ?3, ?4)"#)
            .bind(user.id.to_string())
            .bind(&user.email)
            .bind(&user.name)
            .bind(timestamp(user.created_at))
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        debug!(user_id = %user.id, "registered user");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: UserId) -> StoreResult<User> {
        let row = sqlx::query("SELECT id, email, name, created_at FROM users WHERE id = ?1")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::not_found(Entity::User, user_id))?;
        Ok(map_user_row(row)?)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT id, email, name, created_at FROM users WHERE email = ?1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map(map_user_row).transpose()?)
    }
}

fn map_user_row(row: sqlx::sqlite::SqliteRow) -> Result<User> {
    Ok(User {
        id: parse_uuid(row.get("id"))?,
        email: row.get("email"),
        name: row.get("name"),
        created_at: parse_rfc3339(row.get("created_at"))?,
    })
}

pub(crate) fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.into())
}

/// Fixed-width so that text ordering in SQL matches time ordering.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_rfc3339(value: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&value)?.with_timezone(&Utc))
}

pub(crate) fn parse_optional_rfc3339(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(parse_rfc3339).transpose()
}

pub(crate) fn parse_uuid(value: String) -> Result<Uuid> {
    Ok(Uuid::parse_str(&value)?)
}

pub(crate) fn parse_optional_uuid(value: Option<String>) -> Result<Option<Uuid>> {
    value.map(parse_uuid).transpose()
}
