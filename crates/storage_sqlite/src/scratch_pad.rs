use chrono::Utc;
use core_types::{ScratchPad, StoreResult, UserId};
use sqlx::Row;

use crate::{SqliteStorage, backend, parse_rfc3339, timestamp};

impl SqliteStorage {
    pub async fn load_scratch_pad(&self, owner: UserId) -> StoreResult<ScratchPad> {
        let row = sqlx::query("SELECT content, updated_at FROM scratch_pads WHERE user_id = ?1")
            .bind(owner.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        let Some(row) = row else {
            return Ok(ScratchPad::empty(owner));
        };
        Ok(ScratchPad {
            owner_id: owner,
            content: row.get("content"),
            updated_at: Some(parse_rfc3339(row.get("updated_at"))?),
        })
    }

    pub async fn save_scratch_pad(&self, owner: UserId, content: String) -> StoreResult<ScratchPad> {
        ScratchPad::validate_content(&content)?;

        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO scratch_pads(user_id, content, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at
            "#,
        )
        .bind(owner.to_string())
        .bind(&content)
        .bind(timestamp(now))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(ScratchPad {
            owner_id: owner,
            content,
            updated_at: Some(now),
        })
    }
}
