use anyhow::Result;
use chrono::Utc;
use core_types::{
    Entity, Notebook, NotebookDraft, NotebookId, NotebookPatch, StoreError, StoreResult, Tag,
    TagId, UserId,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::{SqliteStorage, backend, parse_rfc3339, parse_uuid, timestamp};

impl SqliteStorage {
    /// Ordered by name, each with its count of non-trashed notes.
    pub async fn list_notebooks(&self, owner: UserId) -> StoreResult<Vec<Notebook>> {
        let rows = sqlx::query(
            r#"
            SELECT nb.id, nb.user_id, nb.name, nb.color, nb.is_default, nb.created_at, nb.updated_at,
                   COUNT(n.id) AS note_count
            FROM notebooks nb
            LEFT JOIN notes n ON n.notebook_id = nb.id AND n.is_trashed = 0
            WHERE nb.user_id = ?1
            GROUP BY nb.id
            ORDER BY nb.name
            "#,
        )
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(map_notebook_row)
            .collect::<Result<Vec<_>>>()?)
    }

    pub async fn get_notebook(&self, owner: UserId, id: NotebookId) -> StoreResult<Notebook> {
        let row = sqlx::query(
            r#"
            SELECT nb.id, nb.user_id, nb.name, nb.color, nb.is_default, nb.created_at, nb.updated_at,
                   (SELECT COUNT(*) FROM notes n WHERE n.notebook_id = nb.id AND n.is_trashed = 0)
                       AS note_count
            FROM notebooks nb
            WHERE nb.id = ?1 AND nb.user_id = ?2
            "#,
        )
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or_else(|| StoreError::not_found(Entity::Notebook, id))?;
        Ok(map_notebook_row(row)?)
    }

    pub async fn create_notebook(
        &self,
        owner: UserId,
        draft: NotebookDraft,
    ) -> StoreResult<Notebook> {
        let (name, color) = draft.normalize()?;
        let now = Utc::now();
        let notebook = Notebook {
            id: NotebookId::new_v4(),
            owner_id: owner,
            name,
            color,
            is_default: false,
            note_count: 0,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO notebooks(id, user_id, name, color, is_default, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
            "#,
        )
        .bind(notebook.id.to_string())
        .bind(owner.to_string())
        .bind(&notebook.name)
        .bind(&notebook.color)
        .bind(timestamp(now))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(notebook)
    }

    pub async fn update_notebook(
        &self,
        owner: UserId,
        id: NotebookId,
        patch: NotebookPatch,
    ) -> StoreResult<Notebook> {
        let patch = patch.normalize()?;

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE notebooks SET updated_at = ");
        query.push_bind(timestamp(Utc::now()));
        if let Some(name) = patch.name {
            query.push(", name = ").push_bind(name);
        }
        if let Some(color) = patch.color {
            query.push(", color = ").push_bind(color);
        }
        if let Some(is_default) = patch.is_default {
            query.push(", is_default = ").push_bind(is_default);
        }
        query
            .push(" WHERE id = ")
            .push_bind(id.to_string())
            .push(" AND user_id = ")
            .push_bind(owner.to_string());

        let result = query
            .build()
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(Entity::Notebook, id));
        }
        self.get_notebook(owner, id).await
    }

    /// Notes filed in the notebook stay, unlinked.
    pub async fn delete_notebook(&self, owner: UserId, id: NotebookId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM notebooks WHERE id = ?1 AND user_id = ?2")
            .bind(id.to_string())
            .bind(owner.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(Entity::Notebook, id));
        }
        Ok(())
    }

    pub async fn list_tags(&self, owner: UserId) -> StoreResult<Vec<Tag>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.user_id, t.name, t.created_at, COUNT(nt.note_id) AS note_count
            FROM tags t
            LEFT JOIN note_tags nt ON nt.tag_id = t.id
            WHERE t.user_id = ?1
            GROUP BY t.id
            ORDER BY t.name
            "#,
        )
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(map_tag_row)
            .collect::<Result<Vec<_>>>()?)
    }

    pub async fn create_tag(&self, owner: UserId, name: &str) -> StoreResult<Tag> {
        let tag = Tag {
            id: TagId::new_v4(),
            owner_id: owner,
            name: Tag::normalize_name(name)?,
            note_count: 0,
            created_at: Utc::now(),
        };

        sqlx::query(r#"INSERT INTO tags(id, user_id, name, created_at) VALUES (?1, ?2, ?3, ?4)"#)
            .bind(tag.id.to_string())
            .bind(owner.to_string())
            .bind(&tag.name)
            .bind(timestamp(tag.created_at))
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(tag)
    }

    /// Removes the tag and every note link to it.
    pub async fn delete_tag(&self, owner: UserId, id: TagId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM tags WHERE id = ?1 AND user_id = ?2")
            .bind(id.to_string())
            .bind(owner.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(Entity::Tag, id));
        }
        Ok(())
    }
}

fn map_notebook_row(row: SqliteRow) -> Result<Notebook> {
    Ok(Notebook {
        id: parse_uuid(row.get("id"))?,
        owner_id: parse_uuid(row.get("user_id"))?,
        name: row.get("name"),
        color: row.get("color"),
        is_default: row.get("is_default"),
        note_count: u64::try_from(row.get::<i64, _>("note_count"))?,
        created_at: parse_rfc3339(row.get("created_at"))?,
        updated_at: parse_rfc3339(row.get("updated_at"))?,
    })
}

fn map_tag_row(row: SqliteRow) -> Result<Tag> {
    Ok(Tag {
        id: parse_uuid(row.get("id"))?,
        owner_id: parse_uuid(row.get("user_id"))?,
        name: row.get("name"),
        note_count: u64::try_from(row.get::<i64, _>("note_count"))?,
        created_at: parse_rfc3339(row.get("created_at"))?,
    })
}
