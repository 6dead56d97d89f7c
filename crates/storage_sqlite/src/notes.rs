use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use chrono::Utc;
use core_types::limits::{MAX_SEARCH_QUERY_CHARS, SEARCH_RESULT_LIMIT};
use core_types::{
    Entity, Note, NoteDraft, NoteFilter, NoteId, NotePatch, NotebookId, StoreError, StoreResult,
    TagId, UserId,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use tracing::info;
use uuid::Uuid;

use crate::{
    SqliteStorage, backend, parse_optional_rfc3339, parse_optional_uuid, parse_rfc3339,
    parse_uuid, timestamp,
};

const NOTE_COLUMNS: &str = "n.id, n.user_id, n.notebook_id, n.title, n.content, n.plain_text, \
     n.is_pinned, n.is_favorite, n.is_trashed, n.trashed_at, n.created_at, n.updated_at";

impl SqliteStorage {
    pub async fn create_note(&self, owner: UserId, draft: NoteDraft) -> StoreResult<Note> {
        draft.validate()?;

        let mut tx = self.pool.begin().await.map_err(backend)?;
        if let Some(notebook_id) = draft.notebook_id {
            ensure_notebook_owned(&mut tx, owner, notebook_id).await?;
        }
        let tag_ids = dedup(&draft.tag_ids);
        ensure_tags_owned(&mut tx, owner, &tag_ids).await?;

        let id = NoteId::new_v4();
        let now = timestamp(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO notes(id, user_id, notebook_id, title, content, plain_text, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
        )
        .bind(id.to_string())
        .bind(owner.to_string())
        .bind(draft.notebook_id.map(|id| id.to_string()))
        .bind(draft.effective_title())
        .bind(&draft.content)
        .bind(&draft.plain_text)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        replace_note_tags(&mut tx, id, &tag_ids).await?;
        tx.commit().await.map_err(backend)?;

        self.get_note(owner, id).await
    }

    pub async fn get_note(&self, owner: UserId, id: NoteId) -> StoreResult<Note> {
        let row = sqlx::query(&format!(
            "SELECT {NOTE_COLUMNS} FROM notes n WHERE n.id = ?1 AND n.user_id = ?2"
        ))
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or_else(|| StoreError::not_found(Entity::Note, id))?;

        let mut note = map_note_row(row)?;
        let tag_rows = sqlx::query("SELECT tag_id FROM note_tags WHERE note_id = ?1 ORDER BY tag_id")
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        note.tag_ids = tag_rows
            .into_iter()
            .map(|row| parse_uuid(row.get("tag_id")))
            .collect::<Result<_>>()?;
        Ok(note)
    }

    /// Pinned notes first, then most recently updated.
    pub async fn list_notes(&self, owner: UserId, filter: NoteFilter) -> StoreResult<Vec<Note>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT {NOTE_COLUMNS} FROM notes n"));
        if let Some(tag_id) = filter.tag_id {
            query
                .push(" INNER JOIN note_tags nt ON nt.note_id = n.id AND nt.tag_id = ")
                .push_bind(tag_id.to_string());
        }
        query
            .push(" WHERE n.user_id = ")
            .push_bind(owner.to_string())
            .push(" AND n.is_trashed = ")
            .push_bind(filter.trashed);
        if let Some(notebook_id) = filter.notebook_id {
            query
                .push(" AND n.notebook_id = ")
                .push_bind(notebook_id.to_string());
        }
        query.push(" ORDER BY n.is_pinned DESC, n.updated_at DESC");

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        let notes = rows
            .into_iter()
            .map(map_note_row)
            .collect::<Result<Vec<_>>>()?;
        self.attach_tags(owner, notes).await
    }

    /// Case-insensitive substring match over title and plain text of
    /// non-trashed notes. Blank or oversized queries match nothing.
    pub async fn search_notes(&self, owner: UserId, query: &str) -> StoreResult<Vec<Note>> {
        if query.trim().is_empty() || query.chars().count() > MAX_SEARCH_QUERY_CHARS {
            return Ok(Vec::new());
        }

        let pattern = format!("%{}%", escape_like(query));
        let rows = sqlx::query(&format!(
            r#"
            SELECT {NOTE_COLUMNS}
            FROM notes n
            WHERE n.user_id = ?1
              AND n.is_trashed = 0
              AND (n.title LIKE ?2 ESCAPE '\' OR n.plain_text LIKE ?2 ESCAPE '\')
            ORDER BY n.updated_at DESC
            LIMIT ?3
            "#
        ))
        .bind(owner.to_string())
        .bind(pattern)
        .bind(SEARCH_RESULT_LIMIT)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let notes = rows
            .into_iter()
            .map(map_note_row)
            .collect::<Result<Vec<_>>>()?;
        self.attach_tags(owner, notes).await
    }

    pub async fn update_note(
        &self,
        owner: UserId,
        id: NoteId,
        patch: NotePatch,
    ) -> StoreResult<Note> {
        patch.validate()?;

        let mut tx = self.pool.begin().await.map_err(backend)?;
        ensure_note_owned(&mut tx, owner, id).await?;
        if let Some(Some(notebook_id)) = patch.notebook_id {
            ensure_notebook_owned(&mut tx, owner, notebook_id).await?;
        }
        let tag_ids = patch.tag_ids.as_deref().map(dedup);
        if let Some(tag_ids) = &tag_ids {
            ensure_tags_owned(&mut tx, owner, tag_ids).await?;
        }

        let now = Utc::now();
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE notes SET updated_at = ");
        query.push_bind(timestamp(now));
        if let Some(title) = patch.title {
            query.push(", title = ").push_bind(title);
        }
        if let Some(content) = patch.content {
            query.push(", content = ").push_bind(content);
        }
        if let Some(plain_text) = patch.plain_text {
            query.push(", plain_text = ").push_bind(plain_text);
        }
        if let Some(notebook_id) = patch.notebook_id {
            query
                .push(", notebook_id = ")
                .push_bind(notebook_id.map(|id| id.to_string()));
        }
        if let Some(is_pinned) = patch.is_pinned {
            query.push(", is_pinned = ").push_bind(is_pinned);
        }
        if let Some(is_favorite) = patch.is_favorite {
            query.push(", is_favorite = ").push_bind(is_favorite);
        }
        match patch.is_trashed {
            Some(true) => {
                query
                    .push(", is_trashed = 1, trashed_at = ")
                    .push_bind(timestamp(now));
            }
            Some(false) => {
                query.push(", is_trashed = 0, trashed_at = NULL");
            }
            None => {}
        }
        query
            .push(" WHERE id = ")
            .push_bind(id.to_string())
            .push(" AND user_id = ")
            .push_bind(owner.to_string());
        query.build().execute(&mut *tx).await.map_err(backend)?;

        if let Some(tag_ids) = &tag_ids {
            replace_note_tags(&mut tx, id, tag_ids).await?;
        }
        tx.commit().await.map_err(backend)?;

        self.get_note(owner, id).await
    }

    pub async fn trash_note(&self, owner: UserId, id: NoteId) -> StoreResult<Note> {
        self.update_note(owner, id, NotePatch::trashed(true)).await
    }

    pub async fn restore_note(&self, owner: UserId, id: NoteId) -> StoreResult<Note> {
        self.update_note(owner, id, NotePatch::trashed(false)).await
    }

    pub async fn delete_note(&self, owner: UserId, id: NoteId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM notes WHERE id = ?1 AND user_id = ?2")
            .bind(id.to_string())
            .bind(owner.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(Entity::Note, id));
        }
        info!(note_id = %id, "note permanently deleted");
        Ok(())
    }

    async fn attach_tags(&self, owner: UserId, mut notes: Vec<Note>) -> StoreResult<Vec<Note>> {
        if notes.is_empty() {
            return Ok(notes);
        }

        let rows = sqlx::query(
            r#"
            SELECT nt.note_id, nt.tag_id
            FROM note_tags nt
            INNER JOIN notes n ON n.id = nt.note_id
            WHERE n.user_id = ?1
            ORDER BY nt.tag_id
            "#,
        )
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut by_note: HashMap<NoteId, Vec<TagId>> = HashMap::new();
        for row in rows {
            let note_id = parse_uuid(row.get("note_id"))?;
            let tag_id = parse_uuid(row.get("tag_id"))?;
            by_note.entry(note_id).or_default().push(tag_id);
        }
        for note in &mut notes {
            note.tag_ids = by_note.remove(&note.id).unwrap_or_default();
        }
        Ok(notes)
    }
}

pub(crate) async fn ensure_note_owned(
    conn: &mut SqliteConnection,
    owner: UserId,
    id: NoteId,
) -> StoreResult<()> {
    if !row_owned(conn, "notes", owner, id).await? {
        return Err(StoreError::not_found(Entity::Note, id));
    }
    Ok(())
}

async fn ensure_notebook_owned(
    conn: &mut SqliteConnection,
    owner: UserId,
    id: NotebookId,
) -> StoreResult<()> {
    if !row_owned(conn, "notebooks", owner, id).await? {
        return Err(StoreError::forbidden(Entity::Notebook, id));
    }
    Ok(())
}

async fn ensure_tags_owned(
    conn: &mut SqliteConnection,
    owner: UserId,
    tag_ids: &[TagId],
) -> StoreResult<()> {
    for tag_id in tag_ids {
        if !row_owned(conn, "tags", owner, *tag_id).await? {
            return Err(StoreError::forbidden(Entity::Tag, *tag_id));
        }
    }
    Ok(())
}

/// `table` is always one of our literal table names.
pub(crate) async fn row_owned(
    conn: &mut SqliteConnection,
    table: &'static str,
    owner: UserId,
    id: Uuid,
) -> StoreResult<bool> {
    let row = sqlx::query(&format!(
        "SELECT 1 FROM {table} WHERE id = ?1 AND user_id = ?2"
    ))
    .bind(id.to_string())
    .bind(owner.to_string())
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?;
    Ok(row.is_some())
}

async fn replace_note_tags(
    conn: &mut SqliteConnection,
    note_id: NoteId,
    tag_ids: &[TagId],
) -> StoreResult<()> {
    sqlx::query("DELETE FROM note_tags WHERE note_id = ?1")
        .bind(note_id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(backend)?;
    for tag_id in tag_ids {
        sqlx::query("INSERT INTO note_tags(note_id, tag_id) VALUES (?1, ?2)")
            .bind(note_id.to_string())
            .bind(tag_id.to_string())
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
    }
    Ok(())
}

fn dedup(tag_ids: &[TagId]) -> Vec<TagId> {
    tag_ids
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn map_note_row(row: SqliteRow) -> Result<Note> {
    Ok(Note {
        id: parse_uuid(row.get("id"))?,
        owner_id: parse_uuid(row.get("user_id"))?,
        notebook_id: parse_optional_uuid(row.get("notebook_id"))?,
        title: row.get("title"),
        content: row.get("content"),
        plain_text: row.get("plain_text"),
        tag_ids: Vec::new(),
        is_pinned: row.get("is_pinned"),
        is_favorite: row.get("is_favorite"),
        is_trashed: row.get("is_trashed"),
        trashed_at: parse_optional_rfc3339(row.get("trashed_at"))?,
        created_at: parse_rfc3339(row.get("created_at"))?,
        updated_at: parse_rfc3339(row.get("updated_at"))?,
    })
}
