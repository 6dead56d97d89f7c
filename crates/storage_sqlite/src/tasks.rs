use anyhow::Result;
use chrono::Utc;
use core_types::{Entity, StoreError, StoreResult, Task, TaskDraft, TaskId, TaskPatch, UserId};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::notes::row_owned;
use crate::{
    SqliteStorage, backend, parse_optional_rfc3339, parse_optional_uuid, parse_rfc3339,
    parse_uuid, timestamp,
};

impl SqliteStorage {
    /// Open tasks first, newest first within each group.
    pub async fn list_tasks(&self, owner: UserId) -> StoreResult<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, note_id, title, is_completed, due_date, created_at, updated_at
            FROM tasks
            WHERE user_id = ?1
            ORDER BY is_completed ASC, created_at DESC
            "#,
        )
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(map_task_row)
            .collect::<Result<Vec<_>>>()?)
    }

    pub async fn create_task(&self, owner: UserId, draft: TaskDraft) -> StoreResult<Task> {
        let title = draft.normalized_title()?;

        let mut conn = self.pool.acquire().await.map_err(backend)?;
        if let Some(note_id) = draft.note_id {
            if !row_owned(&mut conn, "notes", owner, note_id).await? {
                return Err(StoreError::forbidden(Entity::Note, note_id));
            }
        }

        let now = Utc::now();
        let task = Task {
            id: TaskId::new_v4(),
            owner_id: owner,
            note_id: draft.note_id,
            title,
            is_completed: false,
            due_date: draft.due_date,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            r#"
            INSERT INTO tasks(id, user_id, note_id, title, is_completed, due_date, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?6)
            "#,
        )
        .bind(task.id.to_string())
        .bind(owner.to_string())
        .bind(task.note_id.map(|id| id.to_string()))
        .bind(&task.title)
        .bind(task.due_date.map(timestamp))
        .bind(timestamp(now))
        .execute(&mut *conn)
        .await
        .map_err(backend)?;

        Ok(task)
    }

    pub async fn update_task(
        &self,
        owner: UserId,
        id: TaskId,
        patch: TaskPatch,
    ) -> StoreResult<Task> {
        let title = patch.normalized_title()?;

        let mut conn = self.pool.acquire().await.map_err(backend)?;
        if let Some(Some(note_id)) = patch.note_id {
            if !row_owned(&mut conn, "notes", owner, note_id).await? {
                return Err(StoreError::forbidden(Entity::Note, note_id));
            }
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE tasks SET updated_at = ");
        query.push_bind(timestamp(Utc::now()));
        if let Some(title) = title {
            query.push(", title = ").push_bind(title);
        }
        if let Some(is_completed) = patch.is_completed {
            query.push(", is_completed = ").push_bind(is_completed);
        }
        if let Some(due_date) = patch.due_date {
            query.push(", due_date = ").push_bind(due_date.map(timestamp));
        }
        if let Some(note_id) = patch.note_id {
            query
                .push(", note_id = ")
                .push_bind(note_id.map(|id| id.to_string()));
        }
        query
            .push(" WHERE id = ")
            .push_bind(id.to_string())
            .push(" AND user_id = ")
            .push_bind(owner.to_string())
            .push(
                " RETURNING id, user_id, note_id, title, is_completed, due_date, created_at, updated_at",
            );

        let row = query
            .build()
            .fetch_optional(&mut *conn)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::not_found(Entity::Task, id))?;
        Ok(map_task_row(row)?)
    }

    pub async fn delete_task(&self, owner: UserId, id: TaskId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?1 AND user_id = ?2")
            .bind(id.to_string())
            .bind(owner.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(Entity::Task, id));
        }
        Ok(())
    }
}

fn map_task_row(row: SqliteRow) -> Result<Task> {
    Ok(Task {
        id: parse_uuid(row.get("id"))?,
        owner_id: parse_uuid(row.get("user_id"))?,
        note_id: parse_optional_uuid(row.get("note_id"))?,
        title: row.get("title"),
        is_completed: row.get("is_completed"),
        due_date: parse_optional_rfc3339(row.get("due_date"))?,
        created_at: parse_rfc3339(row.get("created_at"))?,
        updated_at: parse_rfc3339(row.get("updated_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, SubsecRound};
    use core_types::NoteDraft;

    use super::*;

    #[tokio::test]
    async fn tasks_list_open_first_and_follow_note_lifecycle() {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        let owner = storage
            .ensure_user("owner@example.com", None)
            .await
            .expect("user")
            .id;
        let note = storage
            .create_note(owner, NoteDraft::default())
            .await
            .expect("note");

        let due = (Utc::now() + Duration::days(1)).trunc_subsecs(6);
        let first = storage
            .create_task(
                owner,
                TaskDraft {
                    title: " Call the bank ".to_string(),
                    note_id: Some(note.id),
                    due_date: Some(due),
                },
            )
            .await
            .expect("first");
        assert_eq!(first.title, "Call the bank");
        let second = storage
            .create_task(owner, TaskDraft::new("Water plants"))
            .await
            .expect("second");

        let done = storage
            .update_task(owner, first.id, TaskPatch::completed(true))
            .await
            .expect("complete");
        assert!(done.is_completed);
        assert_eq!(done.due_date, Some(due));

        let tasks = storage.list_tasks(owner).await.expect("tasks");
        assert_eq!(
            tasks.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );

        storage.delete_note(owner, note.id).await.expect("delete note");
        let tasks = storage.list_tasks(owner).await.expect("tasks");
        let unlinked = tasks.iter().find(|t| t.id == first.id).expect("task kept");
        assert_eq!(unlinked.note_id, None);

        storage.delete_task(owner, second.id).await.expect("delete");
        let err = storage
            .delete_task(owner, second.id)
            .await
            .expect_err("gone");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn tasks_reject_blank_titles_and_foreign_notes() {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        let owner = storage
            .ensure_user("owner@example.com", None)
            .await
            .expect("user")
            .id;
        let other = storage
            .ensure_user("other@example.com", None)
            .await
            .expect("other")
            .id;
        let foreign = storage
            .create_note(other, NoteDraft::default())
            .await
            .expect("note");

        let err = storage
            .create_task(owner, TaskDraft::new("  "))
            .await
            .expect_err("blank");
        assert!(matches!(err, StoreError::Validation { field: "title", .. }));

        let err = storage
            .create_task(
                owner,
                TaskDraft {
                    title: "Peek".to_string(),
                    note_id: Some(foreign.id),
                    due_date: None,
                },
            )
            .await
            .expect_err("foreign note");
        assert!(matches!(
            err,
            StoreError::Forbidden {
                entity: Entity::Note,
                ..
            }
        ));
        assert!(storage.list_tasks(owner).await.expect("tasks").is_empty());
    }
}
