use async_trait::async_trait;
use core_types::{
    Note, NoteDraft, NoteEndpoint, NoteFilter, NoteId, NotePatch, Notebook, NotebookDraft,
    NotebookId, NotebookPatch, ScratchPad, ScratchPadEndpoint, StoreResult, Tag, TagId, Task,
    TaskDraft, TaskId, TaskPatch, UserId,
};

use crate::SqliteStorage;

/// The store as seen by one authenticated caller.
#[derive(Debug, Clone)]
pub struct UserScope {
    storage: SqliteStorage,
    user_id: UserId,
}

impl UserScope {
    pub(crate) fn new(storage: SqliteStorage, user_id: UserId) -> Self {
        Self { storage, user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub async fn search_notes(&self, query: &str) -> StoreResult<Vec<Note>> {
        self.storage.search_notes(self.user_id, query).await
    }

    pub async fn list_notebooks(&self) -> StoreResult<Vec<Notebook>> {
        self.storage.list_notebooks(self.user_id).await
    }

    pub async fn create_notebook(&self, draft: NotebookDraft) -> StoreResult<Notebook> {
        self.storage.create_notebook(self.user_id, draft).await
    }

    pub async fn update_notebook(
        &self,
        id: NotebookId,
        patch: NotebookPatch,
    ) -> StoreResult<Notebook> {
        self.storage.update_notebook(self.user_id, id, patch).await
    }

    pub async fn delete_notebook(&self, id: NotebookId) -> StoreResult<()> {
        self.storage.delete_notebook(self.user_id, id).await
    }

    pub async fn list_tags(&self) -> StoreResult<Vec<Tag>> {
        self.storage.list_tags(self.user_id).await
    }

    pub async fn create_tag(&self, name: &str) -> StoreResult<Tag> {
        self.storage.create_tag(self.user_id, name).await
    }

    pub async fn delete_tag(&self, id: TagId) -> StoreResult<()> {
        self.storage.delete_tag(self.user_id, id).await
    }

    pub async fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        self.storage.list_tasks(self.user_id).await
    }

    pub async fn create_task(&self, draft: TaskDraft) -> StoreResult<Task> {
        self.storage.create_task(self.user_id, draft).await
    }

    pub async fn update_task(&self, id: TaskId, patch: TaskPatch) -> StoreResult<Task> {
        self.storage.update_task(self.user_id, id, patch).await
    }

    pub async fn delete_task(&self, id: TaskId) -> StoreResult<()> {
        self.storage.delete_task(self.user_id, id).await
    }
}

#[async_trait]
impl NoteEndpoint for UserScope {
    async fn create_note(&self, draft: NoteDraft) -> StoreResult<Note> {
        self.storage.create_note(self.user_id, draft).await
    }

    async fn update_note(&self, id: NoteId, patch: NotePatch) -> StoreResult<Note> {
        self.storage.update_note(self.user_id, id, patch).await
    }

    async fn get_note(&self, id: NoteId) -> StoreResult<Note> {
        self.storage.get_note(self.user_id, id).await
    }

    async fn list_notes(&self, filter: NoteFilter) -> StoreResult<Vec<Note>> {
        self.storage.list_notes(self.user_id, filter).await
    }

    async fn trash_note(&self, id: NoteId) -> StoreResult<Note> {
        self.storage.trash_note(self.user_id, id).await
    }

    async fn restore_note(&self, id: NoteId) -> StoreResult<Note> {
        self.storage.restore_note(self.user_id, id).await
    }

    async fn delete_note(&self, id: NoteId) -> StoreResult<()> {
        self.storage.delete_note(self.user_id, id).await
    }
}

#[async_trait]
impl ScratchPadEndpoint for UserScope {
    async fn load_scratch_pad(&self) -> StoreResult<ScratchPad> {
        self.storage.load_scratch_pad(self.user_id).await
    }

    async fn save_scratch_pad(&self, content: String) -> StoreResult<ScratchPad> {
        self.storage.save_scratch_pad(self.user_id, content).await
    }
}
