use async_trait::async_trait;

use crate::{Note, NoteDraft, NoteFilter, NoteId, NotePatch, ScratchPad, StoreResult};

/// Note persistence as seen by one authenticated caller.
///
/// Implementations scope every call to that caller: ids of notes the caller
/// does not own behave as if they did not exist, and notebook/tag references
/// the caller does not own are rejected before anything is written.
#[async_trait]
pub trait NoteEndpoint: Send + Sync {
    async fn create_note(&self, draft: NoteDraft) -> StoreResult<Note>;
    async fn update_note(&self, id: NoteId, patch: NotePatch) -> StoreResult<Note>;
    async fn get_note(&self, id: NoteId) -> StoreResult<Note>;
    async fn list_notes(&self, filter: NoteFilter) -> StoreResult<Vec<Note>>;
    async fn trash_note(&self, id: NoteId) -> StoreResult<Note>;
    async fn restore_note(&self, id: NoteId) -> StoreResult<Note>;
    /// Irreversible. Tag links go with the row; linked tasks are unlinked.
    async fn delete_note(&self, id: NoteId) -> StoreResult<()>;
}

#[async_trait]
pub trait ScratchPadEndpoint: Send + Sync {
    async fn load_scratch_pad(&self) -> StoreResult<ScratchPad>;
    async fn save_scratch_pad(&self, content: String) -> StoreResult<ScratchPad>;
}
