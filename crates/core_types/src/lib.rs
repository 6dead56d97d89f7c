mod endpoint;
mod error;
pub mod limits;
mod note;
mod organize;
mod scratch_pad;
mod task;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use endpoint::{NoteEndpoint, ScratchPadEndpoint};
pub use error::{Entity, StoreError, StoreResult};
pub use note::{Note, NoteDraft, NoteFilter, NotePatch, UNTITLED};
pub use organize::{Notebook, NotebookDraft, NotebookPatch, Tag};
pub use scratch_pad::ScratchPad;
pub use task::{Task, TaskDraft, TaskPatch};

pub type UserId = Uuid;
pub type NoteId = Uuid;
pub type NotebookId = Uuid;
pub type TagId = Uuid;
pub type TaskId = Uuid;

/// Owner of every other record. Credentials and sessions live outside this
/// workspace; a caller arrives here already authenticated as a `UserId`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}
