use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use core_types::{
    Entity, Note, NoteDraft, NoteEndpoint, NoteFilter, NoteId, NotePatch, ScratchPad,
    ScratchPadEndpoint, StoreError, StoreResult, UserId,
};
use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Create(NoteDraft),
    Update(NoteId, NotePatch),
    Delete(NoteId),
    SaveScratchPad(String),
}

/// In-memory endpoint that records every write as it is dispatched.
#[derive(Default)]
pub(crate) struct FakeEndpoint {
    owner: UserId,
    calls: Mutex<Vec<Call>>,
    notes: Mutex<Vec<Note>>,
    scratch_pad: Mutex<String>,
    latency: Duration,
    scripted_latencies: Mutex<VecDeque<Duration>>,
    failing_writes: Mutex<usize>,
    failing_deletes: Mutex<HashSet<NoteId>>,
}

impl FakeEndpoint {
    pub(crate) fn new() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    pub(crate) fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            owner: Uuid::new_v4(),
            latency,
            ..Self::default()
        })
    }

    /// The next `count` creates, updates or scratch-pad saves fail as if the
    /// connection dropped.
    pub(crate) fn fail_next_writes(&self, count: usize) {
        *self.failing_writes.lock() = count;
    }

    /// Latencies in milliseconds for the next writes, in dispatch order.
    /// Writes past the end of the script use the default latency.
    pub(crate) fn script_latencies(&self, millis: impl IntoIterator<Item = u64>) {
        self.scripted_latencies
            .lock()
            .extend(millis.into_iter().map(Duration::from_millis));
    }

    pub(crate) fn fail_delete(&self, id: NoteId) {
        self.failing_deletes.lock().insert(id);
    }

    pub(crate) fn seed(&self, title: &str, plain_text: &str) -> Note {
        let note = self.build_note(NoteDraft {
            title: title.to_string(),
            content: format!("<p>{plain_text}</p>"),
            plain_text: plain_text.to_string(),
            ..NoteDraft::default()
        });
        self.notes.lock().push(note.clone());
        note
    }

    pub(crate) fn seed_trashed(&self, title: &str) -> Note {
        let mut note = self.seed(title, "");
        note.is_trashed = true;
        note.trashed_at = Some(Utc::now());
        if let Some(stored) = self.notes.lock().iter_mut().find(|n| n.id == note.id) {
            *stored = note.clone();
        }
        note
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn creates(&self) -> Vec<NoteDraft> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Create(draft) => Some(draft),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn updates(&self) -> Vec<(NoteId, NotePatch)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Update(id, patch) => Some((id, patch)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn scratch_pad_saves(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SaveScratchPad(content) => Some(content),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    async fn round_trip(&self) -> StoreResult<()> {
        let latency = self
            .scripted_latencies
            .lock()
            .pop_front()
            .unwrap_or(self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut failing = self.failing_writes.lock();
        if *failing > 0 {
            *failing -= 1;
            return Err(StoreError::Backend(anyhow!("connection reset by peer")));
        }
        Ok(())
    }

    fn build_note(&self, draft: NoteDraft) -> Note {
        let now = Utc::now();
        let title = draft.effective_title().to_string();
        Note {
            id: Uuid::new_v4(),
            owner_id: self.owner,
            notebook_id: draft.notebook_id,
            title,
            content: draft.content,
            plain_text: draft.plain_text,
            tag_ids: draft.tag_ids,
            is_pinned: false,
            is_favorite: false,
            is_trashed: false,
            trashed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

fn apply(note: &mut Note, patch: NotePatch) {
    if let Some(title) = patch.title {
        note.title = title;
    }
    if let Some(content) = patch.content {
        note.content = content;
    }
    if let Some(plain_text) = patch.plain_text {
        note.plain_text = plain_text;
    }
    if let Some(notebook_id) = patch.notebook_id {
        note.notebook_id = notebook_id;
    }
    if let Some(tag_ids) = patch.tag_ids {
        note.tag_ids = tag_ids;
    }
    if let Some(is_pinned) = patch.is_pinned {
        note.is_pinned = is_pinned;
    }
    if let Some(is_favorite) = patch.is_favorite {
        note.is_favorite = is_favorite;
    }
    if let Some(is_trashed) = patch.is_trashed {
        note.is_trashed = is_trashed;
        note.trashed_at = is_trashed.then(Utc::now);
    }
    note.updated_at = Utc::now();
}

#[async_trait]
impl NoteEndpoint for FakeEndpoint {
    async fn create_note(&self, draft: NoteDraft) -> StoreResult<Note> {
        self.record(Call::Create(draft.clone()));
        self.round_trip().await?;
        let note = self.build_note(draft);
        self.notes.lock().push(note.clone());
        Ok(note)
    }

    async fn update_note(&self, id: NoteId, patch: NotePatch) -> StoreResult<Note> {
        self.record(Call::Update(id, patch.clone()));
        self.round_trip().await?;
        let mut notes = self.notes.lock();
        let note = notes
            .iter_mut()
            .find(|note| note.id == id)
            .ok_or_else(|| StoreError::not_found(Entity::Note, id))?;
        apply(note, patch);
        Ok(note.clone())
    }

    async fn get_note(&self, id: NoteId) -> StoreResult<Note> {
        self.notes
            .lock()
            .iter()
            .find(|note| note.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(Entity::Note, id))
    }

    async fn list_notes(&self, filter: NoteFilter) -> StoreResult<Vec<Note>> {
        Ok(self
            .notes
            .lock()
            .iter()
            .filter(|note| note.is_trashed == filter.trashed)
            .cloned()
            .collect())
    }

    async fn trash_note(&self, id: NoteId) -> StoreResult<Note> {
        self.update_note(id, NotePatch::trashed(true)).await
    }

    async fn restore_note(&self, id: NoteId) -> StoreResult<Note> {
        self.update_note(id, NotePatch::trashed(false)).await
    }

    async fn delete_note(&self, id: NoteId) -> StoreResult<()> {
        self.record(Call::Delete(id));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing_deletes.lock().contains(&id) {
            return Err(StoreError::Backend(anyhow!("delete of {id} timed out")));
        }
        let mut notes = self.notes.lock();
        let before = notes.len();
        notes.retain(|note| note.id != id);
        if notes.len() == before {
            return Err(StoreError::not_found(Entity::Note, id));
        }
        Ok(())
    }
}

#[async_trait]
impl ScratchPadEndpoint for FakeEndpoint {
    async fn load_scratch_pad(&self) -> StoreResult<ScratchPad> {
        Ok(ScratchPad {
            owner_id: self.owner,
            content: self.scratch_pad.lock().clone(),
            updated_at: None,
        })
    }

    async fn save_scratch_pad(&self, content: String) -> StoreResult<ScratchPad> {
        self.record(Call::SaveScratchPad(content.clone()));
        self.round_trip().await?;
        *self.scratch_pad.lock() = content.clone();
        Ok(ScratchPad {
            owner_id: self.owner,
            content,
            updated_at: Some(Utc::now()),
        })
    }
}
