use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use core_types::{
    Note, NoteDraft, NoteEndpoint, NoteId, NotePatch, NotebookId, StoreError, StoreResult, TagId,
};
use futures::{Stream, StreamExt};
use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::editor::{EditorContent, EditorEvent, EditorListener};
use crate::status::{Phase, SaveStatus};

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(1500);

#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("editing session is closed")]
    Closed,
}

/// Turns editor callbacks for one open note into create/update calls.
///
/// Content edits are coalesced: every change re-arms a quiet-period timer and
/// only the last edit of a burst dispatches a save. A save always sends the
/// draft as it is at dispatch time, and at most one save is in flight. Edits
/// that land while a save is in flight are picked up once it completes.
///
/// Title, notebook and tag edits on a stored note are written immediately as
/// single-field patches. While the note has no row yet they only change the
/// draft and travel with the first create.
///
/// Event methods spawn onto the current Tokio runtime. Dropping the
/// reconciler closes the session: the pending timer is cancelled, a save
/// already in flight runs to completion.
pub struct SaveReconciler {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: Arc<dyn NoteEndpoint>,
    state: Mutex<SaveState>,
    status: watch::Sender<SaveStatus>,
    idle: Notify,
}

struct SaveState {
    phase: Phase,
    content: EditorContent,
    title: String,
    notebook_id: Option<NotebookId>,
    tag_ids: Vec<TagId>,
    persisted_title: String,
    quiet_period: Duration,
    save_in_flight: bool,
    resave_requested: bool,
    timer: Option<AbortHandle>,
    timer_generation: u64,
    revision: u64,
    saved_revision: u64,
    closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Debounce,
    Manual,
    FollowUp,
    Flush,
}

enum SaveRequest {
    Create(NoteDraft),
    Update(NoteId, NotePatch),
}

enum SaveOutcome {
    Saved { note_id: NoteId, dirty: bool },
    Suppressed,
    Failed(StoreError),
    Closed,
}

impl SaveState {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            content: EditorContent::default(),
            title: String::new(),
            notebook_id: None,
            tag_ids: Vec::new(),
            persisted_title: String::new(),
            quiet_period: DEFAULT_QUIET_PERIOD,
            save_in_flight: false,
            resave_requested: false,
            timer: None,
            timer_generation: 0,
            revision: 0,
            saved_revision: 0,
            closed: false,
        }
    }

    fn draft(&self) -> NoteDraft {
        NoteDraft {
            title: self.title.clone(),
            content: self.content.html.clone(),
            plain_text: self.content.plain_text.clone(),
            notebook_id: self.notebook_id,
            tag_ids: self.tag_ids.clone(),
        }
    }

    fn request(&self) -> SaveRequest {
        let draft = self.draft();
        match self.phase {
            Phase::New => SaveRequest::Create(draft),
            Phase::Existing(id) => SaveRequest::Update(id, NotePatch::from_draft(&draft)),
        }
    }

    fn is_dirty(&self) -> bool {
        self.revision > self.saved_revision
    }

    /// Bumping the generation also disarms a timer that already woke up but
    /// has not taken the lock yet.
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.timer_generation += 1;
    }
}

impl Inner {
    fn publish(&self, status: SaveStatus) {
        self.status.send_replace(status);
    }

    fn mark_unsaved(&self, state: &SaveState) {
        if !state.save_in_flight {
            self.publish(SaveStatus::Unsaved);
        }
    }

    fn arm_timer(self: &Arc<Self>, state: &mut SaveState) {
        state.cancel_timer();
        let generation = state.timer_generation;
        let quiet_period = state.quiet_period;
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(quiet_period).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_timer(generation);
            }
        });
        state.timer = Some(handle.abort_handle());
    }

    fn on_timer(self: &Arc<Self>, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.closed || state.timer_generation != generation {
                return;
            }
            state.timer = None;
        }
        self.spawn_save(Trigger::Debounce);
    }

    /// The save runs in its own task so that cancelling a timer can never
    /// cancel a request that is already on the wire.
    fn spawn_save(self: &Arc<Self>, trigger: Trigger) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.save(trigger).await;
        });
    }

    async fn save(self: &Arc<Self>, trigger: Trigger) -> SaveOutcome {
        let (request, revision) = {
            let mut state = self.state.lock();
            if state.closed {
                return SaveOutcome::Closed;
            }
            if state.save_in_flight {
                if trigger != Trigger::Flush {
                    state.resave_requested = true;
                }
                debug!(?trigger, revision = state.revision, "save already in flight");
                return SaveOutcome::Suppressed;
            }
            state.save_in_flight = true;
            self.publish(SaveStatus::Saving);
            (state.request(), state.revision)
        };

        let result = match request {
            SaveRequest::Create(draft) => self.endpoint.create_note(draft).await,
            SaveRequest::Update(id, patch) => self.endpoint.update_note(id, patch).await,
        };

        let outcome = self.finish_save(trigger, revision, result);
        self.idle.notify_waiters();
        outcome
    }

    fn finish_save(
        self: &Arc<Self>,
        trigger: Trigger,
        revision: u64,
        result: StoreResult<Note>,
    ) -> SaveOutcome {
        let mut state = self.state.lock();
        state.save_in_flight = false;
        let follow_up = std::mem::take(&mut state.resave_requested);

        let note = match result {
            Ok(note) => note,
            Err(err) => {
                warn!(
                    note_id = ?state.phase.note_id(),
                    revision,
                    error = %err,
                    "note save failed"
                );
                self.publish(SaveStatus::Failed(err.to_string()));
                return SaveOutcome::Failed(err);
            }
        };

        let note_id = note.id;
        if state.phase == Phase::New {
            state.phase = Phase::Existing(note_id);
            info!(note_id = %note_id, revision, "note created");
        } else {
            debug!(note_id = %note_id, revision, "note updated");
        }
        state.persisted_title = note.title;
        state.saved_revision = state.saved_revision.max(revision);

        if !state.is_dirty() {
            state.cancel_timer();
            self.publish(SaveStatus::Saved);
            return SaveOutcome::Saved {
                note_id,
                dirty: false,
            };
        }

        self.publish(SaveStatus::Unsaved);
        if trigger != Trigger::Flush && !state.closed {
            if follow_up {
                state.cancel_timer();
                drop(state);
                self.spawn_save(Trigger::FollowUp);
            } else if state.timer.is_none() {
                self.arm_timer(&mut state);
            }
        }
        SaveOutcome::Saved {
            note_id,
            dirty: true,
        }
    }

    /// Stored notes get the patch right away; a note without a row keeps the
    /// edit in its draft for the first create.
    /// A full save in flight still carries the old value, so the edit also
    /// queues a follow-up save behind it.
    fn apply_field_edit(self: &Arc<Self>, mut state: MutexGuard<'_, SaveState>, patch: NotePatch) {
        let phase = state.phase;
        match phase {
            Phase::New => {
                state.revision += 1;
                self.mark_unsaved(&state);
            }
            Phase::Existing(id) => {
                if state.save_in_flight {
                    state.revision += 1;
                    state.resave_requested = true;
                }
                drop(state);
                self.save_field(id, patch);
            }
        }
    }

    fn save_field(self: &Arc<Self>, id: NoteId, patch: NotePatch) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            match inner.endpoint.update_note(id, patch).await {
                Ok(note) => {
                    debug!(note_id = %id, "note field saved");
                    let mut state = inner.state.lock();
                    state.persisted_title = note.title;
                    if !state.save_in_flight && !state.is_dirty() {
                        inner.publish(SaveStatus::Saved);
                    }
                }
                Err(err) => {
                    warn!(note_id = %id, error = %err, "note field save failed");
                    inner.publish(SaveStatus::Failed(err.to_string()));
                }
            }
        });
    }
}

impl SaveReconciler {
    /// A session for a note that has not been stored yet.
    pub fn open_new(endpoint: Arc<dyn NoteEndpoint>) -> Self {
        Self::with_state(endpoint, SaveState::new(Phase::New))
    }

    /// A session seeded from a stored note.
    pub fn open_existing(endpoint: Arc<dyn NoteEndpoint>, note: &Note) -> Self {
        let mut state = SaveState::new(Phase::Existing(note.id));
        state.content = EditorContent::new(note.content.clone(), note.plain_text.clone());
        state.title = note.title.clone();
        state.persisted_title = note.title.clone();
        state.notebook_id = note.notebook_id;
        state.tag_ids = note.tag_ids.clone();
        Self::with_state(endpoint, state)
    }

    fn with_state(endpoint: Arc<dyn NoteEndpoint>, state: SaveState) -> Self {
        let (status, _) = watch::channel(SaveStatus::Saved);
        Self {
            inner: Arc::new(Inner {
                endpoint,
                state: Mutex::new(state),
                status,
                idle: Notify::new(),
            }),
        }
    }

    pub fn with_quiet_period(self, quiet_period: Duration) -> Self {
        self.inner.state.lock().quiet_period = quiet_period;
        self
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    pub fn note_id(&self) -> Option<NoteId> {
        self.phase().note_id()
    }

    pub fn status(&self) -> SaveStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.inner.status.subscribe()
    }

    /// The draft a save dispatched right now would send.
    pub fn draft(&self) -> NoteDraft {
        self.inner.state.lock().draft()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.inner.state.lock().is_dirty()
    }

    pub fn on_content_change(&self, html: impl Into<String>, plain_text: impl Into<String>) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.content = EditorContent::new(html, plain_text);
        state.revision += 1;
        self.inner.mark_unsaved(&state);
        self.inner.arm_timer(&mut state);
    }

    /// Title keystrokes. Nothing is written until blur or the next save.
    pub fn set_title_draft(&self, title: impl Into<String>) {
        let mut state = self.inner.state.lock();
        if !state.closed {
            state.title = title.into();
        }
    }

    pub fn on_title_blur(&self, title: impl Into<String>) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.title = title.into();
        let patch = NotePatch::title(state.title.clone());
        if state.phase != Phase::New && patch.title.as_deref() == Some(state.persisted_title.as_str()) {
            return;
        }
        self.inner.apply_field_edit(state, patch);
    }

    pub fn on_notebook_select(&self, notebook_id: Option<NotebookId>) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.notebook_id = notebook_id;
        self.inner
            .apply_field_edit(state, NotePatch::notebook(notebook_id));
    }

    pub fn on_tags_change(&self, tag_ids: impl IntoIterator<Item = TagId>) {
        let tag_ids: Vec<TagId> = tag_ids
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.tag_ids = tag_ids.clone();
        self.inner.apply_field_edit(state, NotePatch::tags(tag_ids));
    }

    /// Pinning needs a stored row; ignored while the note is new.
    pub fn set_pinned(&self, is_pinned: bool) {
        self.toggle(NotePatch::pinned(is_pinned));
    }

    /// Same rules as [`SaveReconciler::set_pinned`].
    pub fn set_favorite(&self, is_favorite: bool) {
        self.toggle(NotePatch::favorite(is_favorite));
    }

    fn toggle(&self, patch: NotePatch) {
        let state = self.inner.state.lock();
        if state.closed {
            return;
        }
        let phase = state.phase;
        match phase {
            Phase::New => debug!("flag toggle ignored on unsaved note"),
            Phase::Existing(id) => {
                drop(state);
                self.inner.save_field(id, patch);
            }
        }
    }

    /// Cancels the pending timer and saves right away.
    pub fn on_manual_save_request(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.cancel_timer();
        }
        self.inner.spawn_save(Trigger::Manual);
    }

    /// Saves the whole draft now and waits until the stored note matches it.
    ///
    /// Always writes, even when nothing is pending, so fields saved earlier
    /// by fire-and-forget patches are rewritten by a call the caller awaits.
    /// Waits out a save that is already in flight instead of overlapping it.
    pub async fn flush(&self) -> Result<NoteId, SaveError> {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(SaveError::Closed);
            }
            state.cancel_timer();
        }

        loop {
            let idle = self.inner.idle.notified();
            match self.inner.save(Trigger::Flush).await {
                SaveOutcome::Saved {
                    note_id,
                    dirty: false,
                } => return Ok(note_id),
                SaveOutcome::Saved { dirty: true, .. } => {
                    self.inner.state.lock().cancel_timer();
                }
                SaveOutcome::Suppressed => idle.await,
                SaveOutcome::Failed(err) => return Err(err.into()),
                SaveOutcome::Closed => return Err(SaveError::Closed),
            }
        }
    }

    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.cancel_timer();
        debug!(
            note_id = ?state.phase.note_id(),
            unsaved = state.is_dirty(),
            "editing session closed"
        );
    }

    pub fn handle(&self, event: EditorEvent) {
        match event {
            EditorEvent::ContentChanged(content) => {
                self.on_content_change(content.html, content.plain_text)
            }
            EditorEvent::TitleEdited(title) => self.set_title_draft(title),
            EditorEvent::TitleBlurred(title) => self.on_title_blur(title),
            EditorEvent::NotebookSelected(notebook_id) => self.on_notebook_select(notebook_id),
            EditorEvent::TagsChanged(tag_ids) => self.on_tags_change(tag_ids),
            EditorEvent::PinToggled(is_pinned) => self.set_pinned(is_pinned),
            EditorEvent::FavoriteToggled(is_favorite) => self.set_favorite(is_favorite),
            EditorEvent::SaveRequested => self.on_manual_save_request(),
        }
    }

    /// Feeds every event of `events` through [`SaveReconciler::handle`].
    pub async fn drive<S>(&self, events: S)
    where
        S: Stream<Item = EditorEvent>,
    {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            self.handle(event);
        }
    }
}

impl EditorListener for SaveReconciler {
    fn on_content_change(&self, html: &str, plain_text: &str) {
        SaveReconciler::on_content_change(self, html, plain_text);
    }

    fn on_title_blur(&self, title: &str) {
        SaveReconciler::on_title_blur(self, title);
    }

    fn on_notebook_select(&self, notebook_id: Option<NotebookId>) {
        SaveReconciler::on_notebook_select(self, notebook_id);
    }

    fn on_tags_change(&self, tag_ids: &[TagId]) {
        SaveReconciler::on_tags_change(self, tag_ids.iter().copied());
    }

    fn on_manual_save_request(&self) {
        SaveReconciler::on_manual_save_request(self);
    }
}

impl Drop for SaveReconciler {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use core_types::NoteEndpoint;
    use uuid::Uuid;

    use super::*;
    use crate::testing::FakeEndpoint;

    async fn settle() {
        tokio::time::sleep(DEFAULT_QUIET_PERIOD + Duration::from_millis(100)).await;
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn type_text(reconciler: &SaveReconciler, text: &str) {
        reconciler.on_content_change(format!("<p>{text}</p>"), text);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_edits_is_saved_once_with_the_last_content() {
        let endpoint = FakeEndpoint::new();
        let reconciler = SaveReconciler::open_new(endpoint.clone());

        for text in ["a", "ab", "abc"] {
            type_text(&reconciler, text);
            advance(200).await;
        }
        assert!(endpoint.calls().is_empty());
        assert_eq!(reconciler.status(), SaveStatus::Unsaved);

        settle().await;
        let creates = endpoint.creates();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].plain_text, "abc");
        assert_eq!(creates[0].content, "<p>abc</p>");
        assert_eq!(reconciler.status(), SaveStatus::Saved);
        assert!(!reconciler.has_unsaved_changes());
    }

    #[tokio::test(start_paused = true)]
    async fn first_save_creates_and_later_edits_update_that_note() {
        let endpoint = FakeEndpoint::new();
        let reconciler = SaveReconciler::open_new(endpoint.clone());
        assert_eq!(reconciler.phase(), Phase::New);

        type_text(&reconciler, "Hello");
        settle().await;
        let creates = endpoint.creates();
        assert_eq!(creates.len(), 1);
        assert!(creates[0].plain_text.contains("Hello"));
        let n1 = reconciler.note_id().expect("note created");
        assert_eq!(reconciler.phase(), Phase::Existing(n1));

        type_text(&reconciler, "Hello world");
        settle().await;
        assert_eq!(endpoint.creates().len(), 1);
        let updates = endpoint.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, n1);
        assert_eq!(updates[0].1.plain_text.as_deref(), Some("Hello world"));
    }

    #[tokio::test(start_paused = true)]
    async fn request_suppressed_during_create_follows_up_as_update() {
        let endpoint = FakeEndpoint::with_latency(Duration::from_millis(500));
        let reconciler = SaveReconciler::open_new(endpoint.clone());

        type_text(&reconciler, "a");
        reconciler.on_manual_save_request();
        tokio::task::yield_now().await;
        type_text(&reconciler, "ab");
        reconciler.on_manual_save_request();

        advance(1200).await;
        let creates = endpoint.creates();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].plain_text, "a");
        let n1 = reconciler.note_id().expect("note created");
        let updates = endpoint.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, n1);
        assert_eq!(updates[0].1.plain_text.as_deref(), Some("ab"));

        settle().await;
        assert_eq!(endpoint.calls().len(), 2);
        assert_eq!(reconciler.status(), SaveStatus::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn edit_while_create_is_in_flight_reaches_the_store() {
        let endpoint = FakeEndpoint::with_latency(Duration::from_millis(3000));
        let reconciler = SaveReconciler::open_new(endpoint.clone());

        type_text(&reconciler, "a");
        advance(1600).await;
        assert_eq!(endpoint.creates().len(), 1);
        type_text(&reconciler, "ab");
        assert_eq!(reconciler.status(), SaveStatus::Saving);

        // timer fires at 3100 while the create is still out; it resolves at 4500
        advance(6400).await;
        let creates = endpoint.creates();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].plain_text, "a");
        let updates = endpoint.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(Some(updates[0].0), reconciler.note_id());
        assert_eq!(updates[0].1.plain_text.as_deref(), Some("ab"));
        assert_eq!(reconciler.status(), SaveStatus::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_create_keeps_draft_and_retries_as_create() {
        let endpoint = FakeEndpoint::new();
        endpoint.fail_next_writes(1);
        let reconciler = SaveReconciler::open_new(endpoint.clone());

        type_text(&reconciler, "Hell");
        settle().await;
        assert_eq!(endpoint.creates().len(), 1);
        assert!(matches!(reconciler.status(), SaveStatus::Failed(_)));
        assert_eq!(reconciler.phase(), Phase::New);
        assert_eq!(reconciler.draft().plain_text, "Hell");

        type_text(&reconciler, "Hello");
        settle().await;
        let creates = endpoint.creates();
        assert_eq!(creates.len(), 2);
        assert_eq!(creates[1].plain_text, "Hello");
        assert!(endpoint.updates().is_empty());
        assert!(matches!(reconciler.phase(), Phase::Existing(_)));
        assert_eq!(reconciler.status(), SaveStatus::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_save_retries_after_failure() {
        let endpoint = FakeEndpoint::new();
        endpoint.fail_next_writes(1);
        let reconciler = SaveReconciler::open_new(endpoint.clone());

        type_text(&reconciler, "draft");
        settle().await;
        assert!(matches!(reconciler.status(), SaveStatus::Failed(_)));

        reconciler.on_manual_save_request();
        advance(10).await;
        assert_eq!(endpoint.creates().len(), 2);
        assert_eq!(endpoint.creates()[1].plain_text, "draft");
        assert_eq!(reconciler.status(), SaveStatus::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn field_edits_on_new_note_wait_for_first_create() {
        let endpoint = FakeEndpoint::new();
        let reconciler = SaveReconciler::open_new(endpoint.clone());
        let notebook = Uuid::new_v4();
        let tag = Uuid::new_v4();

        reconciler.on_title_blur("Groceries");
        reconciler.on_notebook_select(Some(notebook));
        reconciler.on_tags_change([tag, tag]);
        reconciler.set_pinned(true);
        settle().await;
        assert!(endpoint.calls().is_empty());
        assert_eq!(reconciler.status(), SaveStatus::Unsaved);

        type_text(&reconciler, "milk");
        settle().await;
        let creates = endpoint.creates();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].title, "Groceries");
        assert_eq!(creates[0].notebook_id, Some(notebook));
        assert_eq!(creates[0].tag_ids, vec![tag]);
        assert!(endpoint.updates().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn field_edit_during_create_is_saved_afterwards() {
        let endpoint = FakeEndpoint::with_latency(Duration::from_millis(1000));
        let reconciler = SaveReconciler::open_new(endpoint.clone());
        let notebook = Uuid::new_v4();

        type_text(&reconciler, "a");
        advance(2000).await;
        reconciler.on_notebook_select(Some(notebook));
        assert!(endpoint.updates().is_empty());

        advance(3000).await;
        assert_eq!(endpoint.creates().len(), 1);
        assert_eq!(endpoint.creates()[0].notebook_id, None);
        let updates = endpoint.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.notebook_id, Some(Some(notebook)));
    }

    #[tokio::test(start_paused = true)]
    async fn field_edits_on_stored_note_save_immediately() {
        let endpoint = FakeEndpoint::new();
        let note = endpoint.seed("Plans", "outline");
        let reconciler = SaveReconciler::open_existing(endpoint.clone(), &note);

        reconciler.on_title_blur("Plans");
        advance(10).await;
        assert!(endpoint.calls().is_empty());

        type_text(&reconciler, "outline v2");
        reconciler.on_title_blur("Roadmap");
        reconciler.set_favorite(true);
        advance(10).await;
        let updates = endpoint.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0], (note.id, NotePatch::title("Roadmap")));
        assert_eq!(updates[1], (note.id, NotePatch::favorite(true)));
        assert_eq!(reconciler.status(), SaveStatus::Unsaved);

        settle().await;
        let updates = endpoint.updates();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[2].1.title.as_deref(), Some("Roadmap"));
        assert_eq!(updates[2].1.plain_text.as_deref(), Some("outline v2"));
        assert!(endpoint.creates().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn field_edit_is_not_overwritten_by_slower_inflight_update() {
        let endpoint = FakeEndpoint::new();
        let note = endpoint.seed("Trip", "packing list");
        endpoint.script_latencies([500, 10]);
        let reconciler = SaveReconciler::open_existing(endpoint.clone(), &note);

        type_text(&reconciler, "packing list v2");
        advance(1600).await;
        let notebook = Uuid::new_v4();
        reconciler.on_notebook_select(Some(notebook));
        advance(10_000).await;

        let stored = endpoint.get_note(note.id).await.expect("stored");
        assert_eq!(stored.notebook_id, Some(notebook));
        assert_eq!(stored.plain_text, "packing list v2");
        let updates = endpoint.updates();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[1].1, NotePatch::notebook(Some(notebook)));
        assert_eq!(updates[2].1.notebook_id, Some(Some(notebook)));
        assert_eq!(reconciler.status(), SaveStatus::Saved);
        assert!(!reconciler.has_unsaved_changes());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_field_save_clears_earlier_failure() {
        let endpoint = FakeEndpoint::new();
        let note = endpoint.seed("Inbox", "");
        let reconciler = SaveReconciler::open_existing(endpoint.clone(), &note);

        endpoint.fail_next_writes(1);
        reconciler.on_notebook_select(Some(Uuid::new_v4()));
        advance(10).await;
        assert!(matches!(reconciler.status(), SaveStatus::Failed(_)));

        let notebook = Uuid::new_v4();
        reconciler.on_notebook_select(Some(notebook));
        advance(10).await;
        assert_eq!(reconciler.status(), SaveStatus::Saved);
        let stored = endpoint.get_note(note.id).await.expect("stored");
        assert_eq!(stored.notebook_id, Some(notebook));
    }

    #[tokio::test(start_paused = true)]
    async fn update_of_vanished_note_is_reported_once() {
        let endpoint = FakeEndpoint::new();
        let now = Utc::now();
        let missing = Note {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            notebook_id: None,
            title: "Gone".to_string(),
            content: String::new(),
            plain_text: String::new(),
            tag_ids: Vec::new(),
            is_pinned: false,
            is_favorite: false,
            is_trashed: false,
            trashed_at: None,
            created_at: now,
            updated_at: now,
        };
        let reconciler = SaveReconciler::open_existing(endpoint.clone(), &missing);

        type_text(&reconciler, "still here");
        settle().await;
        settle().await;
        assert_eq!(endpoint.updates().len(), 1);
        assert!(matches!(reconciler.status(), SaveStatus::Failed(_)));
        assert_eq!(reconciler.phase(), Phase::Existing(missing.id));
    }

    #[tokio::test(start_paused = true)]
    async fn closing_cancels_pending_timer_but_not_inflight_save() {
        let endpoint = FakeEndpoint::new();
        let reconciler = SaveReconciler::open_new(endpoint.clone());
        type_text(&reconciler, "never saved");
        drop(reconciler);
        settle().await;
        assert!(endpoint.calls().is_empty());

        let slow = FakeEndpoint::with_latency(Duration::from_millis(1000));
        let reconciler = SaveReconciler::open_new(slow.clone());
        type_text(&reconciler, "saved anyway");
        advance(1600).await;
        reconciler.close();
        type_text(&reconciler, "ignored");
        advance(2000).await;
        assert_eq!(slow.creates().len(), 1);
        assert_eq!(slow.list_notes(Default::default()).await.expect("notes").len(), 1);
        assert!(matches!(reconciler.flush().await, Err(SaveError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn flush_saves_now_and_waits() {
        let endpoint = FakeEndpoint::with_latency(Duration::from_millis(300));
        let reconciler = SaveReconciler::open_new(endpoint.clone());

        type_text(&reconciler, "draft");
        let id = reconciler.flush().await.expect("flush");
        assert_eq!(reconciler.note_id(), Some(id));
        assert_eq!(reconciler.status(), SaveStatus::Saved);

        assert_eq!(reconciler.flush().await.expect("clean"), id);
        settle().await;
        assert_eq!(endpoint.creates().len(), 1);
        assert_eq!(endpoint.updates().len(), 1);

        endpoint.fail_next_writes(1);
        type_text(&reconciler, "draft 2");
        let err = reconciler.flush().await.expect_err("offline");
        assert!(matches!(err, SaveError::Store(ref e) if e.is_transient()));
        assert!(reconciler.has_unsaved_changes());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_waits_for_inflight_save_then_saves_latest() {
        let endpoint = FakeEndpoint::with_latency(Duration::from_millis(500));
        let reconciler = SaveReconciler::open_new(endpoint.clone());

        type_text(&reconciler, "one");
        reconciler.on_manual_save_request();
        tokio::task::yield_now().await;
        type_text(&reconciler, "two");

        let id = reconciler.flush().await.expect("flush");
        assert_eq!(endpoint.creates().len(), 1);
        let updates = endpoint.updates();
        assert_eq!(updates.last().map(|(note, _)| *note), Some(id));
        assert_eq!(
            updates.last().and_then(|(_, patch)| patch.plain_text.clone()),
            Some("two".to_string())
        );
        assert!(!reconciler.has_unsaved_changes());
    }

    #[tokio::test(start_paused = true)]
    async fn status_channel_reports_each_transition() {
        let endpoint = FakeEndpoint::with_latency(Duration::from_millis(100));
        let reconciler = SaveReconciler::open_new(endpoint.clone());
        let mut status = reconciler.subscribe();
        assert_eq!(*status.borrow_and_update(), SaveStatus::Saved);

        type_text(&reconciler, "x");
        assert_eq!(*status.borrow_and_update(), SaveStatus::Unsaved);

        status.changed().await.expect("saving");
        assert_eq!(*status.borrow_and_update(), SaveStatus::Saving);
        status.changed().await.expect("saved");
        assert_eq!(*status.borrow_and_update(), SaveStatus::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn driven_event_stream_behaves_like_callbacks() {
        let endpoint = FakeEndpoint::new();
        let reconciler = SaveReconciler::open_new(endpoint.clone());
        let events = futures::stream::iter(vec![
            EditorEvent::TitleEdited("Pla".to_string()),
            EditorEvent::TitleBlurred("Plan".to_string()),
            EditorEvent::ContentChanged(EditorContent::new("<p>x</p>", "x")),
            EditorEvent::ContentChanged(EditorContent::new("<p>xy</p>", "xy")),
            EditorEvent::SaveRequested,
        ]);

        reconciler.drive(events).await;
        advance(10).await;
        let creates = endpoint.creates();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].title, "Plan");
        assert_eq!(creates[0].plain_text, "xy");

        settle().await;
        assert_eq!(endpoint.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn listener_trait_routes_to_the_reconciler() {
        let endpoint = FakeEndpoint::new();
        let reconciler = SaveReconciler::open_new(endpoint.clone());
        let tag = Uuid::new_v4();
        {
            let listener: &dyn EditorListener = &reconciler;
            listener.on_tags_change(&[tag]);
            listener.on_content_change("<p>hi</p>", "hi");
            listener.on_manual_save_request();
        }
        advance(10).await;
        let creates = endpoint.creates();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].tag_ids, vec![tag]);
        assert_eq!(creates[0].plain_text, "hi");

        let endpoint: Arc<dyn NoteEndpoint> = endpoint;
        let stored = endpoint
            .get_note(reconciler.note_id().expect("id"))
            .await
            .expect("stored");
        assert_eq!(stored.title, core_types::UNTITLED);
    }
}
