use std::sync::Arc;
use std::time::Duration;

use core_types::{ScratchPad, ScratchPadEndpoint, StoreResult};
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::status::SaveStatus;

pub const DEFAULT_SCRATCH_PAD_QUIET_PERIOD: Duration = Duration::from_millis(1000);

/// Debounced writer for the per-user scratch pad.
///
/// Keystrokes only replace the local buffer; the buffer is written once it
/// has been quiet for the configured period. A write whose content matches
/// what was last stored is skipped. At most one write is in flight; text
/// typed meanwhile is written after it completes.
pub struct ScratchPadSaver {
    inner: Arc<PadInner>,
}

struct PadInner {
    endpoint: Arc<dyn ScratchPadEndpoint>,
    state: Mutex<PadState>,
    status: watch::Sender<SaveStatus>,
    idle: Notify,
}

struct PadState {
    content: String,
    stored: String,
    quiet_period: Duration,
    timer: Option<AbortHandle>,
    generation: u64,
    write_in_flight: bool,
    rewrite_requested: bool,
    closed: bool,
}

enum PadWrite {
    Done(StoreResult<()>),
    Suppressed,
}

impl PadState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
    }
}

impl PadInner {
    fn arm_timer(self: &Arc<Self>, state: &mut PadState) {
        state.cancel_timer();
        let generation = state.generation;
        let quiet_period = state.quiet_period;
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(quiet_period).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut state = inner.state.lock();
                if state.closed || state.generation != generation {
                    return;
                }
                state.timer = None;
            }
            inner.spawn_write();
        });
        state.timer = Some(handle.abort_handle());
    }

    fn spawn_write(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            // failures are published on the status channel
            let _ = inner.write(false).await;
        });
    }

    async fn write(self: &Arc<Self>, flush: bool) -> PadWrite {
        let content = {
            let mut state = self.state.lock();
            if state.write_in_flight {
                if !flush {
                    state.rewrite_requested = true;
                }
                return PadWrite::Suppressed;
            }
            if state.content == state.stored {
                self.status.send_replace(SaveStatus::Saved);
                return PadWrite::Done(Ok(()));
            }
            state.write_in_flight = true;
            state.content.clone()
        };

        self.status.send_replace(SaveStatus::Saving);
        let result = self.endpoint.save_scratch_pad(content.clone()).await;
        let outcome = self.finish_write(content, flush, result);
        self.idle.notify_waiters();
        PadWrite::Done(outcome)
    }

    fn finish_write(
        self: &Arc<Self>,
        content: String,
        flush: bool,
        result: StoreResult<ScratchPad>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.write_in_flight = false;
        let follow_up = std::mem::take(&mut state.rewrite_requested);

        let pad = match result {
            Ok(pad) => pad,
            Err(err) => {
                warn!(error = %err, "scratch pad save failed");
                self.status.send_replace(SaveStatus::Failed(err.to_string()));
                return Err(err);
            }
        };
        state.stored = content;
        debug!(
            chars = state.stored.chars().count(),
            updated_at = ?pad.updated_at,
            "scratch pad saved"
        );

        if state.content == state.stored {
            state.cancel_timer();
            self.status.send_replace(SaveStatus::Saved);
            return Ok(());
        }

        self.status.send_replace(SaveStatus::Unsaved);
        if !flush && !state.closed {
            if follow_up {
                state.cancel_timer();
                drop(state);
                self.spawn_write();
            } else if state.timer.is_none() {
                self.arm_timer(&mut state);
            }
        }
        Ok(())
    }
}

impl ScratchPadSaver {
    /// Reads the stored pad and starts a saver seeded with it.
    pub async fn load(endpoint: Arc<dyn ScratchPadEndpoint>) -> StoreResult<Self> {
        let pad = endpoint.load_scratch_pad().await?;
        let (status, _) = watch::channel(SaveStatus::Saved);
        Ok(Self {
            inner: Arc::new(PadInner {
                endpoint,
                state: Mutex::new(PadState {
                    content: pad.content.clone(),
                    stored: pad.content,
                    quiet_period: DEFAULT_SCRATCH_PAD_QUIET_PERIOD,
                    timer: None,
                    generation: 0,
                    write_in_flight: false,
                    rewrite_requested: false,
                    closed: false,
                }),
                status,
                idle: Notify::new(),
            }),
        })
    }

    pub fn with_quiet_period(self, quiet_period: Duration) -> Self {
        self.inner.state.lock().quiet_period = quiet_period;
        self
    }

    pub fn content(&self) -> String {
        self.inner.state.lock().content.clone()
    }

    pub fn status(&self) -> SaveStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.inner.status.subscribe()
    }

    pub fn on_change(&self, content: impl Into<String>) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.content = content.into();
        if !state.write_in_flight {
            self.inner.status.send_replace(SaveStatus::Unsaved);
        }
        self.inner.arm_timer(&mut state);
    }

    /// Writes the buffer now, skipping the quiet period. A write already in
    /// flight is waited out first.
    pub async fn flush(&self) -> StoreResult<()> {
        loop {
            self.inner.state.lock().cancel_timer();
            let idle = self.inner.idle.notified();
            match self.inner.write(true).await {
                PadWrite::Done(Err(err)) => return Err(err),
                PadWrite::Done(Ok(())) => {
                    let state = self.inner.state.lock();
                    if state.content == state.stored {
                        return Ok(());
                    }
                }
                PadWrite::Suppressed => idle.await,
            }
        }
    }

    /// Drops the pending write. Later changes are ignored.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        state.cancel_timer();
    }
}

impl Drop for ScratchPadSaver {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use core_types::ScratchPadEndpoint;

    use super::*;
    use crate::testing::FakeEndpoint;

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn keystrokes_are_coalesced_into_one_write() {
        let endpoint = FakeEndpoint::new();
        let saver = ScratchPadSaver::load(endpoint.clone()).await.expect("load");
        assert_eq!(saver.content(), "");

        for text in ["t", "to", "tod", "todo"] {
            saver.on_change(text);
            advance(100).await;
        }
        assert!(endpoint.scratch_pad_saves().is_empty());
        assert_eq!(saver.status(), SaveStatus::Unsaved);

        advance(1000).await;
        assert_eq!(endpoint.scratch_pad_saves(), vec!["todo".to_string()]);
        assert_eq!(saver.status(), SaveStatus::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_content_is_not_rewritten() {
        let endpoint = FakeEndpoint::new();
        let saver = ScratchPadSaver::load(endpoint.clone()).await.expect("load");

        saver.on_change("x");
        saver.on_change("");
        advance(1500).await;
        assert!(endpoint.scratch_pad_saves().is_empty());
        assert_eq!(saver.status(), SaveStatus::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_is_retried_by_the_next_change() {
        let endpoint = FakeEndpoint::new();
        endpoint.fail_next_writes(1);
        let saver = ScratchPadSaver::load(endpoint.clone())
            .await
            .expect("load")
            .with_quiet_period(Duration::from_millis(300));

        saver.on_change("a");
        advance(400).await;
        assert!(matches!(saver.status(), SaveStatus::Failed(_)));

        saver.on_change("ab");
        advance(400).await;
        assert_eq!(
            endpoint.scratch_pad_saves(),
            vec!["a".to_string(), "ab".to_string()]
        );
        assert_eq!(saver.status(), SaveStatus::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_discards_pending_write_and_flush_skips_the_wait() {
        let endpoint = FakeEndpoint::new();
        let saver = ScratchPadSaver::load(endpoint.clone()).await.expect("load");
        saver.on_change("lost");
        drop(saver);
        advance(2000).await;
        assert!(endpoint.scratch_pad_saves().is_empty());

        let saver = ScratchPadSaver::load(endpoint.clone()).await.expect("load");
        saver.on_change("kept");
        saver.flush().await.expect("flush");
        assert_eq!(endpoint.scratch_pad_saves(), vec!["kept".to_string()]);
        advance(2000).await;
        assert_eq!(endpoint.scratch_pad_saves().len(), 1);

        let reloaded = ScratchPadSaver::load(endpoint.clone()).await.expect("reload");
        assert_eq!(reloaded.content(), "kept");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_older_write_does_not_leave_stale_pad() {
        let endpoint = FakeEndpoint::new();
        endpoint.script_latencies([2000, 10]);
        let saver = ScratchPadSaver::load(endpoint.clone()).await.expect("load");

        saver.on_change("a");
        advance(1100).await;
        saver.on_change("ab");
        advance(10_000).await;

        assert_eq!(
            endpoint.scratch_pad_saves(),
            vec!["a".to_string(), "ab".to_string()]
        );
        let stored = endpoint.load_scratch_pad().await.expect("stored");
        assert_eq!(stored.content, "ab");
        assert_eq!(saver.status(), SaveStatus::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_waits_for_inflight_write_then_writes_latest() {
        let endpoint = FakeEndpoint::new();
        endpoint.script_latencies([2000, 10]);
        let saver = ScratchPadSaver::load(endpoint.clone()).await.expect("load");

        saver.on_change("first");
        advance(1100).await;
        saver.on_change("first second");
        saver.flush().await.expect("flush");

        let stored = endpoint.load_scratch_pad().await.expect("stored");
        assert_eq!(stored.content, "first second");
        assert_eq!(saver.status(), SaveStatus::Saved);
        advance(5000).await;
        assert_eq!(
            endpoint.scratch_pad_saves(),
            vec!["first".to_string(), "first second".to_string()]
        );
    }
}
