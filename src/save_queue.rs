//! Debounced save queue
//!
//! Coalesces repeated writes to the same destination: every `enqueue` for a
//! path replaces the pending payload and restarts that path's timer, so only
//! the last value inside the window ever reaches disk.
//!
//! Pending entries live in a per-path table guarded by one mutex. Each entry
//! carries a ticket; a timer only writes if its ticket is still the one in the
//! table, and it removes the entry before writing. `flush_all` drains the table
//! and aborts the timers under the same lock, so a timer can never write an
//! entry that a flush already took.
//!
//! Disk writes run on tokio's blocking pool so a slow disk does not stall
//! the runtime thread.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, warn};

use crate::constants::save;
use crate::error::StoreError;
use crate::persistence::{Document, DocumentStore};

/// Extra state written only by a full flush (e.g. the log history)
pub trait AuxiliarySave: Send + Sync {
    fn save(&self) -> Result<(), StoreError>;
}

struct PendingSave {
    payload: Document,
    ticket: u64,
    timer: JoinHandle<()>,
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    delay: Duration,
    max_attempts: u32,
    pending: Mutex<HashMap<PathBuf, PendingSave>>,
    next_ticket: AtomicU64,
    auxiliary: Option<Arc<dyn AuxiliarySave>>,
}

/// Outcome of `flush_all`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub saved: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct SaveQueue {
    inner: Arc<Inner>,
}

impl SaveQueue {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_delay(store, Duration::from_millis(save::DELAY_MS))
    }

    pub fn with_delay(store: Arc<dyn DocumentStore>, delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                delay,
                max_attempts: save::MAX_ATTEMPTS,
                pending: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(0),
                auxiliary: None,
            }),
        }
    }

    /// Attach the auxiliary writer used by `flush_all(true)`.
    /// Must be called before the queue is cloned or used.
    pub fn with_auxiliary(self, auxiliary: Arc<dyn AuxiliarySave>) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.auxiliary = Some(auxiliary);
                Self { inner: Arc::new(inner) }
            }
            Err(inner) => {
                warn!("Save queue already shared, auxiliary writer ignored");
                Self { inner }
            }
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    /// Queue `document` for `path`, replacing any pending payload for it and
    /// restarting the debounce timer. Must be called inside a tokio runtime.
    pub fn enqueue(&self, path: impl Into<PathBuf>, document: Document) {
        let path = path.into();
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);

        let mut pending = self.inner.lock_pending();
        let timer = self.spawn_timer(path.clone(), ticket);

        match pending.insert(
            path.clone(),
            PendingSave {
                payload: document,
                ticket,
                timer,
            },
        ) {
            Some(previous) => {
                previous.timer.abort();
                debug!(path = %path.display(), "Save postponed, payload replaced");
            }
            None => debug!(path = %path.display(), "Added to save queue"),
        }
    }

    fn spawn_timer(&self, path: PathBuf, ticket: u64) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.delay).await;

            let payload = {
                let mut pending = inner.lock_pending();
                match pending.get(&path) {
                    Some(entry) if entry.ticket == ticket => pending.remove(&path).map(|e| e.payload),
                    _ => None,
                }
            };

            if let Some(payload) = payload {
                let written = tokio::task::spawn_blocking(move || inner.persist(&path, &payload)).await;
                if let Err(e) = written {
                    error!(error = %e, "Save task did not complete");
                }
            }
        })
    }

    /// Write every pending entry now, cancelling their timers, and wait for all
    /// writes (including retries) to finish. `include_auxiliary` also runs the
    /// auxiliary writer.
    pub async fn flush_all(&self, include_auxiliary: bool) -> FlushReport {
        let drained: Vec<(PathBuf, Document)> = {
            let mut pending = self.inner.lock_pending();
            pending
                .drain()
                .map(|(path, entry)| {
                    entry.timer.abort();
                    (path, entry.payload)
                })
                .collect()
        };

        if !drained.is_empty() {
            debug!(count = drained.len(), "Saving queued files early");
        }

        let mut writes = JoinSet::new();
        for (path, payload) in drained {
            let inner = Arc::clone(&self.inner);
            writes.spawn_blocking(move || inner.persist(&path, &payload));
        }

        if include_auxiliary {
            if let Some(auxiliary) = self.inner.auxiliary.clone() {
                writes.spawn_blocking(move || {
                    auxiliary
                        .save()
                        .inspect_err(|e| error!(error = %e, "Failed to write auxiliary state"))
                        .is_ok()
                });
            }
        }

        let mut report = FlushReport::default();
        while let Some(result) = writes.join_next().await {
            match result {
                Ok(true) => report.saved += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    error!(error = %e, "Save task did not complete");
                    report.failed += 1;
                }
            }
        }
        report
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.inner.lock_pending().len()
    }
}

impl Inner {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<PathBuf, PendingSave>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write with immediate retries. Blocking; run it on the blocking pool.
    /// Returns whether the document was saved.
    fn persist(&self, path: &Path, payload: &Document) -> bool {
        for attempt in 1..=self.max_attempts {
            match self.store.write(path, payload) {
                Ok(()) => {
                    debug!(path = %path.display(), attempt, "Saved to file");
                    return true;
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(path = %path.display(), attempt, error = %e, "Retrying to save file");
                }
                Err(e) => {
                    error!(
                        path = %path.display(),
                        attempts = self.max_attempts,
                        error = %e,
                        "Failed to save file, changes are not on disk"
                    );
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::testing::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    const DELAY: Duration = Duration::from_millis(save::DELAY_MS);

    fn queue() -> (Arc<MemoryStore>, SaveQueue) {
        let store = Arc::new(MemoryStore::new());
        let queue = SaveQueue::new(store.clone());
        (store, queue)
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_enqueues_coalesce_into_one_write() {
        let (store, queue) = queue();

        for i in 0..5 {
            queue.enqueue("music.json", json!({ "loop": i }));
            wait(100).await;
        }
        assert_eq!(store.write_count("music.json"), 0);

        wait(DELAY.as_millis() as u64 * 2).await;

        assert_eq!(store.write_count("music.json"), 1);
        assert_eq!(store.get("music.json"), Some(json!({ "loop": 4 })));
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_restarts_the_timer() {
        let (store, queue) = queue();

        queue.enqueue("a.json", json!(1));
        wait(1000).await;
        queue.enqueue("a.json", json!(2));
        wait(1000).await;
        assert_eq!(store.write_count("a.json"), 0, "second enqueue should postpone the write");

        wait(600).await;
        assert_eq!(store.write_count("a.json"), 1);
        assert_eq!(store.get("a.json"), Some(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_paths_are_independent() {
        let (store, queue) = queue();

        queue.enqueue("a.json", json!("a"));
        queue.enqueue("b.json", json!("b"));
        assert_eq!(queue.pending_len(), 2);

        wait(2000).await;
        assert_eq!(store.get("a.json"), Some(json!("a")));
        assert_eq!(store.get("b.json"), Some(json!("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_all_writes_everything_and_cancels_timers() {
        let (store, queue) = queue();

        queue.enqueue("a.json", json!("first"));
        queue.enqueue("a.json", json!("last"));
        queue.enqueue("b.json", json!("b"));

        let report = queue.flush_all(false).await;
        assert_eq!(report, FlushReport { saved: 2, failed: 0 });
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(store.get("a.json"), Some(json!("last")));
        assert_eq!(store.get("b.json"), Some(json!("b")));

        // Cancelled timers must not write a second time
        wait(DELAY.as_millis() as u64 * 2).await;
        assert_eq!(store.write_count("a.json"), 1);
        assert_eq!(store.write_count("b.json"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_empty_queue_is_a_no_op() {
        let (store, queue) = queue();
        assert_eq!(queue.flush_all(false).await, FlushReport::default());
        assert_eq!(store.total_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_writes_are_retried() {
        let (store, queue) = queue();
        store.fail_next_writes(2);

        queue.enqueue("a.json", json!("value"));
        let report = queue.flush_all(false).await;

        assert_eq!(report.saved, 1);
        assert_eq!(store.write_count("a.json"), 3);
        assert_eq!(store.get("a.json"), Some(json!("value")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_give_up() {
        let (store, queue) = queue();
        store.fail_next_writes(save::MAX_ATTEMPTS);

        queue.enqueue("a.json", json!("value"));
        wait(DELAY.as_millis() as u64 + 100).await;

        assert_eq!(store.write_count("a.json"), save::MAX_ATTEMPTS);
        assert_eq!(store.get("a.json"), None);
        assert_eq!(queue.pending_len(), 0, "entry is dropped after giving up");
    }

    struct CountingAux(AtomicU32);

    impl AuxiliarySave for CountingAux {
        fn save(&self) -> Result<(), StoreError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_auxiliary_only_written_when_requested() {
        let store = Arc::new(MemoryStore::new());
        let aux = Arc::new(CountingAux(AtomicU32::new(0)));
        let queue = SaveQueue::new(store).with_auxiliary(aux.clone());

        queue.flush_all(false).await;
        assert_eq!(aux.0.load(Ordering::SeqCst), 0);

        let report = queue.flush_all(true).await;
        assert_eq!(aux.0.load(Ordering::SeqCst), 1);
        assert_eq!(report.saved, 1);
    }
}
