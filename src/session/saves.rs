//! Save tracking for session stores
//!
//! Every remote write a session issues holds a `SaveTicket` while in
//! flight. Completion waits on `SaveTracker::settled`, which resolves once
//! no ticket is outstanding (or the bound elapses), so a round is never
//! finalized in the middle of a save.
//!
//! A write that fails stays with its `Persister` until it is re-sent and
//! succeeds, or until a newer write for the same key supersedes it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::SessionError;
use crate::gateway::{GatewayError, GatewayResult};

#[derive(Default)]
struct Outcomes {
    last_error: Option<String>,
    saved_at: Option<DateTime<Utc>>,
}

struct TrackerInner {
    pending: watch::Sender<usize>,
    outcomes: Mutex<Outcomes>,
}

/// Counts outstanding saves and keeps their outcomes
#[derive(Clone)]
pub struct SaveTracker {
    inner: Arc<TrackerInner>,
}

impl Default for SaveTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SaveTracker {
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            inner: Arc::new(TrackerInner {
                pending,
                outcomes: Mutex::new(Outcomes::default()),
            }),
        }
    }

    fn outcomes(&self) -> MutexGuard<'_, Outcomes> {
        self.inner.outcomes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a save that is about to start
    pub fn begin(&self) -> SaveTicket {
        self.inner.pending.send_modify(|n| *n += 1);
        SaveTicket {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn is_saving(&self) -> bool {
        *self.inner.pending.borrow() > 0
    }

    pub fn pending(&self) -> usize {
        *self.inner.pending.borrow()
    }

    /// Wait until no save is outstanding, for at most `timeout`
    pub async fn settled(&self, timeout: Duration) -> Result<(), SessionError> {
        let mut rx = self.inner.pending.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0))
            .await
            .map(|r| r.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            // Sender lives in `inner`, which we hold
            Ok(Err(_)) => Ok(()),
            Err(_) => Err(SessionError::SaveTimeout(timeout)),
        }
    }

    /// Error message of the most recent save, cleared by a later success
    pub fn save_error(&self) -> Option<String> {
        self.outcomes().last_error.clone()
    }

    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.outcomes().saved_at
    }
}

/// One outstanding save; the count drops when the ticket is dropped
pub struct SaveTicket {
    inner: Arc<TrackerInner>,
}

impl SaveTicket {
    pub fn finish(self, result: &GatewayResult<()>) {
        let mut outcomes = self.inner.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(()) => {
                outcomes.last_error = None;
                outcomes.saved_at = Some(Utc::now());
            }
            Err(err) => outcomes.last_error = Some(err.to_string()),
        }
    }
}

impl Drop for SaveTicket {
    fn drop(&mut self) {
        self.inner.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

type SaveJob = Arc<dyn Fn() -> BoxFuture<'static, GatewayResult<()>> + Send + Sync>;

struct FailedSave {
    key: String,
    error: GatewayError,
    job: SaveJob,
}

#[derive(Default)]
struct Jobs {
    next_seq: u64,
    /// Sequence number of the newest write per key
    latest: HashMap<String, u64>,
    failed: Vec<FailedSave>,
}

/// Spawns remote writes for one session instance.
///
/// Writes are keyed (one key per term); a newer write for a key replaces
/// any failed older one. Once cancelled (reset or drop of the owning
/// session) results of writes still in flight are ignored. The writes
/// themselves run to completion so no answer already sent is lost.
pub struct Persister {
    tracker: SaveTracker,
    cancel: CancellationToken,
    jobs: Arc<Mutex<Jobs>>,
}

impl Persister {
    pub fn new(tracker: SaveTracker) -> Self {
        Self {
            tracker,
            cancel: CancellationToken::new(),
            jobs: Arc::new(Mutex::new(Jobs::default())),
        }
    }

    pub fn tracker(&self) -> &SaveTracker {
        &self.tracker
    }

    fn jobs(&self) -> MutexGuard<'_, Jobs> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the write built by `save` in the background, tracked until it
    /// resolves. `save` is called again if the write has to be re-sent.
    pub fn spawn<S, F>(&self, key: String, save: S)
    where
        S: Fn() -> F + Send + Sync + 'static,
        F: Future<Output = GatewayResult<()>> + Send + 'static,
    {
        let job: SaveJob = Arc::new(move || save().boxed());
        self.run(key, job);
    }

    fn run(&self, key: String, job: SaveJob) {
        let seq = {
            let mut jobs = self.jobs();
            jobs.next_seq += 1;
            let seq = jobs.next_seq;
            jobs.latest.insert(key.clone(), seq);
            jobs.failed.retain(|f| f.key != key);
            seq
        };

        let ticket = self.tracker.begin();
        let cancel = self.cancel.clone();
        let jobs = Arc::clone(&self.jobs);

        tokio::spawn(async move {
            let result = job().await;
            if cancel.is_cancelled() {
                log::debug!("session: ignoring result of {} for a closed session", key);
                return;
            }

            let mut jobs = jobs.lock().unwrap_or_else(PoisonError::into_inner);
            if jobs.latest.get(&key) != Some(&seq) {
                log::debug!("session: {} superseded by a newer write", key);
                return;
            }
            if let Err(err) = &result {
                log::warn!("session: {} failed: {}", key, err);
                jobs.failed.push(FailedSave {
                    key,
                    error: err.clone(),
                    job,
                });
            }
            ticket.finish(&result);
        });
    }

    /// Re-send every failed write; returns how many were re-sent
    pub fn retry_failed(&self) -> usize {
        let failed = std::mem::take(&mut self.jobs().failed);
        let count = failed.len();
        for save in failed {
            log::info!("session: retrying {}", save.key);
            self.run(save.key, save.job);
        }
        count
    }

    /// Error of the first write still waiting to be re-sent
    pub fn first_failure(&self) -> Option<GatewayError> {
        self.jobs().failed.first().map(|f| f.error.clone())
    }

    pub fn failed_count(&self) -> usize {
        self.jobs().failed.len()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Persister {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
