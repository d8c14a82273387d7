//! Periodic reconciliation of the in-memory snippets with the persisted
//! document.
//!
//! [`PeriodicHandler`] loads the persisted document once at startup, then
//! accepts `add_config` / `del_config` calls that only touch memory. A
//! background task waits `initial_delay`, then every `period` re-reads the
//! persisted document, diffs it against the in-memory snapshot and writes
//! only when something changed.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use sha1::{Digest, Sha1};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::PersistedDocument;
use crate::diff::SnippetDiff;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::store::{SnippetStore, Snippets};

/// Operations the workload resource needs from the aggregation engine.
pub trait Handler: Send + Sync {
    /// Registers (or replaces) the snippet of a relevant workload.
    fn add_config(&self, key: Key, snippet: String);

    /// Forgets the snippet of a workload that went away.
    fn del_config(&self, key: &Key);

    /// Renders the document as it would be written right now.
    fn render(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerConfig {
    /// Wait before the first cycle starts.
    pub initial_delay: Duration,
    /// Wait between the end of one cycle and the start of the next.
    pub period: Duration,
}

impl HandlerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_delay.is_zero() {
            return Err(Error::invalid_config("initial delay must be greater than zero"));
        }
        if self.period.is_zero() {
            return Err(Error::invalid_config("flush period must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlusherState {
    Loaded,
    WaitingInitialDelay,
    Idle,
    Flushing,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlushOutcome {
    /// The persisted document already matched memory.
    Unchanged,
    /// The document was rewritten.
    Written {
        added: usize,
        removed: usize,
        modified: usize,
        /// SHA-1 of the rendered document.
        digest: String,
    },
    Failed { error: String },
}

/// Result of one flush cycle, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub cycle: u64,
    pub at: String,
    pub outcome: FlushOutcome,
}

struct Inner {
    snippets: SnippetStore,
    document: PersistedDocument,
    /// Serialises cycles; holds the number of cycles run so far.
    flush_lock: tokio::sync::Mutex<u64>,
    /// State the timer last entered; published whenever no cycle runs.
    resting: Mutex<FlusherState>,
    state: watch::Sender<FlusherState>,
    reports: watch::Sender<Option<FlushReport>>,
}

pub struct PeriodicHandler {
    inner: Arc<Inner>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicHandler {
    /// Validates `config`, loads the persisted document into memory and
    /// starts the flush task. Fails if the document cannot be fetched or
    /// parsed.
    pub async fn start(config: HandlerConfig, document: PersistedDocument) -> Result<Self> {
        config.validate()?;

        let initial = document.load().await?;
        info!(
            target_document = %document.target(),
            snippets = initial.len(),
            "Loaded persisted promtail config"
        );

        let (state, _) = watch::channel(FlusherState::Loaded);
        let (reports, _) = watch::channel(None);
        let inner = Arc::new(Inner {
            snippets: SnippetStore::with_snippets(initial),
            document,
            flush_lock: tokio::sync::Mutex::new(0),
            resting: Mutex::new(FlusherState::Loaded),
            state,
            reports,
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_flush_loop(Arc::clone(&inner), config, cancel.clone()));

        Ok(Self {
            inner,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Runs one flush cycle now. Waits for a cycle already in progress.
    pub async fn flush(&self) -> FlushOutcome {
        self.inner.flush().await
    }

    pub fn snapshot(&self) -> Snippets {
        self.inner.snippets.snapshot()
    }

    pub fn len(&self) -> usize {
        self.inner.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.snippets.is_empty()
    }

    pub fn state(&self) -> FlusherState {
        *self.inner.state.borrow()
    }

    /// Latest flush report; `None` until the first cycle has run.
    pub fn last_report(&self) -> Option<FlushReport> {
        self.inner.reports.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<FlushReport>> {
        self.inner.reports.subscribe()
    }

    /// Stops the timer and waits for the flush task to exit. A cycle that
    /// is already running completes first.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Flush task ended abnormally");
            }
        }
    }
}

impl Drop for PeriodicHandler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Handler for PeriodicHandler {
    fn add_config(&self, key: Key, snippet: String) {
        debug!(key = %key, "Snippet registered");
        self.inner.snippets.add(key, snippet);
    }

    fn del_config(&self, key: &Key) {
        if self.inner.snippets.remove(key).is_some() {
            debug!(key = %key, "Snippet removed");
        }
    }

    fn render(&self) -> String {
        self.inner
            .document
            .codec()
            .render(&self.inner.snippets.snapshot())
    }
}

impl Inner {
    async fn flush(&self) -> FlushOutcome {
        let mut cycle = self.flush_lock.lock().await;
        *cycle += 1;
        self.state.send_replace(FlusherState::Flushing);

        let outcome = match self.reconcile().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(cycle = *cycle, error = %e, "Flush cycle failed, retrying next period");
                FlushOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        {
            let resting = self.resting.lock().unwrap_or_else(PoisonError::into_inner);
            self.state.send_replace(*resting);
        }
        self.reports.send_replace(Some(FlushReport {
            cycle: *cycle,
            at: chrono::Utc::now().to_rfc3339(),
            outcome: outcome.clone(),
        }));
        outcome
    }

    /// Records a timer state. It becomes visible right away unless a cycle
    /// is running, in which case the cycle publishes it when it ends.
    fn set_resting(&self, next: FlusherState) {
        let mut resting = self.resting.lock().unwrap_or_else(PoisonError::into_inner);
        *resting = next;
        self.state.send_if_modified(|state| {
            if *state == FlusherState::Flushing {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    /// Re-reads the persisted document so external edits are noticed, and
    /// writes the in-memory snapshot only if the two differ.
    async fn reconcile(&self) -> Result<FlushOutcome> {
        let (object, persisted) = self.document.fetch().await?;
        let current = self.snippets.snapshot();

        let diff = SnippetDiff::between(&persisted, &current);
        if diff.is_unchanged() {
            debug!(snippets = current.len(), "Persisted promtail config is up to date");
            return Ok(FlushOutcome::Unchanged);
        }

        let rendered = self.document.save(object, &current).await?;
        let mut hasher = Sha1::new();
        hasher.update(rendered.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        info!(
            target_document = %self.document.target(),
            added = diff.added.len(),
            removed = diff.removed.len(),
            modified = diff.modified.len(),
            digest = %digest,
            "Wrote promtail config"
        );
        Ok(FlushOutcome::Written {
            added: diff.added.len(),
            removed: diff.removed.len(),
            modified: diff.modified.len(),
            digest,
        })
    }
}

async fn run_flush_loop(inner: Arc<Inner>, config: HandlerConfig, cancel: CancellationToken) {
    inner.set_resting(FlusherState::WaitingInitialDelay);
    tokio::select! {
        _ = cancel.cancelled() => {
            inner.set_resting(FlusherState::Stopped);
            return;
        }
        _ = tokio::time::sleep(config.initial_delay) => {}
    }

    loop {
        inner.set_resting(FlusherState::Idle);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.period) => {}
        }
        // Not raced against cancellation: a started cycle always finishes.
        inner.flush().await;
    }

    inner.set_resting(FlusherState::Stopped);
    debug!("Flush loop stopped");
}
