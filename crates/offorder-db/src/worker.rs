//! Background executor for watched transactions with a compensating path.
//!
//! ```text
//! submit ─▶ Pending ─▶ Running ─┬─▶ Done
//!                               ├─▶ Failed                    (no revert)
//!                               └─▶ Reverting{n} ─┬─▶ Reverted{n}
//!                                       │         └─▶ Abandoned{n} (bounded only)
//!                                       └─▶ Stuck{n} ─▶ Reverted{n} | Abandoned{n}
//! ```
//!
//! One dispatch loop drains an unbounded queue and runs primaries one at a
//! time. A primary that fails for any reason and has a revert gets its own
//! compensation task, so a slow compensator never holds up the queue.
//! Compensations for different items run concurrently with each other and
//! with new dispatch.
//!
//! A compensator re-watches its key set on every attempt and is retried
//! until it commits. After `escalate_after` failed attempts the item is
//! reported [`WorkState::Stuck`] and an error is logged once; retrying goes
//! on. With `max_revert_attempts` set the item ends [`WorkState::Abandoned`]
//! instead of retrying forever.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use offorder_store::{Key, Store, Tx, TxBody, all_ok, run_watched};
use offorder_types::{OffOrderError, Result, WorkerConfig};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// A unit of deferred transactional execution.
///
/// `run` and `revert` read through the transaction and queue writes on it;
/// the worker commits them under a watch on `run_keys` / `revert_keys`.
/// `revert` may run many times and must be idempotent.
#[async_trait]
pub trait Work: Send + Sync + 'static {
    fn run_keys(&self) -> Vec<Key>;

    async fn run(&self, tx: &mut Tx<'_>) -> Result<()>;

    fn has_revert(&self) -> bool {
        false
    }

    fn revert_keys(&self) -> Vec<Key> {
        Vec::new()
    }

    async fn revert(&self, _tx: &mut Tx<'_>) -> Result<()> {
        Ok(())
    }
}

struct Primary<'w>(&'w dyn Work);

#[async_trait]
impl TxBody for Primary<'_> {
    async fn apply(&self, tx: &mut Tx<'_>) -> Result<()> {
        self.0.run(tx).await
    }
}

struct Compensation<'w>(&'w dyn Work);

#[async_trait]
impl TxBody for Compensation<'_> {
    async fn apply(&self, tx: &mut Tx<'_>) -> Result<()> {
        self.0.revert(tx).await
    }
}

/// Lifecycle of a submitted work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    Pending,
    Running,
    Done,
    Failed,
    /// Compensation in progress; `attempts` have failed so far.
    Reverting { attempts: u32 },
    /// Compensation is past the escalation threshold and still retrying.
    Stuck { attempts: u32 },
    /// Compensation committed on attempt `attempts`.
    Reverted { attempts: u32 },
    /// Compensation gave up after `attempts`.
    Abandoned { attempts: u32 },
}

impl WorkState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Failed | Self::Reverted { .. } | Self::Abandoned { .. }
        )
    }
}

impl fmt::Display for WorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Reverting { attempts } => write!(f, "reverting ({attempts} failed attempts)"),
            Self::Stuck { attempts } => write!(f, "stuck ({attempts} failed attempts)"),
            Self::Reverted { attempts } => write!(f, "reverted (attempt {attempts})"),
            Self::Abandoned { attempts } => write!(f, "abandoned after {attempts} attempts"),
        }
    }
}

/// Handle on a submitted work item.
#[derive(Debug, Clone)]
pub struct WorkTicket {
    id: u64,
    state: watch::Receiver<WorkState>,
}

impl WorkTicket {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Latest observed state.
    #[must_use]
    pub fn state(&self) -> WorkState {
        *self.state.borrow()
    }

    /// Wait until the item reaches a terminal state.
    pub async fn wait(&mut self) -> Result<WorkState> {
        self.wait_until(WorkState::is_terminal).await
    }

    /// Wait until the item reaches a state accepted by `accept`.
    pub async fn wait_until(&mut self, accept: impl FnMut(&WorkState) -> bool) -> Result<WorkState> {
        let state = self
            .state
            .wait_for(accept)
            .await
            .map_err(|_| OffOrderError::WorkerStopped)?;
        Ok(*state)
    }

    /// Wait for the item to finish and fail unless its primary committed.
    pub async fn wait_done(&mut self) -> Result<()> {
        match self.wait().await? {
            WorkState::Done => Ok(()),
            other => Err(OffOrderError::WorkFailed {
                reason: other.to_string(),
            }),
        }
    }
}

struct Job {
    id: u64,
    work: Arc<dyn Work>,
    state: watch::Sender<WorkState>,
}

/// Queue plus dispatch loop. Dropping or shutting down the worker closes the
/// queue; items already queued still run.
pub struct Worker {
    sender: mpsc::UnboundedSender<Job>,
    next_id: AtomicU64,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Start the dispatch loop on the current tokio runtime.
    #[must_use]
    pub fn spawn(store: Arc<dyn Store>, config: WorkerConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_dispatch_loop(store, config, receiver));
        Self {
            sender,
            next_id: AtomicU64::new(1),
            handle,
        }
    }

    /// Enqueue `work`. Never blocks.
    pub fn submit(&self, work: Arc<dyn Work>) -> Result<WorkTicket> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (state_tx, state_rx) = watch::channel(WorkState::Pending);
        self.sender
            .send(Job {
                id,
                work,
                state: state_tx,
            })
            .map_err(|_| OffOrderError::WorkerStopped)?;
        tracing::trace!(id, "work queued");
        Ok(WorkTicket {
            id,
            state: state_rx,
        })
    }

    /// Close the queue and wait for the dispatch loop to drain it.
    /// Compensation tasks already running are not waited for.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(err) = self.handle.await {
            tracing::error!(error = %err, "worker dispatch loop terminated abnormally");
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("closed", &self.sender.is_closed())
            .finish_non_exhaustive()
    }
}

async fn run_dispatch_loop(
    store: Arc<dyn Store>,
    config: WorkerConfig,
    mut jobs: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = jobs.recv().await {
        job.state.send_replace(WorkState::Running);

        let keys = job.work.run_keys();
        let outcome = match run_watched(store.as_ref(), &keys, &Primary(job.work.as_ref())).await {
            Ok(results) => all_ok(results).map(drop),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                tracing::debug!(id = job.id, "work committed");
                job.state.send_replace(WorkState::Done);
            }
            Err(err) if job.work.has_revert() => {
                tracing::warn!(id = job.id, error = %err, "work failed, compensating");
                job.state.send_replace(WorkState::Reverting { attempts: 0 });
                tokio::spawn(compensate(Arc::clone(&store), config.clone(), job));
            }
            Err(err) => {
                tracing::warn!(id = job.id, error = %err, "work failed");
                job.state.send_replace(WorkState::Failed);
            }
        }
    }
    tracing::debug!("work queue closed");
}

async fn compensate(store: Arc<dyn Store>, config: WorkerConfig, job: Job) {
    let keys = job.work.revert_keys();
    let body = Compensation(job.work.as_ref());
    let backoff = config.revert_backoff();
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);
        let outcome = match run_watched(store.as_ref(), &keys, &body).await {
            Ok(results) => all_ok(results).map(drop),
            Err(err) => Err(err),
        };

        let err = match outcome {
            Ok(()) => {
                tracing::info!(id = job.id, attempts, "work reverted");
                job.state.send_replace(WorkState::Reverted { attempts });
                return;
            }
            Err(err) => err,
        };

        if config.max_revert_attempts.is_some_and(|max| attempts >= max) {
            tracing::error!(id = job.id, attempts, error = %err, "compensation abandoned");
            job.state.send_replace(WorkState::Abandoned { attempts });
            return;
        }

        if attempts == config.escalate_after {
            tracing::error!(id = job.id, attempts, error = %err, "compensation stuck, still retrying");
        } else {
            tracing::trace!(id = job.id, attempts, error = %err, "compensation attempt failed");
        }
        let state = if attempts >= config.escalate_after {
            WorkState::Stuck { attempts }
        } else {
            WorkState::Reverting { attempts }
        };
        job.state.send_replace(state);

        if backoff.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(backoff).await;
        }
    }
}
