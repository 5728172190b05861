//! Batch lifecycle: submission, start, pause, resume and cancellation.
//!
//! ```text
//! Pending ──start──▶ Running ──▶ Completed | Failed
//!    │               │  ▲
//!    │           pause│  │resume
//!    │               ▼  │
//!    │              Paused
//!    └──cancel──▶ Cancelled ◀── Cancelling ◀──cancel── Running | Paused
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use filemut_core::{EngineConfig, EngineError, PathResolver};

use crate::batch::BatchOperation;
use crate::bulk_rename::BulkRenameEngine;
use crate::conflict::ConflictPolicy;
use crate::copy::CopyOptions;
use crate::events::{BatchEvent, ChangeEvent, ChangeSink};
use crate::operation::{BatchAction, BatchRequest};
use crate::progress::BatchReport;
use crate::trash::TrashStore;

/// Identifier of a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// Lifecycle state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum BatchState {
    Pending,
    Running,
    Paused,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
}

impl BatchState {
    /// Whether no further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }
}

/// Shared services every batch runs against.
#[derive(Debug, Clone)]
pub(crate) struct EngineContext {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) resolver: Arc<PathResolver>,
    pub(crate) trash: Arc<TrashStore>,
    pub(crate) changes: ChangeSink,
}

/// State and cancellation shared between a handle and its worker.
#[derive(Debug)]
pub(crate) struct BatchControl {
    pub(crate) state: watch::Sender<BatchState>,
    pub(crate) cancel: CancellationToken,
    events: mpsc::Sender<BatchEvent>,
}

impl BatchControl {
    fn new(events: mpsc::Sender<BatchEvent>) -> Self {
        let (state, _) = watch::channel(BatchState::Pending);
        Self {
            state,
            cancel: CancellationToken::new(),
            events,
        }
    }

    pub(crate) fn current(&self) -> BatchState {
        *self.state.borrow()
    }

    /// Apply `next` to the current state; `None` rejects the transition.
    fn transition(
        &self,
        action: &'static str,
        next: impl FnOnce(BatchState) -> Option<BatchState>,
    ) -> Result<BatchState, EngineError> {
        let mut result = Err(EngineError::Cancelled);
        self.state.send_if_modified(|state| match next(*state) {
            Some(to) => {
                let changed = *state != to;
                *state = to;
                result = Ok(to);
                changed
            }
            None => {
                result = Err(EngineError::InvalidTransition {
                    action,
                    state: state.to_string(),
                });
                false
            }
        });
        if let Ok(state) = result {
            debug!(%state, action, "batch state changed");
            let _ = self.events.try_send(BatchEvent::StateChanged(state));
        }
        result
    }

    /// Enter a terminal state.
    pub(crate) fn finish(&self, state: BatchState) {
        self.state.send_replace(state);
        let _ = self.events.try_send(BatchEvent::StateChanged(state));
    }
}

/// Owns the engine's shared services and creates batches.
#[derive(Debug)]
pub struct OperationScheduler {
    ctx: EngineContext,
    next_id: AtomicU64,
}

impl OperationScheduler {
    /// Create a scheduler for `config`.
    pub fn new(config: EngineConfig) -> Self {
        let resolver = Arc::new(PathResolver::from_config(&config));
        let trash = TrashStore::new(Arc::clone(&resolver), CopyOptions::from_config(&config));
        info!(trash = %config.trash_dir.display(), "operation scheduler ready");
        Self {
            ctx: EngineContext {
                config: Arc::new(config),
                resolver,
                trash: Arc::new(trash),
                changes: ChangeSink::new(),
            },
            next_id: AtomicU64::new(1),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// The shared path resolver.
    pub fn resolver(&self) -> &Arc<PathResolver> {
        &self.ctx.resolver
    }

    /// The system trash handle.
    pub fn trash(&self) -> &TrashStore {
        &self.ctx.trash
    }

    /// Receive a [`ChangeEvent`] whenever any batch creates, deletes or
    /// renames an entry.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.ctx.changes.subscribe()
    }

    /// A bulk rename engine sharing this scheduler's resolver and change feed.
    pub fn bulk_rename(&self) -> BulkRenameEngine {
        BulkRenameEngine::new(Arc::clone(&self.ctx.resolver), self.ctx.changes.clone())
    }

    /// Create a batch in the `Pending` state.
    pub fn submit(&self, request: BatchRequest, policy: ConflictPolicy) -> BatchHandle {
        let id = BatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (events_tx, events_rx) = mpsc::channel(self.ctx.config.channel_size.max(1));
        let control = Arc::new(BatchControl::new(events_tx.clone()));
        let action = request.action;

        debug!(batch = %id, %action, sources = request.sources.len(), "batch submitted");
        let operation = BatchOperation::new(
            id,
            request,
            policy,
            self.ctx.clone(),
            Arc::clone(&control),
            events_tx,
        );

        BatchHandle {
            id,
            action,
            control,
            events: Some(events_rx),
            operation: Some(operation),
            task: None,
        }
    }

    /// Submit, start and wait for a batch.
    pub async fn run(
        &self,
        request: BatchRequest,
        policy: ConflictPolicy,
    ) -> Result<BatchReport, EngineError> {
        self.submit(request, policy).wait().await
    }
}

/// Caller-side control of one batch.
///
/// Progress, per-task and state events are delivered best effort: when the
/// channel is full they are dropped, and the [`BatchReport`] returned by
/// [`wait`](Self::wait) is authoritative. Conflict requests are never
/// dropped.
#[derive(Debug)]
pub struct BatchHandle {
    id: BatchId,
    action: BatchAction,
    control: Arc<BatchControl>,
    events: Option<mpsc::Receiver<BatchEvent>>,
    operation: Option<BatchOperation>,
    task: Option<JoinHandle<BatchReport>>,
}

impl BatchHandle {
    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn action(&self) -> BatchAction {
        self.action
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BatchState {
        self.control.current()
    }

    /// Watch lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<BatchState> {
        self.control.state.subscribe()
    }

    /// Take the event receiver. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<BatchEvent>> {
        self.events.take()
    }

    /// Begin dispatching on a worker task.
    pub fn start(&mut self) -> Result<(), EngineError> {
        self.control.transition("start", |state| match state {
            BatchState::Pending => Some(BatchState::Running),
            _ => None,
        })?;
        if let Some(operation) = self.operation.take() {
            info!(batch = %self.id, action = %self.action, "batch started");
            self.task = Some(tokio::spawn(operation.run()));
        }
        Ok(())
    }

    /// Stop dispatching after the in-flight entry.
    pub fn pause(&self) -> Result<(), EngineError> {
        self.control
            .transition("pause", |state| match state {
                BatchState::Running | BatchState::Paused => Some(BatchState::Paused),
                _ => None,
            })
            .map(drop)
    }

    /// Continue a paused batch.
    pub fn resume(&self) -> Result<(), EngineError> {
        self.control
            .transition("resume", |state| match state {
                BatchState::Paused | BatchState::Running => Some(BatchState::Running),
                _ => None,
            })
            .map(drop)
    }

    /// Stop the batch. The in-flight entry finishes; nothing else starts.
    pub fn cancel(&self) -> Result<(), EngineError> {
        self.control.transition("cancel", |state| match state {
            BatchState::Pending => Some(BatchState::Cancelled),
            BatchState::Running | BatchState::Paused | BatchState::Cancelling => {
                Some(BatchState::Cancelling)
            }
            _ => None,
        })?;
        self.control.cancel.cancel();
        Ok(())
    }

    /// Wait for the batch to finish, starting it first if still pending.
    ///
    /// An unclaimed event receiver is dropped, so pending conflict requests
    /// resolve as skips.
    pub async fn wait(mut self) -> Result<BatchReport, EngineError> {
        self.events = None;

        if self.task.is_none() {
            if self.state() == BatchState::Cancelled {
                if let Some(operation) = self.operation.take() {
                    return Ok(operation.discard());
                }
            }
            self.start()?;
        }

        match self.task.take() {
            Some(task) => task.await.map_err(|e| {
                EngineError::io(
                    PathBuf::new(),
                    std::io::Error::other(format!("batch worker failed: {}", e)),
                )
            }),
            None => Err(EngineError::InvalidTransition {
                action: "wait for",
                state: self.state().to_string(),
            }),
        }
    }
}
