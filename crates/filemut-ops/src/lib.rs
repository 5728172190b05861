//! File mutation engine for filemut.
//!
//! This crate turns batch requests (copy, move, delete, link) into ordered
//! per-entry tasks, runs them on a background worker with progress reported
//! through channels, and settles destination collisions through a
//! [`ConflictPolicy`]. Bulk renames are planned and validated up front by the
//! [`BulkRenameEngine`] and executed in order.
//!
//! ```rust,no_run
//! use filemut_core::EngineConfig;
//! use filemut_ops::{BatchEvent, BatchRequest, ConflictPolicy, OperationScheduler};
//!
//! # async fn demo() -> Result<(), filemut_core::EngineError> {
//! let scheduler = OperationScheduler::new(EngineConfig::default());
//! let mut batch = scheduler.submit(
//!     BatchRequest::copy(vec!["/tmp/a.txt".into()], "/tmp/backup"),
//!     ConflictPolicy::non_interactive(),
//! );
//! let mut events = batch.take_events().expect("events not yet taken");
//! batch.start()?;
//!
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         if let BatchEvent::Progress(progress) = event {
//!             println!("{:.0}%", progress.percentage());
//!         }
//!     }
//! });
//!
//! let report = batch.wait().await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

mod batch;
mod bulk_rename;
mod conflict;
mod copy;
mod delete;
mod events;
mod link;
mod move_op;
mod operation;
mod progress;
mod rename;
mod scheduler;
mod template;
mod trash;

pub use bulk_rename::{BulkRenameEngine, RenameOptions, RenamePlan, RenameReport, RenameStep};
pub use conflict::{
    Conflict, ConflictDecision, ConflictKind, ConflictMode, ConflictPolicy, ConflictRequest,
    auto_rename_path,
};
pub use copy::{CopyOptions, apply_dir_metadata, copy_entry, file_digest};
pub use delete::{Deleted, delete_entry};
pub use events::{BatchEvent, CHANGE_CHANNEL_SIZE, ChangeEvent, ChangeKind, ChangeSink};
pub use link::link_entry;
pub use move_op::{move_across, move_entry};
pub use operation::{
    BatchAction, BatchRequest, TaskAction, TaskError, TaskRecord, TaskStatus, TransferTask,
};
pub use progress::{BatchReport, OperationProgress};
pub use rename::{MAX_NAME_LEN, rename_entry, validate_filename};
pub use scheduler::{BatchHandle, BatchId, BatchState, OperationScheduler};
pub use template::{COUNTER_TOKEN, DigitSet, RenameTemplate, digit_count};
pub use trash::{TrashRecord, TrashStore};

pub use filemut_walk::WalkCheckpoint;
