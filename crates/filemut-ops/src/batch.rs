//! The worker that carries out one batch.
//!
//! Sources are expanded lazily by a [`TreeWalker`] running on a blocking
//! thread and handled strictly one entry at a time, in walk order. Between
//! entries the worker honours pause and cancellation; the entry in flight
//! always runs to completion.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use filemut_core::{EngineError, Entry, Location, LocationKind, PathResolver, available_space};
use filemut_walk::{TreeWalker, WalkCheckpoint, WalkItem, WalkTotals};

use crate::conflict::{Conflict, ConflictDecision, ConflictPolicy, auto_rename_path};
use crate::copy::{CopyOptions, apply_dir_metadata, copy_entry};
use crate::delete::delete_entry;
use crate::events::BatchEvent;
use crate::link::link_entry;
use crate::move_op::{move_across, move_entry};
use crate::operation::{BatchAction, BatchRequest, TaskAction, TaskError, TaskRecord, TaskStatus};
use crate::progress::{BatchReport, OperationProgress};
use crate::scheduler::{BatchControl, BatchId, BatchState, EngineContext};
use crate::trash::TrashRecord;

/// Walked entries buffered ahead of the worker.
const WALK_LOOKAHEAD: usize = 32;

/// Minimum gap between byte-level progress events.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Cancelled,
    Aborted,
}

/// Where an entry goes once any collision is settled.
#[derive(Debug)]
enum Settled {
    Free(Location),
    Replace(Location),
    Merge(Location),
    Skip,
}

/// A settled destination for one directory.
#[derive(Debug)]
struct Placement {
    target: Location,
    replace: bool,
    merging: bool,
}

/// Per-walk bookkeeping for copies and moves.
#[derive(Debug)]
struct TreeState {
    /// Destination of each root; `None` once the root was skipped.
    targets: Vec<Option<Location>>,
    totals: Vec<WalkTotals>,
    /// Source directory to destination directory; `None` when its
    /// contents must be skipped.
    dirs: HashMap<PathBuf, Option<Location>>,
    /// Source directories moved in one rename; their walked contents are stale.
    moved: Vec<PathBuf>,
    /// Directories created by this batch, for deferred metadata.
    created: Vec<(Entry, Location)>,
    /// Source directories to remove once a move has emptied them.
    vacated: Vec<PathBuf>,
    /// Number of roots the walk has reached.
    reached: usize,
}

impl TreeState {
    fn new(targets: Vec<Location>, totals: Vec<WalkTotals>) -> Self {
        Self {
            targets: targets.into_iter().map(Some).collect(),
            totals,
            dirs: HashMap::new(),
            moved: Vec::new(),
            created: Vec::new(),
            vacated: Vec::new(),
            reached: 0,
        }
    }

    fn is_moved(&self, path: &Path) -> bool {
        self.moved.iter().any(|dir| path.starts_with(dir))
    }

    fn destination_for(&self, item: &WalkItem, resolver: &PathResolver) -> Option<Location> {
        if item.is_root() {
            return self.targets[item.root].clone();
        }
        let name = item.entry.location.file_name()?;
        match item.entry.location.parent().and_then(|p| self.dirs.get(p)) {
            Some(Some(dir)) => Some(resolver.locate(dir.path().join(name))),
            Some(None) => None,
            // Resumed walk: the parent was handled by an earlier run.
            None => self.targets[item.root]
                .as_ref()
                .map(|root| resolver.locate(root.path().join(&item.relative))),
        }
    }

    fn skip_dir(&mut self, entry: &Entry) {
        if entry.kind.is_dir() {
            self.dirs.insert(entry.path().to_path_buf(), None);
        }
    }
}

/// Byte-level progress from inside a blocking primitive.
struct ByteMeter {
    snapshot: OperationProgress,
    events: mpsc::Sender<BatchEvent>,
    last: Instant,
}

impl ByteMeter {
    fn add(&mut self, bytes: u64) {
        self.snapshot.bytes_done += bytes;
        if self.last.elapsed() >= PROGRESS_INTERVAL {
            self.last = Instant::now();
            let _ = self
                .events
                .try_send(BatchEvent::Progress(self.snapshot.clone()));
        }
    }
}

/// A submitted batch, run to completion by [`BatchOperation::run`].
#[derive(Debug)]
pub(crate) struct BatchOperation {
    id: BatchId,
    request: BatchRequest,
    policy: ConflictPolicy,
    ctx: EngineContext,
    control: Arc<BatchControl>,
    events: mpsc::Sender<BatchEvent>,
    state: watch::Receiver<BatchState>,
    options: CopyOptions,
    progress: OperationProgress,
    records: Vec<TaskRecord>,
    trashed: Vec<TrashRecord>,
    position: u64,
    stopped: bool,
}

impl BatchOperation {
    pub(crate) fn new(
        id: BatchId,
        request: BatchRequest,
        policy: ConflictPolicy,
        ctx: EngineContext,
        control: Arc<BatchControl>,
        events: mpsc::Sender<BatchEvent>,
    ) -> Self {
        let state = control.state.subscribe();
        let progress = OperationProgress::new(request.action, request.sources.len() as u64, 0);
        let options = CopyOptions::from_config(&ctx.config);
        Self {
            id,
            request,
            policy,
            ctx,
            control,
            events,
            state,
            options,
            progress,
            records: Vec::new(),
            trashed: Vec::new(),
            position: 0,
            stopped: false,
        }
    }

    /// Report for a batch cancelled before it started.
    pub(crate) fn discard(mut self) -> BatchReport {
        let action = TaskAction::from(self.request.action);
        self.records = self
            .request
            .sources
            .iter()
            .map(|source| {
                TaskRecord::unsuccessful(source, None, action.clone(), TaskStatus::Cancelled, None)
            })
            .collect();
        self.report(BatchState::Cancelled, None)
    }

    /// Dispatch every entry and produce the final report.
    pub(crate) async fn run(mut self) -> BatchReport {
        let started = Instant::now();

        let (state, error) = match self.execute().await {
            Err(EngineError::Cancelled) => (BatchState::Cancelled, None),
            Err(e) => {
                warn!(batch = %self.id, error = %e, "batch halted before mutating anything");
                let path = self.request.destination.clone().unwrap_or_default();
                (BatchState::Failed, Some(TaskError::from_engine(path, &e)))
            }
            Ok(()) if self.stopped => (BatchState::Cancelled, None),
            Ok(()) if self.records.iter().any(|r| r.status == TaskStatus::Failed) => {
                (BatchState::Failed, None)
            }
            Ok(()) => (BatchState::Completed, None),
        };

        self.control.finish(state);
        let report = self.report(state, error);
        info!(
            batch = %self.id,
            %state,
            succeeded = report.succeeded(),
            skipped = report.skipped(),
            failed = report.failed(),
            bytes = report.bytes_done,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );
        let _ = self.events.try_send(BatchEvent::Finished(report.clone()));
        report
    }

    async fn execute(&mut self) -> Result<(), EngineError> {
        let roots = self.resolve_sources();
        if roots.is_empty() {
            return Ok(());
        }

        match self.request.action {
            BatchAction::Copy | BatchAction::Move => {
                let destination = self.destination_dir()?;
                self.transfer(roots, destination).await
            }
            BatchAction::Link { symbolic } => {
                let destination = self.destination_dir()?;
                self.link_all(roots, destination, symbolic).await
            }
            BatchAction::Delete { permanent: true } => self.delete_all(roots).await,
            BatchAction::Delete { permanent: false } => self.trash_all(roots).await,
        }
    }

    /// Snapshot every source. Missing sources fail on their own; sources
    /// nested inside another selected source are covered by it.
    fn resolve_sources(&mut self) -> Vec<Entry> {
        let mut roots: Vec<Entry> = Vec::with_capacity(self.request.sources.len());
        for source in self.request.sources.clone() {
            match self.ctx.resolver.entry(&source) {
                Ok(entry) => roots.push(entry),
                Err(e) => self.fail(&source, None, &e),
            }
        }

        let nested: Vec<bool> = roots
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                roots.iter().enumerate().any(|(j, other)| {
                    (i != j && entry.location.is_descendant_of(&other.location))
                        || (j < i && entry.path() == other.path())
                })
            })
            .collect();
        roots
            .into_iter()
            .zip(nested)
            .filter_map(|(entry, nested)| {
                if nested {
                    debug!(path = %entry.path().display(), "source covered by another source");
                    None
                } else {
                    Some(entry)
                }
            })
            .collect()
    }

    fn destination_dir(&self) -> Result<Location, EngineError> {
        let Some(path) = self.request.destination.as_deref() else {
            return Err(EngineError::InvalidTarget {
                source_path: PathBuf::new(),
                destination: PathBuf::new(),
                reason: "no destination directory given".into(),
            });
        };
        if let Ok(metadata) = fs::metadata(path) {
            if !metadata.is_dir() {
                return Err(EngineError::InvalidTarget {
                    source_path: PathBuf::new(),
                    destination: path.to_path_buf(),
                    reason: "destination is not a directory".into(),
                });
            }
        }
        Ok(self.ctx.resolver.locate(path))
    }

    fn create_destination(&self, destination: &Location) -> Result<(), EngineError> {
        if fs::metadata(destination.path()).is_ok() {
            return Ok(());
        }
        fs::create_dir_all(destination.path())
            .map_err(|e| EngineError::io(destination.path(), e))?;
        self.ctx.changes.created(destination.path());
        Ok(())
    }

    async fn transfer(&mut self, roots: Vec<Entry>, destination: Location) -> Result<(), EngineError> {
        let moving = self.request.action == BatchAction::Move;
        let checkpoint = match self.request.checkpoint {
            Some(checkpoint) if !moving => checkpoint,
            _ => WalkCheckpoint::default(),
        };
        let resuming = checkpoint.position > 0;

        let mut sources = Vec::with_capacity(roots.len());
        let mut targets = Vec::with_capacity(roots.len());
        for root in roots {
            let Some(name) = root.location.file_name() else {
                let e = EngineError::InvalidTarget {
                    source_path: root.path().to_path_buf(),
                    destination: destination.path().to_path_buf(),
                    reason: "source has no file name".into(),
                };
                self.fail(root.path(), None, &e);
                continue;
            };
            let target = self.ctx.resolver.locate(destination.path().join(name));
            // A copy into its own directory is renamed at dispatch.
            let copy_in_place = !moving && target.path() == root.path();
            if !copy_in_place {
                if let Err(e) = self.ctx.resolver.check_target(&root.location, &target) {
                    self.fail(root.path(), Some(target.path()), &e);
                    continue;
                }
            }
            sources.push(root);
            targets.push(target);
        }
        if sources.is_empty() {
            return Ok(());
        }

        let totals = self.measure(&sources).await?;
        let sum = WalkTotals::sum(&totals);
        self.progress = OperationProgress::new(self.request.action, sum.items, sum.bytes);

        if !resuming {
            let required = sources
                .iter()
                .zip(&targets)
                .zip(&totals)
                .filter(|((source, target), _)| !moving || !source.location.same_volume(target))
                .map(|(_, totals)| totals.bytes)
                .sum();
            preflight(&destination, required)?;
        }
        self.create_destination(&destination)?;

        debug!(
            batch = %self.id,
            items = sum.items,
            bytes = sum.bytes,
            resume_at = checkpoint.position,
            "dispatching"
        );

        let mut tree = TreeState::new(targets, totals);
        let mut items = self.spawn_walk(sources.clone(), checkpoint);
        self.position = checkpoint.position;

        while let Some(item) = items.recv().await {
            if self.gate().await.is_err() {
                self.stopped = true;
                break;
            }
            let flow = match item {
                Ok(item) => {
                    tree.reached = tree.reached.max(item.root + 1);
                    self.transfer_item(&mut tree, item, moving, resuming).await
                }
                Err(e) => {
                    let path = e.path().unwrap_or(destination.path()).to_path_buf();
                    if !tree.is_moved(&path) {
                        self.fail(&path, None, &e);
                    }
                    Flow::Continue
                }
            };
            if flow == Flow::Stop {
                self.stopped = true;
                break;
            }
            self.position += 1;
        }
        drop(items);

        self.finish_tree(&mut tree).await;
        if self.stopped {
            self.cancel_unreached(&sources, tree.reached);
        }
        Ok(())
    }

    async fn transfer_item(
        &mut self,
        tree: &mut TreeState,
        item: WalkItem,
        moving: bool,
        resuming: bool,
    ) -> Flow {
        // Counted when its directory moved.
        if tree.is_moved(item.entry.path()) {
            return Flow::Continue;
        }

        let Some(target) = tree.destination_for(&item, &self.ctx.resolver) else {
            tree.skip_dir(&item.entry);
            self.skip(item.entry.path(), None);
            return Flow::Continue;
        };
        let root = item.is_root().then_some(item.root);
        let entry = item.entry;

        self.progress.set_current_entry(Some(entry.path().to_path_buf()));
        self.report_progress();

        if resuming && is_already_copied(&entry, target.path()) {
            self.progress.complete_items(0, entry.size);
            self.skip(entry.path(), Some(target.path()));
            return Flow::Continue;
        }

        let (target, replace, merging) = match self.settle(&entry, target, !moving).await {
            Ok(Settled::Free(target)) => (target, false, false),
            Ok(Settled::Replace(target)) => (target, true, false),
            Ok(Settled::Merge(target)) => (target, false, true),
            Ok(Settled::Skip) => {
                if let Some(root) = root {
                    tree.targets[root] = None;
                }
                tree.skip_dir(&entry);
                self.skip(entry.path(), None);
                return Flow::Continue;
            }
            Err(halt) => {
                self.halt(entry.path(), halt);
                return Flow::Stop;
            }
        };
        if let Some(root) = root {
            tree.targets[root] = Some(target.clone());
        }

        if entry.kind.is_dir() {
            let placement = Placement {
                target,
                replace,
                merging,
            };
            self.transfer_dir(tree, &entry, placement, moving, root).await;
            return Flow::Continue;
        }

        let (source, destination) = (entry.clone(), target.clone());
        let options = self.options.replacing(replace);
        let verify = self.ctx.config.verify_checksum;
        let same_volume = entry.location.same_volume(&target);
        let mut meter = self.meter();

        let result = blocking(move || {
            if !moving {
                return copy_entry(&source, &destination, &options, &mut |n| meter.add(n));
            }
            if same_volume {
                match move_entry(&source, &destination, options.replace) {
                    Ok(()) => return Ok(source.size),
                    Err(EngineError::CrossVolume { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            move_across(&source, &destination, &options, verify, &mut |n| meter.add(n))
        })
        .await;

        match result {
            Ok(bytes) => {
                if moving {
                    self.ctx.changes.renamed(entry.path(), target.path());
                } else {
                    self.ctx.changes.created(target.path());
                }
                self.succeed(entry.path(), Some(target.path()), bytes);
            }
            Err(e) => self.fail(entry.path(), Some(target.path()), &e),
        }
        Flow::Continue
    }

    async fn transfer_dir(
        &mut self,
        tree: &mut TreeState,
        entry: &Entry,
        placement: Placement,
        moving: bool,
        root: Option<usize>,
    ) {
        let Placement {
            target,
            replace,
            merging,
        } = placement;
        let target = &target;

        if moving && !merging && entry.location.same_volume(target) {
            let (source, destination) = (entry.clone(), target.clone());
            match blocking(move || move_entry(&source, &destination, replace)).await {
                Ok(()) => {
                    tree.moved.push(entry.path().to_path_buf());
                    let totals = match root {
                        Some(root) => tree.totals[root],
                        // A subdirectory moved whole during a merge; its
                        // contents were never walked, so count them where
                        // they landed.
                        None => match self.ctx.resolver.entry(target.path()) {
                            Ok(moved) => self
                                .measure(std::slice::from_ref(&moved))
                                .await
                                .map(|totals| WalkTotals::sum(&totals))
                                .unwrap_or_default(),
                            Err(_) => WalkTotals::default(),
                        },
                    };
                    self.progress
                        .complete_items(totals.items.saturating_sub(1), totals.bytes);
                    self.ctx.changes.renamed(entry.path(), target.path());
                    self.succeed(entry.path(), Some(target.path()), 0);
                    return;
                }
                Err(EngineError::CrossVolume { .. }) => {
                    debug!(path = %entry.path().display(), "rename crossed volumes, moving entry by entry");
                }
                Err(e) => {
                    tree.skip_dir(entry);
                    self.fail(entry.path(), Some(target.path()), &e);
                    return;
                }
            }
        }

        let (source, destination) = (entry.clone(), target.clone());
        let options = self.options.replacing(replace);
        match blocking(move || copy_entry(&source, &destination, &options, &mut |_| {})).await {
            Ok(_) => {
                tree.dirs
                    .insert(entry.path().to_path_buf(), Some(target.clone()));
                if !merging {
                    tree.created.push((entry.clone(), target.clone()));
                    self.ctx.changes.created(target.path());
                }
                if moving {
                    tree.vacated.push(entry.path().to_path_buf());
                }
                self.succeed(entry.path(), Some(target.path()), 0);
            }
            Err(e) => {
                tree.skip_dir(entry);
                self.fail(entry.path(), Some(target.path()), &e);
            }
        }
    }

    /// Apply directory metadata deepest first, then remove the source
    /// directories a move has emptied.
    async fn finish_tree(&mut self, tree: &mut TreeState) {
        let created = std::mem::take(&mut tree.created);
        let vacated = std::mem::take(&mut tree.vacated);
        if created.is_empty() && vacated.is_empty() {
            return;
        }

        let options = self.options.clone();
        let changes = self.ctx.changes.clone();
        let finished = tokio::task::spawn_blocking(move || {
            for (source, destination) in created.iter().rev() {
                if let Err(e) = apply_dir_metadata(source, destination.path(), &options) {
                    warn!(path = %destination.path().display(), error = %e, "could not apply directory metadata");
                }
            }
            for dir in vacated.iter().rev() {
                match fs::remove_dir(dir) {
                    Ok(()) => changes.deleted(dir),
                    Err(e) => {
                        debug!(path = %dir.display(), error = %e, "source directory left in place")
                    }
                }
            }
        })
        .await;
        if let Err(e) = finished {
            warn!(batch = %self.id, error = %e, "directory cleanup did not finish");
        }
    }

    async fn delete_all(&mut self, roots: Vec<Entry>) -> Result<(), EngineError> {
        let totals = self.measure(&roots).await?;
        let sum = WalkTotals::sum(&totals);
        self.progress = OperationProgress::new(self.request.action, sum.items, 0);

        // Directories wait here until everything below them is gone.
        let mut open: Vec<Entry> = Vec::new();
        let mut reached = 0;
        let mut items = self.spawn_walk(roots.clone(), WalkCheckpoint::default());

        while let Some(item) = items.recv().await {
            if self.gate().await.is_err() {
                self.stopped = true;
                break;
            }
            match item {
                Ok(item) => {
                    reached = reached.max(item.root + 1);
                    while open
                        .last()
                        .is_some_and(|dir| !item.entry.path().starts_with(dir.path()))
                    {
                        if let Some(dir) = open.pop() {
                            self.delete_one(dir).await;
                        }
                    }
                    if item.entry.kind.is_dir() {
                        open.push(item.entry);
                    } else {
                        self.delete_one(item.entry).await;
                    }
                }
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    self.fail(&path, None, &e);
                }
            }
            self.position += 1;
        }
        drop(items);

        if self.stopped {
            while let Some(dir) = open.pop() {
                self.record_status(dir.path(), None, TaskStatus::Cancelled, None);
            }
            self.cancel_unreached(&roots, reached);
        } else {
            while let Some(dir) = open.pop() {
                self.delete_one(dir).await;
            }
        }
        Ok(())
    }

    async fn delete_one(&mut self, entry: Entry) {
        self.progress.set_current_entry(Some(entry.path().to_path_buf()));
        let trash = Arc::clone(&self.ctx.trash);
        let target = entry.clone();
        match blocking(move || delete_entry(&target, true, &trash)).await {
            Ok(_) => {
                self.ctx.changes.deleted(entry.path());
                self.succeed(entry.path(), None, 0);
            }
            Err(e) => self.fail(entry.path(), None, &e),
        }
        self.report_progress();
    }

    async fn trash_all(&mut self, roots: Vec<Entry>) -> Result<(), EngineError> {
        self.progress = OperationProgress::new(self.request.action, roots.len() as u64, 0);

        for (index, root) in roots.iter().enumerate() {
            if self.gate().await.is_err() {
                self.stopped = true;
                self.cancel_unreached(&roots, index);
                break;
            }
            self.progress.set_current_entry(Some(root.path().to_path_buf()));
            self.report_progress();

            let class = self.ctx.resolver.classify(&root.location);
            if !class.is_trashable {
                let reason = match class.kind {
                    LocationKind::Trash => "entry is already in the trash",
                    LocationKind::Remote => "remote entries cannot be trashed",
                    LocationKind::Local => "parent directory is not writable",
                };
                let e = EngineError::InvalidTarget {
                    source_path: root.path().to_path_buf(),
                    destination: self.ctx.config.trash_dir.clone(),
                    reason: reason.into(),
                };
                self.fail(root.path(), None, &e);
                continue;
            }

            let trash = Arc::clone(&self.ctx.trash);
            let entry = root.clone();
            match blocking(move || trash.trash(&entry)).await {
                Ok(record) => {
                    self.ctx.changes.deleted(root.path());
                    let stored = self.ctx.trash.stored_path(&record.id);
                    self.succeed(root.path(), Some(&stored), 0);
                    self.trashed.push(record);
                }
                Err(e) => self.fail(root.path(), None, &e),
            }
        }
        Ok(())
    }

    async fn link_all(
        &mut self,
        roots: Vec<Entry>,
        destination: Location,
        symbolic: bool,
    ) -> Result<(), EngineError> {
        self.progress = OperationProgress::new(self.request.action, roots.len() as u64, 0);
        self.create_destination(&destination)?;

        for (index, root) in roots.iter().enumerate() {
            if self.gate().await.is_err() {
                self.stopped = true;
                self.cancel_unreached(&roots, index);
                break;
            }
            self.progress.set_current_entry(Some(root.path().to_path_buf()));
            self.report_progress();

            let Some(name) = root.location.file_name() else {
                let e = EngineError::InvalidTarget {
                    source_path: root.path().to_path_buf(),
                    destination: destination.path().to_path_buf(),
                    reason: "source has no file name".into(),
                };
                self.fail(root.path(), None, &e);
                continue;
            };
            let target = self.ctx.resolver.locate(destination.path().join(name));

            let (target, replace) = match self.settle(root, target, true).await {
                Ok(Settled::Free(target) | Settled::Merge(target)) => (target, false),
                Ok(Settled::Replace(target)) => (target, true),
                Ok(Settled::Skip) => {
                    self.skip(root.path(), None);
                    continue;
                }
                Err(halt) => {
                    self.halt(root.path(), halt);
                    self.cancel_unreached(&roots, index + 1);
                    break;
                }
            };

            let (source, link) = (root.clone(), target.clone());
            match blocking(move || link_entry(&source, &link, symbolic, replace)).await {
                Ok(()) => {
                    self.ctx.changes.created(target.path());
                    self.succeed(root.path(), Some(target.path()), 0);
                }
                Err(e) => self.fail(root.path(), Some(target.path()), &e),
            }
        }
        Ok(())
    }

    /// Decide where `entry` lands when `target` may be occupied.
    async fn settle(
        &mut self,
        entry: &Entry,
        target: Location,
        rename_in_place: bool,
    ) -> Result<Settled, Halt> {
        if rename_in_place && target.path() == entry.path() {
            return Ok(Settled::Free(self.renamed(&target)));
        }
        let Ok(existing) = fs::symlink_metadata(target.path()) else {
            return Ok(Settled::Free(target));
        };
        let linking = matches!(self.request.action, BatchAction::Link { .. });
        if entry.kind.is_dir() && existing.is_dir() && !linking {
            return Ok(Settled::Merge(target));
        }

        let conflict = Conflict::at(entry.path(), target.path());
        let decision = self
            .policy
            .resolve(conflict, true, &self.events, &self.control.cancel)
            .await;
        match decision {
            Err(_) => Err(Halt::Cancelled),
            Ok(None) => Ok(Settled::Free(target)),
            Ok(Some(decision)) => {
                debug!(path = %target.path().display(), ?decision, "conflict settled");
                match decision {
                    ConflictDecision::Overwrite | ConflictDecision::OverwriteAll => {
                        Ok(Settled::Replace(target))
                    }
                    ConflictDecision::Skip | ConflictDecision::SkipAll => Ok(Settled::Skip),
                    ConflictDecision::AutoRename | ConflictDecision::AutoRenameAll => {
                        Ok(Settled::Free(self.renamed(&target)))
                    }
                    ConflictDecision::Abort => Err(Halt::Aborted),
                }
            }
        }
    }

    fn renamed(&self, target: &Location) -> Location {
        self.ctx.resolver.locate(auto_rename_path(target.path()))
    }

    /// Wait out a pause; fails once the batch is cancelled.
    async fn gate(&mut self) -> Result<(), EngineError> {
        loop {
            if self.control.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let state = *self.state.borrow_and_update();
            match state {
                BatchState::Paused => {}
                BatchState::Cancelling | BatchState::Cancelled => return Err(EngineError::Cancelled),
                _ => return Ok(()),
            }

            debug!(batch = %self.id, "paused");
            tokio::select! {
                changed = self.state.changed() => {
                    if changed.is_err() {
                        return Err(EngineError::Cancelled);
                    }
                }
                _ = self.control.cancel.cancelled() => return Err(EngineError::Cancelled),
            }
        }
    }

    async fn measure(&self, roots: &[Entry]) -> Result<Vec<WalkTotals>, EngineError> {
        let walker = TreeWalker::new(Arc::clone(&self.ctx.resolver));
        let roots = roots.to_vec();
        let cancel = self.control.cancel.clone();
        let totals = blocking(move || Ok(walker.measure(&roots, || cancel.is_cancelled()))).await?;
        totals.ok_or(EngineError::Cancelled)
    }

    fn spawn_walk(
        &self,
        roots: Vec<Entry>,
        checkpoint: WalkCheckpoint,
    ) -> mpsc::Receiver<Result<WalkItem, EngineError>> {
        let walker = TreeWalker::new(Arc::clone(&self.ctx.resolver));
        let (tx, rx) = mpsc::channel(WALK_LOOKAHEAD);
        tokio::task::spawn_blocking(move || {
            for item in walker.walk_from(roots, checkpoint) {
                if tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });
        rx
    }

    fn meter(&self) -> ByteMeter {
        ByteMeter {
            snapshot: self.progress.clone(),
            events: self.events.clone(),
            last: Instant::now(),
        }
    }

    fn report_progress(&self) {
        let _ = self
            .events
            .try_send(BatchEvent::Progress(self.progress.clone()));
    }

    fn succeed(&mut self, source: &Path, destination: Option<&Path>, bytes: u64) {
        let action = TaskAction::from(self.request.action);
        self.record(TaskRecord::succeeded(
            source,
            destination.map(Path::to_path_buf),
            action,
            bytes,
        ));
    }

    fn fail(&mut self, source: &Path, destination: Option<&Path>, error: &EngineError) {
        let error = TaskError::from_engine(source, error);
        self.record_status(source, destination, TaskStatus::Failed, Some(error));
    }

    fn skip(&mut self, source: &Path, destination: Option<&Path>) {
        self.record_status(source, destination, TaskStatus::Skipped, None);
    }

    fn halt(&mut self, source: &Path, halt: Halt) {
        if halt == Halt::Aborted {
            info!(batch = %self.id, path = %source.display(), "batch aborted at conflict");
        }
        self.stopped = true;
        self.record_status(source, None, TaskStatus::Cancelled, None);
    }

    /// Record roots the batch never reached as cancelled.
    fn cancel_unreached(&mut self, roots: &[Entry], reached: usize) {
        for root in roots.iter().skip(reached) {
            self.record_status(root.path(), None, TaskStatus::Cancelled, None);
        }
    }

    fn record_status(
        &mut self,
        source: &Path,
        destination: Option<&Path>,
        status: TaskStatus,
        error: Option<TaskError>,
    ) {
        let action = TaskAction::from(self.request.action);
        self.record(TaskRecord::unsuccessful(
            source,
            destination.map(Path::to_path_buf),
            action,
            status,
            error,
        ));
    }

    fn record(&mut self, record: TaskRecord) {
        match &record.error {
            Some(error) if record.status == TaskStatus::Failed => {
                warn!(batch = %self.id, %error, "task failed");
            }
            _ => debug!(
                batch = %self.id,
                source = %record.source.display(),
                status = %record.status,
                "task finished"
            ),
        }
        self.progress.complete_items(1, record.bytes);
        let _ = self.events.try_send(BatchEvent::TaskFinished(record.clone()));
        self.records.push(record);
    }

    fn report(&mut self, state: BatchState, error: Option<TaskError>) -> BatchReport {
        BatchReport {
            id: self.id,
            action: self.request.action,
            state,
            records: std::mem::take(&mut self.records),
            bytes_done: self.progress.bytes_done,
            error,
            trashed: std::mem::take(&mut self.trashed),
            checkpoint: WalkCheckpoint::new(self.position),
        }
    }
}

/// Run a blocking primitive off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, EngineError>
where
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap_or_else(|e| {
        Err(EngineError::io(
            PathBuf::new(),
            std::io::Error::other(format!("blocking task failed: {}", e)),
        ))
    })
}

fn preflight(destination: &Location, required: u64) -> Result<(), EngineError> {
    match available_space(destination.path()) {
        Some(available) if available < required => Err(EngineError::InsufficientSpace {
            path: destination.path().to_path_buf(),
            required,
            available,
        }),
        _ => Ok(()),
    }
}

/// A regular file of the same size already sits at `target`.
fn is_already_copied(entry: &Entry, target: &Path) -> bool {
    entry.kind.is_file()
        && fs::symlink_metadata(target).is_ok_and(|m| m.is_file() && m.len() == entry.size)
}
