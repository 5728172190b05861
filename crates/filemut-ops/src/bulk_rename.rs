//! Template-driven bulk renaming.
//!
//! A [`RenamePlan`] is computed and checked in full before anything on disk
//! changes. Execution then renames entry by entry. Aborting stops further
//! renames but does not undo completed ones; the report says exactly which
//! entries now have which names.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use compact_str::CompactString;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use filemut_core::{CollisionKind, EngineError, Entry, Location, PathResolver, PlanCollision};

use crate::events::ChangeSink;
use crate::operation::{TaskAction, TaskError, TaskRecord, TaskStatus, TransferTask};
use crate::rename::{rename_entry, validate_filename};
use crate::template::{DigitSet, RenameTemplate, digit_count};

static NEXT_TEMP: AtomicU64 = AtomicU64::new(0);

/// How the counter is rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameOptions {
    /// Number given to the first entry.
    pub start: u64,
    /// Pad every number to the width of the largest one.
    pub zero_pad: bool,
    /// Digit glyphs.
    pub digits: DigitSet,
    /// Keep each file's extension after the rendered name.
    pub keep_extension: bool,
}

impl Default for RenameOptions {
    fn default() -> Self {
        Self {
            start: 1,
            zero_pad: false,
            digits: DigitSet::Latin,
            keep_extension: true,
        }
    }
}

/// One planned rename.
#[derive(Debug, Clone)]
pub struct RenameStep {
    pub entry: Entry,
    pub new_name: CompactString,
    pub destination: Location,
}

impl RenameStep {
    /// The step as a transfer task.
    pub fn task(&self) -> TransferTask {
        TransferTask::new(
            self.entry.clone(),
            Some(self.destination.clone()),
            TaskAction::Rename {
                new_name: self.new_name.clone(),
            },
        )
    }
}

/// Validated mapping from selected entries to their new names, in selection
/// order. Entries whose name would not change are left out.
#[derive(Debug, Clone)]
pub struct RenamePlan {
    template: RenameTemplate,
    steps: IndexMap<PathBuf, RenameStep>,
}

impl RenamePlan {
    /// The template the plan was computed from.
    pub fn template(&self) -> &RenameTemplate {
        &self.template
    }

    /// Planned steps in order.
    pub fn steps(&self) -> impl Iterator<Item = &RenameStep> {
        self.steps.values()
    }

    /// Step for a source path.
    pub fn get(&self, source: &Path) -> Option<&RenameStep> {
        self.steps.get(source)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Outcome of executing a plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenameReport {
    /// One record per planned step, in the order they finished.
    pub records: Vec<TaskRecord>,
    /// Execution stopped early on request.
    pub aborted: bool,
}

impl RenameReport {
    /// `(old, new)` for every entry whose name changed.
    pub fn renamed(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.records
            .iter()
            .filter(|r| r.status == TaskStatus::Succeeded)
            .filter_map(|r| Some((r.source.as_path(), r.destination.as_deref()?)))
    }

    /// Errors of the steps that failed.
    pub fn failed(&self) -> impl Iterator<Item = &TaskError> {
        self.records
            .iter()
            .filter(|r| r.status == TaskStatus::Failed)
            .filter_map(|r| r.error.as_ref())
    }

    /// Sources left untouched because of an abort.
    pub fn not_attempted(&self) -> impl Iterator<Item = &Path> {
        self.records
            .iter()
            .filter(|r| r.status == TaskStatus::Cancelled)
            .map(|r| r.source.as_path())
    }

    /// Number of successful renames.
    pub fn succeeded(&self) -> usize {
        self.renamed().count()
    }
}

/// Plans and executes bulk renames.
#[derive(Debug, Clone)]
pub struct BulkRenameEngine {
    resolver: Arc<PathResolver>,
    changes: ChangeSink,
}

impl BulkRenameEngine {
    /// Create an engine publishing renames to `changes`.
    pub fn new(resolver: Arc<PathResolver>, changes: ChangeSink) -> Self {
        Self { resolver, changes }
    }

    /// Capture entries for the given paths and plan their renames.
    pub fn plan_paths(
        &self,
        paths: &[PathBuf],
        template: &str,
        options: &RenameOptions,
    ) -> Result<RenamePlan, EngineError> {
        let entries = paths
            .iter()
            .map(|p| self.resolver.entry(p))
            .collect::<Result<Vec<_>, _>>()?;
        self.plan(entries, template, options)
    }

    /// Compute and validate the full plan. Touches nothing on disk.
    pub fn plan(
        &self,
        entries: Vec<Entry>,
        template: &str,
        options: &RenameOptions,
    ) -> Result<RenamePlan, EngineError> {
        let template = RenameTemplate::parse(template)?;

        let entries: Vec<Entry> = entries
            .into_iter()
            .unique_by(|e| e.path().to_path_buf())
            .collect();
        let count = entries.len() as u64;
        let width = if options.zero_pad && count > 0 {
            digit_count(options.start.saturating_add(count - 1))
        } else {
            0
        };

        let mut targets: IndexMap<PathBuf, (Entry, CompactString, Location)> = IndexMap::new();
        let mut conflicts = Vec::new();
        let mut claimed: IndexMap<PathBuf, PathBuf> = IndexMap::new();

        for (index, entry) in entries.into_iter().enumerate() {
            let number = options.start.saturating_add(index as u64);
            let mut name = template.render(number, width, options.digits);
            if options.keep_extension && !entry.kind.is_dir() {
                if let Some(ext) = entry.path().extension() {
                    name.push('.');
                    name.push_str(&ext.to_string_lossy());
                }
            }
            validate_filename(&name)?;

            let destination = entry.location.with_file_name(name.as_str());
            if let Some(first) = claimed.get(destination.path()) {
                conflicts.push(PlanCollision {
                    source: entry.path().to_path_buf(),
                    other: first.clone(),
                    destination: destination.path().to_path_buf(),
                    kind: CollisionKind::WithinPlan,
                });
            } else {
                claimed.insert(destination.path().to_path_buf(), entry.path().to_path_buf());
            }
            targets.insert(entry.path().to_path_buf(), (entry, name, destination));
        }

        for (source, (_, _, destination)) in &targets {
            if destination.path() == source.as_path() || targets.contains_key(destination.path()) {
                continue;
            }
            if std::fs::symlink_metadata(destination.path()).is_ok() {
                conflicts.push(PlanCollision {
                    source: source.clone(),
                    other: destination.path().to_path_buf(),
                    destination: destination.path().to_path_buf(),
                    kind: CollisionKind::ExistingEntry,
                });
            }
        }

        if !conflicts.is_empty() {
            warn!(count = conflicts.len(), template = %template, "rename plan has conflicts");
            return Err(EngineError::PlanConflict { conflicts });
        }

        let steps = targets
            .into_iter()
            .filter(|(source, (_, _, destination))| destination.path() != source.as_path())
            .map(|(source, (entry, new_name, destination))| {
                (
                    source,
                    RenameStep {
                        entry,
                        new_name,
                        destination,
                    },
                )
            })
            .collect();

        Ok(RenamePlan { template, steps })
    }

    /// Execute a plan on a blocking worker thread.
    pub async fn execute(
        &self,
        plan: RenamePlan,
        abort: CancellationToken,
    ) -> Result<RenameReport, EngineError> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.execute_blocking(plan, &abort))
            .await
            .map_err(|e| {
                EngineError::io(
                    PathBuf::new(),
                    std::io::Error::other(format!("rename worker failed: {}", e)),
                )
            })
    }

    /// Execute a plan on the current thread.
    ///
    /// Steps run in plan order, except that a step whose destination is still
    /// held by another pending step waits for it. When only waiting steps are
    /// left they form a cycle, which is broken by moving one entry to a
    /// temporary name first.
    pub fn execute_blocking(&self, plan: RenamePlan, abort: &CancellationToken) -> RenameReport {
        let mut report = RenameReport::default();
        let pending: Vec<Option<Pending>> = plan
            .steps
            .into_values()
            .map(|step| {
                Some(Pending {
                    original: step.entry.path().to_path_buf(),
                    current: step.entry.clone(),
                    step,
                })
            })
            .collect();
        let holders = pending
            .iter()
            .enumerate()
            .filter_map(|(index, item)| item.as_ref().map(|p| (p.original.clone(), index)))
            .collect();
        let mut run = Run {
            pending,
            holders,
            waiters: HashMap::new(),
        };

        info!(template = %plan.template, steps = run.pending.len(), "bulk rename started");

        for index in 0..run.pending.len() {
            if report.aborted {
                break;
            }
            self.attempt(index, &mut run, abort, &mut report);
        }

        // Whatever is left waits in cycles.
        let mut cursor = 0;
        while !report.aborted {
            while cursor < run.pending.len() && run.pending[cursor].is_none() {
                cursor += 1;
            }
            if cursor == run.pending.len() {
                break;
            }
            if abort.is_cancelled() {
                report.aborted = true;
                break;
            }
            self.park(cursor, &mut run, &mut report);
            if let Some(waiter) = run.waiters.remove(&cursor) {
                self.attempt(waiter, &mut run, abort, &mut report);
            }
        }

        for item in run.pending.into_iter().flatten() {
            report.records.push(if item.current.path() == item.original {
                TaskRecord::unsuccessful(
                    &item.original,
                    Some(item.step.destination.path().to_path_buf()),
                    rename_action(&item.step),
                    TaskStatus::Cancelled,
                    None,
                )
            } else {
                // Parked under a temporary name when the abort came.
                TaskRecord::succeeded(
                    &item.original,
                    Some(item.current.path().to_path_buf()),
                    TaskAction::Rename {
                        new_name: file_name(item.current.path()),
                    },
                    0,
                )
            });
        }

        info!(
            renamed = report.succeeded(),
            failed = report.failed().count(),
            aborted = report.aborted,
            "bulk rename finished"
        );
        report
    }

    /// Rename the step at `index` unless its destination is still held, then
    /// follow the chain of steps that were waiting on the freed name.
    fn attempt(
        &self,
        index: usize,
        run: &mut Run,
        abort: &CancellationToken,
        report: &mut RenameReport,
    ) {
        let mut next = Some(index);
        while let Some(index) = next {
            let Some(item) = run.pending[index].as_ref() else {
                return;
            };
            if let Some(&holder) = run.holders.get(item.step.destination.path()) {
                if holder != index {
                    run.waiters.insert(holder, index);
                    return;
                }
            }
            if abort.is_cancelled() {
                report.aborted = true;
                return;
            }
            let Some(item) = run.pending[index].take() else {
                return;
            };
            run.holders.remove(item.current.path());
            report.records.push(self.finish(item));
            next = run.waiters.remove(&index);
        }
    }

    /// Move the step at `index` out of the way under a temporary name.
    fn park(&self, index: usize, run: &mut Run, report: &mut RenameReport) {
        let Some(item) = run.pending[index].as_mut() else {
            return;
        };
        let temp_name = format!(
            ".filemut-rename-{}-{}",
            std::process::id(),
            NEXT_TEMP.fetch_add(1, Ordering::Relaxed)
        );
        match rename_entry(&item.current, &temp_name) {
            Ok(location) => {
                debug!(from = %item.current.path().display(), to = %location.path().display(), "breaking rename cycle");
                self.changes.renamed(item.current.path(), location.path());
                run.holders.remove(item.current.path());
                run.holders.insert(location.path().to_path_buf(), index);
                item.current.location = location;
            }
            Err(e) => {
                run.holders.remove(item.current.path());
                report.records.push(failed_record(item, &e));
                run.pending[index] = None;
            }
        }
    }

    fn finish(&self, item: Pending) -> TaskRecord {
        match rename_entry(&item.current, &item.step.new_name) {
            Ok(location) => {
                self.changes.renamed(item.current.path(), location.path());
                TaskRecord::succeeded(
                    &item.original,
                    Some(location.into_path()),
                    rename_action(&item.step),
                    0,
                )
            }
            Err(e) => {
                warn!(path = %item.current.path().display(), error = %e, "rename failed");
                failed_record(&item, &e)
            }
        }
    }
}

/// Execution state: steps not yet done, who holds each name, and which
/// step waits for a holder to let go.
struct Run {
    pending: Vec<Option<Pending>>,
    holders: HashMap<PathBuf, usize>,
    waiters: HashMap<usize, usize>,
}

struct Pending {
    step: RenameStep,
    original: PathBuf,
    current: Entry,
}

fn rename_action(step: &RenameStep) -> TaskAction {
    TaskAction::Rename {
        new_name: step.new_name.clone(),
    }
}

fn failed_record(item: &Pending, error: &EngineError) -> TaskRecord {
    TaskRecord::unsuccessful(
        &item.original,
        Some(item.step.destination.path().to_path_buf()),
        rename_action(&item.step),
        TaskStatus::Failed,
        Some(TaskError::from_engine(item.current.path(), error)),
    )
}

fn file_name(path: &Path) -> CompactString {
    path.file_name()
        .map(|n| CompactString::from(n.to_string_lossy()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn engine() -> BulkRenameEngine {
        BulkRenameEngine::new(Arc::new(PathResolver::new()), ChangeSink::new())
    }

    fn names(plan: &RenamePlan) -> Vec<String> {
        plan.steps().map(|s| s.new_name.to_string()).collect()
    }

    fn files(temp: &TempDir, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|n| {
                let path = temp.path().join(n);
                fs::write(&path, n).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_padding_width_follows_largest_number() {
        let temp = TempDir::new().unwrap();
        let paths = files(&temp, &["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"]);
        let engine = engine();

        let padded = RenameOptions {
            zero_pad: true,
            ..Default::default()
        };
        let plan = engine.plan_paths(&paths, "Name#", &padded).unwrap();
        let expected: Vec<String> = (1..=10).map(|n| format!("Name{:02}", n)).collect();
        assert_eq!(names(&plan), expected);

        let plan = engine.plan_paths(&paths, "Name#", &RenameOptions::default()).unwrap();
        let expected: Vec<String> = (1..=10).map(|n| format!("Name{}", n)).collect();
        assert_eq!(names(&plan), expected);
    }

    #[test]
    fn test_extension_kept_for_files_only() {
        let temp = TempDir::new().unwrap();
        let mut paths = files(&temp, &["photo.jpg"]);
        fs::create_dir(temp.path().join("album.d")).unwrap();
        paths.push(temp.path().join("album.d"));

        let plan = engine().plan_paths(&paths, "Pic#", &RenameOptions::default()).unwrap();
        assert_eq!(names(&plan), vec!["Pic1.jpg", "Pic2"]);
    }

    #[test]
    fn test_collision_with_unselected_entry() {
        let temp = TempDir::new().unwrap();
        let paths = files(&temp, &["a", "b"]);
        fs::write(temp.path().join("Name2"), "other").unwrap();

        let err = engine()
            .plan_paths(&paths, "Name#", &RenameOptions::default())
            .unwrap_err();
        let EngineError::PlanConflict { conflicts } = err else {
            panic!("expected a plan conflict");
        };
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, CollisionKind::ExistingEntry);
        assert_eq!(conflicts[0].source, temp.path().join("b"));
        assert_eq!(fs::read_to_string(temp.path().join("a")).unwrap(), "a");
    }

    #[test]
    fn test_collision_within_plan() {
        let temp = TempDir::new().unwrap();
        let paths = files(&temp, &["x.txt", "y.txt"]);

        let options = RenameOptions {
            start: 1,
            ..Default::default()
        };
        // Escaped counter renders the same literal for both.
        let err = engine().plan_paths(&paths, r"Same\#", &options).unwrap_err();
        assert!(matches!(err, EngineError::TemplateInvalid { .. }));

        let entries: Vec<Entry> = paths
            .iter()
            .map(|p| PathResolver::new().entry(p).unwrap())
            .collect();
        let start_at_max = RenameOptions {
            start: u64::MAX,
            ..Default::default()
        };
        let err = engine().plan(entries, "n#", &start_at_max).unwrap_err();
        let EngineError::PlanConflict { conflicts } = err else {
            panic!("expected a plan conflict");
        };
        assert_eq!(conflicts[0].kind, CollisionKind::WithinPlan);
    }

    #[test]
    fn test_execute_renames_in_order() {
        let temp = TempDir::new().unwrap();
        let paths = files(&temp, &["b.txt", "a.txt"]);
        let engine = engine();

        let plan = engine.plan_paths(&paths, "Doc#", &RenameOptions::default()).unwrap();
        let report = engine.execute_blocking(plan, &CancellationToken::new());

        assert_eq!(report.succeeded(), 2);
        assert_eq!(fs::read_to_string(temp.path().join("Doc1.txt")).unwrap(), "b.txt");
        assert_eq!(fs::read_to_string(temp.path().join("Doc2.txt")).unwrap(), "a.txt");
    }

    #[test]
    fn test_chain_and_cycle() {
        let temp = TempDir::new().unwrap();
        // 1 -> 2 and 2 -> 1 is a swap; 3 stays.
        let paths = files(&temp, &["2", "1", "3"]);
        let engine = engine();

        let plan = engine.plan_paths(&paths, "#", &RenameOptions::default()).unwrap();
        assert_eq!(plan.len(), 2);
        let report = engine.execute_blocking(plan, &CancellationToken::new());

        assert_eq!(report.succeeded(), 2);
        assert_eq!(fs::read_to_string(temp.path().join("1")).unwrap(), "2");
        assert_eq!(fs::read_to_string(temp.path().join("2")).unwrap(), "1");
        assert_eq!(fs::read_to_string(temp.path().join("3")).unwrap(), "3");
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 3);
    }

    #[test]
    fn test_long_shift_chain_runs_in_linear_passes() {
        let temp = TempDir::new().unwrap();
        let names: Vec<String> = (1..=2000).map(|n| n.to_string()).collect();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let paths = files(&temp, &name_refs);
        let engine = engine();

        let options = RenameOptions {
            start: 2,
            ..Default::default()
        };
        let plan = engine.plan_paths(&paths, "#", &options).unwrap();
        assert_eq!(plan.len(), 2000);

        let started = std::time::Instant::now();
        let report = engine.execute_blocking(plan, &CancellationToken::new());
        assert!(started.elapsed() < std::time::Duration::from_secs(20));

        assert_eq!(report.succeeded(), 2000);
        assert_eq!(report.failed().count(), 0);
        assert!(!temp.path().join("1").exists());
        for n in [2u32, 500, 1999, 2001] {
            let content = fs::read_to_string(temp.path().join(n.to_string())).unwrap();
            assert_eq!(content, (n - 1).to_string());
        }
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 2000);
    }

    #[test]
    fn test_abort_keeps_completed_renames() {
        let temp = TempDir::new().unwrap();
        let paths = files(&temp, &["a", "b", "c"]);
        let engine = engine();
        let plan = engine.plan_paths(&paths, "N#", &RenameOptions::default()).unwrap();

        let abort = CancellationToken::new();
        abort.cancel();
        let report = engine.execute_blocking(plan, &abort);

        assert!(report.aborted);
        assert_eq!(report.succeeded(), 0);
        assert_eq!(report.not_attempted().count(), 3);
        assert!(temp.path().join("a").exists());
    }

    #[test]
    fn test_vanished_entry_fails_alone() {
        let temp = TempDir::new().unwrap();
        let paths = files(&temp, &["a", "b"]);
        let engine = engine();
        let plan = engine.plan_paths(&paths, "N#", &RenameOptions::default()).unwrap();
        fs::remove_file(&paths[0]).unwrap();

        let report = engine.execute_blocking(plan, &CancellationToken::new());
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.succeeded(), 1);
        assert!(temp.path().join("N2").exists());
    }
}
