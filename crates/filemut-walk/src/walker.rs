//! JWalk-based lazy tree walker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use jwalk::{Parallelism, WalkDir};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use filemut_core::{EngineError, Entry, Location, PathResolver};

use crate::totals::WalkTotals;
use crate::visited::VisitedDirs;

type JwalkIter = Box<dyn Iterator<Item = jwalk::Result<jwalk::DirEntry<((), ())>>> + Send>;

/// Position in a walk, as a count of items already yielded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkCheckpoint {
    pub position: u64,
}

impl WalkCheckpoint {
    /// Checkpoint after `position` items.
    pub fn new(position: u64) -> Self {
        Self { position }
    }
}

/// One discovered entry together with where it sits relative to its root.
#[derive(Debug, Clone)]
pub struct WalkItem {
    /// Fresh metadata snapshot.
    pub entry: Entry,
    /// Index of the root this entry was found under.
    pub root: usize,
    /// Path relative to the root (empty for the root itself).
    pub relative: PathBuf,
    /// Depth below the root (0 for the root itself).
    pub depth: usize,
}

impl WalkItem {
    /// Whether this item is one of the walk's roots.
    pub fn is_root(&self) -> bool {
        self.depth == 0
    }
}

/// Produces depth-first walks over a set of root entries.
///
/// Children are visited in file-name order, so walking the same roots over an
/// unchanged filesystem always yields the same sequence. Symlinks are emitted
/// as entries and never descended into.
#[derive(Debug, Clone)]
pub struct TreeWalker {
    resolver: Arc<PathResolver>,
}

impl TreeWalker {
    /// Create a walker that assigns volumes through `resolver`.
    pub fn new(resolver: Arc<PathResolver>) -> Self {
        Self { resolver }
    }

    /// Start a walk from the beginning.
    pub fn walk(&self, roots: Vec<Entry>) -> Walk {
        self.walk_from(roots, WalkCheckpoint::default())
    }

    /// Start a walk that skips the first `checkpoint.position` items.
    pub fn walk_from(&self, roots: Vec<Entry>, checkpoint: WalkCheckpoint) -> Walk {
        Walk {
            resolver: Arc::clone(&self.resolver),
            roots,
            next_root: 0,
            current: None,
            visited: Arc::new(VisitedDirs::new()),
            position: 0,
            skip_until: checkpoint.position,
        }
    }

    /// Count items and bytes under each root.
    ///
    /// Returns `None` if `should_stop` asked to abandon the count.
    pub fn measure(
        &self,
        roots: &[Entry],
        should_stop: impl Fn() -> bool,
    ) -> Option<Vec<WalkTotals>> {
        let mut totals = vec![WalkTotals::new(); roots.len()];
        for item in self.walk(roots.to_vec()) {
            if should_stop() {
                return None;
            }
            if let Ok(item) = item {
                totals[item.root].record(&item.entry);
            }
        }
        Some(totals)
    }
}

/// A lazy walk in progress.
pub struct Walk {
    resolver: Arc<PathResolver>,
    roots: Vec<Entry>,
    next_root: usize,
    current: Option<(usize, JwalkIter)>,
    visited: Arc<VisitedDirs>,
    position: u64,
    skip_until: u64,
}

impl Walk {
    /// Checkpoint that restarts the walk right after the last yielded item.
    pub fn checkpoint(&self) -> WalkCheckpoint {
        WalkCheckpoint::new(self.position)
    }

    /// The roots this walk was started with.
    pub fn roots(&self) -> &[Entry] {
        &self.roots
    }

    fn next_raw(&mut self) -> Option<Result<WalkItem, EngineError>> {
        loop {
            if let Some((root_index, iter)) = self.current.as_mut() {
                let root_index = *root_index;
                match iter.next() {
                    Some(result) => return Some(self.convert(root_index, result)),
                    None => self.current = None,
                }
            }

            let root_index = self.next_root;
            let root = self.roots.get(root_index)?.clone();
            self.next_root += 1;

            if root.kind.is_dir() {
                self.current = Some((root_index, self.descend(root.path())));
            }

            return Some(Ok(WalkItem {
                entry: root,
                root: root_index,
                relative: PathBuf::new(),
                depth: 0,
            }));
        }
    }

    fn descend(&self, root: &Path) -> JwalkIter {
        if let Ok(meta) = std::fs::symlink_metadata(root) {
            self.visited.enter(&meta);
        }

        let visited = Arc::clone(&self.visited);
        let walker = WalkDir::new(root)
            .parallelism(Parallelism::Serial)
            .follow_links(false)
            .skip_hidden(false)
            .sort(true)
            .min_depth(1)
            .process_read_dir(move |_depth, _path, _state, children| {
                for child in children.iter_mut().flatten() {
                    if !child.file_type().is_dir() {
                        continue;
                    }
                    let Ok(meta) = std::fs::symlink_metadata(child.path()) else {
                        continue;
                    };
                    if !visited.enter(&meta) {
                        debug!(path = %child.path().display(), "directory already visited, not descending");
                        child.read_children_path = None;
                    }
                }
            });

        Box::new(walker.into_iter())
    }

    fn convert(
        &self,
        root_index: usize,
        result: jwalk::Result<jwalk::DirEntry<((), ())>>,
    ) -> Result<WalkItem, EngineError> {
        let root_path = self.roots[root_index].path();
        let dir_entry = result.map_err(|err| {
            let path = err
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root_path.to_path_buf());
            let kind = err
                .io_error()
                .map(|e| e.kind())
                .unwrap_or(std::io::ErrorKind::Other);
            EngineError::io(path, std::io::Error::new(kind, err.to_string()))
        })?;

        let path = dir_entry.path();
        let metadata = std::fs::symlink_metadata(&path).map_err(|e| EngineError::io(&path, e))?;
        let volume = self.resolver.volume_from_metadata(&path, &metadata);
        let relative = path
            .strip_prefix(root_path)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(dir_entry.file_name()));

        trace!(path = %path.display(), depth = dir_entry.depth(), "walked");

        Ok(WalkItem {
            entry: Entry::from_metadata(Location::new(&path, volume), &metadata),
            root: root_index,
            relative,
            depth: dir_entry.depth(),
        })
    }
}

impl Iterator for Walk {
    type Item = Result<WalkItem, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = self.next_raw()?;
            self.position += 1;
            if self.position > self.skip_until {
                return Some(item);
            }
        }
    }
}
