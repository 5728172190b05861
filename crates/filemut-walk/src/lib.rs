//! Lazy, restartable tree walking for filemut.
//!
//! # Overview
//!
//! `filemut-walk` expands a batch's source entries into the ordered sequence of
//! entries the operations engine works through. Key properties:
//!
//! - **Depth-first, name-ordered** traversal via jwalk, so a parent directory
//!   is always yielded before its contents
//! - **Symlinks are entries**, never descended into
//! - **Loop guard** on directory identity for bind-mount cycles
//! - **Restartable** from a [`WalkCheckpoint`]
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use filemut_core::PathResolver;
//! use filemut_walk::TreeWalker;
//!
//! let resolver = Arc::new(PathResolver::new());
//! let walker = TreeWalker::new(Arc::clone(&resolver));
//! let root = resolver.entry("/path/to/tree").unwrap();
//!
//! for item in walker.walk(vec![root]) {
//!     let item = item.unwrap();
//!     println!("{}", item.relative.display());
//! }
//! ```

mod totals;
mod visited;
mod walker;

pub use totals::WalkTotals;
pub use visited::VisitedDirs;
pub use walker::{TreeWalker, Walk, WalkCheckpoint, WalkItem};
