//! Core types for filemut.
//!
//! This crate provides the fundamental data structures shared by the walker
//! and the operations engine: normalized locations, entry snapshots, the
//! path resolver, the error taxonomy and engine configuration.

mod config;
mod entry;
mod error;
mod location;
mod resolver;

pub use config::{EngineConfig, EngineConfigBuilder, default_trash_dir};
pub use entry::{Entry, EntryKind, permission_bits};
pub use error::{CollisionKind, EngineError, ErrorKind, PlanCollision};
pub use location::{Location, VolumeId, normalize};
pub use resolver::{Classification, LocationKind, PathResolver, Relationship, available_space};
