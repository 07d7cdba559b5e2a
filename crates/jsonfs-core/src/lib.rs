//! # jsonfs-core
//!
//! A tree of files and directories held entirely in memory and persisted as
//! a single JSON snapshot, exposed through ordinary filesystem-call semantics.
//!
//! Key components:
//!
//! - [`NodeStore`] - Owns every node; allocates and reuses identifiers
//! - [`path`] - Segment iteration and path-to-node resolution
//! - [`Tree`] - Create/remove/write/truncate with all-or-nothing semantics
//! - [`snapshot`] - JSON snapshot load and atomic save
//! - [`JsonFs`] - The [`FsOps`] facade mount adapters call
//!
//! ## Design Decisions
//!
//! - **Arena of nodes**: directories hold child identifiers, never
//!   references, so there is no shared ownership to untangle.
//! - **One lock**: the whole tree sits behind a single reader-writer lock.
//!   Reads share it; mutations and snapshot saves hold it exclusively.
//! - **Check before mutate**: every failure is detected before the store is
//!   touched, so errors never leave partial effects.

pub mod config;
mod error;
mod fs;
mod ops;
pub mod path;
pub mod snapshot;
mod store;
mod tree;
mod types;

pub use config::{ConfigError, FsConfig, Limits};
pub use error::{FsError, FsResult, SnapshotError};
pub use fs::JsonFs;
pub use ops::FsOps;
pub use store::NodeStore;
pub use tree::Tree;
pub use types::{
    DIR_PERM, DIR_SIZE, DirEntry, Entry, FILE_PERM, FileAttr, MAX_NODE_ID, Node, NodeBody, NodeId,
    NodeKind, ROOT_ID, TreeStats,
};
