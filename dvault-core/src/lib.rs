//! DVault Core Library
//!
//! Core functionality for DVault including:
//! - Content-addressed blob store (SHA-256)
//! - Tree manifests with structural sharing
//! - Append-only, numbered revision log
//! - Working directories: change detection, checkin and checkout
//!
//! A [`Repository`] is passed explicitly to every [`Workdir`]; there is no
//! process-wide repository state.

pub mod blob_store;
pub mod config;
pub mod error;
mod fs_util;
pub mod manifest;
pub mod object;
pub mod progress;
pub mod repository;
pub mod revision_log;
pub mod workdir;

pub use blob_store::BlobStore;
pub use config::RepositoryConfig;
pub use error::{Error, Result};
pub use manifest::{FileEntry, Node, Tree};
pub use object::ObjectId;
pub use progress::ProgressObserver;
pub use repository::{Repository, VerifyReport};
pub use revision_log::{Revision, RevisionLog, RevisionSummary};
pub use workdir::{Changes, Fingerprint, Workdir, WorkdirMetadata};
