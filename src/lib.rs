#![forbid(unsafe_code)]
//! Git-backed JSON document store for PDM application metadata.
//!
//! A [`DocumentStore`] owns one working clone. Reads pull first and fall back
//! to the local copy when the remote is unreachable; writes become attributed
//! commits that only count once the remote accepts the push. [`History`] serves
//! file content at any past commit, including LFS-tracked blobs.

pub mod config;
pub mod docs;
pub mod error;
pub mod git;
pub mod history;
pub mod identity;
pub mod paths;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use error::{Effect, Error, ErrorKind, Transience};
pub use history::{History, HistoryEntry};
pub use identity::{Actor, ActorId};
pub use store::{CommitInfo, DocumentStore, Mapping, Snapshot, StoreOptions, WriteOutcome};

pub type Result<T> = std::result::Result<T, Error>;
