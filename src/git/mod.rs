//! Git integration.
//!
//! Provides:
//! - The local clone handle (open-or-clone, bare/detached checks)
//! - The [`Transport`] seam for fetch and push
//! - Pull with rebase
//! - Failure classification and the single-retry attempt machine

pub mod clone;
pub mod error;
pub mod failure;
pub mod pull;
pub mod remote;

pub use clone::{CloneHandle, CloneOptions};
pub use error::{GitError, PushRejected};
pub use failure::{Attempt, AttemptState, FailureClass, OpKind, Resolution, drive};
pub use pull::{PullOutcome, pull_rebase};
pub use remote::{Credentials, Git2Transport, Transport};
