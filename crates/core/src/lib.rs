//! git-notifier core library.
//!
//! Tracks the branch heads, annotated tags and reachable revisions of a git
//! repository across runs and mails a notification for everything new since
//! the last recorded snapshot: configuration, the persisted snapshot, the
//! `git` client, reconciliation, diff rendering and delivery.

pub mod config;
pub mod diff;
pub mod errors;
pub mod notify;
pub mod reconcile;
pub mod runner;
pub mod snapshot;
pub mod users;
pub mod vcs;

// Re-exports for convenience.
pub use config::{ConfigLayer, Environment, NotifierConfig};
pub use errors::CoreError;
pub use reconcile::ReconciliationEngine;
pub use runner::{NotifierRun, RunOutcome, RunReport};
pub use snapshot::{Snapshot, SnapshotStore};
pub use vcs::{GitCli, Vcs};
