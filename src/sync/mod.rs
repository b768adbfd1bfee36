//! Deferred delivery of submissions that failed while offline.
//!
//! Records survive restarts in the worker database and are replayed, in
//! insertion order, whenever the background sync tag fires.

mod queue;

pub use queue::{DrainReport, PendingSubmission, SyncQueue};
