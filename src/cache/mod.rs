//! Versioned response cache for offline support.
//!
//! This module provides the tiered cache the worker serves from:
//! - A static tier pre-warmed with the app shell at install time
//! - A dynamic tier filled with successful runtime responses
//! - Tier names embedding the deployment version, so stale tiers from older
//!   versions can be purged on activation

mod store;
mod storage;
mod version;

pub use store::CacheStore;
pub use storage::{SqliteStorage, TierStorage};
pub use version::{CacheVersion, TierNames};
