//! Local cache of GitHub issues, pull requests and repositories.
//!
//! Saved searches and repositories are synced into an embedded SQLite store
//! by [`sync::SyncEngine`]. [`cache::CacheManager`] schedules those syncs and
//! [`cache::CacheDataManager`] serves stored data while keeping it fresh.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod github;
pub mod logging;
pub mod store;
pub mod sync;

#[cfg(test)]
pub mod testing;
