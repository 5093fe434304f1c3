//! Refresh orchestration and the read facade.
//!
//! `CacheManager` decides when the sync engine runs and tells subscribers how
//! each run ended. `CacheDataManager` serves stored data and keeps it fresh.

pub mod data_manager;
pub mod events;
pub mod manager;
pub mod merge;
pub mod periodic;

pub use data_manager::{CacheDataManager, SearchItem};
pub use events::{UpdateEvent, UpdateKind, UpdateSubscription, UpdateTarget};
pub use manager::{CacheManager, CacheState, ManagerOptions, Synchronizer};
pub use merge::merge_sorted_by_key;
pub use periodic::PeriodicTimer;
