//! Service layer
//!
//! Business logic the web handlers and the binary delegate to.

pub mod persistence;
pub mod repositories;

pub use persistence::{ConfigPersistence, FileConfigPersistence, MemoryConfigPersistence};
pub use repositories::{RepositoryService, SettingsUpdate, SettingsView, TrackerOverview};
