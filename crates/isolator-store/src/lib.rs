// Isolator Store - repository interface for application and backup records
mod memory;
mod repository;

pub use memory::{InMemoryAppRepository, InMemoryBackupRepository};
pub use repository::{AppRepository, BackupRepository};

pub use isolator_common::{IsolatorError, Result};
