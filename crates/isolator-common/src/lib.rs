// Re-export dependencies used in public interfaces of common types

use std::path::PathBuf;

pub use chrono;
pub use serde::{Deserialize, Serialize};
use thiserror::Error;

mod config;
mod locks;
mod model;

pub use config::IsolatorConfig;
pub use locks::InstanceLocks;
pub use model::*;

#[derive(Error, Debug)]
pub enum IsolatorError {
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container runtime rejected request: {0}")]
    Runtime(String),

    #[error("Volume missing: {}", .0.display())]
    VolumeMissing(PathBuf),

    #[error("Archive I/O failed ({context}): {source}")]
    ArchiveIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration blob could not be parsed: {0}")]
    ConfigParse(String),

    #[error("{kind} {id} not found")]
    RecordNotFound { kind: &'static str, id: i64 },

    #[error("Application {0} has no container")]
    NotProvisioned(AppId),

    #[error("Restore left the volume incomplete (pre-restore backup: {pre_restore_backup_id:?}): {source}")]
    RestoreIncomplete {
        pre_restore_backup_id: Option<BackupId>,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl IsolatorError {
    pub fn archive_io(context: impl Into<String>, source: std::io::Error) -> Self {
        IsolatorError::ArchiveIo {
            context: context.into(),
            source,
        }
    }

    pub fn app_not_found(id: AppId) -> Self {
        IsolatorError::RecordNotFound {
            kind: "Application",
            id,
        }
    }

    pub fn backup_not_found(id: BackupId) -> Self {
        IsolatorError::RecordNotFound { kind: "Backup", id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            IsolatorError::RecordNotFound { .. } | IsolatorError::ContainerNotFound(_)
        )
    }
}

// Define the primary Result type for isolator operations
pub type Result<T> = std::result::Result<T, IsolatorError>;
