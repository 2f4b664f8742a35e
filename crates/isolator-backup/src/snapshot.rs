use chrono::{DateTime, Local};
use isolator_common::{AppId, AppInstance, AppStatus, AppType, IsolatorError, Result};
use serde::{Deserialize, Serialize};

/// Second-resolution stamp used in archive names and `config.json`.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// The `config.json` member of an archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub app_id: AppId,
    pub name: String,
    pub description: Option<String>,
    pub app_type: AppType,
    pub status: AppStatus,
    pub container_id: Option<String>,
    pub port: Option<u16>,
    pub memory_limit: u32,
    pub cpu_limit: f64,
    /// Configuration blob, carried as opaque text.
    pub config: Option<String>,
    pub backup_date: String,
}

impl ConfigSnapshot {
    pub fn capture(app: &AppInstance, backup_date: impl Into<String>) -> Self {
        Self {
            app_id: app.id,
            name: app.name.clone(),
            description: app.description.clone(),
            app_type: app.app_type.clone(),
            status: app.status,
            container_id: app.container_id.clone(),
            port: app.port,
            memory_limit: app.memory_limit,
            cpu_limit: app.cpu_limit,
            config: app.config.clone(),
            backup_date: backup_date.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| IsolatorError::Internal(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| IsolatorError::ConfigParse(e.to_string()))
    }

    /// Overwrite the fields a restore carries back onto the instance.
    pub fn apply_to(&self, app: &mut AppInstance) {
        app.name = self.name.clone();
        app.description = self.description.clone();
        app.config = self.config.clone();
    }
}
