use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub type AppId = i64;
pub type BackupId = i64;

pub const DEFAULT_MEMORY_LIMIT_MB: u32 = 512;
pub const DEFAULT_CPU_LIMIT: f64 = 1.0;

/// Advisory lifecycle status. Reflects the intent of the last lifecycle
/// operation, not a live reading from the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    #[default]
    Inactive,
    Active,
    Error,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Inactive => "inactive",
            AppStatus::Active => "active",
            AppStatus::Error => "error",
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application type tag. The set is open: unknown tags are carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AppType {
    Web,
    Desktop,
    Server,
    Other(String),
}

impl AppType {
    pub fn as_str(&self) -> &str {
        match self {
            AppType::Web => "web",
            AppType::Desktop => "desktop",
            AppType::Server => "server",
            AppType::Other(tag) => tag,
        }
    }
}

impl From<&str> for AppType {
    fn from(tag: &str) -> Self {
        match tag {
            "web" => AppType::Web,
            "desktop" => AppType::Desktop,
            "server" => AppType::Server,
            other => AppType::Other(other.to_string()),
        }
    }
}

impl From<String> for AppType {
    fn from(tag: String) -> Self {
        AppType::from(tag.as_str())
    }
}

impl From<AppType> for String {
    fn from(app_type: AppType) -> Self {
        app_type.as_str().to_string()
    }
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One managed application's isolated runtime unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppInstance {
    pub id: AppId,
    pub name: String,
    pub description: Option<String>,
    pub app_type: AppType,
    pub status: AppStatus,
    /// Runtime reference; `None` until first provisioned.
    pub container_id: Option<String>,
    pub port: Option<u16>,
    /// Memory limit in MB.
    pub memory_limit: u32,
    /// CPU limit in cores.
    pub cpu_limit: f64,
    pub volume_path: Option<PathBuf>,
    /// Type-specific configuration, stored as JSON text.
    pub config: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppInstance {
    pub fn is_provisioned(&self) -> bool {
        self.container_id.is_some()
    }
}

/// Fields accepted when creating an application record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewApp {
    pub name: String,
    pub description: Option<String>,
    pub app_type: AppType,
    pub memory_limit: u32,
    pub cpu_limit: f64,
    pub config: Option<String>,
}

impl NewApp {
    pub fn new(name: impl Into<String>, app_type: impl Into<AppType>) -> Self {
        Self {
            name: name.into(),
            description: None,
            app_type: app_type.into(),
            memory_limit: DEFAULT_MEMORY_LIMIT_MB,
            cpu_limit: DEFAULT_CPU_LIMIT,
            config: None,
        }
    }
}

/// What a provisioning call hands back to the caller for persisting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provisioned {
    pub container_id: String,
    pub port: Option<u16>,
    pub volume_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Full,
    Data,
    Config,
    PreRestore,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Data => "data",
            BackupKind::Config => "config",
            BackupKind::PreRestore => "pre_restore",
        }
    }

    /// Whether the archive captures the volume tree under `data/`.
    pub fn includes_data(&self) -> bool {
        matches!(
            self,
            BackupKind::Full | BackupKind::Data | BackupKind::PreRestore
        )
    }

    /// Whether the archive carries a `config.json` snapshot.
    pub fn includes_config(&self) -> bool {
        matches!(
            self,
            BackupKind::Full | BackupKind::Config | BackupKind::PreRestore
        )
    }

    /// Whether restoring this kind rewrites the application's name,
    /// description and configuration.
    pub fn restores_config(&self) -> bool {
        matches!(self, BackupKind::Full | BackupKind::Config)
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    #[default]
    Complete,
    Failed,
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: BackupId,
    pub app_id: AppId,
    pub filename: String,
    pub size: u64,
    pub kind: BackupKind,
    pub status: BackupStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBackup {
    pub app_id: AppId,
    pub filename: String,
    pub size: u64,
    pub kind: BackupKind,
    pub status: BackupStatus,
    pub notes: Option<String>,
}
