use async_trait::async_trait;
use isolator_common::{AppId, AppInstance, BackupId, BackupRecord, NewApp, NewBackup, Result};

/// Persistence for application instances. Lookups of an absent id fail with
/// `IsolatorError::RecordNotFound`.
#[async_trait]
pub trait AppRepository: Send + Sync {
    async fn get(&self, id: AppId) -> Result<AppInstance>;
    async fn create(&self, app: NewApp) -> Result<AppInstance>;
    async fn save(&self, app: &AppInstance) -> Result<()>;
    async fn delete(&self, id: AppId) -> Result<()>;
    async fn list(&self) -> Result<Vec<AppInstance>>;
}

/// Persistence for backup records.
#[async_trait]
pub trait BackupRepository: Send + Sync {
    async fn get(&self, id: BackupId) -> Result<BackupRecord>;
    async fn create(&self, backup: NewBackup) -> Result<BackupRecord>;
    async fn save(&self, backup: &BackupRecord) -> Result<()>;
    async fn delete(&self, id: BackupId) -> Result<()>;
    /// All backups of one application, newest first.
    async fn list_for_app(&self, app_id: AppId) -> Result<Vec<BackupRecord>>;
}
