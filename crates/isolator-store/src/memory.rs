use crate::{AppRepository, BackupRepository};
use async_trait::async_trait;
use chrono::Utc;
use isolator_common::{
    AppId, AppInstance, AppStatus, BackupId, BackupRecord, IsolatorError, NewApp, NewBackup,
    Result,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

// In-memory repositories for development/testing
#[derive(Debug, Default)]
pub struct InMemoryAppRepository {
    apps: Arc<RwLock<HashMap<AppId, AppInstance>>>,
    next_id: AtomicI64,
}

impl InMemoryAppRepository {
    pub fn new() -> Self {
        Default::default()
    }
}

#[async_trait]
impl AppRepository for InMemoryAppRepository {
    async fn get(&self, id: AppId) -> Result<AppInstance> {
        self.apps
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| IsolatorError::app_not_found(id))
    }

    async fn create(&self, app: NewApp) -> Result<AppInstance> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let instance = AppInstance {
            id,
            name: app.name,
            description: app.description,
            app_type: app.app_type,
            status: AppStatus::Inactive,
            container_id: None,
            port: None,
            memory_limit: app.memory_limit,
            cpu_limit: app.cpu_limit,
            volume_path: None,
            config: app.config,
            created_at: now,
            updated_at: now,
        };
        self.apps.write().await.insert(id, instance.clone());
        Ok(instance)
    }

    async fn save(&self, app: &AppInstance) -> Result<()> {
        let mut apps = self.apps.write().await;
        let stored = apps
            .get_mut(&app.id)
            .ok_or_else(|| IsolatorError::app_not_found(app.id))?;
        *stored = AppInstance {
            updated_at: Utc::now(),
            ..app.clone()
        };
        Ok(())
    }

    async fn delete(&self, id: AppId) -> Result<()> {
        self.apps
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| IsolatorError::app_not_found(id))
    }

    async fn list(&self) -> Result<Vec<AppInstance>> {
        let mut apps: Vec<_> = self.apps.read().await.values().cloned().collect();
        apps.sort_by_key(|a| a.id);
        Ok(apps)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBackupRepository {
    backups: Arc<RwLock<HashMap<BackupId, BackupRecord>>>,
    next_id: AtomicI64,
}

impl InMemoryBackupRepository {
    pub fn new() -> Self {
        Default::default()
    }

    pub async fn len(&self) -> usize {
        self.backups.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.backups.read().await.is_empty()
    }
}

#[async_trait]
impl BackupRepository for InMemoryBackupRepository {
    async fn get(&self, id: BackupId) -> Result<BackupRecord> {
        self.backups
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| IsolatorError::backup_not_found(id))
    }

    async fn create(&self, backup: NewBackup) -> Result<BackupRecord> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = BackupRecord {
            id,
            app_id: backup.app_id,
            filename: backup.filename,
            size: backup.size,
            kind: backup.kind,
            status: backup.status,
            notes: backup.notes,
            created_at: Utc::now(),
        };
        self.backups.write().await.insert(id, record.clone());
        Ok(record)
    }

    async fn save(&self, backup: &BackupRecord) -> Result<()> {
        let mut backups = self.backups.write().await;
        let stored = backups
            .get_mut(&backup.id)
            .ok_or_else(|| IsolatorError::backup_not_found(backup.id))?;
        *stored = backup.clone();
        Ok(())
    }

    async fn delete(&self, id: BackupId) -> Result<()> {
        self.backups
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| IsolatorError::backup_not_found(id))
    }

    async fn list_for_app(&self, app_id: AppId) -> Result<Vec<BackupRecord>> {
        let mut backups: Vec<_> = self
            .backups
            .read()
            .await
            .values()
            .filter(|b| b.app_id == app_id)
            .cloned()
            .collect();
        // Ids break ties between records created within the same clock tick.
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(backups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolator_common::{BackupKind, BackupStatus};

    #[tokio::test]
    async fn test_ids_are_assigned_sequentially() {
        let repo = InMemoryAppRepository::new();
        let first = repo.create(NewApp::new("one", "web")).await.unwrap();
        let second = repo.create(NewApp::new("two", "server")).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.status, AppStatus::Inactive);
        assert!(first.container_id.is_none());
    }

    #[tokio::test]
    async fn test_backup_save_requires_existing_record() {
        let repo = InMemoryBackupRepository::new();
        let record = repo
            .create(NewBackup {
                app_id: 1,
                filename: "a.tar.gz".to_string(),
                size: 10,
                kind: BackupKind::Data,
                status: BackupStatus::InProgress,
                notes: None,
            })
            .await
            .unwrap();

        let mut updated = record.clone();
        updated.status = BackupStatus::Complete;
        repo.save(&updated).await.unwrap();
        assert_eq!(repo.get(record.id).await.unwrap().status, BackupStatus::Complete);

        repo.delete(record.id).await.unwrap();
        assert!(repo.save(&updated).await.is_err());
        assert!(repo.is_empty().await);
    }
}
