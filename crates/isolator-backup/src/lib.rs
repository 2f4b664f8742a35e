//! Backup and restore of application volumes and configuration.

pub mod archive;
pub mod snapshot;

pub use snapshot::ConfigSnapshot;

use chrono::Local;
use isolator_common::{
    AppId, AppInstance, BackupId, BackupKind, BackupRecord, BackupStatus, InstanceLocks,
    IsolatorError, NewBackup, Result,
};
use isolator_store::{AppRepository, BackupRepository};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// A backup that was written and recorded.
#[derive(Debug, Clone)]
pub struct CreatedBackup {
    pub record: BackupRecord,
    pub path: PathBuf,
}

/// Outcome of a successful restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub app_id: AppId,
    pub backup_id: BackupId,
    /// The safety snapshot taken before the volume was touched, if it succeeded.
    pub pre_restore_backup_id: Option<BackupId>,
}

pub struct BackupService {
    apps: Arc<dyn AppRepository>,
    backups: Arc<dyn BackupRepository>,
    backup_dir: PathBuf,
    locks: Arc<InstanceLocks>,
}

impl BackupService {
    pub fn new(
        apps: Arc<dyn AppRepository>,
        backups: Arc<dyn BackupRepository>,
        backup_dir: impl Into<PathBuf>,
        locks: Arc<InstanceLocks>,
    ) -> Self {
        Self {
            apps,
            backups,
            backup_dir: backup_dir.into(),
            locks,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn archive_path(&self, record: &BackupRecord) -> PathBuf {
        self.backup_dir.join(&record.filename)
    }

    #[instrument(skip(self, app, kind, notes), fields(app_id = app.id, kind = %kind))]
    pub async fn create_backup(
        &self,
        app: &AppInstance,
        kind: BackupKind,
        notes: Option<String>,
    ) -> Result<CreatedBackup> {
        let _guard = self.locks.acquire(app.id).await;
        self.create_backup_locked(app, kind, notes).await
    }

    /// Archive and record a backup. The caller holds the instance lock.
    async fn create_backup_locked(
        &self,
        app: &AppInstance,
        kind: BackupKind,
        notes: Option<String>,
    ) -> Result<CreatedBackup> {
        let volume = existing_volume(app)?;
        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|e| IsolatorError::archive_io("creating backup directory", e))?;

        let timestamp = snapshot::format_timestamp(&Local::now());
        let stem = format!(
            "{}_{}_{}_{}",
            file_safe(&app.name),
            app.id,
            kind.as_str(),
            timestamp
        );
        let config_json = if kind.includes_config() {
            Some(ConfigSnapshot::capture(app, &timestamp).to_json()?)
        } else {
            None
        };
        let data = kind.includes_data().then_some(volume);

        let backup_dir = self.backup_dir.clone();
        let (filename, path, size) =
            tokio::task::spawn_blocking(move || -> io::Result<(String, PathBuf, u64)> {
                let (filename, file) = archive::reserve_archive(&backup_dir, &stem)?;
                let path = backup_dir.join(&filename);
                let written = archive::write_archive(
                    file,
                    data.as_deref(),
                    config_json.as_deref(),
                    &backup_dir,
                )
                .and_then(|()| std::fs::metadata(&path));
                match written {
                    Ok(meta) => Ok((filename, path, meta.len())),
                    Err(e) => {
                        discard(&path);
                        Err(e)
                    }
                }
            })
            .await
            .map_err(|e| IsolatorError::Internal(format!("archive task failed: {e}")))?
            .map_err(|e| IsolatorError::archive_io("writing archive", e))?;

        let record = match self
            .backups
            .create(NewBackup {
                app_id: app.id,
                filename,
                size,
                kind,
                status: BackupStatus::Complete,
                notes,
            })
            .await
        {
            Ok(record) => record,
            Err(e) => {
                discard(&path);
                return Err(e);
            }
        };

        info!(backup_id = record.id, filename = %record.filename, size, "Backup created");
        Ok(CreatedBackup { record, path })
    }

    /// Replace an instance's volume contents (and, for `full` and `config`
    /// backups, its name, description and configuration) with a backup.
    ///
    /// A `pre_restore` snapshot is attempted first; its failure is logged and
    /// does not stop the restore. The archive is extracted into a staging
    /// directory beside the volume before the volume is cleared, so an
    /// unreadable archive leaves the volume untouched.
    #[instrument(skip(self))]
    pub async fn restore(&self, backup_id: BackupId) -> Result<RestoreReport> {
        let backup = self.backups.get(backup_id).await?;
        // Read the instance under its lock so the record saved below is current.
        let _guard = self.locks.acquire(backup.app_id).await;
        let mut app = self.apps.get(backup.app_id).await?;

        let archive_path = self.archive_path(&backup);
        if !tokio::fs::try_exists(&archive_path).await.unwrap_or(false) {
            return Err(IsolatorError::archive_io(
                format!("backup file {}", archive_path.display()),
                io::Error::from(io::ErrorKind::NotFound),
            ));
        }
        let volume = app
            .volume_path
            .clone()
            .ok_or_else(|| IsolatorError::VolumeMissing(PathBuf::new()))?;

        let pre_restore_backup_id = match self
            .create_backup_locked(
                &app,
                BackupKind::PreRestore,
                Some(format!(
                    "Auto backup before restoring from backup ID {backup_id}"
                )),
            )
            .await
        {
            Ok(created) => Some(created.record.id),
            Err(e) => {
                warn!(app_id = app.id, error = %e, "Pre-restore backup failed, restoring anyway");
                None
            }
        };

        let staging_parent = volume
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| IsolatorError::VolumeMissing(volume.clone()))?;
        let scratch_dir = self.backup_dir.clone();
        let (staging, unpacked) = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&staging_parent)?;
            let staging = tempfile::Builder::new()
                .prefix(".restore-")
                .tempdir_in(&staging_parent)?;
            let unpacked = archive::unpack_archive(&archive_path, staging.path(), &scratch_dir)?;
            Ok::<_, io::Error>((staging, unpacked))
        })
        .await
        .map_err(|e| IsolatorError::Internal(format!("extract task failed: {e}")))?
        .map_err(|e| IsolatorError::archive_io("extracting archive", e))?;

        let snapshot = unpacked
            .config_json
            .as_deref()
            .map(ConfigSnapshot::from_json)
            .transpose()?;

        let target = volume.clone();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&target)?;
            archive::clear_directory(&target)?;
            archive::move_entries(staging.path(), &target)?;
            staging.close()
        })
        .await
        .map_err(|e| IsolatorError::Internal(format!("swap task failed: {e}")))?
        .map_err(|source| IsolatorError::RestoreIncomplete {
            pre_restore_backup_id,
            source,
        })?;

        if let Some(snapshot) = snapshot.filter(|_| backup.kind.restores_config()) {
            snapshot.apply_to(&mut app);
            self.apps.save(&app).await?;
        }

        info!(
            app_id = app.id,
            backup_id,
            ?pre_restore_backup_id,
            data_entries = unpacked.data_entries,
            "Backup restored"
        );
        Ok(RestoreReport {
            app_id: app.id,
            backup_id,
            pre_restore_backup_id,
        })
    }

    /// Backups of an instance, newest first. Empty when the instance is unknown.
    pub async fn list_backups(&self, app_id: AppId) -> Vec<BackupRecord> {
        if let Err(e) = self.apps.get(app_id).await {
            if !e.is_not_found() {
                warn!(app_id, error = %e, "Error resolving application for backup listing");
            }
            return Vec::new();
        }
        self.backups
            .list_for_app(app_id)
            .await
            .unwrap_or_else(|e| {
                warn!(app_id, error = %e, "Error listing backups");
                Vec::new()
            })
    }

    /// Delete the archive (a missing file is fine), then the record.
    #[instrument(skip(self))]
    pub async fn delete_backup(&self, backup_id: BackupId) -> Result<()> {
        let record = self.backups.get(backup_id).await?;
        let path = self.archive_path(&record);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(backup_id, path = %path.display(), "Archive already gone");
            }
            Err(e) => return Err(IsolatorError::archive_io("removing archive", e)),
        }
        self.backups.delete(backup_id).await?;
        info!(backup_id, "Backup deleted");
        Ok(())
    }
}

fn existing_volume(app: &AppInstance) -> Result<PathBuf> {
    match &app.volume_path {
        Some(path) if path.is_dir() => Ok(path.clone()),
        Some(path) => Err(IsolatorError::VolumeMissing(path.clone())),
        None => Err(IsolatorError::VolumeMissing(PathBuf::new())),
    }
}

/// Instance names end up in file names; path separators can't.
fn file_safe(name: &str) -> String {
    name.replace(['/', '\\'], "-")
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial archive");
        }
    }
}
