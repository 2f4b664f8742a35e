use crate::client::ContainerDetails;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_ALLOCATION_ATTEMPTS: usize = 8;

/// Hands out per-instance volume directories under a dedicated root.
#[derive(Debug, Clone)]
pub struct VolumeAllocator {
    root: PathBuf,
    prefix: String,
}

impl VolumeAllocator {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    /// Create a fresh `{prefix}-{app_id}-{suffix}` directory. The directory is
    /// created exclusively, so an existing path is never handed out twice.
    pub async fn allocate(&self, app_id: i64) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let suffix = Uuid::new_v4().simple().to_string();
            let path = self
                .root
                .join(format!("{}-{}-{}", self.prefix, app_id, &suffix[..8]));
            match tokio::fs::create_dir(&path).await {
                Ok(()) => {
                    debug!(volume = %path.display(), "Allocated volume");
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "could not allocate a unique volume directory",
        ))
    }

    /// Remove a volume allocated by a provisioning attempt that failed. Only
    /// an empty directory is removed.
    pub async fn release(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_dir(path).await {
            warn!(volume = %path.display(), error = %e, "Failed to release volume");
        }
    }
}

/// First host port the engine bound for any exposed container port.
pub fn assigned_host_port(details: &ContainerDetails) -> Option<u16> {
    details
        .port_bindings
        .values()
        .flatten()
        .find_map(|binding| binding.host_port.as_deref()?.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{HostBinding, RuntimeState};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_allocations_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let allocator = VolumeAllocator::new(root.path().join("volumes"), "epic-isolator");

        let first = allocator.allocate(3).await.unwrap();
        let second = allocator.allocate(3).await.unwrap();
        assert_ne!(first, second);
        assert!(first.is_dir() && second.is_dir());

        let name = first.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("epic-isolator-3-"));
        assert_eq!(name.len(), "epic-isolator-3-".len() + 8);
    }

    #[tokio::test]
    async fn test_release_keeps_non_empty_volume() {
        let root = tempfile::tempdir().unwrap();
        let allocator = VolumeAllocator::new(root.path(), "p");
        let path = allocator.allocate(1).await.unwrap();
        std::fs::write(path.join("keep.txt"), b"data").unwrap();

        allocator.release(&path).await;
        assert!(path.exists());

        std::fs::remove_file(path.join("keep.txt")).unwrap();
        allocator.release(&path).await;
        assert!(!path.exists());
    }

    #[test]
    fn test_assigned_host_port_skips_unbound() {
        let mut bindings = BTreeMap::new();
        bindings.insert("22/tcp".to_string(), vec![]);
        bindings.insert(
            "80/tcp".to_string(),
            vec![HostBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some("49160".to_string()),
            }],
        );
        let details = ContainerDetails {
            id: "c".to_string(),
            state: RuntimeState::Running,
            health: None,
            port_bindings: bindings,
        };
        assert_eq!(assigned_host_port(&details), Some(49160));

        let unbound = ContainerDetails {
            port_bindings: BTreeMap::new(),
            ..details
        };
        assert_eq!(assigned_host_port(&unbound), None);
    }
}
