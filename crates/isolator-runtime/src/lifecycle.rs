//! Container lifecycle orchestration for application instances.
//!
//! The manager owns the runtime-facing side of an instance: allocating its
//! volume, creating and starting its container, and flipping it between
//! running and stopped. Persisting the outcome (container reference, port,
//! volume path, status) is left to the caller.

use crate::client::{ContainerSpec, RuntimeClient};
use crate::health::{HealthProber, Readiness};
use crate::resources::{AppConfig, ResourceLimitTranslator};
use crate::stats::ContainerStats;
use crate::volume::{assigned_host_port, VolumeAllocator};
use crate::RuntimeError;
use isolator_common::{
    AppInstance, AppStatus, InstanceLocks, IsolatorConfig, IsolatorError, Provisioned, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Whether a lifecycle call changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The recorded status already matched the requested state.
    Unchanged,
}

pub struct LifecycleManager {
    runtime: Arc<dyn RuntimeClient>,
    translator: ResourceLimitTranslator,
    volumes: VolumeAllocator,
    prober: HealthProber,
    locks: Arc<InstanceLocks>,
}

impl LifecycleManager {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        config: &IsolatorConfig,
        locks: Arc<InstanceLocks>,
    ) -> Self {
        Self {
            translator: ResourceLimitTranslator::new(&config.name_prefix, &config.data_mount),
            volumes: VolumeAllocator::new(&config.volume_root, &config.name_prefix),
            prober: HealthProber::new(runtime.clone()),
            runtime,
            locks,
        }
    }

    /// Allocate a volume, create and start the container, and discover the
    /// host port the engine assigned.
    #[instrument(skip(self, app), fields(app_id = app.id, app_type = %app.app_type))]
    pub async fn provision(&self, app: &AppInstance) -> Result<Provisioned> {
        let _guard = self.locks.acquire(app.id).await;

        let volume_path = self.volumes.allocate(app.id).await?;
        let config = AppConfig::parse_or_default(app.config.as_deref());
        let spec = self.translator.container_spec(app, &config, &volume_path);

        let container_id = match self.create_and_start(&spec).await {
            Ok(id) => id,
            Err(e) => {
                self.volumes.release(&volume_path).await;
                return Err(e);
            }
        };

        let port = if spec.exposed_ports.is_empty() {
            None
        } else {
            match self.runtime.inspect(&container_id).await {
                Ok(details) => assigned_host_port(&details),
                Err(e) => {
                    warn!(%container_id, error = %e, "Could not read assigned host port");
                    None
                }
            }
        };

        info!(%container_id, ?port, volume = %volume_path.display(), "Application provisioned");
        Ok(Provisioned {
            container_id,
            port,
            volume_path,
        })
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        let container_id = match self.runtime.create(spec).await {
            Ok(id) => id,
            Err(RuntimeError::NotFound(reason)) => {
                info!(image = %spec.image, %reason, "Image not available locally, pulling");
                self.runtime.pull(&spec.image).await?;
                self.runtime.create(spec).await?
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.runtime.start(&container_id).await {
            warn!(%container_id, error = %e, "Container start failed, removing it");
            if let Err(remove_err) = self.runtime.remove(&container_id).await {
                warn!(%container_id, error = %remove_err, "Failed to remove unstarted container");
            }
            return Err(e.into());
        }
        Ok(container_id)
    }

    #[instrument(skip(self, app), fields(app_id = app.id))]
    pub async fn start(&self, app: &AppInstance) -> Result<Transition> {
        let _guard = self.locks.acquire(app.id).await;
        if app.status == AppStatus::Active {
            return Ok(Transition::Unchanged);
        }
        let container_id = container_of(app)?;
        self.runtime.start(container_id).await?;
        info!(%container_id, "Container started");
        Ok(Transition::Applied)
    }

    #[instrument(skip(self, app), fields(app_id = app.id))]
    pub async fn stop(&self, app: &AppInstance) -> Result<Transition> {
        let _guard = self.locks.acquire(app.id).await;
        if app.status == AppStatus::Inactive {
            return Ok(Transition::Unchanged);
        }
        let container_id = container_of(app)?;
        self.runtime.stop(container_id).await?;
        info!(%container_id, "Container stopped");
        Ok(Transition::Applied)
    }

    #[instrument(skip(self, app), fields(app_id = app.id))]
    pub async fn restart(&self, app: &AppInstance) -> Result<Transition> {
        let _guard = self.locks.acquire(app.id).await;
        let container_id = container_of(app)?;
        self.runtime.restart(container_id).await?;
        info!(%container_id, "Container restarted");
        Ok(Transition::Applied)
    }

    /// Most recent `tail` lines of output; empty when the container is unreachable.
    pub async fn fetch_logs(&self, app: &AppInstance, tail: usize) -> String {
        let Some(container_id) = app.container_id.as_deref() else {
            return String::new();
        };
        self.runtime
            .logs(container_id, tail)
            .await
            .unwrap_or_else(|e| {
                warn!(app_id = app.id, %container_id, error = %e, "Error getting container logs");
                String::new()
            })
    }

    /// Usage snapshot; a zeroed `error` snapshot when the engine can't be read.
    pub async fn fetch_stats(&self, app: &AppInstance) -> ContainerStats {
        let Some(container_id) = app.container_id.as_deref() else {
            return ContainerStats::unavailable();
        };
        let sample = async {
            let details = self.runtime.inspect(container_id).await?;
            let raw = self.runtime.stats(container_id).await?;
            Ok::<_, RuntimeError>(ContainerStats::from_raw(details.state.to_string(), &raw))
        };
        sample.await.unwrap_or_else(|e| {
            warn!(app_id = app.id, %container_id, error = %e, "Error getting container stats");
            ContainerStats::unavailable()
        })
    }

    pub async fn wait_ready(&self, app: &AppInstance, timeout: Duration) -> Readiness {
        match app.container_id.as_deref() {
            Some(container_id) => self.prober.wait_until_ready(container_id, timeout).await,
            None => Readiness::ProbeFailed(IsolatorError::NotProvisioned(app.id).to_string()),
        }
    }
}

fn container_of(app: &AppInstance) -> Result<&str> {
    app.container_id
        .as_deref()
        .ok_or(IsolatorError::NotProvisioned(app.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{
        ContainerDetails, HostBinding, MockRuntimeClient, NetworkCounters, RawStats, RuntimeState,
    };
    use isolator_common::chrono::Utc;
    use isolator_common::AppType;
    use std::collections::{BTreeMap, HashMap};
    use tempfile::TempDir;

    fn app(status: AppStatus, container_id: Option<&str>) -> AppInstance {
        AppInstance {
            id: 11,
            name: "blog".to_string(),
            description: Some("personal blog".to_string()),
            app_type: AppType::Web,
            status,
            container_id: container_id.map(str::to_string),
            port: None,
            memory_limit: 512,
            cpu_limit: 1.0,
            volume_path: None,
            config: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn manager(mock: MockRuntimeClient, root: &TempDir) -> LifecycleManager {
        manager_with_locks(mock, root, Arc::new(InstanceLocks::new()))
    }

    fn manager_with_locks(
        mock: MockRuntimeClient,
        root: &TempDir,
        locks: Arc<InstanceLocks>,
    ) -> LifecycleManager {
        let config = IsolatorConfig {
            volume_root: root.path().join("volumes"),
            backup_dir: root.path().join("backups"),
            ..IsolatorConfig::default()
        };
        LifecycleManager::new(Arc::new(mock), &config, locks)
    }

    fn running_with_port(id: &str, host_port: &str) -> ContainerDetails {
        let mut port_bindings = BTreeMap::new();
        port_bindings.insert(
            "80/tcp".to_string(),
            vec![HostBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(host_port.to_string()),
            }],
        );
        ContainerDetails {
            id: id.to_string(),
            state: RuntimeState::Running,
            health: None,
            port_bindings,
        }
    }

    #[tokio::test]
    async fn test_provision_web_app() {
        let root = tempfile::tempdir().unwrap();
        let mut mock = MockRuntimeClient::new();
        mock.expect_create()
            .withf(|spec| {
                spec.image == "nginx:latest"
                    && spec.name == "epic-isolator-blog-11"
                    && spec.binds.len() == 1
                    && spec.binds[0].container_path == "/app/data"
                    && spec.resources.memory == "512m"
            })
            .times(1)
            .returning(|_| Ok("c-web".to_string()));
        mock.expect_start().times(1).returning(|_| Ok(()));
        mock.expect_inspect()
            .times(1)
            .returning(|id| Ok(running_with_port(id, "49153")));

        let manager = manager(mock, &root);
        let provisioned = manager.provision(&app(AppStatus::Inactive, None)).await.unwrap();

        assert_eq!(provisioned.container_id, "c-web");
        assert_eq!(provisioned.port, Some(49153));
        assert!(provisioned.volume_path.is_dir());
        assert!(provisioned.volume_path.starts_with(root.path().join("volumes")));
    }

    #[tokio::test]
    async fn test_provision_without_ports_skips_inspect() {
        let root = tempfile::tempdir().unwrap();
        let mut mock = MockRuntimeClient::new();
        mock.expect_create()
            .withf(|spec| spec.image == "ubuntu:latest" && spec.exposed_ports.is_empty())
            .returning(|_| Ok("c-srv".to_string()));
        mock.expect_start().returning(|_| Ok(()));
        mock.expect_inspect().never();

        let manager = manager(mock, &root);
        let mut server = app(AppStatus::Inactive, None);
        server.app_type = AppType::Server;
        // Malformed config must not fail provisioning.
        server.config = Some("{broken".to_string());

        let provisioned = manager.provision(&server).await.unwrap();
        assert_eq!(provisioned.port, None);
    }

    #[tokio::test]
    async fn test_two_provisions_never_share_a_volume() {
        let root = tempfile::tempdir().unwrap();
        let mut mock = MockRuntimeClient::new();
        mock.expect_create().returning(|_| Ok("c".to_string()));
        mock.expect_start().returning(|_| Ok(()));
        mock.expect_inspect()
            .returning(|id| Ok(running_with_port(id, "40000")));

        let manager = manager(mock, &root);
        let instance = app(AppStatus::Inactive, None);
        let first = manager.provision(&instance).await.unwrap();
        let second = manager.provision(&instance).await.unwrap();
        assert_ne!(first.volume_path, second.volume_path);
    }

    #[tokio::test]
    async fn test_provision_pulls_missing_image_then_retries() {
        let root = tempfile::tempdir().unwrap();
        let mut mock = MockRuntimeClient::new();
        let mut attempts = 0;
        mock.expect_create().times(2).returning(move |_| {
            attempts += 1;
            if attempts == 1 {
                Err(RuntimeError::NotFound("No such image: nginx:latest".to_string()))
            } else {
                Ok("c-pulled".to_string())
            }
        });
        mock.expect_pull()
            .withf(|image| image == "nginx:latest")
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_start().returning(|_| Ok(()));
        mock.expect_inspect()
            .returning(|id| Ok(running_with_port(id, "40001")));

        let manager = manager(mock, &root);
        let provisioned = manager.provision(&app(AppStatus::Inactive, None)).await.unwrap();
        assert_eq!(provisioned.container_id, "c-pulled");
    }

    #[tokio::test]
    async fn test_failed_provision_releases_volume() {
        let root = tempfile::tempdir().unwrap();
        let mut mock = MockRuntimeClient::new();
        mock.expect_create()
            .returning(|_| Err(RuntimeError::Unavailable("engine down".to_string())));

        let manager = manager(mock, &root);
        let err = manager
            .provision(&app(AppStatus::Inactive, None))
            .await
            .unwrap_err();
        assert!(matches!(err, IsolatorError::RuntimeUnavailable(_)));

        let leftovers = std::fs::read_dir(root.path().join("volumes")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_failed_start_removes_container() {
        let root = tempfile::tempdir().unwrap();
        let mut mock = MockRuntimeClient::new();
        mock.expect_create().returning(|_| Ok("c-bad".to_string()));
        mock.expect_start()
            .returning(|_| Err(RuntimeError::Engine("port is already allocated".to_string())));
        mock.expect_remove()
            .withf(|id| id == "c-bad")
            .times(1)
            .returning(|_| Ok(()));

        let manager = manager(mock, &root);
        let err = manager
            .provision(&app(AppStatus::Inactive, None))
            .await
            .unwrap_err();
        assert!(matches!(err, IsolatorError::Runtime(_)));
    }

    #[tokio::test]
    async fn test_start_and_stop_are_noops_in_target_state() {
        let root = tempfile::tempdir().unwrap();
        let mut mock = MockRuntimeClient::new();
        mock.expect_start().never();
        mock.expect_stop().never();

        let manager = manager(mock, &root);
        let active = app(AppStatus::Active, Some("c1"));
        let inactive = app(AppStatus::Inactive, Some("c1"));
        assert_eq!(manager.start(&active).await.unwrap(), Transition::Unchanged);
        assert_eq!(manager.stop(&inactive).await.unwrap(), Transition::Unchanged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_noop_transitions_wait_for_instance_lock() {
        let root = tempfile::tempdir().unwrap();
        let locks = Arc::new(InstanceLocks::new());
        let mut mock = MockRuntimeClient::new();
        mock.expect_start().never();
        mock.expect_stop().never();
        let manager = manager_with_locks(mock, &root, locks.clone());

        let active = app(AppStatus::Active, Some("c1"));
        let inactive = app(AppStatus::Inactive, Some("c1"));
        let guard = locks.acquire(active.id).await;
        let blocked = tokio::time::timeout(Duration::from_secs(1), manager.start(&active)).await;
        assert!(blocked.is_err());
        let blocked = tokio::time::timeout(Duration::from_secs(1), manager.stop(&inactive)).await;
        assert!(blocked.is_err());

        drop(guard);
        assert_eq!(manager.start(&active).await.unwrap(), Transition::Unchanged);
        assert_eq!(manager.stop(&inactive).await.unwrap(), Transition::Unchanged);
    }

    #[tokio::test]
    async fn test_lifecycle_calls_hit_recorded_container() {
        let root = tempfile::tempdir().unwrap();
        let mut mock = MockRuntimeClient::new();
        mock.expect_start()
            .withf(|id| id == "c1")
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_stop()
            .withf(|id| id == "c1")
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_restart()
            .withf(|id| id == "c1")
            .times(1)
            .returning(|_| Err(RuntimeError::NotFound("No such container: c1".to_string())));

        let manager = manager(mock, &root);
        assert_eq!(
            manager.start(&app(AppStatus::Inactive, Some("c1"))).await.unwrap(),
            Transition::Applied
        );
        assert_eq!(
            manager.stop(&app(AppStatus::Active, Some("c1"))).await.unwrap(),
            Transition::Applied
        );
        let err = manager
            .restart(&app(AppStatus::Active, Some("c1")))
            .await
            .unwrap_err();
        assert!(matches!(err, IsolatorError::ContainerNotFound(_)));
    }

    #[tokio::test]
    async fn test_start_unprovisioned_instance_fails() {
        let root = tempfile::tempdir().unwrap();
        let manager = manager(MockRuntimeClient::new(), &root);
        let err = manager
            .start(&app(AppStatus::Inactive, None))
            .await
            .unwrap_err();
        assert!(matches!(err, IsolatorError::NotProvisioned(11)));
    }

    #[tokio::test]
    async fn test_logs_degrade_to_empty() {
        let root = tempfile::tempdir().unwrap();
        let mut mock = MockRuntimeClient::new();
        mock.expect_logs()
            .withf(|_, tail| *tail == 50)
            .returning(|_, _| Err(RuntimeError::Unavailable("down".to_string())));

        let manager = manager(mock, &root);
        let logs = manager.fetch_logs(&app(AppStatus::Active, Some("c1")), 50).await;
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let root = tempfile::tempdir().unwrap();
        let mut mock = MockRuntimeClient::new();
        mock.expect_inspect()
            .returning(|id| Ok(running_with_port(id, "40000")));
        mock.expect_stats().returning(|_| {
            let mut networks = HashMap::new();
            networks.insert(
                "eth0".to_string(),
                NetworkCounters {
                    rx_bytes: 10,
                    tx_bytes: 20,
                },
            );
            Ok(RawStats {
                cpu_total_usage: 400,
                precpu_total_usage: 200,
                system_cpu_usage: 3000,
                presystem_cpu_usage: 2000,
                online_cpus: 4,
                memory_usage: 256,
                memory_limit: 1024,
                networks,
            })
        });

        let manager = manager(mock, &root);
        let stats = manager.fetch_stats(&app(AppStatus::Active, Some("c1"))).await;
        assert_eq!(stats.status, "running");
        assert_eq!(stats.cpu_percent, 80.0);
        assert_eq!(stats.memory_percent, 25.0);
        assert_eq!((stats.network_rx, stats.network_tx), (10, 20));
    }

    #[tokio::test]
    async fn test_stats_degrade_to_error_snapshot() {
        let root = tempfile::tempdir().unwrap();
        let mut mock = MockRuntimeClient::new();
        mock.expect_inspect()
            .returning(|_| Err(RuntimeError::NotFound("gone".to_string())));

        let manager = manager(mock, &root);
        let stats = manager.fetch_stats(&app(AppStatus::Active, Some("c1"))).await;
        assert_eq!(stats, ContainerStats::unavailable());

        let unprovisioned = manager.fetch_stats(&app(AppStatus::Inactive, None)).await;
        assert_eq!(unprovisioned.status, "error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_delegates_to_prober() {
        let root = tempfile::tempdir().unwrap();
        let mut mock = MockRuntimeClient::new();
        mock.expect_inspect()
            .returning(|id| Ok(running_with_port(id, "40000")));

        let manager = manager(mock, &root);
        let readiness = manager
            .wait_ready(&app(AppStatus::Active, Some("c1")), Duration::from_secs(5))
            .await;
        assert!(readiness.is_ready());

        let missing = manager
            .wait_ready(&app(AppStatus::Inactive, None), Duration::from_secs(5))
            .await;
        assert!(!missing.is_ready());
    }
}
