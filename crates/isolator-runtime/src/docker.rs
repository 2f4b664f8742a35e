//! Docker-backed [`RuntimeClient`] built on bollard.

use crate::client::{
    ContainerDetails, ContainerSpec, ContainerSummary, HealthState, HostBinding, NetworkCounters,
    RawStats, RuntimeClient, RuntimeState,
};
use crate::{Result, RuntimeError};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
    StatsOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, ContainerStateStatusEnum, HealthStatusEnum, HostConfig, PortBinding,
};
use bollard::Docker;
use futures::{StreamExt, TryStreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument};

const DEFAULT_STOP_TIMEOUT_SECS: i64 = 10;

#[derive(Clone)]
pub struct DockerRuntime {
    docker: Arc<Docker>,
    stop_timeout_secs: i64,
}

impl DockerRuntime {
    pub fn new(docker: Arc<Docker>) -> Self {
        Self {
            docker,
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
        }
    }

    /// Connect using the engine defaults, which honor `DOCKER_HOST`.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_defaults()?;
        Ok(Self::new(Arc::new(docker)))
    }

    pub fn with_stop_timeout(mut self, secs: i64) -> Self {
        self.stop_timeout_secs = secs;
        self
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pull(&self, image: &str) -> Result<()> {
        let (from_image, tag) = split_image_ref(image);
        info!(%from_image, %tag, "Pulling image");
        let options = CreateImageOptions {
            from_image: from_image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await?;
        Ok(())
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|p| (p.key(), HashMap::new()))
            .collect();
        // An empty host port lets the engine pick a free one.
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .exposed_ports
            .iter()
            .map(|p| {
                (
                    p.key(),
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(String::new()),
                    }]),
                )
            })
            .collect();

        let host_config = HostConfig {
            binds: Some(spec.binds.iter().map(|b| b.to_bind_string()).collect()),
            port_bindings: Some(port_bindings),
            memory: Some(spec.resources.memory_bytes),
            nano_cpus: Some(spec.resources.nano_cpus),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: spec.command.clone(),
            env: Some(spec.env.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let created = self.docker.create_container(Some(options), config).await?;
        debug!(container_id = %created.id, "Container created");
        Ok(created.id)
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        let options = StopContainerOptions {
            t: self.stop_timeout_secs,
        };
        self.docker.stop_container(container_id, Some(options)).await?;
        Ok(())
    }

    async fn restart(&self, container_id: &str) -> Result<()> {
        let options = RestartContainerOptions {
            t: self.stop_timeout_secs as isize,
        };
        self.docker
            .restart_container(container_id, Some(options))
            .await?;
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(container_id, Some(options))
            .await?;
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerDetails> {
        let info = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await?;
        Ok(details_from_inspect(container_id, info))
    }

    async fn logs(&self, container_id: &str, tail: usize) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };
        let mut stream = Box::pin(self.docker.logs(container_id, Some(options)));
        let mut output = Vec::new();
        while let Some(entry) = stream.next().await {
            match entry? {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => output.extend_from_slice(&message),
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    async fn stats(&self, container_id: &str) -> Result<RawStats> {
        // A non-streaming, non-one-shot read carries both the current and
        // the previous CPU sample.
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stream = Box::pin(self.docker.stats(container_id, Some(options)));
        let stats = stream
            .next()
            .await
            .ok_or_else(|| RuntimeError::Engine("stats stream ended without a sample".into()))??;

        let online_cpus = stats.cpu_stats.online_cpus.unwrap_or_else(|| {
            stats
                .cpu_stats
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map(|per_cpu| per_cpu.len() as u64)
                .unwrap_or(0)
        });

        let networks = stats
            .networks
            .unwrap_or_default()
            .into_iter()
            .map(|(name, counters)| {
                (
                    name,
                    NetworkCounters {
                        rx_bytes: counters.rx_bytes,
                        tx_bytes: counters.tx_bytes,
                    },
                )
            })
            .collect();

        Ok(RawStats {
            cpu_total_usage: stats.cpu_stats.cpu_usage.total_usage,
            precpu_total_usage: stats.precpu_stats.cpu_usage.total_usage,
            system_cpu_usage: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            presystem_cpu_usage: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            online_cpus,
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
            networks,
        })
    }

    async fn list(&self, name_filter: &str) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name_filter.to_string()]);
        let options = ListContainersOptions::<String> {
            filters,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default().chars().take(12).collect(),
                name: c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                state: c.state.unwrap_or_default(),
                image: c.image.unwrap_or_else(|| "unknown".to_string()),
            })
            .collect())
    }
}

fn details_from_inspect(container_id: &str, info: ContainerInspectResponse) -> ContainerDetails {
    let state = info.state.as_ref();
    let runtime_state = match state.and_then(|s| s.status.as_ref()) {
        Some(ContainerStateStatusEnum::CREATED) => RuntimeState::Created,
        Some(ContainerStateStatusEnum::RUNNING) => RuntimeState::Running,
        Some(ContainerStateStatusEnum::PAUSED) => RuntimeState::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => RuntimeState::Restarting,
        Some(ContainerStateStatusEnum::REMOVING) => RuntimeState::Removing,
        Some(ContainerStateStatusEnum::EXITED) => RuntimeState::Exited,
        Some(ContainerStateStatusEnum::DEAD) => RuntimeState::Dead,
        Some(other) => RuntimeState::Unknown(other.to_string()),
        None => RuntimeState::Unknown(String::new()),
    };
    let health = match state
        .and_then(|s| s.health.as_ref())
        .and_then(|h| h.status.as_ref())
    {
        Some(HealthStatusEnum::STARTING) => Some(HealthState::Starting),
        Some(HealthStatusEnum::HEALTHY) => Some(HealthState::Healthy),
        Some(HealthStatusEnum::UNHEALTHY) => Some(HealthState::Unhealthy),
        _ => None,
    };

    let port_bindings: BTreeMap<String, Vec<HostBinding>> = info
        .network_settings
        .and_then(|n| n.ports)
        .unwrap_or_default()
        .into_iter()
        .map(|(port, bindings)| {
            let bindings = bindings
                .unwrap_or_default()
                .into_iter()
                .map(|b| HostBinding {
                    host_ip: b.host_ip,
                    host_port: b.host_port,
                })
                .collect();
            (port, bindings)
        })
        .collect();

    ContainerDetails {
        id: info.id.unwrap_or_else(|| container_id.to_string()),
        state: runtime_state,
        health,
        port_bindings,
    }
}

/// Split `repo[:tag]` so a bare repository pulls `latest`, not every tag.
/// A colon inside a registry host (`host:5000/img`) is not a tag separator.
fn split_image_ref(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (image, "latest"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{ContainerState, Health, NetworkSettings};

    #[test]
    fn test_split_image_ref() {
        assert_eq!(split_image_ref("nginx"), ("nginx", "latest"));
        assert_eq!(split_image_ref("nginx:1.25"), ("nginx", "1.25"));
        assert_eq!(
            split_image_ref("registry.local:5000/tools/app"),
            ("registry.local:5000/tools/app", "latest")
        );
        assert_eq!(
            split_image_ref("registry.local:5000/tools/app:v2"),
            ("registry.local:5000/tools/app", "v2")
        );
    }

    #[test]
    fn test_details_from_inspect() {
        let mut ports = HashMap::new();
        ports.insert(
            "80/tcp".to_string(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some("49153".to_string()),
            }]),
        );
        let info = ContainerInspectResponse {
            id: Some("abc123".to_string()),
            state: Some(ContainerState {
                status: Some(ContainerStateStatusEnum::RUNNING),
                health: Some(Health {
                    status: Some(HealthStatusEnum::UNHEALTHY),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        };

        let details = details_from_inspect("abc", info);
        assert_eq!(details.id, "abc123");
        assert_eq!(details.state, RuntimeState::Running);
        assert_eq!(details.health, Some(HealthState::Unhealthy));
        assert_eq!(
            details.port_bindings["80/tcp"][0].host_port.as_deref(),
            Some("49153")
        );
    }

    #[test]
    fn test_details_without_health_check() {
        let info = ContainerInspectResponse {
            state: Some(ContainerState {
                status: Some(ContainerStateStatusEnum::EXITED),
                ..Default::default()
            }),
            ..Default::default()
        };
        let details = details_from_inspect("abc", info);
        assert_eq!(details.id, "abc");
        assert_eq!(details.state, RuntimeState::Exited);
        assert!(details.health.is_none());
        assert!(details.port_bindings.is_empty());
    }
}
