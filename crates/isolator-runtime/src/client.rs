//! Engine-neutral view of the container runtime control surface.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

/// Everything the engine needs to create one application container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Option<Vec<String>>,
    pub exposed_ports: Vec<ExposedPort>,
    pub binds: Vec<VolumeBind>,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    pub resources: ResourceCaps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposedPort {
    pub port: u16,
}

impl ExposedPort {
    /// Engine port key, e.g. `80/tcp`.
    pub fn key(&self) -> String {
        format!("{}/tcp", self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBind {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl VolumeBind {
    pub fn to_bind_string(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            mode
        )
    }
}

/// Resource caps in the forms the engine understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCaps {
    /// Memory limit string, e.g. `512m`.
    pub memory: String,
    pub memory_bytes: i64,
    pub cpu_count: f64,
    /// CPU quota in units of 1e-9 CPUs.
    pub nano_cpus: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown(String),
}

impl RuntimeState {
    pub fn as_str(&self) -> &str {
        match self {
            RuntimeState::Created => "created",
            RuntimeState::Running => "running",
            RuntimeState::Paused => "paused",
            RuntimeState::Restarting => "restarting",
            RuntimeState::Removing => "removing",
            RuntimeState::Exited => "exited",
            RuntimeState::Dead => "dead",
            RuntimeState::Unknown(s) => s,
        }
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health check state; only present when the image defines a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Starting,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostBinding {
    pub host_ip: Option<String>,
    pub host_port: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDetails {
    pub id: String,
    pub state: RuntimeState,
    pub health: Option<HealthState>,
    /// Container port key to host bindings, in key order.
    pub port_bindings: BTreeMap<String, Vec<HostBinding>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Two consecutive engine samples, as reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStats {
    pub cpu_total_usage: u64,
    pub precpu_total_usage: u64,
    pub system_cpu_usage: u64,
    pub presystem_cpu_usage: u64,
    pub online_cpus: u64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub networks: HashMap<String, NetworkCounters>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub state: String,
    pub image: String,
}

/// Thin façade over the container engine. No business logic lives here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    async fn ping(&self) -> Result<()>;
    async fn pull(&self, image: &str) -> Result<()>;
    /// Create a container and return its runtime reference.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;
    async fn start(&self, container_id: &str) -> Result<()>;
    async fn stop(&self, container_id: &str) -> Result<()>;
    async fn restart(&self, container_id: &str) -> Result<()>;
    async fn remove(&self, container_id: &str) -> Result<()>;
    async fn inspect(&self, container_id: &str) -> Result<ContainerDetails>;
    async fn logs(&self, container_id: &str, tail: usize) -> Result<String>;
    async fn stats(&self, container_id: &str) -> Result<RawStats>;
    /// Running containers whose name matches `name_filter`.
    async fn list(&self, name_filter: &str) -> Result<Vec<ContainerSummary>>;
}
