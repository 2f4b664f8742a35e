//! Maps an application's limits and type-specific configuration onto
//! engine creation parameters.

use crate::client::{ContainerSpec, ExposedPort, ResourceCaps, VolumeBind};
use isolator_common::{AppInstance, AppType, IsolatorError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

const DEFAULT_IMAGE: &str = "ubuntu:latest";
const WEB_IMAGE: &str = "nginx:latest";
const WEB_PORT: u16 = 80;

/// The parsed configuration blob. Every key is optional; unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub image: Option<String>,
    pub command: Option<Vec<String>>,
    pub ports: Option<Vec<u16>>,
    pub env: BTreeMap<String, String>,
}

impl AppConfig {
    pub fn parse(blob: Option<&str>) -> Result<Self, IsolatorError> {
        match blob.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some(raw) => {
                serde_json::from_str(raw).map_err(|e| IsolatorError::ConfigParse(e.to_string()))
            }
        }
    }

    /// Parse, substituting an empty configuration for a malformed blob.
    pub fn parse_or_default(blob: Option<&str>) -> Self {
        Self::parse(blob).unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring malformed application config");
            Self::default()
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResourceLimitTranslator {
    name_prefix: String,
    data_mount: String,
}

impl ResourceLimitTranslator {
    pub fn new(name_prefix: impl Into<String>, data_mount: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            data_mount: data_mount.into(),
        }
    }

    pub fn caps(memory_mb: u32, cpu_cores: f64) -> ResourceCaps {
        ResourceCaps {
            memory: format!("{memory_mb}m"),
            memory_bytes: i64::from(memory_mb) * 1024 * 1024,
            cpu_count: cpu_cores,
            nano_cpus: (cpu_cores * 1e9).round() as i64,
        }
    }

    /// `{prefix}-{name}-{id}`, with characters the engine rejects replaced.
    pub fn container_name(&self, app: &AppInstance) -> String {
        let name: String = app
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        format!("{}-{}-{}", self.name_prefix, name, app.id)
    }

    pub fn container_spec(
        &self,
        app: &AppInstance,
        config: &AppConfig,
        volume_path: &Path,
    ) -> ContainerSpec {
        let (default_image, default_ports) = type_defaults(&app.app_type);
        let image = config
            .image
            .clone()
            .unwrap_or_else(|| default_image.to_string());
        let ports = config.ports.clone().unwrap_or(default_ports);

        ContainerSpec {
            name: self.container_name(app),
            image,
            command: config.command.clone(),
            exposed_ports: ports.into_iter().map(|port| ExposedPort { port }).collect(),
            binds: vec![VolumeBind {
                host_path: volume_path.to_path_buf(),
                container_path: self.data_mount.clone(),
                read_only: false,
            }],
            env: config
                .env
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect(),
            resources: Self::caps(app.memory_limit, app.cpu_limit),
        }
    }
}

fn type_defaults(app_type: &AppType) -> (&'static str, Vec<u16>) {
    match app_type {
        AppType::Web => (WEB_IMAGE, vec![WEB_PORT]),
        AppType::Desktop | AppType::Server | AppType::Other(_) => (DEFAULT_IMAGE, Vec::new()),
    }
}
