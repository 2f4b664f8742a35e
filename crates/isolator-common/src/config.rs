use crate::{AppType, IsolatorError, NewApp, Result, DEFAULT_CPU_LIMIT, DEFAULT_MEMORY_LIMIT_MB};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Settings for the isolator core, read from `ISOLATOR_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolatorConfig {
    pub backup_dir: PathBuf,
    pub volume_root: PathBuf,
    /// Prefix for volume directory and container names.
    pub name_prefix: String,
    /// In-container path the volume is bound to.
    pub data_mount: String,
    /// Engine endpoint; `None` uses the engine client's defaults.
    pub docker_host: Option<String>,
    pub default_cpu_limit: f64,
    pub default_memory_limit: u32,
    pub ready_timeout: Duration,
}

impl Default for IsolatorConfig {
    fn default() -> Self {
        Self {
            backup_dir: expand_home("~/epic-isolator/backups", None),
            volume_root: expand_home("~/epic-isolator/volumes", None),
            name_prefix: "epic-isolator".to_string(),
            data_mount: "/app/data".to_string(),
            docker_host: None,
            default_cpu_limit: DEFAULT_CPU_LIMIT,
            default_memory_limit: DEFAULT_MEMORY_LIMIT_MB,
            ready_timeout: Duration::from_secs(30),
        }
    }
}

impl IsolatorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let home = lookup("HOME");
        let path = |key: &str, fallback: &str| {
            let raw = lookup(key).unwrap_or_else(|| fallback.to_string());
            expand_home(&raw, home.as_deref())
        };

        Ok(Self {
            backup_dir: path("ISOLATOR_BACKUP_DIR", "~/epic-isolator/backups"),
            volume_root: path("ISOLATOR_VOLUME_ROOT", "~/epic-isolator/volumes"),
            name_prefix: lookup("ISOLATOR_NAME_PREFIX").unwrap_or(defaults.name_prefix),
            data_mount: lookup("ISOLATOR_DATA_MOUNT").unwrap_or(defaults.data_mount),
            docker_host: lookup("DOCKER_HOST").filter(|h| !h.is_empty()),
            default_cpu_limit: parse_var(&lookup, "ISOLATOR_DEFAULT_CPU_LIMIT")?
                .unwrap_or(defaults.default_cpu_limit),
            default_memory_limit: parse_var(&lookup, "ISOLATOR_DEFAULT_MEMORY_LIMIT")?
                .unwrap_or(defaults.default_memory_limit),
            ready_timeout: parse_var(&lookup, "ISOLATOR_READY_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.ready_timeout),
        })
    }

    /// A new application carrying the configured default limits.
    pub fn new_app(&self, name: impl Into<String>, app_type: impl Into<AppType>) -> NewApp {
        NewApp {
            memory_limit: self.default_memory_limit,
            cpu_limit: self.default_cpu_limit,
            ..NewApp::new(name, app_type)
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| IsolatorError::Config(format!("{key}={raw:?}: {e}"))),
    }
}

fn expand_home(raw: &str, home: Option<&str>) -> PathBuf {
    let home = home
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from));
    match home {
        Some(home) if raw == "~" => home,
        Some(home) => match raw.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    }
}
