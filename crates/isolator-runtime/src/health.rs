use crate::client::{ContainerDetails, HealthState, RuntimeClient, RuntimeState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};

/// Outcome of a readiness wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Readiness {
    Ready,
    /// Running, but the health check reports unhealthy.
    Unhealthy,
    /// The container stopped or reached a state it will not leave on its own.
    Stopped(RuntimeState),
    /// Inspecting the container failed.
    ProbeFailed(String),
    TimedOut,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

enum Observation {
    Done(Readiness),
    Pending,
}

/// Polls container state until ready, failed, or out of time.
#[derive(Clone)]
pub struct HealthProber {
    runtime: Arc<dyn RuntimeClient>,
    interval: Duration,
}

impl HealthProber {
    pub fn new(runtime: Arc<dyn RuntimeClient>) -> Self {
        Self {
            runtime,
            interval: Duration::from_secs(1),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One inspection per interval, bounded by `timeout`. Definitive states
    /// end the wait immediately; inspection errors are not retried. A slow
    /// inspection is cut off at the deadline.
    pub async fn wait_until_ready(&self, container_id: &str, timeout: Duration) -> Readiness {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let budget = deadline.saturating_duration_since(Instant::now());
            let Ok(inspected) =
                tokio::time::timeout(budget, self.runtime.inspect(container_id)).await
            else {
                warn!(%container_id, "Container inspection outlived the readiness budget");
                return Readiness::TimedOut;
            };
            match inspected {
                Ok(details) => match observe(&details) {
                    Observation::Done(readiness) => {
                        debug!(%container_id, ?readiness, "Readiness settled");
                        return readiness;
                    }
                    Observation::Pending => {}
                },
                Err(e) => {
                    error!(%container_id, error = %e, "Error checking container status");
                    return Readiness::ProbeFailed(e.to_string());
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            sleep(self.interval.min(remaining)).await;
        }
        Readiness::TimedOut
    }
}

fn observe(details: &ContainerDetails) -> Observation {
    match (&details.state, details.health) {
        (RuntimeState::Running, None | Some(HealthState::Healthy)) => {
            Observation::Done(Readiness::Ready)
        }
        (RuntimeState::Running, Some(HealthState::Unhealthy)) => {
            Observation::Done(Readiness::Unhealthy)
        }
        // Still converging: keep polling.
        (RuntimeState::Running, Some(HealthState::Starting))
        | (RuntimeState::Created, _)
        | (RuntimeState::Restarting, _) => Observation::Pending,
        (state, _) => Observation::Done(Readiness::Stopped(state.clone())),
    }
}
