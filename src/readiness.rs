//! Readiness validation of a freshly provisioned container.
//!
//! Polling runs at a fixed interval against an injected [`Clock`]
//! with explicit elapsed-time tracking. The last sleep is clipped to
//! the remaining budget, so a container that never becomes ready is
//! reported at the timeout boundary and never before it.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::DeploymentConfig;
use crate::docker::Runtime;
use crate::error::{DeployError, DeployResult};
use crate::probe::Probe;
use crate::provision::ProvisionedContainer;

/// Where a readiness request originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Vantage {
    /// The target host, through the published port.
    Loopback,
    /// The container's own address on the shared network.
    Internal,
}

impl fmt::Display for Vantage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loopback => f.write_str("loopback"),
            Self::Internal => f.write_str("internal"),
        }
    }
}

/// One request from one vantage point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub vantage: Vantage,
    pub url: Option<String>,
    pub status: Option<u16>,
    pub content_match: bool,
    pub error: Option<String>,
}

impl Observation {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == Some(200) && self.content_match
    }

    fn failed(vantage: Vantage, url: Option<String>, error: String) -> Self {
        Self {
            vantage,
            url,
            status: None,
            content_match: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub checked_at: DateTime<Utc>,
    pub attempts: u32,
    pub elapsed: Duration,
    pub observations: Vec<Observation>,
    pub passed: bool,
}

/// Polls the container until every vantage point sees the expected
/// page in the same attempt, or the timeout elapses.
pub struct Validator<'a> {
    config: &'a DeploymentConfig,
    runtime: &'a dyn Runtime,
    probe: &'a dyn Probe,
    clock: &'a dyn Clock,
}

impl<'a> Validator<'a> {
    #[must_use]
    pub fn new(
        config: &'a DeploymentConfig,
        runtime: &'a dyn Runtime,
        probe: &'a dyn Probe,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            config,
            runtime,
            probe,
            clock,
        }
    }

    pub fn wait(&self, container: &ProvisionedContainer) -> DeployResult<ValidationResult> {
        let settings = &self.config.readiness;
        let start = self.clock.now();
        let mut attempts = 0;

        info!(
            container = %container.name,
            timeout_secs = settings.timeout.as_secs(),
            interval_ms = millis(settings.interval),
            "waiting for readiness"
        );

        loop {
            attempts += 1;
            let observations = self.attempt(container);
            let elapsed = self.clock.now().saturating_sub(start);
            let passed = observations.iter().all(Observation::passed);

            if passed {
                info!(
                    container = %container.name,
                    attempts,
                    elapsed_ms = millis(elapsed),
                    "container ready"
                );
                return Ok(ValidationResult {
                    checked_at: Utc::now(),
                    attempts,
                    elapsed,
                    observations,
                    passed,
                });
            }

            for obs in observations.iter().filter(|o| !o.passed()) {
                debug!(
                    attempt = attempts,
                    vantage = %obs.vantage,
                    status = ?obs.status,
                    content_match = obs.content_match,
                    error = ?obs.error,
                    "not ready"
                );
            }

            if elapsed >= settings.timeout {
                return Err(self.timeout(container, elapsed));
            }
            self.clock.sleep(settings.interval.min(settings.timeout - elapsed));
        }
    }

    /// One probe from each vantage point.
    fn attempt(&self, container: &ProvisionedContainer) -> Vec<Observation> {
        let loopback = format!("http://127.0.0.1:{}/", container.host_port);
        let mut observations = vec![self.observe(Vantage::Loopback, loopback)];

        let internal = match self.runtime.container_ip(&container.name, &container.network) {
            Ok(Some(ip)) => self.observe(
                Vantage::Internal,
                format!("http://{ip}:{}/", self.config.container_port),
            ),
            Ok(None) => Observation::failed(
                Vantage::Internal,
                None,
                format!("no address on network {}", container.network),
            ),
            Err(e) => Observation::failed(Vantage::Internal, None, e.to_string()),
        };
        observations.push(internal);

        observations
    }

    fn observe(&self, vantage: Vantage, url: String) -> Observation {
        match self.probe.fetch(&url) {
            Ok(resp) => Observation {
                vantage,
                status: Some(resp.status),
                content_match: resp.body.contains(&self.config.readiness.expected_content),
                error: None,
                url: Some(url),
            },
            Err(e) => Observation::failed(vantage, Some(url), e.to_string()),
        }
    }

    fn timeout(&self, container: &ProvisionedContainer, waited: Duration) -> DeployError {
        let logs = self
            .runtime
            .logs_tail(&container.name, self.config.readiness.log_tail)
            .unwrap_or_else(|e| format!("<logs unavailable: {e}>"));
        warn!(container = %container.name, waited_secs = waited.as_secs(), "readiness timeout");
        DeployError::ReadinessTimeout {
            container: container.name.clone(),
            waited,
            logs,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
