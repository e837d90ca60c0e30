//! Integration checks against an already deployed target.
//!
//! Unlike the provisioning pipeline, nothing here stops at the first
//! failure: every check runs and the report lists them all.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::DeploymentConfig;
use crate::docker::{ContainerStatus, Runtime};
use crate::error::{DeployError, DeployResult};
use crate::probe::Probe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Container,
    Network,
    Ssl,
    Diagnostics,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Container => "container",
            Self::Network => "network",
            Self::Ssl => "ssl",
            Self::Diagnostics => "diagnostics",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: detail.into(),
        }
    }

    fn from_result(name: &str, result: DeployResult<String>) -> Self {
        match result {
            Ok(detail) => Self::pass(name, detail),
            Err(e) => Self::fail(name, e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryReport {
    pub category: Category,
    pub checks: Vec<CheckResult>,
}

impl CategoryReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrationReport {
    pub domain: String,
    pub container: String,
    pub generated_at: DateTime<Utc>,
    pub categories: Vec<CategoryReport>,
    /// Recent container logs, when they could be collected.
    pub logs: Option<String>,
}

impl IntegrationReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.categories.iter().all(CategoryReport::passed)
    }

    #[must_use]
    pub fn category(&self, category: Category) -> Option<&CategoryReport> {
        self.categories.iter().find(|c| c.category == category)
    }

    /// `category/check` names of every failed check.
    #[must_use]
    pub fn failures(&self) -> Vec<String> {
        self.categories
            .iter()
            .flat_map(|c| {
                c.checks
                    .iter()
                    .filter(|check| !check.passed)
                    .map(move |check| format!("{}/{}", c.category, check.name))
            })
            .collect()
    }

    /// `Ok` when everything passed, `IntegrationCheckFailure` naming
    /// the failed checks otherwise.
    pub fn into_result(self) -> DeployResult<Self> {
        if self.passed() {
            Ok(self)
        } else {
            Err(DeployError::IntegrationCheckFailure {
                failed: self.failures(),
            })
        }
    }
}

impl fmt::Display for IntegrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Integration report for {} ({})", self.domain, self.container)?;
        for category in &self.categories {
            let mark = if category.passed() { "PASS" } else { "FAIL" };
            writeln!(f, "[{mark}] {}", category.category)?;
            for check in &category.checks {
                let mark = if check.passed { "ok" } else { "FAILED" };
                writeln!(f, "    {:<24} {mark:<6} {}", check.name, check.detail)?;
            }
        }
        if let Some(logs) = &self.logs {
            writeln!(f, "--- recent logs ---")?;
            writeln!(f, "{logs}")?;
        }
        Ok(())
    }
}

/// Runs every check category against a deployed target.
pub struct IntegrationRunner<'a> {
    config: &'a DeploymentConfig,
    runtime: &'a dyn Runtime,
    /// Requests issued from outside the target, as a visitor would.
    external: &'a dyn Probe,
}

impl<'a> IntegrationRunner<'a> {
    #[must_use]
    pub fn new(
        config: &'a DeploymentConfig,
        runtime: &'a dyn Runtime,
        external: &'a dyn Probe,
    ) -> Self {
        Self {
            config,
            runtime,
            external,
        }
    }

    #[must_use]
    pub fn run(&self) -> IntegrationReport {
        let (diagnostics, logs) = self.diagnostics();
        let categories = vec![
            CategoryReport {
                category: Category::Container,
                checks: self.container_checks(),
            },
            CategoryReport {
                category: Category::Network,
                checks: self.network_checks(),
            },
            CategoryReport {
                category: Category::Ssl,
                checks: self.ssl_checks(),
            },
            CategoryReport {
                category: Category::Diagnostics,
                checks: diagnostics,
            },
        ];

        for category in &categories {
            if category.passed() {
                info!(category = %category.category, "checks passed");
            } else {
                warn!(category = %category.category, "checks failed");
            }
        }

        IntegrationReport {
            domain: self.config.domain.clone(),
            container: self.config.container_name.clone(),
            generated_at: Utc::now(),
            categories,
            logs,
        }
    }

    fn container_checks(&self) -> Vec<CheckResult> {
        let name = &self.config.container_name;

        match self.runtime.container_exists(name) {
            Ok(true) => {}
            Ok(false) => return vec![CheckResult::fail("exists", format!("{name} not found"))],
            Err(e) => return vec![CheckResult::fail("exists", e.to_string())],
        }

        let running = match self.runtime.container_status(name) {
            Ok(ContainerStatus::Running) => CheckResult::pass("running", "running"),
            Ok(other) => CheckResult::fail("running", format!("state is {other}")),
            Err(e) => CheckResult::fail("running", e.to_string()),
        };

        let restart = match self.runtime.restart_policy(name) {
            Ok(policy) if policy == "unless-stopped" => CheckResult::pass("restart_policy", policy),
            Ok(policy) => CheckResult::fail(
                "restart_policy",
                format!("expected unless-stopped, found '{policy}'"),
            ),
            Err(e) => CheckResult::fail("restart_policy", e.to_string()),
        };

        vec![CheckResult::pass("exists", name.clone()), running, restart]
    }

    fn network_checks(&self) -> Vec<CheckResult> {
        let network = &self.config.network;
        let name = &self.config.container_name;

        let present = CheckResult::from_result(
            "shared_network",
            self.runtime.networks().and_then(|nets| {
                if nets.iter().any(|n| n == network) {
                    Ok(network.clone())
                } else {
                    Err(DeployError::NetworkNotFound(network.clone()))
                }
            }),
        );

        let attached = CheckResult::from_result(
            "attached",
            self.runtime.container_networks(name).and_then(|nets| {
                if nets.iter().any(|n| n == network) {
                    Ok(format!("{name} on {network}"))
                } else {
                    Err(DeployError::Other(format!(
                        "{name} attached to [{}], not {network}",
                        nets.join(", ")
                    )))
                }
            }),
        );

        let url = format!("http://{name}:{}/", self.config.container_port);
        let reachable = CheckResult::from_result(
            "in_network_http",
            self.runtime
                .fetch_in_network(network, &self.config.probe_image, &url)
                .and_then(|status| {
                    if status == 200 {
                        Ok(format!("{url} -> {status}"))
                    } else {
                        Err(DeployError::Other(format!("{url} -> {status}")))
                    }
                }),
        );

        vec![present, attached, reachable]
    }

    fn ssl_checks(&self) -> Vec<CheckResult> {
        let domain = &self.config.domain;

        let http_url = format!("http://{domain}/");
        let redirect = CheckResult::from_result(
            "http_redirect",
            self.external.fetch(&http_url).and_then(|resp| {
                match resp.redirect.as_deref() {
                    Some(location) if resp.is_redirect() && location.starts_with("https://") => {
                        Ok(format!("{} -> {location}", resp.status))
                    }
                    location => Err(DeployError::Other(format!(
                        "expected redirect to https, got {} {}",
                        resp.status,
                        location.unwrap_or("(no location)")
                    ))),
                }
            }),
        );

        let https_url = format!("https://{domain}/");
        let (certificate, content) = match self.external.fetch(&https_url) {
            Ok(resp) => {
                let certificate = if resp.status == 200 {
                    CheckResult::pass("certificate", format!("verified, status {}", resp.status))
                } else {
                    CheckResult::fail(
                        "certificate",
                        format!("verified, but status {}", resp.status),
                    )
                };
                let expected = &self.config.readiness.expected_content;
                let content = if resp.body.contains(expected.as_str()) {
                    CheckResult::pass("content", format!("contains '{expected}'"))
                } else {
                    CheckResult::fail("content", format!("missing '{expected}'"))
                };
                (certificate, content)
            }
            Err(e) => (
                CheckResult::fail("certificate", e.to_string()),
                CheckResult::fail("content", "https request failed"),
            ),
        };

        vec![redirect, certificate, content]
    }

    fn diagnostics(&self) -> (Vec<CheckResult>, Option<String>) {
        let version = CheckResult::from_result("runtime_version", self.runtime.version());

        let (logs_check, logs) = match self
            .runtime
            .logs_tail(&self.config.container_name, self.config.readiness.log_tail)
        {
            Ok(logs) => (
                CheckResult::pass("logs", format!("{} lines collected", logs.lines().count())),
                Some(logs),
            ),
            Err(e) => (CheckResult::fail("logs", e.to_string()), None),
        };

        (vec![version, logs_check], logs)
    }
}
