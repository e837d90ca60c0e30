use tracing::info;

use crate::config::DeploymentConfig;
use crate::docker::Runtime;
use crate::error::{DeployError, DeployResult};

/// Facts gathered by a successful preflight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    pub runtime_version: String,
    pub network: String,
    pub directories: Vec<String>,
}

/// Checks the target before anything is changed on it.
///
/// Every check is fail-fast and none is retried: the first failure
/// aborts the run with a named error.
pub struct Preflight<'a> {
    config: &'a DeploymentConfig,
    runtime: &'a dyn Runtime,
}

impl<'a> Preflight<'a> {
    #[must_use]
    pub fn new(config: &'a DeploymentConfig, runtime: &'a dyn Runtime) -> Self {
        Self { config, runtime }
    }

    pub fn run(&self) -> DeployResult<PreflightReport> {
        let runtime_version = self.check_runtime()?;
        self.check_network()?;
        let directories = self.ensure_directories()?;

        Ok(PreflightReport {
            runtime_version,
            network: self.config.network.clone(),
            directories,
        })
    }

    fn check_runtime(&self) -> DeployResult<String> {
        let version = self
            .runtime
            .version()
            .map_err(|e| DeployError::RuntimeUnreachable(e.to_string()))?;
        info!(version = %version, "container runtime reachable");
        Ok(version)
    }

    /// The shared network belongs to the edge proxy and is never
    /// created here.
    fn check_network(&self) -> DeployResult<()> {
        let networks = self.runtime.networks()?;
        if networks.iter().any(|n| n == &self.config.network) {
            info!(network = %self.config.network, "shared network present");
            Ok(())
        } else {
            Err(DeployError::NetworkNotFound(self.config.network.clone()))
        }
    }

    fn ensure_directories(&self) -> DeployResult<Vec<String>> {
        let dirs = vec![self.config.deploy_dir(), self.config.content_dir()];
        for dir in &dirs {
            self.runtime.ensure_dir(dir)?;
        }
        info!(dir = %self.config.deploy_dir(), "deploy directories ready");
        Ok(dirs)
    }
}
