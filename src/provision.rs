use indexmap::IndexMap;
use tracing::{info, warn};

use crate::caddyfile;
use crate::compose;
use crate::config::DeploymentConfig;
use crate::docker::{ContainerStatus, Runtime};
use crate::error::{DeployError, DeployResult};
use crate::template;

/// Lifecycle of the managed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Absent,
    Created,
    Running,
    Healthy,
}

impl ContainerState {
    /// Map what the runtime reports onto the lifecycle.
    #[must_use]
    pub const fn from_status(status: &ContainerStatus) -> Option<Self> {
        match status {
            ContainerStatus::Created => Some(Self::Created),
            ContainerStatus::Running => Some(Self::Running),
            _ => None,
        }
    }
}

/// The container the provisioner left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedContainer {
    pub name: String,
    pub network: String,
    /// Host port actually published (the alternate one after a
    /// port-conflict retry).
    pub host_port: u16,
    pub labels: IndexMap<String, String>,
    pub state: ContainerState,
    /// Whether a previous container with the same name was removed.
    pub replaced_previous: bool,
}

/// Files rendered from a config, ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFiles {
    pub index_html: String,
    pub caddyfile: String,
    pub compose: String,
}

impl RenderedFiles {
    pub fn render(config: &DeploymentConfig, host_port: u16) -> DeployResult<Self> {
        Ok(Self {
            index_html: template::render(template::INDEX_HTML, &config.template_vars())?,
            caddyfile: caddyfile::render(config),
            compose: compose::render(config, host_port)?,
        })
    }
}

/// Applies the desired state: files on disk, one container running.
///
/// Redeploys replace rather than merge: an existing container with
/// the same name is force-removed first.
pub struct Provisioner<'a> {
    config: &'a DeploymentConfig,
    runtime: &'a dyn Runtime,
}

impl<'a> Provisioner<'a> {
    #[must_use]
    pub fn new(config: &'a DeploymentConfig, runtime: &'a dyn Runtime) -> Self {
        Self { config, runtime }
    }

    pub fn apply(&self) -> DeployResult<ProvisionedContainer> {
        let files = RenderedFiles::render(self.config, self.config.host_port)?;
        self.upload(&files)?;

        let replaced_previous = self.remove_previous()?;
        let host_port = match self.start() {
            Ok(()) => self.config.host_port,
            Err(e) => self.retry_on_alternate_port(e)?,
        };

        let status = self
            .runtime
            .container_status(&self.config.container_name)
            .map_err(|e| DeployError::ContainerCreateError(e.to_string()))?;
        let state = ContainerState::from_status(&status).ok_or_else(|| {
            DeployError::ContainerCreateError(format!(
                "container {} is {status} after start",
                self.config.container_name
            ))
        })?;

        info!(
            container = %self.config.container_name,
            host_port,
            ?state,
            "container provisioned"
        );

        Ok(ProvisionedContainer {
            name: self.config.container_name.clone(),
            network: self.config.network.clone(),
            host_port,
            labels: self.config.edge.labels(
                &self.config.container_name,
                &self.config.domain,
                &self.config.network,
                self.config.container_port,
            ),
            state,
            replaced_previous,
        })
    }

    fn upload(&self, files: &RenderedFiles) -> DeployResult<()> {
        let content_index = format!("{}/index.html", self.config.content_dir());
        self.runtime.write_file(&files.index_html, &content_index)?;
        self.runtime
            .write_file(&files.caddyfile, &self.config.caddyfile_path())?;
        self.runtime
            .write_file(&files.compose, &self.config.compose_path())?;
        info!(dir = %self.config.deploy_dir(), "deployment files written");
        Ok(())
    }

    fn remove_previous(&self) -> DeployResult<bool> {
        let name = &self.config.container_name;
        if self.runtime.container_exists(name)? {
            self.runtime.remove_container(name)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn start(&self) -> DeployResult<()> {
        self.runtime
            .compose_up(&self.config.compose_path(), &self.config.project_name())
            .map_err(|e| match e {
                DeployError::CommandFailed {
                    command, stderr, ..
                } => DeployError::ContainerCreateError(format!("{command}: {stderr}")),
                other => DeployError::ContainerCreateError(other.to_string()),
            })
    }

    /// A port conflict is retried exactly once, and only when an
    /// alternate port is configured.
    fn retry_on_alternate_port(&self, err: DeployError) -> DeployResult<u16> {
        let Some(alternate) = self.config.alternate_port else {
            return Err(err);
        };
        if !err.is_port_conflict() {
            return Err(err);
        }

        warn!(
            port = self.config.host_port,
            alternate, "host port in use, retrying on alternate port"
        );
        let files = RenderedFiles::render(self.config, alternate)?;
        self.runtime
            .write_file(&files.compose, &self.config.compose_path())?;
        // The failed attempt may leave a created-but-stopped container.
        self.remove_previous()?;
        self.start()?;
        Ok(alternate)
    }
}
