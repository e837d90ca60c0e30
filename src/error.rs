use std::process::ExitStatus;
use std::time::Duration;

pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("configuration missing: {0}")]
    ConfigMissing(String),

    #[error("decryption failed: {0}")]
    DecryptionError(String),

    #[error("required value missing: {0}")]
    MissingRequiredValue(String),

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("container runtime unreachable: {0}")]
    RuntimeUnreachable(String),

    #[error("shared network not found: {0}")]
    NetworkNotFound(String),

    #[error("template render failed: {0}")]
    TemplateRenderError(String),

    #[error("container create failed: {0}")]
    ContainerCreateError(String),

    #[error(
        "container '{container}' not ready after {}s\n\
         --- recent logs ---\n{logs}",
        waited.as_secs()
    )]
    ReadinessTimeout {
        container: String,
        waited: Duration,
        logs: String,
    },

    #[error("integration checks failed: {}", failed.join(", "))]
    IntegrationCheckFailure { failed: Vec<String> },

    #[error("command failed: {command}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("SSH connection failed: {0}")]
    SshFailed(String),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl DeployError {
    /// Whether a failed container start was caused by the host port
    /// already being taken.
    #[must_use]
    pub fn is_port_conflict(&self) -> bool {
        let text = match self {
            Self::CommandFailed { stderr, .. } => stderr.as_str(),
            Self::ContainerCreateError(msg) => msg.as_str(),
            _ => return false,
        };
        let text = text.to_ascii_lowercase();
        text.contains("port is already allocated") || text.contains("address already in use")
    }
}
