use crate::cmd;
use crate::error::{DeployError, DeployResult};
use crate::host::Host;

/// SSH session wrapper for executing commands and writing files on
/// a remote host.
#[derive(Debug, Clone)]
pub struct SshSession {
    destination: String,
    key: Option<String>,
}

impl SshSession {
    #[must_use]
    pub fn new(host: &str, user: &str) -> Self {
        Self {
            destination: format!("{user}@{host}"),
            key: None,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key_path: &str) -> Self {
        self.key = Some(key_path.to_string());
        self
    }

    /// Arguments passed to `ssh` for `command`, in order.
    #[must_use]
    pub fn ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        if let Some(key) = &self.key {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args.push(self.destination.clone());
        args.push(command.to_string());
        args
    }

    /// Map a transport failure (exit status 255) to `SshFailed`.
    /// Failures of the remote command itself pass through untouched.
    fn classify(&self, err: DeployError) -> DeployError {
        match err {
            DeployError::CommandFailed { status, stderr, .. } if status.code() == Some(255) => {
                DeployError::SshFailed(format!("{}: {stderr}", self.destination))
            }
            other => other,
        }
    }
}

impl Host for SshSession {
    fn name(&self) -> &str {
        &self.destination
    }

    fn exec(&self, command: &str) -> DeployResult<String> {
        let args = self.ssh_args(command);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        cmd::run("ssh", &refs).map_err(|e| self.classify(e))
    }

    fn write_file(&self, content: &str, remote_path: &str) -> DeployResult<()> {
        let command = format!("cat > {}", cmd::shell_quote(remote_path));
        let args = self.ssh_args(&command);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        cmd::run_with_stdin("ssh", &refs, content.as_bytes()).map_err(|e| self.classify(e))?;
        Ok(())
    }
}
