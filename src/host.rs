use crate::cmd;
use crate::error::DeployResult;

/// A machine that can run shell commands and receive files.
///
/// Implemented by [`SshSession`](crate::ssh::SshSession) for the
/// deploy target and by [`LocalHost`] for the control machine.
pub trait Host {
    /// Human-readable identity, used in log fields.
    fn name(&self) -> &str;

    /// Execute a shell command and capture its trimmed stdout.
    fn exec(&self, command: &str) -> DeployResult<String>;

    /// Write `content` to `path`, replacing any existing file.
    fn write_file(&self, content: &str, path: &str) -> DeployResult<()>;
}

/// The machine this process runs on.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalHost;

impl Host for LocalHost {
    fn name(&self) -> &str {
        "localhost"
    }

    fn exec(&self, command: &str) -> DeployResult<String> {
        cmd::run_shell(command)
    }

    fn write_file(&self, content: &str, path: &str) -> DeployResult<()> {
        std::fs::write(path, content)?;
        Ok(())
    }
}
