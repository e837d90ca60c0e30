use std::fmt;

use tracing::{debug, info};

use crate::cmd::shell_quote;
use crate::error::{DeployError, DeployResult};
use crate::host::Host;

/// Lifecycle state reported by `docker inspect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
    Other(String),
}

impl ContainerStatus {
    #[must_use]
    pub fn parse(status: &str) -> Self {
        match status.trim() {
            "created" => Self::Created,
            "running" => Self::Running,
            "restarting" => Self::Restarting,
            "paused" => Self::Paused,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Paused => "paused",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Other(s) => s,
        };
        f.write_str(s)
    }
}

/// The container runtime of the deploy target, plus the filesystem
/// operations needed to stage files next to it.
pub trait Runtime {
    /// Server version; fails when the daemon does not answer.
    fn version(&self) -> DeployResult<String>;

    fn networks(&self) -> DeployResult<Vec<String>>;

    /// `mkdir -p`.
    fn ensure_dir(&self, path: &str) -> DeployResult<()>;

    fn write_file(&self, content: &str, path: &str) -> DeployResult<()>;

    fn container_exists(&self, name: &str) -> DeployResult<bool>;

    /// Force-remove a container, running or not.
    fn remove_container(&self, name: &str) -> DeployResult<()>;

    /// `docker compose up -d` for a compose file.
    fn compose_up(&self, compose_file: &str, project: &str) -> DeployResult<()>;

    fn container_status(&self, name: &str) -> DeployResult<ContainerStatus>;

    fn restart_policy(&self, name: &str) -> DeployResult<String>;

    /// Names of the networks the container is attached to.
    fn container_networks(&self, name: &str) -> DeployResult<Vec<String>>;

    /// The container's address on `network`, if attached.
    fn container_ip(&self, name: &str, network: &str) -> DeployResult<Option<String>>;

    /// Last `lines` lines of combined stdout/stderr.
    fn logs_tail(&self, name: &str, lines: u32) -> DeployResult<String>;

    /// HTTP status of `url` as seen from a throwaway container on
    /// `network`.
    fn fetch_in_network(&self, network: &str, image: &str, url: &str) -> DeployResult<u16>;
}

/// [`Runtime`] backed by the `docker` CLI on any [`Host`].
#[derive(Debug, Clone)]
pub struct DockerCli<H: Host> {
    host: H,
}

impl<H: Host> DockerCli<H> {
    #[must_use]
    pub const fn new(host: H) -> Self {
        Self { host }
    }

    fn docker(&self, args: &str) -> DeployResult<String> {
        let command = format!("docker {args}");
        debug!(host = self.host.name(), %command, "docker");
        self.host.exec(&command)
    }

    fn inspect(&self, name: &str, template: &str) -> DeployResult<String> {
        self.docker(&format!(
            "inspect --format {} {}",
            shell_quote(template),
            shell_quote(name)
        ))
    }
}

impl<H: Host> Runtime for DockerCli<H> {
    fn version(&self) -> DeployResult<String> {
        self.docker("version --format '{{.Server.Version}}'")
    }

    fn networks(&self) -> DeployResult<Vec<String>> {
        let out = self.docker("network ls --format '{{.Name}}'")?;
        Ok(lines(&out))
    }

    fn ensure_dir(&self, path: &str) -> DeployResult<()> {
        self.host.exec(&format!("mkdir -p {}", shell_quote(path)))?;
        Ok(())
    }

    fn write_file(&self, content: &str, path: &str) -> DeployResult<()> {
        self.host.write_file(content, path)
    }

    fn container_exists(&self, name: &str) -> DeployResult<bool> {
        let out = self.docker(&format!(
            "ps -a --filter {} --format '{{{{.Names}}}}'",
            shell_quote(&format!("name=^/{name}$"))
        ))?;
        Ok(out.lines().any(|l| l.trim() == name))
    }

    fn remove_container(&self, name: &str) -> DeployResult<()> {
        info!(container = name, "removing container");
        self.docker(&format!("rm -f {}", shell_quote(name)))?;
        Ok(())
    }

    fn compose_up(&self, compose_file: &str, project: &str) -> DeployResult<()> {
        info!(compose_file, project, "starting compose project");
        self.docker(&format!(
            "compose -f {} -p {} up -d",
            shell_quote(compose_file),
            shell_quote(project)
        ))?;
        Ok(())
    }

    fn container_status(&self, name: &str) -> DeployResult<ContainerStatus> {
        let out = self.inspect(name, "{{.State.Status}}")?;
        Ok(ContainerStatus::parse(&out))
    }

    fn restart_policy(&self, name: &str) -> DeployResult<String> {
        self.inspect(name, "{{.HostConfig.RestartPolicy.Name}}")
    }

    fn container_networks(&self, name: &str) -> DeployResult<Vec<String>> {
        let out = self.inspect(
            name,
            "{{range $k, $v := .NetworkSettings.Networks}}{{println $k}}{{end}}",
        )?;
        Ok(lines(&out))
    }

    fn container_ip(&self, name: &str, network: &str) -> DeployResult<Option<String>> {
        let template = format!(
            "{{{{with index .NetworkSettings.Networks \"{network}\"}}}}\
             {{{{.IPAddress}}}}{{{{end}}}}"
        );
        let out = self.inspect(name, &template)?;
        let ip = out.trim();
        Ok((!ip.is_empty()).then(|| ip.to_string()))
    }

    fn logs_tail(&self, name: &str, lines: u32) -> DeployResult<String> {
        self.docker(&format!("logs --tail {lines} {} 2>&1", shell_quote(name)))
    }

    fn fetch_in_network(&self, network: &str, image: &str, url: &str) -> DeployResult<u16> {
        let out = self.docker(&format!(
            "run --rm --network {} {} -s -o /dev/null --max-time 5 -w '%{{http_code}}' {}",
            shell_quote(network),
            shell_quote(image),
            shell_quote(url)
        ))?;
        out.trim()
            .parse()
            .map_err(|_| DeployError::Other(format!("unexpected status output from probe: {out}")))
    }
}

fn lines(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;

    /// Replays canned outputs and records every command.
    #[derive(Default)]
    struct Recorder {
        commands: RefCell<Vec<String>>,
        outputs: RefCell<VecDeque<String>>,
    }

    impl Recorder {
        fn replying(outputs: &[&str]) -> Self {
            Self {
                commands: RefCell::default(),
                outputs: RefCell::new(outputs.iter().map(ToString::to_string).collect()),
            }
        }

        fn last(&self) -> String {
            self.commands.borrow().last().cloned().unwrap_or_default()
        }
    }

    impl Host for &Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn exec(&self, command: &str) -> DeployResult<String> {
            self.commands.borrow_mut().push(command.to_string());
            Ok(self.outputs.borrow_mut().pop_front().unwrap_or_default())
        }

        fn write_file(&self, _content: &str, path: &str) -> DeployResult<()> {
            self.commands.borrow_mut().push(format!("write {path}"));
            Ok(())
        }
    }

    #[test]
    fn status_parse_and_display() {
        assert_eq!(ContainerStatus::parse("running\n"), ContainerStatus::Running);
        assert_eq!(
            ContainerStatus::parse("removing"),
            ContainerStatus::Other("removing".into())
        );
        assert_eq!(ContainerStatus::Exited.to_string(), "exited");
    }

    #[test]
    fn version_query() {
        let rec = Recorder::replying(&["27.1.1"]);
        let docker = DockerCli::new(&rec);

        assert_eq!(docker.version().expect("version"), "27.1.1");
        assert_eq!(rec.last(), "docker version --format '{{.Server.Version}}'");
    }

    #[test]
    fn networks_split_lines() {
        let rec = Recorder::replying(&["bridge\nhost\nproxy\n"]);
        let docker = DockerCli::new(&rec);

        assert_eq!(
            docker.networks().expect("networks"),
            vec!["bridge", "host", "proxy"]
        );
    }

    #[test]
    fn exists_requires_exact_name() {
        let rec = Recorder::replying(&["static-web-example.com.old"]);
        let docker = DockerCli::new(&rec);

        assert!(!docker.container_exists("static-web-example.com").expect("ps"));
        assert!(rec.last().contains("'name=^/static-web-example.com$'"));
        assert!(rec.last().contains("--format '{{.Names}}'"));
    }

    #[test]
    fn remove_is_forced() {
        let rec = Recorder::default();
        let docker = DockerCli::new(&rec);

        docker.remove_container("static-web-a.io").expect("rm");

        assert_eq!(rec.last(), "docker rm -f 'static-web-a.io'");
    }

    #[test]
    fn compose_up_uses_file_and_project() {
        let rec = Recorder::default();
        let docker = DockerCli::new(&rec);

        docker
            .compose_up("/opt/x/docker-compose.yml", "static-web-a-io")
            .expect("up");

        assert_eq!(
            rec.last(),
            "docker compose -f '/opt/x/docker-compose.yml' -p 'static-web-a-io' up -d"
        );
    }

    #[test]
    fn container_ip_template() {
        let rec = Recorder::replying(&["172.20.0.5"]);
        let docker = DockerCli::new(&rec);

        let ip = docker.container_ip("web", "proxy").expect("inspect");

        assert_eq!(ip.as_deref(), Some("172.20.0.5"));
        assert!(rec.last().contains(
            "'{{with index .NetworkSettings.Networks \"proxy\"}}{{.IPAddress}}{{end}}'"
        ));
    }

    #[test]
    fn container_ip_absent() {
        let rec = Recorder::replying(&[""]);
        let docker = DockerCli::new(&rec);

        assert_eq!(docker.container_ip("web", "proxy").expect("inspect"), None);
    }

    #[test]
    fn in_network_fetch_parses_status() {
        let rec = Recorder::replying(&["200"]);
        let docker = DockerCli::new(&rec);

        let status = docker
            .fetch_in_network("proxy", "curlimages/curl:latest", "http://web:80/")
            .expect("fetch");

        assert_eq!(status, 200);
        assert!(rec.last().contains("-w '%{http_code}'"));
        assert!(rec.last().contains("--network 'proxy'"));
    }

    #[test]
    fn logs_tail_merges_stderr() {
        let rec = Recorder::replying(&["line"]);
        let docker = DockerCli::new(&rec);

        docker.logs_tail("web", 20).expect("logs");

        assert_eq!(rec.last(), "docker logs --tail 20 'web' 2>&1");
    }
}
