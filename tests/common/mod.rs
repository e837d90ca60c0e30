//! In-memory stand-ins for the deploy target, shared by the
//! integration tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use berth::config::{Defaults, Layer, Resolver};
use berth::docker::{ContainerStatus, Runtime};
use berth::error::{DeployError, DeployResult};
use berth::pipeline::{Connector, Target};
use berth::probe::{HttpResponse, Probe};
use berth::secrets::{Decryptor, SecretBundle};
use berth::{Clock, DeploymentConfig};
use docker_compose_types::{Compose, Labels, Networks, Ports};
use indexmap::IndexMap;
use tempfile::TempDir;

pub const DOMAIN: &str = "example.test";
pub const CONTAINER: &str = "static-web-example.test";

/// Minimal valid layer on top of the defaults.
pub fn base_layer() -> Layer {
    [("server_address", "203.0.113.10"), ("domain", DOMAIN)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn config_with(extra: &[(&str, &str)]) -> DeploymentConfig {
    let mut layer = base_layer();
    for (k, v) in extra {
        layer.insert((*k).to_string(), (*v).to_string());
    }
    Resolver::new()
        .source(&Defaults)
        .source(&layer)
        .resolve()
        .expect("test config resolves")
}

pub fn config() -> DeploymentConfig {
    config_with(&[])
}

// --- secrets ---

pub const VAULT_CIPHERTEXT: &str = "$ANSIBLE_VAULT;1.1;AES256\n\
    36383566343036363364663665306362386136653430373962336262316438636366\n";

pub const VAULT_PLAINTEXT: &str = "\
vault_server_address: 203.0.113.10
vault_domain: example.test
vault_email: ops@example.test
";

/// An encrypted-looking vault plus password file in a temp dir.
pub fn vault_dir() -> (TempDir, SecretBundle) {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("vault.yml"), VAULT_CIPHERTEXT).expect("write vault");
    fs::write(dir.path().join(".vault_pass"), "hunter2\n").expect("write password");
    let bundle = SecretBundle::new(dir.path().join("vault.yml"), dir.path().join(".vault_pass"));
    (dir, bundle)
}

/// Returns a fixed plaintext, or fails like `ansible-vault` would.
#[derive(Clone)]
pub struct FakeDecryptor {
    plaintext: Result<String, String>,
    pub calls: Rc<Cell<u32>>,
}

impl FakeDecryptor {
    pub fn ok(plaintext: &str) -> Self {
        Self {
            plaintext: Ok(plaintext.to_string()),
            calls: Rc::default(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            plaintext: Err(message.to_string()),
            calls: Rc::default(),
        }
    }
}

impl Decryptor for FakeDecryptor {
    fn decrypt(&self, _vault_file: &Path, _password_file: &Path) -> DeployResult<String> {
        self.calls.set(self.calls.get() + 1);
        self.plaintext.clone().map_err(DeployError::Other)
    }
}

// --- clock ---

#[derive(Default)]
struct ClockState {
    now: Cell<Duration>,
    sleeps: RefCell<Vec<Duration>>,
}

/// Time advances only when something sleeps.
#[derive(Clone, Default)]
pub struct FakeClock(Rc<ClockState>);

impl FakeClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.0.sleeps.borrow().clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.0.sleeps.borrow().iter().sum()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        self.0.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.0.now.set(self.0.now.get() + duration);
        self.0.sleeps.borrow_mut().push(duration);
    }
}

// --- probes ---

pub fn response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        body: body.to_string(),
        redirect: None,
    }
}

/// Serves 503 until the clock reaches `ready_at`, then the page.
#[derive(Clone)]
pub struct ReadyAt {
    clock: FakeClock,
    ready_at: Option<Duration>,
    body: String,
    pub requests: Rc<RefCell<Vec<String>>>,
}

impl ReadyAt {
    pub fn new(clock: &FakeClock, ready_at: Duration, body: &str) -> Self {
        Self {
            clock: clock.clone(),
            ready_at: Some(ready_at),
            body: body.to_string(),
            requests: Rc::default(),
        }
    }

    pub fn never(clock: &FakeClock) -> Self {
        Self {
            clock: clock.clone(),
            ready_at: None,
            body: String::new(),
            requests: Rc::default(),
        }
    }
}

impl Probe for ReadyAt {
    fn fetch(&self, url: &str) -> DeployResult<HttpResponse> {
        self.requests.borrow_mut().push(url.to_string());
        match self.ready_at {
            Some(at) if self.clock.now() >= at => Ok(response(200, &self.body)),
            _ => Ok(response(503, "starting")),
        }
    }
}

/// Answers by URL from a fixed table; unknown URLs fail to connect.
#[derive(Clone, Default)]
pub struct TableProbe {
    responses: Rc<RefCell<IndexMap<String, HttpResponse>>>,
}

impl TableProbe {
    pub fn with(self, url: &str, resp: HttpResponse) -> Self {
        self.responses.borrow_mut().insert(url.to_string(), resp);
        self
    }

    /// A healthy edge: HTTP redirects to HTTPS, HTTPS serves `body`.
    pub fn healthy_edge(domain: &str, body: &str) -> Self {
        Self::default()
            .with(
                &format!("http://{domain}/"),
                HttpResponse {
                    status: 308,
                    body: String::new(),
                    redirect: Some(format!("https://{domain}/")),
                },
            )
            .with(&format!("https://{domain}/"), response(200, body))
    }
}

impl Probe for TableProbe {
    fn fetch(&self, url: &str) -> DeployResult<HttpResponse> {
        self.responses
            .borrow()
            .get(url)
            .cloned()
            .ok_or_else(|| DeployError::Other(format!("connection refused: {url}")))
    }
}

// --- runtime ---

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub image: String,
    pub status: ContainerStatus,
    pub host_port: u16,
    pub restart: String,
    pub networks: Vec<String>,
    pub labels: IndexMap<String, String>,
    pub ip: String,
}

#[derive(Debug)]
pub struct RuntimeState {
    pub daemon_up: bool,
    pub networks: Vec<String>,
    pub dirs: Vec<String>,
    pub files: IndexMap<String, String>,
    pub containers: IndexMap<String, FakeContainer>,
    /// Host ports held by something other than the managed container.
    pub busy_ports: Vec<u16>,
    /// Status a container lands in after `compose up`.
    pub start_status: ContainerStatus,
    pub logs: String,
    /// Every mutating call, in order.
    pub calls: Vec<String>,
    pub created: u32,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            daemon_up: true,
            networks: vec!["bridge".into(), "proxy".into()],
            dirs: Vec::new(),
            files: IndexMap::new(),
            containers: IndexMap::new(),
            busy_ports: Vec::new(),
            start_status: ContainerStatus::Running,
            logs: "caddy: serving initial configuration".into(),
            calls: Vec::new(),
            created: 0,
        }
    }
}

/// A Docker host in memory. `compose_up` reads back the compose file
/// written through [`Runtime::write_file`], so the rendered YAML is
/// what actually decides the container's shape.
#[derive(Clone, Default)]
pub struct FakeRuntime(pub Rc<RefCell<RuntimeState>>);

impl FakeRuntime {
    pub fn without_network() -> Self {
        let rt = Self::default();
        rt.0.borrow_mut().networks.retain(|n| n != "proxy");
        rt
    }

    pub fn daemon_down() -> Self {
        let rt = Self::default();
        rt.0.borrow_mut().daemon_up = false;
        rt
    }

    pub fn state(&self) -> std::cell::Ref<'_, RuntimeState> {
        self.0.borrow()
    }

    pub fn state_mut(&self) -> std::cell::RefMut<'_, RuntimeState> {
        self.0.borrow_mut()
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.borrow().calls.clone()
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.0.borrow().containers.get(name).cloned()
    }

    fn record(&self, call: String) {
        self.0.borrow_mut().calls.push(call);
    }

    fn daemon(&self) -> DeployResult<()> {
        if self.0.borrow().daemon_up {
            Ok(())
        } else {
            Err(DeployError::Other(
                "Cannot connect to the Docker daemon at unix:///var/run/docker.sock".into(),
            ))
        }
    }
}

impl Runtime for FakeRuntime {
    fn version(&self) -> DeployResult<String> {
        self.daemon()?;
        Ok("27.3.1".into())
    }

    fn networks(&self) -> DeployResult<Vec<String>> {
        self.daemon()?;
        Ok(self.0.borrow().networks.clone())
    }

    fn ensure_dir(&self, path: &str) -> DeployResult<()> {
        self.record(format!("mkdir {path}"));
        let mut state = self.0.borrow_mut();
        if !state.dirs.iter().any(|d| d == path) {
            state.dirs.push(path.to_string());
        }
        Ok(())
    }

    fn write_file(&self, content: &str, path: &str) -> DeployResult<()> {
        self.record(format!("write {path}"));
        self.0
            .borrow_mut()
            .files
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    fn container_exists(&self, name: &str) -> DeployResult<bool> {
        self.daemon()?;
        Ok(self.0.borrow().containers.contains_key(name))
    }

    fn remove_container(&self, name: &str) -> DeployResult<()> {
        self.record(format!("rm {name}"));
        self.0.borrow_mut().containers.shift_remove(name);
        Ok(())
    }

    fn compose_up(&self, compose_file: &str, project: &str) -> DeployResult<()> {
        self.daemon()?;
        self.record(format!("up {project}"));

        let yaml = self
            .0
            .borrow()
            .files
            .get(compose_file)
            .cloned()
            .ok_or_else(|| DeployError::Other(format!("no such file: {compose_file}")))?;
        let compose: Compose = serde_yaml::from_str(&yaml)?;
        let service = compose
            .services
            .0
            .values()
            .next()
            .and_then(Clone::clone)
            .ok_or_else(|| DeployError::Other("no services".into()))?;

        let name = service.container_name.unwrap_or_default();
        let host_port = match &service.ports {
            Ports::Short(ports) => ports
                .first()
                .and_then(|p| p.split(':').next())
                .and_then(|p| p.parse().ok())
                .unwrap_or_default(),
            _ => 0,
        };
        let networks = match &service.networks {
            Networks::Simple(nets) => nets.clone(),
            _ => Vec::new(),
        };
        let labels = match &service.labels {
            Labels::Map(map) => map.clone(),
            _ => IndexMap::new(),
        };

        let mut state = self.0.borrow_mut();
        if state.containers.contains_key(&name) {
            return Err(DeployError::Other(format!(
                "Conflict. The container name \"/{name}\" is already in use"
            )));
        }
        state.created += 1;
        let busy = state.busy_ports.contains(&host_port);
        let container = FakeContainer {
            image: service.image.unwrap_or_default(),
            status: if busy {
                ContainerStatus::Created
            } else {
                state.start_status.clone()
            },
            host_port,
            restart: service.restart.unwrap_or_else(|| "no".into()),
            networks,
            labels,
            ip: format!("172.18.0.{}", state.created + 1),
        };
        state.containers.insert(name, container);

        if busy {
            return Err(DeployError::Other(format!(
                "Error starting userland proxy: listen tcp4 0.0.0.0:{host_port}: \
                 bind: address already in use; port is already allocated"
            )));
        }
        Ok(())
    }

    fn container_status(&self, name: &str) -> DeployResult<ContainerStatus> {
        self.daemon()?;
        self.0
            .borrow()
            .containers
            .get(name)
            .map(|c| c.status.clone())
            .ok_or_else(|| DeployError::Other(format!("No such container: {name}")))
    }

    fn restart_policy(&self, name: &str) -> DeployResult<String> {
        self.container(name)
            .map(|c| c.restart)
            .ok_or_else(|| DeployError::Other(format!("No such container: {name}")))
    }

    fn container_networks(&self, name: &str) -> DeployResult<Vec<String>> {
        self.container(name)
            .map(|c| c.networks)
            .ok_or_else(|| DeployError::Other(format!("No such container: {name}")))
    }

    fn container_ip(&self, name: &str, network: &str) -> DeployResult<Option<String>> {
        Ok(self
            .container(name)
            .filter(|c| c.networks.iter().any(|n| n == network))
            .map(|c| c.ip))
    }

    fn logs_tail(&self, name: &str, lines: u32) -> DeployResult<String> {
        self.container(name)
            .ok_or_else(|| DeployError::Other(format!("No such container: {name}")))?;
        let logs = self.0.borrow().logs.clone();
        let all: Vec<&str> = logs.lines().collect();
        let keep = all.len().saturating_sub(lines as usize);
        Ok(all[keep..].join("\n"))
    }

    fn fetch_in_network(&self, network: &str, _image: &str, url: &str) -> DeployResult<u16> {
        let state = self.0.borrow();
        let reachable = state.containers.iter().any(|(name, c)| {
            url.contains(name.as_str())
                && c.status == ContainerStatus::Running
                && c.networks.iter().any(|n| n == network)
        });
        Ok(if reachable { 200 } else { 0 })
    }
}

// --- connector ---

/// Hands out the same fakes on every connect and counts connects.
#[derive(Clone)]
pub struct FakeConnector<P: Probe + Clone, E: Probe + Clone> {
    pub runtime: FakeRuntime,
    pub probe: P,
    pub external: E,
    pub connects: Rc<Cell<u32>>,
}

impl<P: Probe + Clone, E: Probe + Clone> FakeConnector<P, E> {
    pub fn new(runtime: &FakeRuntime, probe: P, external: E) -> Self {
        Self {
            runtime: runtime.clone(),
            probe,
            external,
            connects: Rc::default(),
        }
    }
}

impl<P, E> Connector for FakeConnector<P, E>
where
    P: Probe + Clone + 'static,
    E: Probe + Clone + 'static,
{
    fn connect(&self, _config: &DeploymentConfig) -> DeployResult<Target> {
        self.connects.set(self.connects.get() + 1);
        Ok(Target {
            runtime: Box::new(self.runtime.clone()),
            probe: Box::new(self.probe.clone()),
            external: Box::new(self.external.clone()),
        })
    }
}
