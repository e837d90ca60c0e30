//! Layered configuration resolution.
//!
//! A [`Resolver`] merges an ordered list of [`ConfigSource`]s left to
//! right, later layers overriding earlier ones, then validates the
//! result into an immutable [`DeploymentConfig`].

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::edge::EdgeRoute;
use crate::error::{DeployError, DeployResult};
use crate::secrets::SecretValues;

/// Prefix of every container this tool manages.
pub const CONTAINER_PREFIX: &str = "static-web-";

/// A partial key-value mapping contributed by one source.
pub type Layer = IndexMap<String, String>;

/// One provider of configuration values.
pub trait ConfigSource {
    /// Label used in logs.
    fn name(&self) -> String;

    fn load(&self) -> DeployResult<Layer>;
}

/// Built-in defaults, the lowest layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Defaults;

impl ConfigSource for Defaults {
    fn name(&self) -> String {
        "defaults".to_string()
    }

    fn load(&self) -> DeployResult<Layer> {
        Ok([
            ("initial_user", "root"),
            ("docker_user", "root"),
            ("network", "proxy"),
            ("image", "caddy:2-alpine"),
            ("host_port", "8080"),
            ("container_port", "80"),
            ("memory_limit", "128m"),
            ("base_dir", "/opt/static-web"),
            ("entrypoint", "websecure"),
            ("cert_resolver", "letsencrypt"),
            ("readiness_timeout", "60s"),
            ("poll_interval", "2s"),
            ("log_tail", "50"),
            ("environment", "production"),
            ("log_level", "info"),
            ("probe_image", "curlimages/curl:latest"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect())
    }
}

/// A `KEY=VALUE` environment file. Keys are lowercased; `DEPLOY_ENV`
/// is read as `environment`.
#[derive(Debug, Clone)]
pub struct EnvFile {
    pub path: PathBuf,
}

impl EnvFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for EnvFile {
    fn name(&self) -> String {
        format!("env file {}", self.path.display())
    }

    fn load(&self) -> DeployResult<Layer> {
        if !self.path.exists() {
            return Err(DeployError::ConfigMissing(format!(
                "environment file {} not found",
                self.path.display()
            )));
        }
        let content = fs::read_to_string(&self.path)?;

        Ok(parse_env_file(&content)
            .into_iter()
            .map(|(k, v)| {
                let key = match k.to_ascii_lowercase().as_str() {
                    "deploy_env" => "environment".to_string(),
                    other => other.to_string(),
                };
                (key, v)
            })
            .collect())
    }
}

/// Parse `KEY=VALUE` lines. Blank lines and `#` comments are
/// skipped, an `export ` prefix is allowed, and matching single or
/// double quotes around the value are removed.
#[must_use]
pub fn parse_env_file(content: &str) -> IndexMap<String, String> {
    let mut vars = IndexMap::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        let value = value.trim();
        let value = ['"', '\'']
            .iter()
            .find_map(|q| value.strip_prefix(*q).and_then(|v| v.strip_suffix(*q)))
            .unwrap_or(value);
        vars.insert(key.trim().to_string(), value.to_string());
    }

    vars
}

/// A YAML mapping file such as `group_vars/production.yml` or
/// `host_vars/web.yml`. A missing file contributes nothing.
#[derive(Debug, Clone)]
pub struct VarsFile {
    pub path: PathBuf,
}

impl VarsFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for VarsFile {
    fn name(&self) -> String {
        format!("vars file {}", self.path.display())
    }

    fn load(&self) -> DeployResult<Layer> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "vars file absent, skipping");
            return Ok(Layer::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let value: serde_yaml::Value = serde_yaml::from_str(&content)?;

        let mapping = match value {
            serde_yaml::Value::Mapping(m) => m,
            serde_yaml::Value::Null => return Ok(Layer::new()),
            _ => {
                return Err(DeployError::InvalidValue {
                    key: self.path.display().to_string(),
                    reason: "expected a mapping at the top level".into(),
                });
            }
        };

        let mut layer = Layer::new();
        for (key, value) in &mapping {
            let Some(key) = key.as_str() else {
                continue;
            };
            match scalar_to_string(value) {
                Some(v) => {
                    layer.insert(key.to_string(), v);
                }
                None => warn!(key, path = %self.path.display(), "skipping non-scalar value"),
            }
        }
        Ok(layer)
    }
}

/// Explicit `key=value` overrides, e.g. from the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides(Layer);

impl Overrides {
    /// Parse `key=value` pairs.
    pub fn parse<S: AsRef<str>>(pairs: &[S]) -> DeployResult<Self> {
        let mut layer = Layer::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair.split_once('=').ok_or_else(|| DeployError::InvalidValue {
                key: pair.to_string(),
                reason: "expected key=value".into(),
            })?;
            layer.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(Self(layer))
    }
}

impl ConfigSource for Overrides {
    fn name(&self) -> String {
        "overrides".to_string()
    }

    fn load(&self) -> DeployResult<Layer> {
        Ok(self.0.clone())
    }
}

impl ConfigSource for Layer {
    fn name(&self) -> String {
        "inline".to_string()
    }

    fn load(&self) -> DeployResult<Layer> {
        Ok(self.clone())
    }
}

impl ConfigSource for SecretValues {
    fn name(&self) -> String {
        "vault".to_string()
    }

    fn load(&self) -> DeployResult<Layer> {
        Ok(self.as_map().clone())
    }
}

/// Stringify a YAML scalar. Sequences, mappings and nulls yield
/// `None`.
#[must_use]
pub fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Merges sources in order and builds the final config.
#[derive(Default)]
pub struct Resolver<'a> {
    sources: Vec<&'a dyn ConfigSource>,
}

impl<'a> Resolver<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source; it overrides every source added before it.
    #[must_use]
    pub fn source(mut self, source: &'a dyn ConfigSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Merge all layers without validating.
    pub fn merged(&self) -> DeployResult<Layer> {
        let mut merged = Layer::new();
        for source in &self.sources {
            let layer = normalize_aliases(source.load()?);
            debug!(source = %source.name(), keys = layer.len(), "merging config layer");
            merged.extend(layer);
        }
        Ok(merged)
    }

    pub fn resolve(&self) -> DeployResult<DeploymentConfig> {
        DeploymentConfig::from_layer(&self.merged()?)
    }
}

/// Readiness polling parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessSettings {
    pub timeout: Duration,
    pub interval: Duration,
    /// Text the served page must contain.
    pub expected_content: String,
    /// Number of log lines attached to failures.
    pub log_tail: u32,
}

/// Everything one run needs, assembled once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentConfig {
    pub server_address: String,
    pub initial_user: String,
    pub docker_user: String,
    pub ssh_key: Option<String>,
    pub domain: String,
    pub email: Option<String>,
    pub network: String,
    pub container_name: String,
    pub image: String,
    pub host_port: u16,
    pub alternate_port: Option<u16>,
    pub container_port: u16,
    pub memory_limit: Option<String>,
    pub base_dir: String,
    pub edge: EdgeRoute,
    pub readiness: ReadinessSettings,
    pub environment: String,
    pub log_level: String,
    pub probe_image: String,
}

impl DeploymentConfig {
    /// Validate a merged layer.
    pub fn from_layer(layer: &Layer) -> DeployResult<Self> {
        let server_address = required(layer, &["server_address", "server_ip"])?;
        let domain = required(layer, &["domain"])?;

        let container_name = container_name_for(&domain);
        if !is_valid_container_name(&container_name) {
            return Err(DeployError::InvalidValue {
                key: "domain".into(),
                reason: format!("derived container name '{container_name}' is not a valid name"),
            });
        }

        let host_port = port(layer, "host_port")?.unwrap_or(8080);
        let alternate_port = port(layer, "alternate_port")?;
        if alternate_port == Some(host_port) {
            return Err(DeployError::InvalidValue {
                key: "alternate_port".into(),
                reason: "must differ from host_port".into(),
            });
        }

        let interval = duration(layer, "poll_interval")?.unwrap_or(Duration::from_secs(2));
        if interval.is_zero() {
            return Err(DeployError::InvalidValue {
                key: "poll_interval".into(),
                reason: "must be greater than zero".into(),
            });
        }

        let expected_content = optional(layer, "expected_content")
            .unwrap_or_else(|| format!("Welcome to {domain}"));

        let log_tail = match optional(layer, "log_tail") {
            Some(v) => v.parse().map_err(|_| DeployError::InvalidValue {
                key: "log_tail".into(),
                reason: format!("'{v}' is not a line count"),
            })?,
            None => 50,
        };

        Ok(Self {
            initial_user: optional(layer, "initial_user").unwrap_or_else(|| "root".into()),
            docker_user: optional(layer, "docker_user").unwrap_or_else(|| "root".into()),
            ssh_key: optional(layer, "ssh_key_path"),
            email: optional(layer, "email"),
            network: optional(layer, "network").unwrap_or_else(|| "proxy".into()),
            image: optional(layer, "image").unwrap_or_else(|| "caddy:2-alpine".into()),
            host_port,
            alternate_port,
            container_port: port(layer, "container_port")?.unwrap_or(80),
            memory_limit: optional(layer, "memory_limit"),
            base_dir: optional(layer, "base_dir").unwrap_or_else(|| "/opt/static-web".into()),
            edge: EdgeRoute {
                entrypoint: optional(layer, "entrypoint").unwrap_or_else(|| "websecure".into()),
                cert_resolver: optional(layer, "cert_resolver")
                    .unwrap_or_else(|| "letsencrypt".into()),
            },
            readiness: ReadinessSettings {
                timeout: duration(layer, "readiness_timeout")?
                    .unwrap_or(Duration::from_secs(60)),
                interval,
                expected_content,
                log_tail,
            },
            environment: optional(layer, "environment").unwrap_or_else(|| "production".into()),
            log_level: optional(layer, "log_level").unwrap_or_else(|| "info".into()),
            probe_image: optional(layer, "probe_image")
                .unwrap_or_else(|| "curlimages/curl:latest".into()),
            server_address,
            domain,
            container_name,
        })
    }

    /// Directory on the target holding this container's files.
    #[must_use]
    pub fn deploy_dir(&self) -> String {
        format!(
            "{}/{}",
            self.base_dir.trim_end_matches('/'),
            self.container_name
        )
    }

    #[must_use]
    pub fn content_dir(&self) -> String {
        format!("{}/content", self.deploy_dir())
    }

    #[must_use]
    pub fn compose_path(&self) -> String {
        format!("{}/docker-compose.yml", self.deploy_dir())
    }

    #[must_use]
    pub fn caddyfile_path(&self) -> String {
        format!("{}/Caddyfile", self.deploy_dir())
    }

    /// Compose project name: lowercase, dots replaced.
    #[must_use]
    pub fn project_name(&self) -> String {
        self.container_name.to_ascii_lowercase().replace('.', "-")
    }

    /// Values available to the content template.
    #[must_use]
    pub fn template_vars(&self) -> IndexMap<&'static str, String> {
        let mut vars = IndexMap::new();
        vars.insert("domain", self.domain.clone());
        vars.insert("container_name", self.container_name.clone());
        vars.insert("environment", self.environment.clone());
        vars.insert("email", self.email.clone().unwrap_or_default());
        vars.insert("expected_content", self.readiness.expected_content.clone());
        vars
    }
}

/// `static-web-<domain>`.
#[must_use]
pub fn container_name_for(domain: &str) -> String {
    format!("{CONTAINER_PREFIX}{domain}")
}

/// Container names follow `[a-zA-Z0-9][a-zA-Z0-9_.-]*`.
#[must_use]
pub fn is_valid_container_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Parse `500ms`, `2s`, `1m` or a bare number of seconds.
#[must_use]
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.trim().parse().ok().map(Duration::from_millis);
    }
    if let Some(s) = value.strip_suffix('s') {
        return s.trim().parse().ok().map(Duration::from_secs);
    }
    if let Some(m) = value.strip_suffix('m') {
        return m
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs);
    }
    value.parse().ok().map(Duration::from_secs)
}

fn optional(layer: &Layer, key: &str) -> Option<String> {
    layer
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Fold `server_ip` into `server_address` inside one layer, so the
/// layer order alone decides which address wins.
fn normalize_aliases(mut layer: Layer) -> Layer {
    if let Some(ip) = layer.shift_remove("server_ip") {
        layer.entry("server_address".to_string()).or_insert(ip);
    }
    layer
}

fn required(layer: &Layer, keys: &[&str]) -> DeployResult<String> {
    keys.iter()
        .find_map(|k| optional(layer, k))
        .ok_or_else(|| DeployError::MissingRequiredValue(keys[0].to_string()))
}

fn port(layer: &Layer, key: &str) -> DeployResult<Option<u16>> {
    optional(layer, key)
        .map(|v| match v.parse::<u16>() {
            Ok(p) if p > 0 => Ok(p),
            _ => Err(DeployError::InvalidValue {
                key: key.to_string(),
                reason: format!("'{v}' is not a port"),
            }),
        })
        .transpose()
}

fn duration(layer: &Layer, key: &str) -> DeployResult<Option<Duration>> {
    optional(layer, key)
        .map(|v| {
            parse_duration(&v).ok_or_else(|| DeployError::InvalidValue {
                key: key.to_string(),
                reason: format!("'{v}' is not a duration"),
            })
        })
        .transpose()
}
