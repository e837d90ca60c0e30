use std::fmt;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::{
    ConfigSource, Defaults, DeploymentConfig, EnvFile, Overrides, Resolver, VarsFile,
};
use crate::docker::{DockerCli, Runtime};
use crate::error::{DeployError, DeployResult};
use crate::host::LocalHost;
use crate::integration::{IntegrationReport, IntegrationRunner};
use crate::preflight::{Preflight, PreflightReport};
use crate::probe::{CurlProbe, Probe};
use crate::provision::{ContainerState, ProvisionedContainer, Provisioner, RenderedFiles};
use crate::readiness::{ValidationResult, Validator};
use crate::secrets::{AnsibleVault, Decryptor, SecretBundle};
use crate::ssh::SshSession;

/// Stages of a provisioning run, in the only order they may occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Init,
    SecretsVerified,
    ConfigResolved,
    PreflightPassed,
    Provisioned,
    Validated,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::SecretsVerified => "secrets-verified",
            Self::ConfigResolved => "config-resolved",
            Self::PreflightPassed => "preflight-passed",
            Self::Provisioned => "provisioned",
            Self::Validated => "validated",
        };
        f.write_str(s)
    }
}

/// Terminal failure of a provisioning run.
#[derive(Debug, thiserror::Error)]
#[error("deployment aborted after stage {stage}: {source}")]
pub struct Aborted {
    /// Last stage reached before the failure.
    pub stage: Stage,
    pub source: DeployError,
}

/// Forward-only stage tracker.
struct Progress {
    stage: Stage,
}

impl Progress {
    const fn new() -> Self {
        Self { stage: Stage::Init }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(next > self.stage, "stages only move forward");
        info!(from = %self.stage, to = %next, "stage complete");
        self.stage = next;
    }

    fn abort(&self, source: DeployError) -> Aborted {
        Aborted {
            stage: self.stage,
            source,
        }
    }
}

/// Handles to one deploy target.
pub struct Target {
    pub runtime: Box<dyn Runtime>,
    /// Probe running on the target host.
    pub probe: Box<dyn Probe>,
    /// Probe running on the control machine.
    pub external: Box<dyn Probe>,
}

/// Opens a [`Target`] for a resolved config. Connecting must not
/// perform any remote call; the first call happens in preflight.
pub trait Connector {
    fn connect(&self, config: &DeploymentConfig) -> DeployResult<Target>;
}

/// Reaches the target over SSH and the `docker` CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

impl Connector for SshConnector {
    fn connect(&self, config: &DeploymentConfig) -> DeployResult<Target> {
        let mut session = SshSession::new(&config.server_address, &config.docker_user);
        if let Some(key) = &config.ssh_key {
            session = session.with_key(key);
        }

        Ok(Target {
            runtime: Box::new(DockerCli::new(session.clone())),
            probe: Box::new(CurlProbe::new(session)),
            external: Box::new(CurlProbe::new(LocalHost).max_time(10)),
        })
    }
}

/// Outcome of a successful provisioning run.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub config: DeploymentConfig,
    pub preflight: PreflightReport,
    pub container: ProvisionedContainer,
    pub validation: ValidationResult,
}

/// Secrets gate, config resolution, preflight, provisioning and
/// readiness validation, run strictly in that order.
pub struct Pipeline {
    secrets: SecretBundle,
    decryptor: Box<dyn Decryptor>,
    sources: Vec<Box<dyn ConfigSource>>,
    connector: Box<dyn Connector>,
    clock: Box<dyn Clock>,
}

impl Pipeline {
    /// A pipeline with built-in defaults as its only config layer.
    #[must_use]
    pub fn new(secrets: SecretBundle) -> Self {
        Self {
            secrets,
            decryptor: Box::new(AnsibleVault::new()),
            sources: vec![Box::new(Defaults)],
            connector: Box::new(SshConnector),
            clock: Box::new(SystemClock::new()),
        }
    }

    /// Add a config layer above every layer added so far. Decrypted
    /// secrets always sit above all of them.
    #[must_use]
    pub fn source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    #[must_use]
    pub fn decryptor(mut self, decryptor: impl Decryptor + 'static) -> Self {
        self.decryptor = Box::new(decryptor);
        self
    }

    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Box::new(connector);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Open the secrets and resolve the config, without touching the
    /// target.
    pub fn resolve(&self) -> DeployResult<DeploymentConfig> {
        let secrets = self.secrets.open(self.decryptor.as_ref())?;
        self.resolve_with(&secrets)
    }

    fn resolve_with(&self, secrets: &dyn ConfigSource) -> DeployResult<DeploymentConfig> {
        let resolver = self
            .sources
            .iter()
            .fold(Resolver::new(), |r, s| r.source(s.as_ref()))
            .source(secrets);
        resolver.resolve()
    }

    /// Run the full provisioning pipeline.
    pub fn deploy(&self) -> Result<Deployment, Aborted> {
        let mut progress = Progress::new();

        let secrets = self
            .secrets
            .open(self.decryptor.as_ref())
            .map_err(|e| progress.abort(e))?;
        progress.advance(Stage::SecretsVerified);

        let config = self
            .resolve_with(&secrets)
            .map_err(|e| progress.abort(e))?;
        drop(secrets);
        progress.advance(Stage::ConfigResolved);

        let target = self
            .connector
            .connect(&config)
            .map_err(|e| progress.abort(e))?;

        let preflight = Preflight::new(&config, target.runtime.as_ref())
            .run()
            .map_err(|e| progress.abort(e))?;
        progress.advance(Stage::PreflightPassed);

        let mut container = Provisioner::new(&config, target.runtime.as_ref())
            .apply()
            .map_err(|e| progress.abort(e))?;
        progress.advance(Stage::Provisioned);

        let validation = Validator::new(
            &config,
            target.runtime.as_ref(),
            target.probe.as_ref(),
            self.clock.as_ref(),
        )
        .wait(&container)
        .map_err(|e| progress.abort(e))?;
        container.state = ContainerState::Healthy;
        progress.advance(Stage::Validated);

        Ok(Deployment {
            config,
            preflight,
            container,
            validation,
        })
    }

    /// Resolve and render every file a deploy would write.
    pub fn render(&self) -> DeployResult<(DeploymentConfig, RenderedFiles)> {
        let config = self.resolve()?;
        let files = RenderedFiles::render(&config, config.host_port)?;
        Ok((config, files))
    }

    /// Run the integration checks against the deployed target.
    pub fn integration(&self) -> DeployResult<IntegrationReport> {
        let config = self.resolve()?;
        let target = self.connector.connect(&config)?;
        Ok(
            IntegrationRunner::new(&config, target.runtime.as_ref(), target.external.as_ref())
                .run(),
        )
    }

    /// Current lifecycle state of the managed container.
    pub fn status(&self) -> DeployResult<(DeploymentConfig, ContainerState)> {
        let config = self.resolve()?;
        let target = self.connector.connect(&config)?;
        let runtime = target.runtime.as_ref();

        if !runtime.container_exists(&config.container_name)? {
            return Ok((config, ContainerState::Absent));
        }
        let status = runtime.container_status(&config.container_name)?;
        let state = ContainerState::from_status(&status).ok_or_else(|| {
            DeployError::Other(format!("{} is {status}", config.container_name))
        })?;
        Ok((config, state))
    }
}

#[derive(Parser, Debug)]
#[command(name = "berth")]
#[command(about = "Deploy and validate a static web container behind an edge proxy")]
pub struct Cli {
    /// Environment file with run settings (LOG_LEVEL, DEPLOY_ENV)
    #[arg(long, default_value = ".env", global = true)]
    pub env_file: PathBuf,

    /// Encrypted vault with server and domain secrets
    #[arg(long, default_value = "secrets/vault.yml", global = true)]
    pub vault_file: PathBuf,

    /// File holding the vault password
    #[arg(long, default_value = ".vault_pass", global = true)]
    pub password_file: PathBuf,

    /// Inventory directory containing group_vars/ and host_vars/
    #[arg(long, default_value = "inventory", global = true)]
    pub inventory: PathBuf,

    /// Inventory host whose host_vars apply
    #[arg(long, default_value = "web", global = true)]
    pub host: String,

    /// Override a config value (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    pub overrides: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision the container and wait until it is ready
    Deploy {
        /// Print the rendered files without touching the target
        #[arg(long)]
        dry_run: bool,
    },

    /// Run integration checks against the deployed target
    Test {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the managed container's state
    Status,

    /// Verify the vault and resolve the config
    Check,
}

impl Cli {
    /// Build the pipeline this invocation describes.
    ///
    /// Layers, lowest first: defaults, environment file,
    /// `group_vars/all.yml`, `host_vars/<host>.yml`,
    /// `group_vars/<environment>.yml`, `--set` overrides, vault.
    pub fn pipeline(&self) -> DeployResult<Pipeline> {
        let env_file = EnvFile::new(&self.env_file);
        let environment = env_file
            .load()?
            .get("environment")
            .cloned()
            .unwrap_or_else(|| "production".to_string());

        let group_vars = self.inventory.join("group_vars");
        let host_vars = self.inventory.join("host_vars");

        Ok(
            Pipeline::new(SecretBundle::new(&self.vault_file, &self.password_file))
                .source(env_file)
                .source(VarsFile::new(group_vars.join("all.yml")))
                .source(VarsFile::new(host_vars.join(format!("{}.yml", self.host))))
                .source(VarsFile::new(group_vars.join(format!("{environment}.yml"))))
                .source(Overrides::parse(self.overrides.as_slice())?),
        )
    }
}

/// Execute a parsed command line.
pub fn run(cli: &Cli) -> DeployResult<()> {
    let pipeline = cli.pipeline()?;

    match &cli.command {
        Command::Deploy { dry_run: true } => cmd_deploy_dry_run(&pipeline),
        Command::Deploy { dry_run: false } => cmd_deploy(&pipeline),
        Command::Test { json } => cmd_test(&pipeline, *json),
        Command::Status => cmd_status(&pipeline),
        Command::Check => cmd_check(&pipeline),
    }
}

fn cmd_deploy(pipeline: &Pipeline) -> DeployResult<()> {
    let deployment = pipeline.deploy().map_err(|aborted| {
        eprintln!("Deployment aborted after stage: {}", aborted.stage);
        aborted.source
    })?;

    eprintln!();
    eprintln!("Deployment complete!");
    eprintln!(
        "Container {} running on port {} (attempts: {})",
        deployment.container.name,
        deployment.container.host_port,
        deployment.validation.attempts
    );
    eprintln!(
        "Application available at: https://{}",
        deployment.config.domain
    );
    Ok(())
}

fn cmd_deploy_dry_run(pipeline: &Pipeline) -> DeployResult<()> {
    let (config, files) = pipeline.render()?;

    eprintln!("=== Dry run: no changes will be made ===");
    eprintln!();

    eprintln!("--- {} ---", config.compose_path());
    println!("{}", files.compose);

    eprintln!("--- {} ---", config.caddyfile_path());
    println!("{}", files.caddyfile);

    eprintln!("--- {}/index.html ---", config.content_dir());
    println!("{}", files.index_html);

    eprintln!("--- Actions that would be performed ---");
    eprintln!(
        "1. Check docker and network '{}' on {}",
        config.network, config.server_address
    );
    eprintln!("2. Write files to {}/", config.deploy_dir());
    eprintln!("3. Replace container {}", config.container_name);
    eprintln!(
        "4. Wait up to {}s for http://127.0.0.1:{}/",
        config.readiness.timeout.as_secs(),
        config.host_port
    );

    Ok(())
}

fn cmd_test(pipeline: &Pipeline, json: bool) -> DeployResult<()> {
    let report = pipeline.integration()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }

    report.into_result().map(|_| ())
}

fn cmd_status(pipeline: &Pipeline) -> DeployResult<()> {
    let (config, state) = pipeline.status()?;
    println!("{}: {state:?}", config.container_name);
    Ok(())
}

fn cmd_check(pipeline: &Pipeline) -> DeployResult<()> {
    let config = pipeline.resolve()?;
    eprintln!("Vault OK");
    eprintln!("  domain:    {}", config.domain);
    eprintln!("  container: {}", config.container_name);
    eprintln!("  network:   {}", config.network);
    eprintln!("  target:    {}@{}", config.docker_user, config.server_address);
    eprintln!("  bootstrap: {}", config.initial_user);
    Ok(())
}
