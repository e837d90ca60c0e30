//! Provision and validate a static web container behind an edge proxy.
//!
//! Berth takes a single host running Docker and a shared edge proxy
//! (Traefik, routing by container labels) and puts one static site
//! container on it, then proves the site is actually served.
//!
//! # Overview
//!
//! A deployment is a [`Pipeline`] that runs, strictly in order:
//!
//! 1. **Secrets gate** - the vault must exist, be encrypted and
//!    decrypt with the password file ([`SecretBundle`])
//! 2. **Config** - defaults, environment file, inventory vars,
//!    `--set` overrides and vault values merged into one
//!    [`DeploymentConfig`] ([`Resolver`])
//! 3. **Preflight** - Docker reachable, shared network present,
//!    deploy directories in place ([`Preflight`])
//! 4. **Provision** - `index.html`, `Caddyfile` and
//!    `docker-compose.yml` written, previous container replaced
//!    ([`Provisioner`])
//! 5. **Readiness** - loopback and in-network requests both return
//!    the expected page within the timeout ([`Validator`])
//!
//! The first failing stage aborts the run with a named
//! [`DeployError`]. The [`integration`] module runs the post-deploy
//! checks, which instead report every failure at once.
//!
//! The target is reached through traits ([`Runtime`], [`Probe`],
//! [`Clock`], [`Decryptor`]), so every stage can run against fakes.
//!
//! # Example
//!
//! ```rust,no_run
//! use berth::{EnvFile, Pipeline, SecretBundle, VarsFile};
//!
//! fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::new(SecretBundle::new(
//!         "secrets/vault.yml",
//!         ".vault_pass",
//!     ))
//!     .source(EnvFile::new(".env"))
//!     .source(VarsFile::new("inventory/group_vars/production.yml"));
//!
//!     let deployment = pipeline.deploy()?;
//!     println!("serving https://{}", deployment.config.domain);
//!     Ok(())
//! }
//! ```

// Allow noisy pedantic lints that don't add value for a
// deployment tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod caddyfile;
pub mod clock;
pub mod cmd;
pub mod compose;
pub mod config;
pub mod docker;
pub mod edge;
pub mod error;
pub mod host;
pub mod integration;
pub mod pipeline;
pub mod preflight;
pub mod probe;
pub mod provision;
pub mod readiness;
pub mod secrets;
pub mod ssh;
pub mod template;

pub use clock::{Clock, SystemClock};
pub use config::{
    ConfigSource, Defaults, DeploymentConfig, EnvFile, Overrides, Resolver, VarsFile,
};
pub use docker::{ContainerStatus, DockerCli, Runtime};
pub use edge::EdgeRoute;
pub use error::{DeployError, DeployResult};
pub use host::{Host, LocalHost};
pub use integration::{IntegrationReport, IntegrationRunner};
pub use pipeline::{Aborted, Connector, Pipeline, SshConnector, Stage, Target};
pub use preflight::{Preflight, PreflightReport};
pub use probe::{CurlProbe, HttpResponse, Probe};
pub use provision::{ContainerState, ProvisionedContainer, Provisioner};
pub use readiness::{ValidationResult, Validator};
pub use secrets::{AnsibleVault, Decryptor, SecretBundle, SecretValues};
pub use ssh::SshSession;
