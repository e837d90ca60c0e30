//! Secret store gate.
//!
//! The encrypted vault and its password file are checked before any
//! other stage runs. Decrypted values stay in memory inside
//! [`SecretValues`], whose `Debug` output never shows them.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::cmd;
use crate::config::scalar_to_string;
use crate::error::{DeployError, DeployResult};

/// First bytes of every file produced by `ansible-vault encrypt`.
pub const VAULT_HEADER: &str = "$ANSIBLE_VAULT;";

/// Prefix conventionally given to vaulted variables; stripped on load.
const VAULT_KEY_PREFIX: &str = "vault_";

/// An opaque decrypt service for vault files.
pub trait Decryptor {
    /// Return the plaintext of `vault_file` using the passphrase
    /// stored in `password_file`.
    fn decrypt(&self, vault_file: &Path, password_file: &Path) -> DeployResult<String>;
}

/// Decrypts through the `ansible-vault` CLI.
#[derive(Debug, Clone)]
pub struct AnsibleVault {
    program: String,
}

impl AnsibleVault {
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: "ansible-vault".to_string(),
        }
    }

    #[must_use]
    pub fn program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }
}

impl Default for AnsibleVault {
    fn default() -> Self {
        Self::new()
    }
}

impl Decryptor for AnsibleVault {
    fn decrypt(&self, vault_file: &Path, password_file: &Path) -> DeployResult<String> {
        let vault = vault_file.to_string_lossy();
        let password = password_file.to_string_lossy();
        cmd::run(
            &self.program,
            &["view", "--vault-password-file", &password, &vault],
        )
    }
}

/// Paths to the encrypted credentials file and its password file.
#[derive(Debug, Clone)]
pub struct SecretBundle {
    pub vault_file: PathBuf,
    pub password_file: PathBuf,
}

impl SecretBundle {
    #[must_use]
    pub fn new(vault_file: impl Into<PathBuf>, password_file: impl Into<PathBuf>) -> Self {
        Self {
            vault_file: vault_file.into(),
            password_file: password_file.into(),
        }
    }

    /// Fail with `ConfigMissing` unless both files exist.
    pub fn check_present(&self) -> DeployResult<()> {
        if !self.vault_file.exists() {
            return Err(DeployError::ConfigMissing(format!(
                "vault file {} not found",
                self.vault_file.display()
            )));
        }
        if !self.password_file.exists() {
            return Err(DeployError::ConfigMissing(format!(
                "vault password file {} not found",
                self.password_file.display()
            )));
        }
        Ok(())
    }

    /// Verify and decrypt the bundle.
    pub fn open(&self, decryptor: &dyn Decryptor) -> DeployResult<SecretValues> {
        self.check_present()?;
        self.check_encrypted()?;

        let plaintext = decryptor
            .decrypt(&self.vault_file, &self.password_file)
            .map_err(|e| self.decryption_error(&e))?;

        let values = self.parse(&plaintext)?;
        info!(
            vault = %self.vault_file.display(),
            keys = values.len(),
            "vault decrypted"
        );
        Ok(values)
    }

    fn check_encrypted(&self) -> DeployResult<()> {
        let file = File::open(&self.vault_file)?;
        let mut first_line = Vec::new();
        BufReader::new(file).read_until(b'\n', &mut first_line)?;

        if first_line.starts_with(VAULT_HEADER.as_bytes()) {
            Ok(())
        } else {
            Err(DeployError::DecryptionError(format!(
                "{} is not an encrypted vault",
                self.vault_file.display()
            )))
        }
    }

    fn decryption_error(&self, err: &DeployError) -> DeployError {
        let reason = match err {
            DeployError::CommandNotFound(program) => format!("{program} is not installed"),
            DeployError::CommandFailed { stderr, .. } => stderr
                .lines()
                .next()
                .unwrap_or("decrypt command failed")
                .to_string(),
            other => other.to_string(),
        };
        DeployError::DecryptionError(format!(
            "{} could not be decrypted with {}: {reason}",
            self.vault_file.display(),
            self.password_file.display()
        ))
    }

    fn parse(&self, plaintext: &str) -> DeployResult<SecretValues> {
        let not_mapping = || {
            DeployError::DecryptionError(format!(
                "decrypted content of {} is not a key-value mapping",
                self.vault_file.display()
            ))
        };

        let value: serde_yaml::Value = serde_yaml::from_str(plaintext).map_err(|_| not_mapping())?;
        let serde_yaml::Value::Mapping(mapping) = value else {
            return Err(not_mapping());
        };

        let mut values = IndexMap::new();
        for (key, value) in &mapping {
            let Some(key) = key.as_str() else {
                continue;
            };
            match scalar_to_string(value) {
                Some(v) => {
                    values.insert(normalize_key(key), v);
                }
                None => debug!(key, "skipping non-scalar vault value"),
            }
        }
        Ok(SecretValues(values))
    }
}

fn normalize_key(key: &str) -> String {
    key.strip_prefix(VAULT_KEY_PREFIX).unwrap_or(key).to_string()
}

/// Decrypted vault values, held only in memory.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretValues(IndexMap<String, String>);

impl SecretValues {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) const fn as_map(&self) -> &IndexMap<String, String> {
        &self.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SecretValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (normalize_key(&k.into()), v.into()))
                .collect(),
        )
    }
}

impl fmt::Debug for SecretValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}
