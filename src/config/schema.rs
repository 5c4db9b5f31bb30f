use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::git::{CloneOptions, Credentials};
use crate::store::StoreOptions;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub repository: RepositoryConfig,
    pub network: NetworkConfig,
    pub identity: IdentityConfig,
    pub credentials: CredentialsConfig,
    pub lfs: LfsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Runtime options for [`crate::DocumentStore`].
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            remote: CloneOptions {
                remote_name: self.repository.remote_name.clone(),
                branch: self.repository.branch.clone(),
                credentials: Credentials {
                    username: self.credentials.username.clone(),
                    token_env: self.credentials.token_env.clone(),
                },
                timeout: self.network.timeout(),
            },
            committer_name: self.identity.name.clone(),
            committer_email: self.identity.email.clone(),
            author_email_domain: self.identity.author_email_domain.clone(),
            lfs_enabled: self.lfs.enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Local clone root.
    pub path: Option<PathBuf>,
    pub remote_url: Option<String>,
    pub remote_name: String,
    pub branch: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            remote_url: None,
            remote_name: "origin".into(),
            branch: "main".into(),
        }
    }
}

impl RepositoryConfig {
    /// Clone path and remote URL, both of which must be configured.
    pub fn require(&self) -> Result<(PathBuf, String), ConfigError> {
        let path = self
            .path
            .clone()
            .ok_or(ConfigError::Missing {
                field: "repository.path",
            })?;
        let url = self
            .remote_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing {
                field: "repository.remote_url",
            })?;
        Ok((path, url))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Per pull/push deadline; 0 disables.
    pub timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Committer identity of the service, and the domain for author emails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub name: String,
    pub email: String,
    pub author_email_domain: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: "PDM App".into(),
            email: "pdm@localhost".into(),
            author_email_domain: "pdm.local".into(),
        }
    }
}

/// Only the name of the token variable is stored, never the token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub username: Option<String>,
    pub token_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LfsConfig {
    pub enabled: bool,
}

impl Default for LfsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Tree,
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Daily,
    Hourly,
    Minutely,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    pub filter: Option<String>,
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Compact,
            filter: None,
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    pub format: LogFormat,
    pub rotation: LogRotation,
    pub retention_max_age_days: Option<u64>,
    pub retention_max_files: Option<usize>,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            format: LogFormat::Json,
            rotation: LogRotation::Daily,
            retention_max_age_days: Some(7),
            retention_max_files: Some(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RepositoryConfigOverride {
    pub path: Option<PathBuf>,
    pub remote_url: Option<String>,
    pub remote_name: Option<String>,
    pub branch: Option<String>,
}

impl RepositoryConfigOverride {
    pub fn apply_to(&self, target: &mut RepositoryConfig) {
        if let Some(path) = self.path.as_ref() {
            target.path = Some(path.clone());
        }
        if let Some(url) = self.remote_url.as_ref() {
            target.remote_url = Some(url.clone());
        }
        if let Some(name) = self.remote_name.as_ref() {
            target.remote_name = name.clone();
        }
        if let Some(branch) = self.branch.as_ref() {
            target.branch = branch.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NetworkConfigOverride {
    pub timeout_ms: Option<u64>,
}

impl NetworkConfigOverride {
    pub fn apply_to(&self, target: &mut NetworkConfig) {
        if let Some(ms) = self.timeout_ms {
            target.timeout_ms = ms;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IdentityConfigOverride {
    pub name: Option<String>,
    pub email: Option<String>,
    pub author_email_domain: Option<String>,
}

impl IdentityConfigOverride {
    pub fn apply_to(&self, target: &mut IdentityConfig) {
        if let Some(name) = self.name.as_ref() {
            target.name = name.clone();
        }
        if let Some(email) = self.email.as_ref() {
            target.email = email.clone();
        }
        if let Some(domain) = self.author_email_domain.as_ref() {
            target.author_email_domain = domain.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CredentialsConfigOverride {
    pub username: Option<String>,
    pub token_env: Option<String>,
}

impl CredentialsConfigOverride {
    pub fn apply_to(&self, target: &mut CredentialsConfig) {
        if self.username.is_some() {
            target.username = self.username.clone();
        }
        if self.token_env.is_some() {
            target.token_env = self.token_env.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LfsConfigOverride {
    pub enabled: Option<bool>,
}

impl LfsConfigOverride {
    pub fn apply_to(&self, target: &mut LfsConfig) {
        if let Some(enabled) = self.enabled {
            target.enabled = enabled;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfigOverride {
    pub stdout: Option<bool>,
    pub stdout_format: Option<LogFormat>,
    pub filter: Option<String>,
    pub file: Option<FileLoggingConfigOverride>,
}

impl LoggingConfigOverride {
    pub fn apply_to(&self, target: &mut LoggingConfig) {
        if let Some(stdout) = self.stdout {
            target.stdout = stdout;
        }
        if let Some(format) = self.stdout_format {
            target.stdout_format = format;
        }
        if let Some(filter) = self.filter.as_ref() {
            target.filter = Some(filter.clone());
        }
        if let Some(file) = self.file.as_ref() {
            file.apply_to(&mut target.file);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileLoggingConfigOverride {
    pub enabled: Option<bool>,
    pub dir: Option<PathBuf>,
    pub format: Option<LogFormat>,
    pub rotation: Option<LogRotation>,
    pub retention_max_age_days: Option<u64>,
    pub retention_max_files: Option<usize>,
}

impl FileLoggingConfigOverride {
    pub fn apply_to(&self, target: &mut FileLoggingConfig) {
        if let Some(enabled) = self.enabled {
            target.enabled = enabled;
        }
        if let Some(dir) = self.dir.as_ref() {
            target.dir = Some(dir.clone());
        }
        if let Some(format) = self.format {
            target.format = format;
        }
        if let Some(rotation) = self.rotation {
            target.rotation = rotation;
        }
        if let Some(days) = self.retention_max_age_days {
            target.retention_max_age_days = Some(days);
        }
        if let Some(files) = self.retention_max_files {
            target.retention_max_files = Some(files);
        }
    }
}

/// One config file. Every field is optional so a layer only overrides what it
/// names.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConfigLayer {
    pub repository: RepositoryConfigOverride,
    pub network: NetworkConfigOverride,
    pub identity: IdentityConfigOverride,
    pub credentials: CredentialsConfigOverride,
    pub lfs: LfsConfigOverride,
    pub logging: LoggingConfigOverride,
}

impl ConfigLayer {
    pub fn apply_to(&self, base: &mut Config) {
        self.repository.apply_to(&mut base.repository);
        self.network.apply_to(&mut base.network);
        self.identity.apply_to(&mut base.identity);
        self.credentials.apply_to(&mut base.credentials);
        self.lfs.apply_to(&mut base.lfs);
        self.logging.apply_to(&mut base.logging);
    }
}
