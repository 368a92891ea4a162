//! Layered configuration loader.
//!
//! Precedence, later layers override earlier ones:
//! 1. Defaults ([`FolioConfig::default`])
//! 2. TOML file (`--config`, `$FOLIO_CONFIG`, else `./folio.toml`)
//! 3. Environment (`FOLIO_*`, with `GITHUB_TOKEN` / `GITHUB_REPO_URL` /
//!    `GITHUB_REPO_NAME` as fallbacks), after loading `.env`
//!
//! ```no_run
//! use folio_core::config::ConfigLoader;
//!
//! let config = ConfigLoader::new().load().expect("config");
//! println!("working copy: {}", config.working_copy().display());
//! ```

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::store::StoreConfig;

pub const DEFAULT_CONFIG_FILE: &str = "folio.toml";

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("I/O error loading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parsing error in {path}: {source}")]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for ${var}: '{value}' (expected: {expected})")]
    InvalidEnvValue {
        var: String,
        value: String,
        expected: String,
    },

    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Fully resolved configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct FolioConfig {
    /// Remote without credentials, e.g. `https://github.com/acme/site.git`.
    pub repo_url: Option<String>,
    pub token: Option<String>,
    /// Directory name of the working copy under `resources_dir`. Derived
    /// from `repo_url` when unset.
    pub repo_name: Option<String>,
    pub resources_dir: PathBuf,
    pub portfolio_dir: String,
    pub ledger_file: String,
    pub key_tag: String,
    pub accepted_extensions: Vec<String>,
    pub public_url_prefix: String,
    pub commit_name: String,
    pub commit_email: String,
    pub sync_queue_capacity: usize,
    /// Service socket; `None` means the platform default.
    pub socket_path: Option<PathBuf>,
}

impl Default for FolioConfig {
    fn default() -> Self {
        Self {
            repo_url: None,
            token: None,
            repo_name: None,
            resources_dir: PathBuf::from("resources"),
            portfolio_dir: "assets/img/portfolio".to_string(),
            ledger_file: "assets/data/portfolio.json".to_string(),
            key_tag: "w".to_string(),
            accepted_extensions: vec!["jpg".to_string(), "jpeg".to_string()],
            public_url_prefix: "/assets/img/portfolio".to_string(),
            commit_name: "Automated Action".to_string(),
            commit_email: "action@automaton.bot".to_string(),
            sync_queue_capacity: 16,
            socket_path: None,
        }
    }
}

impl fmt::Debug for FolioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FolioConfig")
            .field("repo_url", &self.repo_url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("repo_name", &self.repo_name)
            .field("resources_dir", &self.resources_dir)
            .field("portfolio_dir", &self.portfolio_dir)
            .field("ledger_file", &self.ledger_file)
            .field("key_tag", &self.key_tag)
            .field("accepted_extensions", &self.accepted_extensions)
            .field("public_url_prefix", &self.public_url_prefix)
            .field("commit_name", &self.commit_name)
            .field("commit_email", &self.commit_email)
            .field("sync_queue_capacity", &self.sync_queue_capacity)
            .field("socket_path", &self.socket_path)
            .finish()
    }
}

impl FolioConfig {
    /// `repo_name`, else the last segment of `repo_url` without `.git`,
    /// else `portfolio`.
    pub fn effective_repo_name(&self) -> String {
        if let Some(name) = self.repo_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        self.repo_url
            .as_deref()
            .and_then(|url| url.trim_end_matches('/').rsplit(['/', ':']).next())
            .map(|last| last.trim_end_matches(".git"))
            .filter(|name| !name.is_empty())
            .unwrap_or("portfolio")
            .to_string()
    }

    /// Local checkout of the remote: `<resources_dir>/<repo name>`.
    pub fn working_copy(&self) -> PathBuf {
        self.resources_dir.join(self.effective_repo_name())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            root: self.working_copy(),
            portfolio_dir: self.portfolio_dir.clone(),
            ledger_file: self.ledger_file.clone(),
            key_tag: self.key_tag.clone(),
            accepted_extensions: self.accepted_extensions.clone(),
            public_url_prefix: self.public_url_prefix.clone(),
        }
    }
}

/// On-disk shape of `folio.toml`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    git: GitSection,
    storage: StorageSection,
    service: ServiceSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GitSection {
    repo_url: Option<String>,
    token: Option<String>,
    repo_name: Option<String>,
    commit_name: Option<String>,
    commit_email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StorageSection {
    resources_dir: Option<PathBuf>,
    portfolio_dir: Option<String>,
    ledger_file: Option<String>,
    key_tag: Option<String>,
    accepted_extensions: Option<Vec<String>>,
    public_url_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServiceSection {
    socket: Option<PathBuf>,
    sync_queue_capacity: Option<usize>,
}

/// Builder for layered configuration loading.
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
    /// Replaces the process environment when set.
    env_vars: Option<HashMap<String, String>>,
    skip_file: bool,
    skip_env: bool,
    skip_dotenv: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: "FOLIO".to_string(),
            env_vars: None,
            skip_file: false,
            skip_env: false,
            skip_dotenv: false,
        }
    }

    /// Read this file instead of `$FOLIO_CONFIG` / `./folio.toml`.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Default is "FOLIO", which means FOLIO_REPO_URL, FOLIO_TOKEN, etc.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Resolve environment lookups against `vars` instead of the process
    /// environment. Also disables `.env` loading.
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self.skip_dotenv = true;
        self
    }

    pub fn skip_file_layer(mut self) -> Self {
        self.skip_file = true;
        self
    }

    pub fn skip_env_layer(mut self) -> Self {
        self.skip_env = true;
        self
    }

    pub fn skip_dotenv(mut self) -> Self {
        self.skip_dotenv = true;
        self
    }

    /// Load configuration with all enabled layers.
    ///
    /// # Errors
    ///
    /// - `Io`: the config file exists but cannot be read
    /// - `TomlParse`: invalid TOML
    /// - `InvalidEnvValue`: an environment override does not parse
    /// - `Validation`: the merged config is unusable
    pub fn load(self) -> Result<FolioConfig, ConfigLoadError> {
        if !self.skip_env && !self.skip_dotenv {
            match dotenvy::dotenv() {
                Ok(path) => tracing::debug!("loaded environment from {}", path.display()),
                Err(e) if e.not_found() => {}
                Err(e) => tracing::warn!("ignoring unreadable .env: {e}"),
            }
        }

        // Layer 1: defaults
        let mut config = FolioConfig::default();

        // Layer 2: file
        if !self.skip_file {
            let path = self.resolve_config_path();
            if let Some(file) = Self::load_from_file(&path)? {
                Self::merge_file(&mut config, file);
            }
        }

        // Layer 3: environment
        if !self.skip_env {
            self.apply_env_overrides(&mut config)?;
        }

        Self::validate(&mut config)?;
        Ok(config)
    }

    fn var(&self, name: &str) -> Option<String> {
        let value = match &self.env_vars {
            Some(vars) => vars.get(name).cloned(),
            None => env::var(name).ok(),
        };
        value.filter(|v| !v.trim().is_empty())
    }

    fn resolve_config_path(&self) -> PathBuf {
        if let Some(path) = &self.config_path {
            return path.clone();
        }
        if !self.skip_env
            && let Some(path) = self.var(&format!("{}_CONFIG", self.env_prefix))
        {
            return PathBuf::from(path);
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// `Ok(None)` when the file does not exist.
    fn load_from_file(path: &Path) -> Result<Option<FileConfig>, ConfigLoadError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("{} not found, using defaults", path.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(ConfigLoadError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let file = toml::from_str(&contents).map_err(|source| ConfigLoadError::TomlParse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("loaded config from {}", path.display());
        Ok(Some(file))
    }

    fn merge_file(config: &mut FolioConfig, file: FileConfig) {
        let FileConfig {
            git,
            storage,
            service,
        } = file;

        if git.repo_url.is_some() {
            config.repo_url = git.repo_url;
        }
        if git.token.is_some() {
            config.token = git.token;
        }
        if git.repo_name.is_some() {
            config.repo_name = git.repo_name;
        }
        if let Some(name) = git.commit_name {
            config.commit_name = name;
        }
        if let Some(email) = git.commit_email {
            config.commit_email = email;
        }

        if let Some(dir) = storage.resources_dir {
            config.resources_dir = dir;
        }
        if let Some(dir) = storage.portfolio_dir {
            config.portfolio_dir = dir;
        }
        if let Some(file) = storage.ledger_file {
            config.ledger_file = file;
        }
        if let Some(tag) = storage.key_tag {
            config.key_tag = tag;
        }
        if let Some(extensions) = storage.accepted_extensions {
            config.accepted_extensions = extensions;
        }
        if let Some(prefix) = storage.public_url_prefix {
            config.public_url_prefix = prefix;
        }

        if service.socket.is_some() {
            config.socket_path = service.socket;
        }
        if let Some(capacity) = service.sync_queue_capacity {
            config.sync_queue_capacity = capacity;
        }
    }

    fn apply_env_overrides(&self, config: &mut FolioConfig) -> Result<(), ConfigLoadError> {
        let prefix = &self.env_prefix;
        let prefixed = |name: &str| format!("{prefix}_{name}");

        if let Some(url) = self
            .var(&prefixed("REPO_URL"))
            .or_else(|| self.var("GITHUB_REPO_URL"))
        {
            config.repo_url = Some(url);
        }
        if let Some(token) = self
            .var(&prefixed("TOKEN"))
            .or_else(|| self.var("GITHUB_TOKEN"))
        {
            config.token = Some(token);
        }
        if let Some(name) = self
            .var(&prefixed("REPO_NAME"))
            .or_else(|| self.var("GITHUB_REPO_NAME"))
        {
            config.repo_name = Some(name);
        }
        if let Some(dir) = self.var(&prefixed("RESOURCES_DIR")) {
            config.resources_dir = PathBuf::from(dir);
        }
        if let Some(list) = self.var(&prefixed("ACCEPTED_EXTENSIONS")) {
            config.accepted_extensions = list.split(',').map(str::to_string).collect();
        }
        if let Some(socket) = self.var(&prefixed("SOCKET")) {
            config.socket_path = Some(PathBuf::from(socket));
        }

        let capacity_var = prefixed("SYNC_QUEUE_CAPACITY");
        if let Some(value) = self.var(&capacity_var) {
            config.sync_queue_capacity = value.trim().parse().map_err(|_| {
                ConfigLoadError::InvalidEnvValue {
                    var: capacity_var.clone(),
                    value: value.clone(),
                    expected: "a positive integer".to_string(),
                }
            })?;
        }

        Ok(())
    }

    /// Normalize extension spellings and reject unusable values.
    fn validate(config: &mut FolioConfig) -> Result<(), ConfigLoadError> {
        config.accepted_extensions = config
            .accepted_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        config.accepted_extensions.dedup();

        if config.accepted_extensions.is_empty() {
            return Err(ConfigLoadError::Validation(
                "accepted_extensions must name at least one extension".to_string(),
            ));
        }
        if config.sync_queue_capacity == 0 {
            return Err(ConfigLoadError::Validation(
                "sync_queue_capacity must be at least 1".to_string(),
            ));
        }
        if config.key_tag.is_empty() || !config.key_tag.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigLoadError::Validation(format!(
                "key_tag must be ASCII letters, got '{}'",
                config.key_tag
            )));
        }
        if config.token.as_deref().is_some_and(str::is_empty) {
            config.token = None;
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
