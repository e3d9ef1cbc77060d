//! Layered configuration for parcel.
//!
//! Layers, lowest precedence first:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. An optional configuration file (TOML, YAML or JSON by extension)
//! 3. Environment variables prefixed `PARCEL_`, with `__` separating nested
//!    keys (`PARCEL_CACHE__TTL=7d`)

mod duration;
pub mod error;

pub use crate::duration::{format_duration, parse_duration};
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "PARCEL_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheSettings,
    pub source: SourceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Directory holding cache entries and their lock files. Must be absolute.
    pub root: PathBuf,
    /// Entries not accessed for this long are eligible for eviction. `None`
    /// (`"never"`) disables eviction.
    #[serde(with = "crate::duration::ttl")]
    pub ttl: Option<Duration>,
    /// Write content that fails package validation as a single file instead
    /// of failing the acquisition.
    pub fallback_invalid_as_file: bool,
    #[serde(with = "crate::duration")]
    pub sweep_interval: Duration,
    pub max_deletions_per_sweep: usize,
    /// Staleness against the source is only rechecked once an entry has been
    /// idle for longer than this.
    #[serde(with = "crate::duration")]
    pub quiescence_window: Duration,
    #[serde(with = "crate::duration")]
    pub lock_acquire_timeout: Duration,
    #[serde(with = "crate::duration")]
    pub retry_backoff: Duration,
    /// Entry that must exist at the root of an archive for it to count as a
    /// package.
    pub manifest_name: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
            ttl: Some(Duration::from_secs(30 * 24 * 60 * 60)),
            fallback_invalid_as_file: false,
            sweep_interval: Duration::from_secs(24 * 60 * 60),
            max_deletions_per_sweep: 3,
            quiescence_window: Duration::from_secs(2 * 60),
            lock_acquire_timeout: Duration::from_secs(2 * 60),
            retry_backoff: Duration::from_millis(750),
            manifest_name: "imsmanifest.xml".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Used for logging only.
    pub name: String,
    /// Root of a directory source. Required by commands that fetch content.
    pub root: Option<PathBuf>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self { name: "local".to_string(), root: None }
    }
}

/// Platform cache directory (`~/.cache/parcel` on Linux), or a directory
/// under the system temporary directory when there is no home directory.
pub fn default_cache_root() -> PathBuf {
    ProjectDirs::from("", "", "parcel")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("parcel-cache"))
}

impl Config {
    /// Assemble the configuration layers without extracting them.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = file {
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
            }
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file(path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load and validate the configuration.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_figment(&Self::figment(file)?)
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract().map_err(|e| exn::Exn::from(ErrorKind::Extract(e.to_string())))?;
        config.validate()?;
        tracing::debug!(root = %config.cache.root.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let cache = &self.cache;
        if !cache.root.is_absolute() {
            exn::bail!(ErrorKind::invalid("cache.root", format!("`{}` is not absolute", cache.root.display())));
        }
        if cache.max_deletions_per_sweep == 0 {
            exn::bail!(ErrorKind::invalid("cache.max_deletions_per_sweep", "must be at least 1"));
        }
        if cache.retry_backoff.is_zero() {
            exn::bail!(ErrorKind::invalid("cache.retry_backoff", "must be greater than zero"));
        }
        if cache.lock_acquire_timeout.is_zero() {
            exn::bail!(ErrorKind::invalid("cache.lock_acquire_timeout", "must be greater than zero"));
        }
        if cache.manifest_name.trim().is_empty() {
            exn::bail!(ErrorKind::invalid("cache.manifest_name", "must not be empty"));
        }
        if let Some(root) = &self.source.root
            && !root.is_absolute()
        {
            exn::bail!(ErrorKind::invalid("source.root", format!("`{}` is not absolute", root.display())));
        }
        Ok(())
    }
}
