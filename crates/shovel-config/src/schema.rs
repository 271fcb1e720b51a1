//! Typed deserialization of the on-disk configuration: `port`, `host`,
//! `workers`, `logging.{sinks, loggers}`, and the `caches`/`directories`/
//! `databases` backend sections.
//!
//! Backend sections are arrays of tables rather than maps
//! (`[[caches]]` with a `name` field, not `[caches.api-*]`) so the
//! config preserves author order without depending on a TOML
//! implementation detail for map ordering; exact-then-first-glob
//! matching reads that order straight off the `Vec`.

use serde::Deserialize;
use std::collections::BTreeMap;

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShovelConfig {
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub caches: Vec<BackendEntry>,
    #[serde(default)]
    pub directories: Vec<BackendEntry>,
    #[serde(default)]
    pub databases: Vec<DatabaseEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSection {
    /// Named output sinks (stdout, a file, …), each with its own level
    /// and format override.
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
    /// Per-category level overrides, e.g. `"db.migrations" = "debug"`.
    #[serde(default)]
    pub loggers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub name: String,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

/// One `caches`/`directories` entry. `name` may be an exact name or a
/// `*`-glob pattern; `opts` is whatever the backend constructor expects.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendEntry {
    pub name: String,
    pub module: String,
    pub export: Option<String>,
    #[serde(flatten)]
    pub opts: BTreeMap<String, toml::Value>,
}

/// A `databases` entry: the same shape as [`BackendEntry`] plus the
/// connection `url` every database driver needs.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseEntry {
    pub name: String,
    pub module: String,
    pub export: Option<String>,
    pub url: String,
    #[serde(flatten)]
    pub opts: BTreeMap<String, toml::Value>,
}

impl ShovelConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }
}
