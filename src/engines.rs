//! Engine registry: which preprocessor implementations, at which versions,
//! participate in the matrix.
//!
//! Engines are declared in a YAML file rather than in code, so adding a
//! version is a data change:
//!
//! ```yaml
//! engines:
//!   - name: libsass
//!     versions:
//!       - version: "3.2"
//!         command: ["docker", "run", "--rm", "-p", "7312:7000", "sassc-server:3.2"]
//!         endpoint: "127.0.0.1:7312"
//!   - name: ruby-sass
//!     versions:
//!       - version: "3.4"
//!         command: ["docker", "run", "--rm", "-p", "7334:7000", "sass-server:3.4"]
//!         endpoint: "127.0.0.1:7334"
//!         ready_attempts: 60
//! ```
//!
//! The launch command is opaque to this tool: any program that serves the
//! compile transport on `endpoint` works, containerized or not.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::errors::{CompatError, Result};

/// Identity of one (engine, version) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EngineVersionId {
    pub engine: String,
    pub version: String,
}

impl EngineVersionId {
    pub fn new(engine: impl Into<String>, version: impl Into<String>) -> Self {
        EngineVersionId {
            engine: engine.into(),
            version: version.into(),
        }
    }

    /// The persisted identity used in artifact keys and report rows:
    /// `engine_version` with `-` and `.` flattened to `_`, so it is safe
    /// inside file names and SCSS map keys.
    pub fn label(&self) -> String {
        format!(
            "{}_{}",
            self.engine.replace('-', "_"),
            self.version.replace('.', "_")
        )
    }
}

impl fmt::Display for EngineVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.engine, self.version)
    }
}

fn default_ready_attempts() -> u32 {
    40
}

fn default_ready_backoff_ms() -> u64 {
    250
}

/// One launchable engine version.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionConfig {
    pub version: String,
    /// Program and arguments that launch the isolated runtime.
    pub command: Vec<String>,
    /// Transport endpoint the runtime serves once ready, `host:port`.
    pub endpoint: String,
    /// Readiness probe budget: bounded retries with fixed backoff.
    #[serde(default = "default_ready_attempts")]
    pub ready_attempts: u32,
    #[serde(default = "default_ready_backoff_ms")]
    pub ready_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub name: String,
    pub versions: Vec<VersionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineRegistry {
    pub engines: Vec<EngineConfig>,
}

impl EngineRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<EngineRegistry> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| CompatError::Config {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;
        let registry: EngineRegistry =
            serde_yaml::from_str(&text).map_err(|e| CompatError::Config {
                path: path.to_path_buf(),
                source: Box::new(e),
            })?;
        Ok(registry)
    }

    /// All declared (engine, version) pairs with their launch configs, in
    /// declaration order.
    pub fn versions(&self) -> impl Iterator<Item = (EngineVersionId, &VersionConfig)> {
        self.engines.iter().flat_map(|engine| {
            engine
                .versions
                .iter()
                .map(move |v| (EngineVersionId::new(&engine.name, &v.version), v))
        })
    }

    /// Just the identities, for build-graph keying.
    pub fn version_ids(&self) -> Vec<EngineVersionId> {
        self.versions().map(|(id, _)| id).collect()
    }
}
