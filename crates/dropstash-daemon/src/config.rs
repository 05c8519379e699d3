//! Daemon configuration.
//!
//! The config file is read once at start; a reload re-reads it but only
//! applies the location list.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use dropstash_core::{EngineConfig, StashPaths};

use crate::error::{DaemonError, DaemonResult};

/// Name of the directory under `$HOME` holding everything dropstash owns.
pub const CONFIG_DIR_NAME: &str = ".dropstash";

/// Resolved daemon configuration. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    /// Drop directories to watch, one worker each.
    pub locations: Vec<PathBuf>,
    /// Rolling log files.
    pub log_dir: PathBuf,
    /// Daily log files kept.
    pub log_retention_days: u32,
    /// One file per stash unit.
    pub store_dir: PathBuf,
    /// Must share a filesystem with every location.
    pub staging_dir: PathBuf,
    /// Metadata and pid file.
    pub meta_dir: PathBuf,
    pub autosave_secs: u64,
    pub queue_capacity: usize,
}

impl Default for StashConfig {
    fn default() -> Self {
        Self::rooted_at(&home_root())
    }
}

/// `$HOME/.dropstash`, or `./.dropstash` when `HOME` is unset.
pub fn home_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

impl StashConfig {
    /// Defaults with every directory under `root`.
    pub fn rooted_at(root: &Path) -> Self {
        let store = root.join("stash");
        Self {
            locations: Vec::new(),
            log_dir: root.join("logs"),
            log_retention_days: 1,
            staging_dir: store.join("staging"),
            store_dir: store,
            meta_dir: root.to_path_buf(),
            autosave_secs: 30,
            queue_capacity: 1024,
        }
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        home_root().join("config")
    }

    /// Read a config file. `.toml` is TOML; `.json` or no extension is JSON.
    pub fn from_file(path: &Path) -> DaemonResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => Ok(toml::from_str(&contents)?),
            "json" | "" => Ok(serde_json::from_str(&contents)?),
            other => Err(DaemonError::UnsupportedConfig(other.to_string())),
        }
    }

    /// Load the config file, writing one with defaults first if it is missing.
    ///
    /// Defaults are rooted next to the config file.
    pub fn load_or_init(path: &Path) -> DaemonResult<Self> {
        if path.exists() {
            return Self::from_file(path);
        }
        let root = path.parent().unwrap_or_else(|| Path::new("."));
        if !root.as_os_str().is_empty() && !root.exists() {
            warn!(dir = %root.display(), "no existing config directory, creating");
            create_private_dir(root)?;
        }
        let config = Self::rooted_at(root);
        let mut body = serde_json::to_string_pretty(&config)?;
        body.push('\n');
        std::fs::write(path, body)?;
        info!(path = %path.display(), "created config");
        Ok(config)
    }

    /// Create the log, store, staging and metadata directories.
    pub fn ensure_dirs(&self) -> DaemonResult<()> {
        for dir in [&self.log_dir, &self.store_dir, &self.staging_dir, &self.meta_dir] {
            if !dir.exists() {
                warn!(dir = %dir.display(), "creating missing directory");
                create_private_dir(dir)?;
            }
        }
        Ok(())
    }

    /// Paths handed to the stash engine.
    pub fn paths(&self) -> StashPaths {
        StashPaths::new(&self.store_dir, &self.staging_dir, &self.meta_dir)
    }

    /// Engine loop settings.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            autosave_interval: Duration::from_secs(self.autosave_secs.max(1)),
            queue_capacity: self.queue_capacity.max(1),
        }
    }

    /// Pid file of a running daemon.
    pub fn pid_path(&self) -> PathBuf {
        self.meta_dir.join("pid")
    }
}

fn create_private_dir(path: &Path) -> DaemonResult<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path).map_err(|source| DaemonError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}
