use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use dropstash_core::{ListRow, RemoveOutcome, Stash, StdinConfirm};

use crate::config::StashConfig;
use crate::daemon::Daemon;
use crate::error::DaemonError;
use crate::logging::init_logging;
use crate::pidfile::{running_pid, send_signal};

/// Time format of the `list` capture column.
pub const LIST_TIME_FORMAT: &str = "%b %d %y %H:%M:%S";

/// Command-line entry point.
#[derive(Parser)]
#[command(name = "dropstash")]
#[command(about = "Versioned, deduplicating stash for file drop folders", long_about = None)]
pub struct Cli {
    /// Config file; created with defaults if missing.
    #[arg(short, long, env = "DROPSTASH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long)]
    pub debug: bool,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Lifecycle verbs and stash queries.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the daemon in the foreground.
    Start,
    /// Ask the running daemon to save and exit.
    Stop,
    /// Ask the running daemon to re-read its locations.
    Reload,
    /// Report whether the daemon is running.
    Status,
    /// Print every stored version.
    List,
    /// Copy a stored version out.
    Export {
        /// `id`, `id/name` or `id/name:version`.
        key: String,
        /// Destination file or directory.
        destination: PathBuf,
    },
    /// Remove versions or whole units, asking first.
    Remove {
        /// Keys to remove, each confirmed on stdin.
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

impl Cli {
    /// Config file in effect.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(StashConfig::default_path)
    }

    /// Load the config, set up logging and dispatch the subcommand.
    pub async fn run(self) -> Result<()> {
        let config_path = self.config_path();
        let config = StashConfig::load_or_init(&config_path)?;

        let _guard = if self.command == Command::Start {
            config.ensure_dirs()?;
            init_logging(
                self.debug,
                Some((&config.log_dir, config.log_retention_days)),
            )?
        } else {
            init_logging(self.debug, None)?
        };
        tracing::debug!(config = %config_path.display(), command = ?self.command, "dropstash");

        match self.command {
            Command::Start => start(config_path, config).await,
            Command::Stop => signal_daemon(&config, libc::SIGTERM, "stop"),
            Command::Reload => signal_daemon(&config, libc::SIGHUP, "reload"),
            Command::Status => status(&config),
            Command::List => list(&config),
            Command::Export {
                ref key,
                ref destination,
            } => export(&config, key, destination),
            Command::Remove { ref keys } => remove(&config, keys),
        }
    }
}

async fn start(config_path: PathBuf, config: StashConfig) -> Result<()> {
    tracing::info!("- - - - - - - - - - - - - - -");
    let daemon = Daemon::start(config_path, config)?;
    daemon.run_until_signalled().await?;
    Ok(())
}

fn signal_daemon(config: &StashConfig, signal: libc::c_int, verb: &str) -> Result<()> {
    let pid = running_pid(&config.pid_path())?;
    send_signal(pid, signal)?;
    println!("Sent {verb} to dropstash daemon (pid {pid})");
    Ok(())
}

fn status(config: &StashConfig) -> Result<()> {
    match running_pid(&config.pid_path()) {
        Ok(pid) => println!("Dropstash running, pid {pid}"),
        Err(DaemonError::NotRunning(reason)) => {
            println!("Dropstash daemon not running, please start ({reason})")
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn list(config: &StashConfig) -> Result<()> {
    let stash = Stash::load(config.paths())?;
    for row in stash.list() {
        println!("{}", format_row(&row));
    }
    Ok(())
}

fn export(config: &StashConfig, key: &str, destination: &Path) -> Result<()> {
    let stash = Stash::load(config.paths())?;
    let written = stash.export_key(key, destination)?;
    println!("Exported {written} bytes to {}", destination.display());
    Ok(())
}

fn remove(config: &StashConfig, keys: &[String]) -> Result<()> {
    if let Ok(pid) = running_pid(&config.pid_path()) {
        bail!("dropstash daemon is running (pid {pid}); stop it before removing");
    }
    let mut stash = Stash::load(config.paths())?;
    for key in keys {
        match stash.remove(key, &StdinConfirm)? {
            RemoveOutcome::Removed { id, name, version } => {
                println!("Removed {id}/{name}:{version}")
            }
            RemoveOutcome::RemovedUnit { id } => println!("Removed {id} and all its versions"),
            RemoveOutcome::Declined => println!("Left {key} in place"),
            RemoveOutcome::NotFound => println!("Unable to find {key} to remove"),
        }
    }
    Ok(())
}

/// One `list` line in fixed columns.
pub fn format_row(row: &ListRow) -> String {
    format!(
        "{:<36} {:<30} {:>10} {:>3} {:<40} {}",
        row.id,
        clip(&row.name, 30, 27),
        row.size,
        row.version,
        clip(&row.location, 40, 32),
        row.version_date.format(LIST_TIME_FORMAT)
    )
}

fn clip(text: &str, width: usize, keep: usize) -> String {
    if text.chars().count() > width {
        let mut clipped: String = text.chars().take(keep).collect();
        clipped.push_str("...");
        clipped
    } else {
        text.to_string()
    }
}
