//! Foreground daemon: engine plus watchers, driven by signals.

use std::path::{Path, PathBuf};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use dropstash_core::{Engine, EngineHandle, Stash};

use crate::config::StashConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::monitor::MonitorSet;
use crate::pidfile::PidFile;

/// A running dropstash instance.
pub struct Daemon {
    config_path: PathBuf,
    config: StashConfig,
    handle: EngineHandle,
    engine: JoinHandle<Stash>,
    monitors: MonitorSet,
    pid_file: PidFile,
}

impl Daemon {
    /// Create directories, claim the pid file, load the stash and spawn the
    /// engine and one watcher per location.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(config_path: PathBuf, config: StashConfig) -> DaemonResult<Self> {
        config.ensure_dirs()?;
        if config.locations.is_empty() {
            return Err(DaemonError::NoLocations);
        }
        let pid_file = PidFile::create(&config.pid_path())?;

        let stash = Stash::open(config.paths());
        let (handle, engine) = Engine::start(config.engine_config(), stash);

        let mut monitors = MonitorSet::new(config.staging_dir.clone(), handle.sender());
        let started = monitors.spawn_all(&config.locations);
        if started == 0 {
            warn!("no location could be watched; fix the config and reload");
        }
        info!(
            watchers = started,
            locations = config.locations.len(),
            pid = std::process::id(),
            "daemon started"
        );

        Ok(Self {
            config_path,
            config,
            handle,
            engine,
            monitors,
            pid_file,
        })
    }

    /// Handle to the engine loop.
    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    /// Current watchers.
    pub fn monitors(&self) -> &MonitorSet {
        &self.monitors
    }

    /// Active configuration.
    pub fn config(&self) -> &StashConfig {
        &self.config
    }

    /// Pid file held by this instance.
    pub fn pid_path(&self) -> &Path {
        self.pid_file.path()
    }

    /// Re-read the config file and respawn watchers for its location list.
    ///
    /// Only `locations` is applied. If the file cannot be read the current
    /// watchers keep running and the error is returned.
    pub async fn reload(&mut self) -> DaemonResult<usize> {
        let fresh = StashConfig::from_file(&self.config_path)?;
        if fresh.locations.is_empty() {
            warn!("reloaded config has no locations");
        }
        self.config.locations = fresh.locations;
        let started = self.monitors.reload(&self.config.locations).await;
        info!(watchers = started, "reloaded");
        Ok(started)
    }

    /// Stop watchers, then the engine, waiting for the final save.
    ///
    /// The pid file is removed last.
    pub async fn shutdown(mut self) -> DaemonResult<Stash> {
        info!("shutting down");
        self.monitors.stop_all().await;
        self.handle.stop().await;
        let stash = self.engine.await?;
        info!(units = stash.len(), "daemon stopped");
        Ok(stash)
    }

    /// Serve until SIGTERM or SIGINT. SIGHUP triggers [`reload`](Self::reload).
    pub async fn run_until_signalled(mut self) -> DaemonResult<Stash> {
        let mut hangup = signal(SignalKind::hangup())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;

        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    info!("SIGHUP received, reloading");
                    if let Err(e) = self.reload().await {
                        error!(error = %e, "reload failed, keeping current watchers");
                    }
                }
                _ = terminate.recv() => {
                    info!("SIGTERM received");
                    break;
                }
                _ = interrupt.recv() => {
                    info!("SIGINT received");
                    break;
                }
            }
        }
        self.shutdown().await
    }
}
