//! Single-writer engine loop.
//!
//! One task owns the [`Stash`] and drains a FIFO command queue. Every
//! mutation happens on that task, so no locking is needed around the node
//! list. The loop also saves the metadata file on a fixed interval.
//!
//! Stopping is a rendezvous: `Command::Stop` is queued behind any pending
//! work; when the loop reaches it, it saves, closes the queue and exits.
//! [`EngineHandle::stop`] waits for that closure, so when it returns the
//! metadata file is flushed.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::error::{StashError, StashResult};
use crate::node::StagedFile;
use crate::stash::{MatchOutcome, Stash};

/// Sending half of the engine queue, handed to watchers.
pub type CommandSender = mpsc::Sender<Command>;

/// Configuration for the engine loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between unconditional metadata saves.
    pub autosave_interval: Duration,
    /// Capacity of the command queue.
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            autosave_interval: Duration::from_secs(30),
            queue_capacity: 1024,
        }
    }
}

/// Counters published by the engine after every command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Staged files classified successfully.
    pub files_processed: u64,
    /// Exact duplicates of an existing unit.
    pub duplicates: u64,
    /// Truncated resends of an existing unit.
    pub truncated: u64,
    /// Units replaced by a longer copy.
    pub superseded: u64,
    /// New units registered.
    pub new_units: u64,
    /// Process-file commands that failed and were dropped.
    pub failed: u64,
    /// Metadata saves performed by the loop (autosave and final).
    pub saves: u64,
    /// Process-file commands currently held by a pause.
    pub held: u64,
}

impl EngineStats {
    fn record(&mut self, outcome: &MatchOutcome) {
        self.files_processed += 1;
        match outcome {
            MatchOutcome::Duplicate { .. } => self.duplicates += 1,
            MatchOutcome::Truncated { .. } => self.truncated += 1,
            MatchOutcome::Superseded { .. } => self.superseded += 1,
            MatchOutcome::NewUnit { .. } => self.new_units += 1,
        }
    }
}

/// Handle for submitting commands and observing the engine.
#[derive(Clone)]
pub struct EngineHandle {
    sender: CommandSender,
    stats: watch::Receiver<EngineStats>,
}

impl EngineHandle {
    /// A sender for watchers to enqueue commands with.
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// Enqueue a command.
    pub async fn submit(&self, command: Command) -> StashResult<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| StashError::EngineStopped)
    }

    /// Hold process-file commands until [`resume`](Self::resume).
    pub async fn pause(&self) -> StashResult<()> {
        self.submit(Command::Pause).await
    }

    /// Resume after a pause.
    pub async fn resume(&self) -> StashResult<()> {
        self.submit(Command::Start).await
    }

    /// Queue a stop and wait until the engine has saved and closed its queue.
    ///
    /// Returns immediately if the engine has already stopped.
    pub async fn stop(&self) {
        if self.sender.send(Command::Stop).await.is_err() {
            debug!("engine already stopped");
        }
        self.sender.closed().await;
    }

    /// Latest published statistics.
    pub fn stats(&self) -> EngineStats {
        self.stats.borrow().clone()
    }

    /// Wait for the next statistics update.
    pub async fn changed(&mut self) -> StashResult<EngineStats> {
        self.stats
            .changed()
            .await
            .map_err(|_| StashError::EngineStopped)?;
        Ok(self.stats.borrow().clone())
    }

    /// Whether the engine is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// The single writer of a stash.
pub struct Engine {
    config: EngineConfig,
    stash: Stash,
    stats: EngineStats,
    stats_tx: watch::Sender<EngineStats>,
    paused: bool,
    held: VecDeque<StagedFile>,
}

impl Engine {
    /// Spawn the engine loop on the current runtime.
    ///
    /// The join handle yields the stash back once the loop has stopped.
    pub fn start(config: EngineConfig, stash: Stash) -> (EngineHandle, JoinHandle<Stash>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (stats_tx, stats_rx) = watch::channel(EngineStats::default());

        let engine = Engine {
            config,
            stash,
            stats: EngineStats::default(),
            stats_tx,
            paused: false,
            held: VecDeque::new(),
        };
        let task = tokio::spawn(engine.run(rx));

        (
            EngineHandle {
                sender: tx,
                stats: stats_rx,
            },
            task,
        )
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) -> Stash {
        info!(units = self.stash.len(), "stash engine running");
        let period = self.config.autosave_interval.max(Duration::from_millis(1));
        let mut autosave = interval_at(Instant::now() + period, period);
        autosave.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = autosave.tick() => {
                    debug!("autosave");
                    self.save();
                }
                command = rx.recv() => match command {
                    Some(Command::Stop) => {
                        info!("stop received");
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => {
                        warn!("every command sender dropped, stopping");
                        break;
                    }
                },
            }
            self.publish();
        }

        self.save();
        rx.close();
        while let Ok(command) = rx.try_recv() {
            warn!(%command, "dropping command queued after stop");
        }
        for staged in self.held.drain(..) {
            warn!(id = %staged.id, name = %staged.name, "held file left in staging");
        }
        self.stats.held = 0;
        self.publish();
        info!("stash engine stopped");
        self.stash
    }

    fn handle(&mut self, command: Command) {
        debug!(%command, "processing next command");
        match command {
            Command::ProcessFile(staged) if self.paused => {
                debug!(id = %staged.id, "paused, holding");
                self.held.push_back(staged);
                self.stats.held = self.held.len() as u64;
            }
            Command::ProcessFile(staged) => self.process(&staged),
            Command::Pause => {
                info!("pausing file processing");
                self.paused = true;
            }
            Command::Start => {
                if self.paused {
                    info!(held = self.held.len(), "resuming file processing");
                    self.paused = false;
                    while let Some(staged) = self.held.pop_front() {
                        self.process(&staged);
                    }
                    self.stats.held = 0;
                }
            }
            Command::Stop => {}
        }
    }

    fn process(&mut self, staged: &StagedFile) {
        match self.stash.apply(staged) {
            Ok(outcome) => {
                debug!(?outcome, "applied staged file");
                self.stats.record(&outcome);
            }
            Err(e) => {
                error!(id = %staged.id, name = %staged.name, error = %e, "failed to process staged file");
                self.stats.failed += 1;
            }
        }
    }

    fn save(&mut self) {
        match self.stash.save() {
            Ok(()) => self.stats.saves += 1,
            Err(e) => error!(error = %e, "failed to save metadata"),
        }
    }

    fn publish(&self) {
        let _ = self.stats_tx.send(self.stats.clone());
    }
}
