//! Drop directory watchers.
//!
//! One worker per location. A worker waits for close-after-write events,
//! renames the finished file into staging under a fresh id, and only then
//! enqueues a `ProcessFile` command, so the engine never reads a file an
//! application is still writing.

use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use dropstash_core::{Command, CommandSender, StagedFile};

use crate::error::{DaemonError, DaemonResult};

/// The set-group-id permission bit.
pub const SETGID_BIT: u32 = 0o2000;

/// Validate a location and return its canonical path.
///
/// The directory must exist and carry the set-group-id bit so files dropped
/// by different users inherit the directory's group.
pub fn check_location(path: &Path) -> DaemonResult<PathBuf> {
    let canonical = path
        .canonicalize()
        .map_err(|source| DaemonError::LocationUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
    let meta = std::fs::metadata(&canonical).map_err(|source| DaemonError::LocationUnavailable {
        path: path.to_path_buf(),
        source,
    })?;
    if !meta.is_dir() {
        return Err(DaemonError::NotADirectory(path.to_path_buf()));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & SETGID_BIT == 0 {
            return Err(DaemonError::MissingSetgid(path.to_path_buf()));
        }
    }
    Ok(canonical)
}

/// True for the event that marks a file as completely written.
pub fn is_write_complete(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}

/// Move a finished file into staging and describe it.
///
/// Returns `Ok(None)` when the path is not a regular file directly inside
/// `location` (or has vanished).
pub async fn stage_file(
    path: &Path,
    location: &Path,
    staging_dir: &Path,
) -> std::io::Result<Option<StagedFile>> {
    if path.parent() != Some(location) {
        debug!(path = %path.display(), "ignoring event outside watched directory");
        return Ok(None);
    }
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    }
    let Some(name) = path.file_name() else {
        return Ok(None);
    };

    let id = StagedFile::fresh_id();
    tokio::fs::rename(path, staging_dir.join(&id)).await?;
    Ok(Some(StagedFile {
        id,
        name: name.to_string_lossy().into_owned(),
        location: location.display().to_string(),
        overwrite: false,
    }))
}

/// A running watcher.
pub struct MonitorHandle {
    location: PathBuf,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Canonical watched path.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Whether the worker has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the worker and wait for it to release its watch.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = self.task.await {
            error!(location = %self.location.display(), error = %e, "monitor task failed");
        }
    }
}

/// Validate `location`, register for notifications and spawn its worker.
pub fn spawn_monitor(
    location: &Path,
    staging_dir: PathBuf,
    queue: CommandSender,
) -> DaemonResult<MonitorHandle> {
    let location = check_location(location)?;

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = event_tx.send(res);
    })?;
    watcher.watch(&location, RecursiveMode::NonRecursive)?;

    let (stop_tx, stop_rx) = oneshot::channel();
    let worker = Worker {
        location: location.clone(),
        staging_dir,
        queue,
    };
    let task = tokio::spawn(worker.run(watcher, event_rx, stop_rx));

    Ok(MonitorHandle {
        location,
        stop: Some(stop_tx),
        task,
    })
}

struct Worker {
    location: PathBuf,
    staging_dir: PathBuf,
    queue: CommandSender,
}

impl Worker {
    async fn run(
        self,
        watcher: RecommendedWatcher,
        mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
        mut stop: oneshot::Receiver<()>,
    ) {
        info!(location = %self.location.display(), "watcher up");
        loop {
            tokio::select! {
                _ = &mut stop => {
                    info!(location = %self.location.display(), "spinning down monitor");
                    break;
                }
                event = events.recv() => match event {
                    Some(Ok(event)) => {
                        if !self.handle(event).await {
                            break;
                        }
                    }
                    Some(Err(e)) => error!(location = %self.location.display(), error = %e, "monitor error"),
                    None => {
                        warn!(location = %self.location.display(), "notification stream ended");
                        break;
                    }
                },
            }
        }
        // Releases the inotify handle.
        drop(watcher);
    }

    /// Returns `false` once the engine queue has closed.
    async fn handle(&self, event: Event) -> bool {
        debug!(?event, "monitored directory event");
        if !is_write_complete(&event) {
            return true;
        }
        for path in &event.paths {
            let staged = match stage_file(path, &self.location, &self.staging_dir).await {
                Ok(Some(staged)) => staged,
                Ok(None) => continue,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "failed to move file to staging");
                    continue;
                }
            };
            info!(name = %staged.name, id = %staged.id, "found file, moved to staging");
            if self.queue.send(Command::ProcessFile(staged)).await.is_err() {
                warn!(location = %self.location.display(), "stash engine gone, stopping monitor");
                return false;
            }
        }
        true
    }
}

/// The running watcher set, torn down and respawned as a whole on reload.
pub struct MonitorSet {
    staging_dir: PathBuf,
    queue: CommandSender,
    monitors: Vec<MonitorHandle>,
}

impl MonitorSet {
    /// An empty set feeding `queue`.
    pub fn new(staging_dir: PathBuf, queue: CommandSender) -> Self {
        Self {
            staging_dir,
            queue,
            monitors: Vec::new(),
        }
    }

    /// Spawn a worker per location. Locations that fail validation are
    /// logged and skipped. Returns the number started.
    pub fn spawn_all(&mut self, locations: &[PathBuf]) -> usize {
        let mut started = 0;
        for (idx, location) in locations.iter().enumerate() {
            info!(idx, location = %location.display(), "spinning up monitor");
            match spawn_monitor(location, self.staging_dir.clone(), self.queue.clone()) {
                Ok(handle) => {
                    self.monitors.push(handle);
                    started += 1;
                }
                Err(e) => error!(location = %location.display(), error = %e, "monitor failed to start"),
            }
        }
        started
    }

    /// Stop every worker and wait for each to exit.
    pub async fn stop_all(&mut self) {
        for monitor in self.monitors.drain(..) {
            monitor.stop().await;
        }
    }

    /// Replace the running set with one for `locations`.
    pub async fn reload(&mut self, locations: &[PathBuf]) -> usize {
        self.stop_all().await;
        self.spawn_all(locations)
    }

    /// Watched locations, canonicalised.
    pub fn locations(&self) -> Vec<PathBuf> {
        self.monitors.iter().map(|m| m.location.clone()).collect()
    }

    /// Number of running workers.
    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    /// True when no workers are running.
    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn setgid_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o2775)).unwrap();
        dir
    }

    #[test]
    fn check_location_requires_setgid() {
        let plain = TempDir::new().unwrap();
        std::fs::set_permissions(plain.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(matches!(
            check_location(plain.path()),
            Err(DaemonError::MissingSetgid(_))
        ));

        let shared = setgid_dir();
        assert_eq!(
            check_location(shared.path()).unwrap(),
            shared.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn check_location_rejects_missing_and_files() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            check_location(&dir.path().join("nope")),
            Err(DaemonError::LocationUnavailable { .. })
        ));
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            check_location(&file),
            Err(DaemonError::NotADirectory(_))
        ));
    }

    #[test]
    fn write_complete_event_filter() {
        let close = Event::new(EventKind::Access(AccessKind::Close(AccessMode::Write)));
        let open = Event::new(EventKind::Access(AccessKind::Open(AccessMode::Any)));
        let create = Event::new(EventKind::Create(notify::event::CreateKind::File));
        assert!(is_write_complete(&close));
        assert!(!is_write_complete(&open));
        assert!(!is_write_complete(&create));
    }

    #[tokio::test]
    async fn stage_file_moves_into_staging() {
        let drop_dir = TempDir::new().unwrap();
        let staging = TempDir::new_in(drop_dir.path()).unwrap();
        let location = drop_dir.path().canonicalize().unwrap();
        let file = location.join("report.csv");
        std::fs::write(&file, b"a,b,c").unwrap();

        let staged = stage_file(&file, &location, staging.path()).await.unwrap().unwrap();
        assert_eq!(staged.name, "report.csv");
        assert_eq!(staged.location, location.display().to_string());
        assert!(!file.exists());
        assert_eq!(std::fs::read(staging.path().join(&staged.id)).unwrap(), b"a,b,c");
    }

    #[tokio::test]
    async fn stage_file_skips_foreign_and_missing_paths() {
        let drop_dir = TempDir::new().unwrap();
        let location = drop_dir.path().canonicalize().unwrap();
        let staging = TempDir::new().unwrap();

        let elsewhere = TempDir::new().unwrap();
        let foreign = elsewhere.path().join("x");
        std::fs::write(&foreign, b"x").unwrap();
        assert!(stage_file(&foreign, &location, staging.path()).await.unwrap().is_none());
        assert!(foreign.exists());

        let gone = location.join("gone");
        assert!(stage_file(&gone, &location, staging.path()).await.unwrap().is_none());

        let sub = location.join("sub");
        std::fs::create_dir(&sub).unwrap();
        assert!(stage_file(&sub, &location, staging.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bad_location_is_skipped_not_fatal() {
        let staging = TempDir::new().unwrap();
        let good = setgid_dir();
        let (tx, _rx) = mpsc::channel(8);
        let mut set = MonitorSet::new(staging.path().to_path_buf(), tx);

        let started = set.spawn_all(&[
            PathBuf::from("/definitely/not/here"),
            good.path().to_path_buf(),
        ]);
        assert_eq!(started, 1);
        assert_eq!(set.len(), 1);

        set.stop_all().await;
        assert!(set.is_empty());
    }
}
