//! Messages accepted by the stash engine queue.

use crate::node::StagedFile;

/// A request against the stash, delivered through the engine's single queue.
///
/// Watchers only ever send `ProcessFile`; lifecycle management sends the
/// control variants through the same queue so they are ordered relative to
/// pending file work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Resume processing after a `Pause`. No-op when not paused.
    Start,
    /// Classify a staged file against the stash.
    ProcessFile(StagedFile),
    /// Hold further `ProcessFile` commands until `Start`.
    Pause,
    /// Final save, then close the queue.
    Stop,
}

impl Command {
    /// Build a `ProcessFile` command.
    pub fn process(
        id: impl Into<String>,
        name: impl Into<String>,
        location: impl Into<String>,
        overwrite: bool,
    ) -> Self {
        Command::ProcessFile(StagedFile {
            id: id.into(),
            name: name.into(),
            location: location.into(),
            overwrite,
        })
    }

    /// Short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::ProcessFile(_) => "process-file",
            Command::Pause => "pause",
            Command::Stop => "stop",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::ProcessFile(staged) => write!(f, "process-file({})", staged.id),
            other => f.write_str(other.kind()),
        }
    }
}
