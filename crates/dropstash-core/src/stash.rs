//! The stash: node list, lookup index, persistence and the prefix-matching
//! dedup algorithm.
//!
//! Only the engine loop mutates a live stash. The CLI works on a freshly
//! loaded snapshot for `list`, `export` and `remove`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::confirm::Confirm;
use crate::error::{StashError, StashResult};
use crate::fingerprint::{prefix_digest, Digest, CHUNK_SIZE};
use crate::lookup::{LookupIndex, Resolved};
use crate::node::{FilePointer, Node, StagedFile, StashPaths};

/// On-disk shape of the metadata file.
#[derive(Debug, Default, Deserialize)]
struct MetaRecord {
    #[serde(default)]
    count: usize,
    #[serde(default)]
    files: Vec<Node>,
}

#[derive(Serialize)]
struct MetaRecordRef<'a> {
    count: usize,
    files: &'a [Node],
}

/// How an incoming staged file related to the stash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Same bytes as an existing node.
    Duplicate {
        /// Matched node.
        id: String,
        /// Version number recorded.
        version: u32,
    },
    /// A truncated resend: the incoming bytes are a prefix of a node.
    Truncated {
        /// Matched node.
        id: String,
        /// Version number recorded.
        version: u32,
    },
    /// The node's bytes are a prefix of the incoming file, which replaced them.
    Superseded {
        /// Matched node.
        id: String,
        /// Version number recorded.
        version: u32,
    },
    /// Nothing matched; the staged file became a new node.
    NewUnit {
        /// New node id (the staging id).
        id: String,
    },
}

impl MatchOutcome {
    /// Id of the node the file ended up in.
    pub fn id(&self) -> &str {
        match self {
            MatchOutcome::Duplicate { id, .. }
            | MatchOutcome::Truncated { id, .. }
            | MatchOutcome::Superseded { id, .. }
            | MatchOutcome::NewUnit { id } => id,
        }
    }
}

/// Result of a removal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// One version pointer was pruned; the node stays.
    Removed {
        /// Node id.
        id: String,
        /// Version name.
        name: String,
        /// Version number.
        version: u32,
    },
    /// The whole node and its content were deleted.
    RemovedUnit {
        /// Node id.
        id: String,
    },
    /// Confirmation was declined.
    Declined,
    /// The key matched nothing.
    NotFound,
}

/// One flattened row of `list` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListRow {
    /// Node id.
    pub id: String,
    /// Version name.
    pub name: String,
    /// Version size.
    pub size: u64,
    /// Version number.
    pub version: u32,
    /// Source directory.
    pub location: String,
    /// Capture time.
    pub version_date: DateTime<Utc>,
}

/// Store root: owns the node list and its lookup index.
#[derive(Debug)]
pub struct Stash {
    paths: StashPaths,
    files: Vec<Node>,
    index: LookupIndex,
}

impl Stash {
    /// An empty stash over the given paths.
    pub fn new(paths: StashPaths) -> Self {
        Self {
            paths,
            files: Vec::new(),
            index: LookupIndex::default(),
        }
    }

    /// Load the metadata file. A missing or empty file is an empty stash.
    pub fn load(paths: StashPaths) -> StashResult<Self> {
        let meta = paths.meta_path();
        let bytes = match fs::read(&meta) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %meta.display(), "no metadata file yet");
                return Ok(Self::new(paths));
            }
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new(paths));
        }
        let record: MetaRecord = serde_json::from_slice(&bytes)?;
        if record.count != record.files.len() {
            debug!(
                recorded = record.count,
                actual = record.files.len(),
                "metadata count out of date"
            );
        }
        let mut stash = Self {
            paths,
            files: record.files,
            index: LookupIndex::default(),
        };
        stash.rebuild_index();
        Ok(stash)
    }

    /// Load the metadata file, falling back to an empty stash with a warning.
    pub fn open(paths: StashPaths) -> Self {
        match Self::load(paths.clone()) {
            Ok(stash) => {
                info!(units = stash.len(), "loaded stash metadata");
                stash
            }
            Err(e) => {
                warn!(path = %paths.meta_path().display(), error = %e, "error parsing meta file, starting empty");
                Self::new(paths)
            }
        }
    }

    /// Write the metadata file via a temporary file and rename.
    pub fn save(&self) -> StashResult<()> {
        let path = self.paths.meta_path();
        let tmp = path.with_extension("tmp");
        let record = MetaRecordRef {
            count: self.files.len(),
            files: &self.files,
        };
        {
            let mut out = File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut out, &record)?;
            out.write_all(b"\n")?;
            out.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), units = self.files.len(), "saved metadata");
        Ok(())
    }

    /// Paths this stash works against.
    pub fn paths(&self) -> &StashPaths {
        &self.paths
    }

    /// Nodes in registration order.
    pub fn nodes(&self) -> &[Node] {
        &self.files
    }

    /// Current lookup index.
    pub fn index(&self) -> &LookupIndex {
        &self.index
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True when the stash holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Discard and recompute the lookup index.
    pub fn rebuild_index(&mut self) {
        self.index = LookupIndex::build(&self.files);
    }

    /// Resolve a `{id}[/{name}[:{version}]]` key.
    pub fn lookup(&self, key: &str) -> Option<Resolved<'_>> {
        self.index.resolve(&self.files, key)
    }

    /// Every version of every node as flat rows.
    pub fn list(&self) -> Vec<ListRow> {
        self.files
            .iter()
            .flat_map(|node| {
                node.pointers.iter().map(move |p| ListRow {
                    id: node.id.clone(),
                    name: p.name.clone(),
                    size: p.size,
                    version: p.version,
                    location: p.location.clone(),
                    version_date: p.version_date,
                })
            })
            .collect()
    }

    /// Classify a staged file, fold it into the stash, rebuild the index and
    /// persist.
    ///
    /// Nodes are scanned in registration order and the first match wins.
    /// A failed save is logged; the in-memory state is kept and the next
    /// save retries.
    pub fn apply(&mut self, staged: &StagedFile) -> StashResult<MatchOutcome> {
        let staged_path = self.paths.staged_path(&staged.id);
        let mut file = File::open(&staged_path).map_err(|source| StashError::StagedFile {
            id: staged.id.clone(),
            source,
        })?;
        let size = file
            .metadata()
            .map_err(|source| StashError::StagedFile {
                id: staged.id.clone(),
                source,
            })?
            .len();
        let digest = prefix_digest(&mut file, size)?;
        debug!(id = %staged.id, size, %digest, "hashed staged file");

        let outcome = self.classify(staged, &mut file, size, digest)?;
        drop(file);

        self.rebuild_index();
        if let Err(e) = self.save() {
            error!(error = %e, "failed to save metadata after append");
        }
        Ok(outcome)
    }

    fn classify(
        &mut self,
        staged: &StagedFile,
        file: &mut File,
        size: u64,
        digest: Digest,
    ) -> StashResult<MatchOutcome> {
        let staged_path = self.paths.staged_path(&staged.id);

        for node in self.files.iter_mut() {
            debug!(candidate = %node.id, "comparing");

            if node.checksum == digest {
                info!(id = %node.id, name = %staged.name, "found a duplicate");
                discard_staged(&staged_path);
                let version = node.push_version(&staged.name, &staged.location, size);
                node.pickup_count += 1;
                return Ok(MatchOutcome::Duplicate {
                    id: node.id.clone(),
                    version,
                });
            }

            if node.size >= size {
                let unit_path = self.paths.unit_path(&node.id);
                let stored = match File::open(&unit_path) {
                    Ok(f) => f,
                    Err(e) => {
                        error!(id = %node.id, error = %e, "failed to open stash file, skipping");
                        continue;
                    }
                };
                if prefix_digest(stored, size)? == digest {
                    info!(id = %node.id, name = %staged.name, "incoming file is a partial of stashed unit");
                    discard_staged(&staged_path);
                    let version = node.push_version(&staged.name, &staged.location, size);
                    node.partial_count += 1;
                    return Ok(MatchOutcome::Truncated {
                        id: node.id.clone(),
                        version,
                    });
                }
            } else {
                file.seek(SeekFrom::Start(0))?;
                if prefix_digest(&mut *file, node.size)? == node.checksum {
                    info!(id = %node.id, name = %staged.name, "stashed unit is a partial of incoming file");
                    fs::rename(&staged_path, self.paths.unit_path(&node.id))?;
                    let version = node.push_version(&staged.name, &staged.location, size);
                    node.pickup_count += 1;
                    node.partial_count += 1;
                    node.size = size;
                    node.checksum = digest;
                    return Ok(MatchOutcome::Superseded {
                        id: node.id.clone(),
                        version,
                    });
                }
            }
        }

        info!(id = %staged.id, name = %staged.name, "new file is unique, adding to stash");
        fs::rename(&staged_path, self.paths.unit_path(&staged.id))?;
        self.files.push(Node::from_staged(staged, size, digest));
        Ok(MatchOutcome::NewUnit {
            id: staged.id.clone(),
        })
    }

    /// Remove a version or a whole node.
    ///
    /// Exact version keys are pruned directly. Inexact version matches and
    /// whole-node removals go through `confirm` first.
    pub fn remove(&mut self, key: &str, confirm: &dyn Confirm) -> StashResult<RemoveOutcome> {
        let Some(resolved) = self.lookup(key) else {
            info!(key, "unable to find file to remove");
            return Ok(RemoveOutcome::NotFound);
        };
        let node = resolved.node.clone();
        let pointer = resolved.pointer.cloned();
        let exact = resolved.exact;

        let outcome = match pointer {
            Some(p) => {
                if !exact {
                    let prompt = format!(
                        "Didn't find exact file, should I remove {}/{} version {}?",
                        node.id, p.name, p.version
                    );
                    if !confirm.confirm(&prompt) {
                        return Ok(RemoveOutcome::Declined);
                    }
                }
                info!(id = %node.id, name = %p.name, version = p.version, "removing version");
                self.prune_pointer(&node, &p);
                RemoveOutcome::Removed {
                    id: node.id,
                    name: p.name,
                    version: p.version,
                }
            }
            None => {
                let prompt = format!(
                    "Asked to remove entire stash unit {} ({} versions), are you sure?",
                    node.id,
                    node.pointers.len()
                );
                if !confirm.confirm(&prompt) {
                    return Ok(RemoveOutcome::Declined);
                }
                info!(id = %node.id, "removing entire unit");
                self.files.retain(|n| !n.same_unit(&node));
                let unit_path = self.paths.unit_path(&node.id);
                if let Err(e) = fs::remove_file(&unit_path) {
                    warn!(path = %unit_path.display(), error = %e, "could not delete unit content");
                }
                RemoveOutcome::RemovedUnit { id: node.id }
            }
        };

        self.rebuild_index();
        self.save()?;
        Ok(outcome)
    }

    fn prune_pointer(&mut self, node: &Node, pointer: &FilePointer) {
        for n in self.files.iter_mut().filter(|n| n.same_unit(node)) {
            n.pointers.retain(|p| p != pointer);
        }
    }

    /// Copy the first `pointer.size` bytes of `node`'s content to `dest`.
    ///
    /// If `dest` is an existing directory the version name is appended.
    /// Returns the number of bytes written. A failure part-way leaves a
    /// truncated destination behind.
    pub fn export(&self, node: &Node, pointer: &FilePointer, dest: &Path) -> StashResult<u64> {
        let unit_path = self.paths.unit_path(&node.id);
        let unavailable = |source| StashError::UnitUnavailable {
            id: node.id.clone(),
            source,
        };
        let mut src = File::open(&unit_path).map_err(unavailable)?;
        if src.metadata().map_err(unavailable)?.is_dir() {
            return Err(unavailable(io::Error::other("stash unit is a directory")));
        }

        let target: PathBuf = if dest.is_dir() {
            dest.join(&pointer.name)
        } else {
            dest.to_path_buf()
        };
        let failed = |source| StashError::ExportFailed {
            path: target.display().to_string(),
            source,
        };
        let mut out = File::create(&target).map_err(failed)?;

        let mut buf = [0u8; CHUNK_SIZE];
        let mut remaining = pointer.size;
        let mut written = 0u64;
        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE as u64) as usize;
            let n = match src.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(unavailable(e)),
            };
            out.write_all(&buf[..n]).map_err(failed)?;
            remaining -= n as u64;
            written += n as u64;
        }
        out.flush().map_err(failed)?;

        if written < pointer.size {
            warn!(id = %node.id, expected = pointer.size, written, "stash unit shorter than version");
        }
        debug!(target = %target.display(), written, "exported");
        Ok(written)
    }

    /// Resolve `key` and export the selected version.
    pub fn export_key(&self, key: &str, dest: &Path) -> StashResult<u64> {
        let resolved = self
            .lookup(key)
            .ok_or_else(|| StashError::KeyNotFound(key.to_string()))?;
        let pointer = resolved
            .pointer
            .ok_or_else(|| StashError::NoVersionSelected(key.to_string()))?;
        if !resolved.exact {
            warn!(key, version = pointer.version, "no exact match, exporting lowest version");
        }
        self.export(resolved.node, pointer, dest)
    }
}

fn discard_staged(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not remove staged file");
    }
}
