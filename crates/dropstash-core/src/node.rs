//! Stash entity model: units of stored content and the version pointers
//! that reference them.
//!
//! A [`Node`] is one physical blob in the store directory. It holds the
//! longest byte prefix seen so far for a family of related transfers. Every
//! transfer that matched it (exactly, as a truncated resend, or as a longer
//! superseding copy) is recorded as a [`FilePointer`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::fingerprint::Digest;

/// One named occurrence of content captured from a watched location.
///
/// Immutable once created. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePointer {
    /// File name at the time of capture.
    pub name: String,
    /// Directory the file was captured from.
    pub location: String,
    /// Size in bytes at the time of capture.
    pub size: u64,
    /// Capture timestamp.
    pub version_date: DateTime<Utc>,
    /// Position in the owning node's pointer list at append time.
    pub version: u32,
}

/// A stored unit of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Versions in arrival order.
    pub pointers: Vec<FilePointer>,
    /// Stable identifier; also the file name under the store directory.
    pub id: String,
    /// Digest of the first `size` bytes of the physical content.
    pub checksum: Digest,
    /// Bytes of physical content currently retained.
    pub size: u64,
    /// Ingestions that matched or extended this node.
    pub pickup_count: u32,
    /// Ingestions that matched as a strict prefix in either direction.
    pub partial_count: u32,
    /// Reserved for explicit replace semantics; not consulted by matching.
    pub overwrite: bool,
    /// Count of version numbers handed out, including removed ones.
    #[serde(default)]
    pub issued_versions: u32,
}

impl Node {
    /// Build a fresh node from a staged file with its single initial version.
    pub fn from_staged(staged: &StagedFile, size: u64, checksum: Digest) -> Self {
        Self {
            pointers: vec![FilePointer {
                name: staged.name.clone(),
                location: staged.location.clone(),
                size,
                version_date: Utc::now(),
                version: 0,
            }],
            id: staged.id.clone(),
            checksum,
            size,
            pickup_count: 1,
            partial_count: 0,
            overwrite: staged.overwrite,
            issued_versions: 1,
        }
    }

    /// Version number the next appended pointer will receive.
    ///
    /// Numbers are never reused, so this is one past the highest number ever
    /// handed out, even after pointers have been removed.
    pub fn next_version(&self) -> u32 {
        self.pointers
            .iter()
            .map(|p| p.version + 1)
            .max()
            .unwrap_or(0)
            .max(self.pointers.len() as u32)
            .max(self.issued_versions)
    }

    /// Append a new version pointer and return its version number.
    pub fn push_version(&mut self, name: &str, location: &str, size: u64) -> u32 {
        let version = self.next_version();
        self.pointers.push(FilePointer {
            name: name.to_string(),
            location: location.to_string(),
            size,
            version_date: Utc::now(),
            version,
        });
        self.issued_versions = version + 1;
        version
    }

    /// Identity used when pruning: same id and same content digest.
    pub fn same_unit(&self, other: &Node) -> bool {
        self.id == other.id && self.checksum == other.checksum
    }
}

/// A file that a watcher has moved into the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Fresh identifier; the staged file's name under the staging directory.
    pub id: String,
    /// Original base file name.
    pub name: String,
    /// Original containing directory.
    pub location: String,
    /// Replace hint carried through to a new node.
    pub overwrite: bool,
}

impl StagedFile {
    /// Generate a fresh staging identifier.
    pub fn fresh_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Filesystem locations the engine works against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashPaths {
    /// One file per node, named by node id.
    pub store_dir: PathBuf,
    /// Captured files waiting to be classified.
    pub staging_dir: PathBuf,
    /// Holds the metadata file.
    pub meta_dir: PathBuf,
}

impl StashPaths {
    /// Name of the metadata file inside `meta_dir`.
    pub const META_FILE: &'static str = "meta";

    /// Create a path set.
    pub fn new(
        store_dir: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
        meta_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store_dir: store_dir.into(),
            staging_dir: staging_dir.into(),
            meta_dir: meta_dir.into(),
        }
    }

    /// Conventional layout under a single root: `stash`, `stash/staging`, root.
    pub fn under(root: &Path) -> Self {
        let store = root.join("stash");
        Self::new(store.clone(), store.join("staging"), root)
    }

    /// Physical content path of a node.
    pub fn unit_path(&self, id: &str) -> PathBuf {
        self.store_dir.join(id)
    }

    /// Path of a staged file.
    pub fn staged_path(&self, id: &str) -> PathBuf {
        self.staging_dir.join(id)
    }

    /// Path of the metadata file.
    pub fn meta_path(&self) -> PathBuf {
        self.meta_dir.join(Self::META_FILE)
    }

    /// Create the store, staging and metadata directories.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.store_dir, &self.staging_dir, &self.meta_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::digest_bytes;

    fn staged(name: &str) -> StagedFile {
        StagedFile {
            id: "u1".to_string(),
            name: name.to_string(),
            location: "/drop".to_string(),
            overwrite: false,
        }
    }

    #[test]
    fn from_staged_starts_with_version_zero() {
        let node = Node::from_staged(&staged("a.log"), 8, digest_bytes(b"12345678"));
        assert_eq!(node.id, "u1");
        assert_eq!(node.pointers.len(), 1);
        assert_eq!(node.pointers[0].version, 0);
        assert_eq!(node.pointers[0].size, 8);
        assert_eq!(node.pickup_count, 1);
        assert_eq!(node.partial_count, 0);
    }

    #[test]
    fn versions_are_dense_and_never_reused() {
        let mut node = Node::from_staged(&staged("a"), 1, digest_bytes(b"x"));
        assert_eq!(node.push_version("a", "/drop", 1), 1);
        assert_eq!(node.push_version("a", "/drop", 1), 2);
        node.pointers.retain(|p| p.version != 2);
        assert_eq!(node.push_version("a", "/drop", 1), 3);
        node.pointers.clear();
        assert_eq!(node.next_version(), 4);
    }

    #[test]
    fn pointer_equality_is_structural() {
        let node = Node::from_staged(&staged("a"), 1, digest_bytes(b"x"));
        let copy = node.pointers[0].clone();
        assert_eq!(node.pointers[0], copy);
        let mut other = copy.clone();
        other.version = 9;
        assert_ne!(copy, other);
    }

    #[test]
    fn paths_under_root() {
        let paths = StashPaths::under(Path::new("/home/u/.dropstash"));
        assert_eq!(paths.store_dir, PathBuf::from("/home/u/.dropstash/stash"));
        assert_eq!(paths.staging_dir, PathBuf::from("/home/u/.dropstash/stash/staging"));
        assert_eq!(paths.meta_path(), PathBuf::from("/home/u/.dropstash/meta"));
        assert_eq!(paths.unit_path("abc"), PathBuf::from("/home/u/.dropstash/stash/abc"));
    }
}
