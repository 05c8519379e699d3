#![warn(missing_docs)]

//! Dropstash core: a prefix-aware deduplicating stash for file drop folders.
//!
//! Ingest path: Watcher → Staging → Command queue → Engine → Hash → Classify → Store
//!
//! A staged file is compared against every stored unit in registration order.
//! An exact match, a truncated resend, or a longer copy that supersedes a unit
//! all become new versions of that unit; anything else becomes a new unit.

pub mod command;
pub mod confirm;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod lookup;
pub mod node;
pub mod stash;

pub use command::Command;
pub use confirm::{AlwaysConfirm, Confirm, NeverConfirm, StdinConfirm};
pub use engine::{CommandSender, Engine, EngineConfig, EngineHandle, EngineStats};
pub use error::{StashError, StashResult};
pub use fingerprint::{digest_bytes, prefix_digest, Digest};
pub use lookup::{LookupIndex, LookupKey, Resolved};
pub use node::{FilePointer, Node, StagedFile, StashPaths};
pub use stash::{ListRow, MatchOutcome, RemoveOutcome, Stash};
