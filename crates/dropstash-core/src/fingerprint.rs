//! Content fingerprinting: BLAKE3 digests over a byte prefix.
//!
//! Both whole-file and prefix comparisons go through [`prefix_digest`], so a
//! digest of the first `n` bytes of a long file is identical to the digest of
//! a file that is exactly those `n` bytes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use crate::error::StashError;

/// Read size used when streaming content through the hasher.
pub const CHUNK_SIZE: usize = 4096;

/// A 32-byte BLAKE3 digest of a content prefix.
///
/// Serialized as lowercase hex so the metadata file stays diffable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Return the digest as a lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Return the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(|_| StashError::InvalidDigest(s.to_string()))?;
        Ok(Digest(out))
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.to_hex()
    }
}

impl TryFrom<String> for Digest {
    type Error = StashError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Digest of exactly `min(limit, available)` bytes read from `reader`.
///
/// The reader is consumed in [`CHUNK_SIZE`] reads; the final read is cut so
/// no byte past `limit` reaches the hasher. Interrupted reads are retried,
/// any other read error is returned to the caller.
pub fn prefix_digest<R: Read>(mut reader: R, limit: u64) -> io::Result<Digest> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; CHUNK_SIZE];
    let mut remaining = limit;

    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }

    Ok(Digest(*hasher.finalize().as_bytes()))
}

/// Digest of an in-memory buffer, equal to `prefix_digest` over all of it.
pub fn digest_bytes(data: &[u8]) -> Digest {
    Digest(*blake3::hash(data).as_bytes())
}
