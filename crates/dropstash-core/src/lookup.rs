//! Derived lookup index over the node list.
//!
//! Keys take the form `{id}`, `{id}/{name}` or `{id}/{name}:{version}`,
//! for example `30b55313-1f3b-4f9e-bcab-cfd2c74e7c75/a.log:0`.
//!
//! The index is a pure function of the node list. It stores positions into
//! that list and is rebuilt wholesale after every mutation.

use std::collections::{BTreeMap, HashMap};

use crate::node::{FilePointer, Node};

/// A parsed lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupKey<'a> {
    /// Node identifier.
    pub id: &'a str,
    /// Version name, when the key has a `/` part.
    pub name: Option<&'a str>,
    /// Explicit version number, when the name ends in `:{number}`.
    pub version: Option<u32>,
}

impl<'a> LookupKey<'a> {
    /// Split a key into its parts.
    ///
    /// A `:` suffix is only taken as a version when it parses as a number,
    /// so names that contain colons still resolve.
    pub fn parse(key: &'a str) -> Self {
        let Some((id, rest)) = key.split_once('/') else {
            return Self {
                id: key,
                name: None,
                version: None,
            };
        };
        match rest.rsplit_once(':') {
            Some((name, v)) => match v.parse::<u32>() {
                Ok(version) => Self {
                    id,
                    name: Some(name),
                    version: Some(version),
                },
                Err(_) => Self {
                    id,
                    name: Some(rest),
                    version: None,
                },
            },
            None => Self {
                id,
                name: Some(rest),
                version: None,
            },
        }
    }
}

/// Result of resolving a key against the node list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<'a> {
    /// The matching node.
    pub node: &'a Node,
    /// The selected version, if the key resolved to one.
    pub pointer: Option<&'a FilePointer>,
    /// Whether the key identified exactly this version.
    pub exact: bool,
}

/// Position of a pointer: (node index, pointer index).
type Slot = (usize, usize);

/// Fast lookup from unit id and id/name to positions in the node list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupIndex {
    units: HashMap<String, usize>,
    versions: HashMap<String, BTreeMap<u32, Slot>>,
}

impl LookupIndex {
    /// Build the index from scratch.
    pub fn build(nodes: &[Node]) -> Self {
        let mut index = Self::default();
        for (n, node) in nodes.iter().enumerate() {
            index.units.entry(node.id.clone()).or_insert(n);
            for (p, pointer) in node.pointers.iter().enumerate() {
                index
                    .versions
                    .entry(format!("{}/{}", node.id, pointer.name))
                    .or_default()
                    .entry(pointer.version)
                    .or_insert((n, p));
            }
        }
        tracing::debug!(
            units = index.units.len(),
            names = index.versions.len(),
            "rebuilt lookup index"
        );
        index
    }

    /// Number of units indexed.
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Position of the node with this id.
    pub fn unit(&self, id: &str) -> Option<usize> {
        self.units.get(id).copied()
    }

    /// Versions registered under `{id}/{name}`, ordered by version number.
    pub fn versions(&self, id: &str, name: &str) -> Option<&BTreeMap<u32, Slot>> {
        self.versions.get(&format!("{}/{}", id, name))
    }

    /// Resolve a key against the node list this index was built from.
    pub fn resolve<'a>(&self, nodes: &'a [Node], key: &str) -> Option<Resolved<'a>> {
        let key = LookupKey::parse(key);
        let Some(name) = key.name else {
            let node = nodes.get(self.unit(key.id)?)?;
            // A single-version unit is unambiguous even without a name.
            return Some(match node.pointers.as_slice() {
                [only] => Resolved {
                    node,
                    pointer: Some(only),
                    exact: true,
                },
                _ => Resolved {
                    node,
                    pointer: None,
                    exact: false,
                },
            });
        };

        let versions = self.versions(key.id, name)?;
        let (slot, exact) = match key.version {
            Some(v) => match versions.get(&v) {
                Some(slot) => (*slot, true),
                None => (*versions.values().next()?, false),
            },
            None => (*versions.values().next()?, versions.len() == 1),
        };
        let node = nodes.get(slot.0)?;
        Some(Resolved {
            node,
            pointer: Some(node.pointers.get(slot.1)?),
            exact,
        })
    }
}
