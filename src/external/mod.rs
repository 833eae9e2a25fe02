//! Interfaces to external collaborators
//!
//! The chunk graph core does not own modules or chunk groups. Both are
//! managed by other parts of the build pipeline and are addressed here by
//! opaque arena keys through the traits below, so any conforming
//! implementation can be plugged in.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::graph::ChunkGraph;

/// Key of a chunk in the [`ChunkStore`](crate::chunk::ChunkStore) arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey(u32);

impl ChunkKey {
    pub(crate) fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw arena slot of this key
    pub fn raw(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Key of a module owned by the external module graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleKey(u32);

impl ModuleKey {
    /// Create a module key from the external module graph's slot
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw arena slot of this key
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Key of a chunk group owned by the external group graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey(u32);

impl GroupKey {
    /// Create a group key from the external group graph's slot
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw arena slot of this key
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// An externally assigned entity id
///
/// Ids are handed out by a separate assignment pass late in the build, so
/// most graph operations must work without them. Numeric ids sort before
/// textual ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum EntityId {
    Number(u64),
    Text(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Number(n) => write!(f, "{}", n),
            EntityId::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for EntityId {
    fn from(n: u64) -> Self {
        EntityId::Number(n)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId::Text(s.to_owned())
    }
}

/// Output kind a chunk renders to, used to key per-kind content hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    JavaScript,
    Css,
    WebAssembly,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::JavaScript => "javascript",
            SourceKind::Css => "css",
            SourceKind::WebAssembly => "webassembly",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Knobs for the chunk cost model
#[derive(Debug, Clone, Copy)]
pub struct SizeOptions {
    /// Fixed cost added to every chunk
    pub chunk_overhead: f64,

    /// Multiplier applied to chunks that can be loaded initially
    pub entry_chunk_multiplicator: f64,
}

impl Default for SizeOptions {
    fn default() -> Self {
        Self {
            chunk_overhead: 10_000.0,
            entry_chunk_multiplicator: 10.0,
        }
    }
}

/// Read access to module metadata, implemented by the external module graph
pub trait ModuleGraph {
    /// Estimated source size of the module
    fn size(&self, module: ModuleKey) -> f64;

    /// Build-specific content hash of the module
    fn hash(&self, module: ModuleKey) -> &str;

    /// Stable semantic key, used for tie-breaking before ids are assigned
    fn identifier(&self, module: ModuleKey) -> &str;

    /// Externally assigned id, if the assignment pass has run
    fn id(&self, module: ModuleKey) -> Option<&EntityId>;
}

/// Access to chunk group topology, implemented by the external group graph
///
/// Groups form a directed graph via parent/child links and hold an ordered
/// sequence of chunks each. All group mutations issued by the chunk graph
/// core go through this trait so that the external owner stays in charge of
/// group storage.
pub trait ChunkGroupGraph {
    /// Whether the group is an entry point (loaded initially)
    fn is_initial(&self, group: GroupKey) -> bool;

    /// The ordered chunk sequence of the group
    fn chunks(&self, group: GroupKey) -> &[ChunkKey];

    /// Parent groups in the traversal graph
    fn parents(&self, group: GroupKey) -> &[GroupKey];

    /// Child groups in the traversal graph
    fn children(&self, group: GroupKey) -> &[GroupKey];

    /// Named knobs of the group; keys ending in `"Order"` carry numeric
    /// ordering metadata (e.g. `prefetchOrder`)
    fn options(&self, group: GroupKey) -> &Map<String, Value>;

    /// The chunk bootstrapping module execution for this group, if any
    fn runtime_chunk(&self, group: GroupKey) -> Option<ChunkKey>;

    /// Insert `new` into the group's chunk sequence immediately before
    /// `before`
    fn insert_chunk(&mut self, group: GroupKey, new: ChunkKey, before: ChunkKey);

    /// Replace `old` with `new` in the group's chunk sequence, keeping the
    /// position of `old`
    fn replace_chunk(&mut self, group: GroupKey, old: ChunkKey, new: ChunkKey);

    /// Remove a chunk from the group's sequence; reports whether it was
    /// present
    fn remove_chunk(&mut self, group: GroupKey, chunk: ChunkKey) -> bool;

    /// Total order over groups used to break ordering ties deterministically
    fn compare_groups(&self, index: &ChunkGraph, a: GroupKey, b: GroupKey) -> Ordering;

    /// Monotonic counter bumped on every group-topology or group-membership
    /// mutation; consumed by memoized traversals
    fn structure_version(&self) -> u64;
}

/// Incremental hash accumulator, order-sensitive and otherwise opaque
pub trait ChunkHasher {
    /// Fold the given bytes into the accumulator
    fn update(&mut self, data: &[u8]);
}
