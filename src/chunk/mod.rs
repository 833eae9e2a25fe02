//! Chunks: output-bundle units and the graph algorithms that rewrite them
//!
//! A chunk is a unit of encapsulation for modules; chunks are rendered into
//! bundles once the build completes. Chunks live in an arena ([`ChunkStore`])
//! and reference their owning groups and contained modules purely through
//! keys, so the cyclic chunk <-> group topology never turns into ownership
//! cycles.

mod views;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tracing::debug;

use crate::external::{
    ChunkGroupGraph, ChunkKey, EntityId, GroupKey, ModuleGraph, ModuleKey, SizeOptions,
    SourceKind,
};
use crate::graph::ChunkGraph;
use crate::util::OrderedCachedSet;

pub use views::ChunkMaps;

/// Process-wide counter backing `debug_id`; never reused, never reset
static NEXT_DEBUG_ID: AtomicU64 = AtomicU64::new(1000);

fn next_debug_id() -> u64 {
    NEXT_DEBUG_ID.fetch_add(1, AtomicOrdering::Relaxed)
}

#[derive(Debug)]
struct AsyncChunksMemo {
    graph_version: u64,
    groups_version: u64,
    chunks: Vec<ChunkKey>,
}

/// An output-bundle unit holding a set of modules
///
/// Module membership is tracked by the [`ChunkGraph`] incidence index, not
/// on the chunk itself; group membership is mirrored here as a key set.
#[derive(Debug)]
pub struct Chunk {
    key: ChunkKey,

    /// Deterministic fallback sort key, assigned at construction
    debug_id: u64,

    /// Externally assigned id
    pub id: Option<EntityId>,

    /// Secondary externally assigned ids
    pub ids: Option<Vec<EntityId>>,

    /// Optional name; merged on integration
    pub name: Option<String>,

    /// When set, this chunk refuses every integration
    pub prevent_integration: bool,

    /// The single module designated as this chunk's entry, if any
    pub entry_module: Option<ModuleKey>,

    /// Emitted file names, filled post-render
    pub files: Vec<String>,

    /// Whether the chunk has been rendered
    pub rendered: bool,

    /// Full hash, filled by the hashing pass
    pub hash: Option<String>,

    /// Hash the rendered output was produced under
    pub rendered_hash: Option<String>,

    /// Per-output-kind content hashes, filled post-render
    pub content_hash: HashMap<SourceKind, String>,

    groups: OrderedCachedSet<GroupKey>,
    async_chunks: RefCell<Option<AsyncChunksMemo>>,
}

impl Chunk {
    fn new(key: ChunkKey, name: Option<String>) -> Self {
        Self {
            key,
            debug_id: next_debug_id(),
            id: None,
            ids: None,
            name,
            prevent_integration: false,
            entry_module: None,
            files: Vec::new(),
            rendered: false,
            hash: None,
            rendered_hash: None,
            content_hash: HashMap::new(),
            groups: OrderedCachedSet::new(),
            async_chunks: RefCell::new(None),
        }
    }

    pub fn key(&self) -> ChunkKey {
        self.key
    }

    pub fn debug_id(&self) -> u64 {
        self.debug_id
    }

    pub fn has_entry_module(&self) -> bool {
        self.entry_module.is_some()
    }

    /// Register membership in a group; reports whether it was new
    pub fn add_group(&mut self, group: GroupKey) -> bool {
        self.groups.add(group)
    }

    /// Drop membership in a group; reports whether it was present
    pub fn remove_group(&mut self, group: GroupKey) -> bool {
        self.groups.remove(&group)
    }

    pub fn is_in_group(&self, group: GroupKey) -> bool {
        self.groups.contains(&group)
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// The owning groups, in membership order
    pub fn groups(&self) -> &[GroupKey] {
        self.groups.as_slice()
    }

    /// Whether this chunk bootstraps module execution
    ///
    /// True only when it is the designated runtime chunk of an initial
    /// group it belongs to. Upstream construction keeps this consistent
    /// across all owning groups, so one representative group suffices.
    pub fn has_runtime(&self, groups: &dyn ChunkGroupGraph) -> bool {
        match self.groups.iter().next() {
            Some(&group) => {
                groups.is_initial(group) && groups.runtime_chunk(group) == Some(self.key)
            }
            None => false,
        }
    }

    /// Whether any owning group is an entry point
    pub fn can_be_initial(&self, groups: &dyn ChunkGroupGraph) -> bool {
        self.groups.iter().any(|&group| groups.is_initial(group))
    }

    /// Whether the chunk belongs to groups and all of them are entry points
    pub fn is_only_initial(&self, groups: &dyn ChunkGroupGraph) -> bool {
        !self.groups.is_empty() && self.groups.iter().all(|&group| groups.is_initial(group))
    }

    /// Whether `other` may be merged into this chunk
    ///
    /// Refused outright when either side carries `prevent_integration`,
    /// when both are runtime chunks, or when both declare an entry module.
    /// When exactly one side has a runtime, that runtime chunk must be
    /// available on every entry path of the other side.
    pub fn can_be_integrated(&self, other: &Chunk, groups: &dyn ChunkGroupGraph) -> bool {
        if self.prevent_integration || other.prevent_integration {
            return false;
        }

        let self_runtime = self.has_runtime(groups);
        let other_runtime = other.has_runtime(groups);
        if self_runtime != other_runtime {
            return if self_runtime {
                self.is_available_to(other, groups)
            } else {
                other.is_available_to(self, groups)
            };
        }
        if self_runtime && other_runtime {
            return false;
        }
        if self.has_entry_module() && other.has_entry_module() {
            return false;
        }
        true
    }

    /// Whether this (runtime) chunk is reachable on every path from
    /// `other`'s groups up through the parent links
    ///
    /// Walks breadth-first from `other`'s owning groups; a branch
    /// short-circuits once it reaches a group already containing this
    /// chunk. Hitting an initial group without it means some entry path
    /// would lose the runtime.
    fn is_available_to(&self, other: &Chunk, groups: &dyn ChunkGroupGraph) -> bool {
        let mut queue: Vec<GroupKey> = other.groups.as_slice().to_vec();
        let mut seen: HashSet<GroupKey> = queue.iter().copied().collect();

        let mut i = 0;
        while i < queue.len() {
            let group = queue[i];
            i += 1;
            if self.is_in_group(group) {
                continue;
            }
            if groups.is_initial(group) {
                return false;
            }
            for &parent in groups.parents(group) {
                if seen.insert(parent) {
                    queue.push(parent);
                }
            }
        }
        true
    }

    fn add_multiplier_and_overhead(
        &self,
        size: f64,
        groups: &dyn ChunkGroupGraph,
        options: &SizeOptions,
    ) -> f64 {
        let multiplicator = if self.can_be_initial(groups) {
            options.entry_chunk_multiplicator
        } else {
            1.0
        };
        size * multiplicator + options.chunk_overhead
    }
}

/// Arena holding every live chunk, addressed by [`ChunkKey`]
///
/// Slots are never reused; removed chunks leave a tombstone so stale keys
/// resolve to `None` instead of aliasing a new chunk.
#[derive(Debug, Default)]
pub struct ChunkStore {
    chunks: Vec<Option<Chunk>>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a chunk, optionally named
    pub fn create(&mut self, name: Option<&str>) -> ChunkKey {
        let key = ChunkKey::new(self.chunks.len() as u32);
        self.chunks.push(Some(Chunk::new(key, name.map(str::to_owned))));
        key
    }

    pub fn get(&self, key: ChunkKey) -> Option<&Chunk> {
        self.chunks.get(key.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, key: ChunkKey) -> Option<&mut Chunk> {
        self.chunks.get_mut(key.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, key: ChunkKey) -> bool {
        self.get(key).is_some()
    }

    /// Keys of all live chunks, in creation order
    pub fn keys(&self) -> impl Iterator<Item = ChunkKey> + '_ {
        self.chunks
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| ChunkKey::new(i as u32)))
    }

    /// Number of live chunks
    pub fn len(&self) -> usize {
        self.chunks.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn debug_id(&self, key: ChunkKey) -> u64 {
        self.get(key).map(|chunk| chunk.debug_id).unwrap_or(0)
    }

    /// Disjoint mutable access to two chunks; `None` when the keys are
    /// equal or either chunk is gone
    fn pair_mut(&mut self, a: ChunkKey, b: ChunkKey) -> Option<(&mut Chunk, &mut Chunk)> {
        let (i, j) = (a.index(), b.index());
        if i == j || i >= self.chunks.len() || j >= self.chunks.len() {
            return None;
        }
        let (first, second) = if i < j {
            let (lo, hi) = self.chunks.split_at_mut(j);
            (lo[i].as_mut(), hi[0].as_mut())
        } else {
            let (lo, hi) = self.chunks.split_at_mut(i);
            (hi[0].as_mut(), lo[j].as_mut())
        };
        match (first, second) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        }
    }

    /// Destroy a chunk: detach every module edge and group membership,
    /// then discard the arena slot
    pub fn remove(
        &mut self,
        index: &mut ChunkGraph,
        groups: &mut dyn ChunkGroupGraph,
        key: ChunkKey,
    ) {
        let Some(chunk) = self.get(key) else {
            return;
        };
        debug!("Removing chunk {} from the graph", chunk.debug_id);

        // Snapshot first: disconnect mutates the set being walked.
        for module in index.get_chunk_modules(key) {
            index.disconnect(key, module);
        }
        let owning: Vec<GroupKey> = chunk.groups.as_slice().to_vec();
        for group in owning {
            groups.remove_chunk(group, key);
        }
        index.purge_chunk(key);
        self.chunks[key.index()] = None;
    }

    /// Merge `src` into `dst`
    ///
    /// Returns `false` with no mutation whatsoever when the chunks cannot
    /// be integrated. On success `src` is left as an empty husk: no
    /// modules, no group memberships, safe to discard but not to reuse.
    pub fn integrate(
        &mut self,
        index: &mut ChunkGraph,
        groups: &mut dyn ChunkGroupGraph,
        dst: ChunkKey,
        src: ChunkKey,
        reason: &str,
    ) -> bool {
        let Some((this, other)) = self.pair_mut(dst, src) else {
            return false;
        };
        if !this.can_be_integrated(other, groups) {
            return false;
        }
        debug!(
            "Integrating chunk {} into {} ({})",
            other.debug_id, this.debug_id, reason
        );

        // Snapshot first: disconnect mutates the set being walked.
        for module in index.get_chunk_modules(src) {
            index.disconnect(src, module);
            index.connect(dst, module);
        }

        let former: Vec<GroupKey> = other.groups.as_slice().to_vec();
        for group in former {
            groups.replace_chunk(group, src, dst);
            this.add_group(group);
        }
        other.groups.clear();

        // Names merge only when both sides are named: shorter wins,
        // lexicographically smaller on equal length.
        if let (Some(a), Some(b)) = (&this.name, &other.name) {
            let merged = if a.len() != b.len() {
                if a.len() < b.len() { a.clone() } else { b.clone() }
            } else if a <= b {
                a.clone()
            } else {
                b.clone()
            };
            this.name = Some(merged);
        }

        true
    }

    /// Insert `new_key` as a duplicate placeholder adjacent to `key` in
    /// every group `key` belongs to
    ///
    /// The caller decides what content to move into the duplicate.
    pub fn split(&mut self, groups: &mut dyn ChunkGroupGraph, key: ChunkKey, new_key: ChunkKey) {
        let Some((chunk, new_chunk)) = self.pair_mut(key, new_key) else {
            return;
        };
        debug!(
            "Splitting chunk {} with duplicate {}",
            chunk.debug_id, new_chunk.debug_id
        );

        let owning: Vec<GroupKey> = chunk.groups.as_slice().to_vec();
        for group in owning {
            groups.insert_chunk(group, new_key, key);
            new_chunk.add_group(group);
        }
    }

    /// Sum of the contained modules' sizes, memoized per membership
    pub fn modules_size(
        &self,
        index: &ChunkGraph,
        modules: &dyn ModuleGraph,
        key: ChunkKey,
    ) -> f64 {
        match index.chunk_modules_set(key) {
            Some(set) => set.get_from_unordered_cache("size", |items| {
                items.iter().map(|&module| modules.size(module)).sum::<f64>()
            }),
            None => 0.0,
        }
    }

    /// Estimated cost of the chunk under the given size options
    pub fn size(
        &self,
        index: &ChunkGraph,
        modules: &dyn ModuleGraph,
        groups: &dyn ChunkGroupGraph,
        key: ChunkKey,
        options: &SizeOptions,
    ) -> f64 {
        let Some(chunk) = self.get(key) else {
            return 0.0;
        };
        chunk.add_multiplier_and_overhead(self.modules_size(index, modules, key), groups, options)
    }

    /// Hypothetical cost of merging `src` into `dst`
    ///
    /// `None` means the chunks cannot be integrated; callers must branch
    /// on it, never coerce. Modules already present in `dst` are counted
    /// once.
    pub fn integrated_size(
        &self,
        index: &ChunkGraph,
        modules: &dyn ModuleGraph,
        groups: &dyn ChunkGroupGraph,
        dst: ChunkKey,
        src: ChunkKey,
        options: &SizeOptions,
    ) -> Option<f64> {
        let this = self.get(dst)?;
        let other = self.get(src)?;
        if !this.can_be_integrated(other, groups) {
            return None;
        }

        let mut total = self.modules_size(index, modules, dst);
        for &module in index.chunk_modules(src) {
            if !index.is_module_in_chunk(module, dst) {
                total += modules.size(module);
            }
        }
        Some(this.add_multiplier_and_overhead(total, groups, options))
    }
}
