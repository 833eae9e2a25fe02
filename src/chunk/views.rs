//! Read-only traversals and serialization views over the chunk graph
//!
//! Everything here is consumed by code generation and emission: async-chunk
//! reachability, the id-keyed hash/name tables embedded into runtime code,
//! named child orderings (prefetch/preload), and chunk hashing.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::chunk::{AsyncChunksMemo, ChunkStore};
use crate::external::{ChunkGroupGraph, ChunkHasher, ChunkKey, EntityId, GroupKey, ModuleGraph};
use crate::graph::ChunkGraph;
use crate::util::intersect;

/// Group option keys ending in this suffix carry numeric ordering metadata;
/// the stripped prefix is the logical order name (e.g. `prefetch`)
const ORDER_SUFFIX: &str = "Order";

/// Id-keyed hash, per-kind content hash, and name tables of the async
/// chunks below one chunk
#[derive(Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMaps {
    /// Chunk id -> chunk hash
    pub hash: HashMap<String, String>,

    /// Output kind -> chunk id -> content hash
    pub content_hash: HashMap<String, HashMap<String, String>>,

    /// Chunk id -> chunk name
    pub name: HashMap<String, String>,
}

impl ChunkStore {
    /// All chunks reachable through child groups that are not loaded on
    /// every entry path of the given chunk
    ///
    /// The "initial" baseline is the intersection of the owning groups'
    /// chunk lists; everything found by the breadth-first child walk
    /// outside that baseline is async. Memoized against the group graph's
    /// structure version and the chunk's own group-set version.
    pub fn all_async_chunks(&self, groups: &dyn ChunkGroupGraph, key: ChunkKey) -> Vec<ChunkKey> {
        let Some(chunk) = self.get(key) else {
            return Vec::new();
        };

        let graph_version = groups.structure_version();
        let groups_version = chunk.groups.version();
        if let Some(memo) = chunk.async_chunks.borrow().as_ref() {
            if memo.graph_version == graph_version && memo.groups_version == groups_version {
                return memo.chunks.clone();
            }
        }

        let owning_chunks: Vec<HashSet<ChunkKey>> = chunk
            .groups
            .iter()
            .map(|&group| groups.chunks(group).iter().copied().collect())
            .collect();
        let initial = intersect(&owning_chunks);

        let mut queue: Vec<GroupKey> = Vec::new();
        let mut seen: HashSet<GroupKey> = HashSet::new();
        for &group in chunk.groups.iter() {
            for &child in groups.children(group) {
                if seen.insert(child) {
                    queue.push(child);
                }
            }
        }

        let mut found: Vec<ChunkKey> = Vec::new();
        let mut found_set: HashSet<ChunkKey> = HashSet::new();
        let mut i = 0;
        while i < queue.len() {
            let group = queue[i];
            i += 1;
            for &candidate in groups.chunks(group) {
                if !initial.contains(&candidate) && found_set.insert(candidate) {
                    found.push(candidate);
                }
            }
            for &child in groups.children(group) {
                if seen.insert(child) {
                    queue.push(child);
                }
            }
        }

        *chunk.async_chunks.borrow_mut() = Some(AsyncChunksMemo {
            graph_version,
            groups_version,
            chunks: found.clone(),
        });
        found
    }

    /// Hash/content-hash/name tables of the chunk's async chunks
    ///
    /// `real_hash` selects the full hash over the rendered hash. Chunks
    /// without an assigned id cannot be keyed and are skipped.
    pub fn chunk_maps(
        &self,
        groups: &dyn ChunkGroupGraph,
        key: ChunkKey,
        real_hash: bool,
    ) -> ChunkMaps {
        let mut maps = ChunkMaps::default();

        for async_key in self.all_async_chunks(groups, key) {
            let Some(chunk) = self.get(async_key) else {
                continue;
            };
            let Some(id) = &chunk.id else {
                continue;
            };
            let id = id.to_string();

            let hash = if real_hash {
                &chunk.hash
            } else {
                &chunk.rendered_hash
            };
            if let Some(hash) = hash {
                maps.hash.insert(id.clone(), hash.clone());
            }
            for (kind, content_hash) in &chunk.content_hash {
                maps.content_hash
                    .entry(kind.as_str().to_owned())
                    .or_default()
                    .insert(id.clone(), content_hash.clone());
            }
            if let Some(name) = &chunk.name {
                maps.name.insert(id.clone(), name.clone());
            }
        }
        maps
    }

    /// Named orderings of descendant chunk ids, grouped by the logical
    /// order name encoded in child-group options
    ///
    /// Only groups whose chunk sequence ends with this chunk contribute.
    /// Candidates sort descending by order value, ties broken by the group
    /// graph's total order, then flatten to a deduplicated id list.
    pub fn child_ids_by_orders(
        &self,
        index: &ChunkGraph,
        groups: &dyn ChunkGroupGraph,
        key: ChunkKey,
    ) -> BTreeMap<String, Vec<EntityId>> {
        let Some(chunk) = self.get(key) else {
            return BTreeMap::new();
        };

        let mut lists: BTreeMap<String, Vec<(f64, GroupKey)>> = BTreeMap::new();
        for &group in chunk.groups() {
            if groups.chunks(group).last() != Some(&key) {
                continue;
            }
            for &child in groups.children(group) {
                for (option, value) in groups.options(child) {
                    let Some(name) = option.strip_suffix(ORDER_SUFFIX) else {
                        continue;
                    };
                    let Some(order) = value.as_f64() else {
                        continue;
                    };
                    lists.entry(name.to_owned()).or_default().push((order, child));
                }
            }
        }

        let mut result = BTreeMap::new();
        for (name, mut list) in lists {
            list.sort_by(|a, b| {
                b.0.total_cmp(&a.0)
                    .then_with(|| groups.compare_groups(index, a.1, b.1))
            });

            let mut ids: Vec<EntityId> = Vec::new();
            let mut seen: HashSet<EntityId> = HashSet::new();
            for (_, group) in list {
                for &chunk_key in groups.chunks(group) {
                    let Some(id) = self.get(chunk_key).and_then(|c| c.id.clone()) else {
                        continue;
                    };
                    if seen.insert(id.clone()) {
                        ids.push(id);
                    }
                }
            }
            result.insert(name, ids);
        }
        result
    }

    /// Per-chunk child orderings for this chunk's async subtree, keyed by
    /// order name, then by chunk id
    pub fn child_ids_by_orders_map(
        &self,
        index: &ChunkGraph,
        groups: &dyn ChunkGroupGraph,
        key: ChunkKey,
        include_direct_children: bool,
    ) -> BTreeMap<String, HashMap<String, Vec<EntityId>>> {
        let mut maps: BTreeMap<String, HashMap<String, Vec<EntityId>>> = BTreeMap::new();

        let add_orders_of = |maps: &mut BTreeMap<String, HashMap<String, Vec<EntityId>>>,
                             chunk_key: ChunkKey| {
            let Some(id) = self.get(chunk_key).and_then(|c| c.id.clone()) else {
                return;
            };
            for (name, ids) in self.child_ids_by_orders(index, groups, chunk_key) {
                maps.entry(name).or_default().insert(id.to_string(), ids);
            }
        };

        if include_direct_children {
            add_orders_of(&mut maps, key);
        }
        for async_key in self.all_async_chunks(groups, key) {
            add_orders_of(&mut maps, async_key);
        }
        maps
    }

    /// Fold the chunk's identity and its modules' hashes into the
    /// incremental hash accumulator
    ///
    /// Modules are visited in deterministic id order so the digest does
    /// not depend on connection order.
    pub fn update_hash(
        &self,
        index: &mut ChunkGraph,
        modules: &dyn ModuleGraph,
        key: ChunkKey,
        hasher: &mut dyn ChunkHasher,
    ) {
        let Some(chunk) = self.get(key) else {
            return;
        };

        let id = chunk
            .id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default();
        hasher.update(format!("{} ", id).as_bytes());

        let ids = chunk
            .ids
            .as_ref()
            .map(|ids| {
                ids.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default();
        hasher.update(ids.as_bytes());

        hasher.update(format!("{} ", chunk.name.as_deref().unwrap_or("")).as_bytes());

        for &module in index.ordered_chunk_modules(modules, key) {
            hasher.update(modules.hash(module).as_bytes());
        }
    }
}
