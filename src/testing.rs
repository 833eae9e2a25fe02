//! In-memory module and chunk-group fixtures for tests

use std::cmp::Ordering;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::chunk::ChunkStore;
use crate::external::{
    ChunkGroupGraph, ChunkHasher, ChunkKey, EntityId, GroupKey, ModuleGraph, ModuleKey,
};
use crate::graph::ChunkGraph;

struct TestModule {
    size: f64,
    hash: String,
    identifier: String,
    id: Option<EntityId>,
}

/// Simple arena-backed module graph
#[derive(Default)]
pub(crate) struct TestModules {
    modules: Vec<TestModule>,
}

impl TestModules {
    pub fn add(&mut self, identifier: &str, size: f64) -> ModuleKey {
        let key = ModuleKey::new(self.modules.len() as u32);
        self.modules.push(TestModule {
            size,
            hash: format!("hash({})", identifier),
            identifier: identifier.to_owned(),
            id: None,
        });
        key
    }

    pub fn assign_id(&mut self, module: ModuleKey, id: EntityId) {
        self.modules[module.raw() as usize].id = Some(id);
    }
}

impl ModuleGraph for TestModules {
    fn size(&self, module: ModuleKey) -> f64 {
        self.modules[module.raw() as usize].size
    }

    fn hash(&self, module: ModuleKey) -> &str {
        &self.modules[module.raw() as usize].hash
    }

    fn identifier(&self, module: ModuleKey) -> &str {
        &self.modules[module.raw() as usize].identifier
    }

    fn id(&self, module: ModuleKey) -> Option<&EntityId> {
        self.modules[module.raw() as usize].id.as_ref()
    }
}

#[derive(Default)]
struct TestGroup {
    initial: bool,
    chunks: Vec<ChunkKey>,
    parents: Vec<GroupKey>,
    children: Vec<GroupKey>,
    options: Map<String, Value>,
    runtime: Option<ChunkKey>,
}

/// Simple arena-backed chunk group graph
#[derive(Default)]
pub(crate) struct TestGroups {
    groups: Vec<TestGroup>,
    version: u64,
}

impl TestGroups {
    pub fn add(&mut self, initial: bool) -> GroupKey {
        let key = GroupKey::new(self.groups.len() as u32);
        self.groups.push(TestGroup {
            initial,
            ..TestGroup::default()
        });
        self.version += 1;
        key
    }

    /// Link two groups as parent and child
    pub fn link(&mut self, parent: GroupKey, child: GroupKey) {
        self.groups[parent.raw() as usize].children.push(child);
        self.groups[child.raw() as usize].parents.push(parent);
        self.version += 1;
    }

    /// Append a chunk to the group and mirror the membership on the chunk
    pub fn attach(&mut self, store: &mut ChunkStore, group: GroupKey, chunk: ChunkKey) {
        self.groups[group.raw() as usize].chunks.push(chunk);
        self.version += 1;
        if let Some(c) = store.get_mut(chunk) {
            c.add_group(group);
        }
    }

    pub fn set_runtime(&mut self, group: GroupKey, chunk: ChunkKey) {
        self.groups[group.raw() as usize].runtime = Some(chunk);
        self.version += 1;
    }

    pub fn set_option(&mut self, group: GroupKey, key: &str, value: Value) {
        self.groups[group.raw() as usize]
            .options
            .insert(key.to_owned(), value);
        self.version += 1;
    }
}

impl ChunkGroupGraph for TestGroups {
    fn is_initial(&self, group: GroupKey) -> bool {
        self.groups[group.raw() as usize].initial
    }

    fn chunks(&self, group: GroupKey) -> &[ChunkKey] {
        &self.groups[group.raw() as usize].chunks
    }

    fn parents(&self, group: GroupKey) -> &[GroupKey] {
        &self.groups[group.raw() as usize].parents
    }

    fn children(&self, group: GroupKey) -> &[GroupKey] {
        &self.groups[group.raw() as usize].children
    }

    fn options(&self, group: GroupKey) -> &Map<String, Value> {
        &self.groups[group.raw() as usize].options
    }

    fn runtime_chunk(&self, group: GroupKey) -> Option<ChunkKey> {
        self.groups[group.raw() as usize].runtime
    }

    fn insert_chunk(&mut self, group: GroupKey, new: ChunkKey, before: ChunkKey) {
        let chunks = &mut self.groups[group.raw() as usize].chunks;
        if chunks.contains(&new) {
            return;
        }
        match chunks.iter().position(|&c| c == before) {
            Some(pos) => chunks.insert(pos, new),
            None => chunks.push(new),
        }
        self.version += 1;
    }

    fn replace_chunk(&mut self, group: GroupKey, old: ChunkKey, new: ChunkKey) {
        let chunks = &mut self.groups[group.raw() as usize].chunks;
        let Some(pos) = chunks.iter().position(|&c| c == old) else {
            return;
        };
        if chunks.contains(&new) {
            chunks.remove(pos);
        } else {
            chunks[pos] = new;
        }
        self.version += 1;
    }

    fn remove_chunk(&mut self, group: GroupKey, chunk: ChunkKey) -> bool {
        let chunks = &mut self.groups[group.raw() as usize].chunks;
        match chunks.iter().position(|&c| c == chunk) {
            Some(pos) => {
                chunks.remove(pos);
                self.version += 1;
                true
            }
            None => false,
        }
    }

    fn compare_groups(&self, _index: &ChunkGraph, a: GroupKey, b: GroupKey) -> Ordering {
        a.raw().cmp(&b.raw())
    }

    fn structure_version(&self) -> u64 {
        self.version
    }
}

/// Sha256-backed incremental hash accumulator
#[derive(Default)]
pub(crate) struct Sha256Hasher {
    hasher: Sha256,
}

impl Sha256Hasher {
    pub fn digest(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl ChunkHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.hasher, data);
    }
}
