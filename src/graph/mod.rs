//! The incidence index: bidirectional module <-> chunk membership
//!
//! Authoritative source of truth for "which modules are in which chunk".
//! Both directions are held in side tables keyed by entity identity, never
//! embedded on the entities themselves, so the index works before any ids
//! are assigned. Every mutation touches both sides atomically; an
//! asymmetric index is a defect, not a recoverable state.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::chunk::ChunkStore;
use crate::external::{ChunkGroupGraph, ChunkKey, EntityId, GroupKey, ModuleGraph, ModuleKey};
use crate::util::OrderedCachedSet;

/// Violation of the bidirectional membership invariant
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("module {module:?} lists chunk {chunk:?}, but the chunk does not list the module")]
    MissingModuleSide { chunk: ChunkKey, module: ModuleKey },

    #[error("chunk {chunk:?} lists module {module:?}, but the module does not list the chunk")]
    MissingChunkSide { chunk: ChunkKey, module: ModuleKey },
}

/// Serializable per-async-chunk module id and hash tables
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct ChunkModuleMaps {
    /// Chunk id -> sorted ids of the matching modules it contains
    pub id: HashMap<String, Vec<EntityId>>,

    /// Module id -> module content hash
    pub hash: HashMap<String, String>,
}

/// Compare two modules by assigned id, falling back to the stable semantic
/// identifier while ids are absent
pub fn compare_modules_by_id(
    modules: &dyn ModuleGraph,
    a: ModuleKey,
    b: ModuleKey,
) -> std::cmp::Ordering {
    match (modules.id(a), modules.id(b)) {
        (Some(x), Some(y)) => x
            .cmp(y)
            .then_with(|| modules.identifier(a).cmp(modules.identifier(b))),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => modules.identifier(a).cmp(modules.identifier(b)),
    }
}

/// The module <-> chunk membership table
#[derive(Debug, Default)]
pub struct ChunkGraph {
    /// For every module, the chunks containing it
    module_chunks: HashMap<ModuleKey, OrderedCachedSet<ChunkKey>>,

    /// For every chunk, the modules it contains
    chunk_modules: HashMap<ChunkKey, OrderedCachedSet<ModuleKey>>,
}

impl ChunkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `chunk` contains `module`
    ///
    /// Idempotent; reports whether a new edge was created.
    pub fn connect(&mut self, chunk: ChunkKey, module: ModuleKey) -> bool {
        let added_chunk = self.module_chunks.entry(module).or_default().add(chunk);
        let added_module = self.chunk_modules.entry(chunk).or_default().add(module);
        debug_assert_eq!(
            added_chunk, added_module,
            "incidence index out of sync for {:?} <-> {:?}",
            chunk, module
        );
        self.debug_check_edge(chunk, module, true);
        added_chunk || added_module
    }

    /// Remove the `chunk` <-> `module` edge; reports whether it existed
    pub fn disconnect(&mut self, chunk: ChunkKey, module: ModuleKey) -> bool {
        let removed_chunk = self
            .module_chunks
            .get_mut(&module)
            .map(|chunks| chunks.remove(&chunk))
            .unwrap_or(false);
        let removed_module = self
            .chunk_modules
            .get_mut(&chunk)
            .map(|modules| modules.remove(&module))
            .unwrap_or(false);
        debug_assert_eq!(
            removed_chunk, removed_module,
            "incidence index out of sync for {:?} <-> {:?}",
            chunk, module
        );
        self.debug_check_edge(chunk, module, false);
        removed_chunk || removed_module
    }

    /// Rewire every chunk containing `old` to contain `new` instead,
    /// keeping each chunk's relative membership order
    ///
    /// No-op when `old` is in no chunk or the keys are equal.
    pub fn replace_module(&mut self, old: ModuleKey, new: ModuleKey) {
        if old == new {
            return;
        }
        let chunks = match self.module_chunks.get(&old) {
            Some(chunks) if !chunks.is_empty() => chunks.as_slice().to_vec(),
            _ => return,
        };
        debug!(
            "Replacing module {:?} with {:?} in {} chunks",
            old,
            new,
            chunks.len()
        );

        for &chunk in &chunks {
            if let Some(modules) = self.chunk_modules.get_mut(&chunk) {
                modules.replace(&old, new);
            }
            self.module_chunks.entry(new).or_default().add(chunk);
            self.debug_check_edge(chunk, new, true);
        }
        self.module_chunks.remove(&old);
    }

    /// Whether `chunk` contains `module`
    pub fn is_module_in_chunk(&self, module: ModuleKey, chunk: ChunkKey) -> bool {
        self.chunk_modules
            .get(&chunk)
            .map(|modules| modules.contains(&module))
            .unwrap_or(false)
    }

    /// Whether the module is the entry module of any chunk containing it
    pub fn is_entry_module(&self, store: &ChunkStore, module: ModuleKey) -> bool {
        self.module_chunks(module).iter().any(|&chunk| {
            store
                .get(chunk)
                .map(|c| c.entry_module == Some(module))
                .unwrap_or(false)
        })
    }

    /// The chunks containing the module, in current order
    pub fn module_chunks(&self, module: ModuleKey) -> &[ChunkKey] {
        self.module_chunks
            .get(&module)
            .map(|chunks| chunks.as_slice())
            .unwrap_or(&[])
    }

    /// The modules of the chunk, in current order
    pub fn chunk_modules(&self, chunk: ChunkKey) -> &[ModuleKey] {
        self.chunk_modules
            .get(&chunk)
            .map(|modules| modules.as_slice())
            .unwrap_or(&[])
    }

    /// Cached snapshot of the chunks containing the module
    pub fn get_module_chunks(&self, module: ModuleKey) -> Vec<ChunkKey> {
        self.module_chunks
            .get(&module)
            .map(|chunks| chunks.get_from_cache("snapshot", |items| items.to_vec()))
            .unwrap_or_default()
    }

    /// Cached snapshot of the modules contained in the chunk
    pub fn get_chunk_modules(&self, chunk: ChunkKey) -> Vec<ModuleKey> {
        self.chunk_modules
            .get(&chunk)
            .map(|modules| modules.get_from_cache("snapshot", |items| items.to_vec()))
            .unwrap_or_default()
    }

    pub fn num_module_chunks(&self, module: ModuleKey) -> usize {
        self.module_chunks
            .get(&module)
            .map(|chunks| chunks.len())
            .unwrap_or(0)
    }

    pub fn num_chunk_modules(&self, chunk: ChunkKey) -> usize {
        self.chunk_modules
            .get(&chunk)
            .map(|modules| modules.len())
            .unwrap_or(0)
    }

    /// Sort the chunk's modules into deterministic id order
    pub fn sort_chunk_modules(&mut self, modules: &dyn ModuleGraph, chunk: ChunkKey) {
        if let Some(set) = self.chunk_modules.get_mut(&chunk) {
            set.sort_with("module-id", |a, b| compare_modules_by_id(modules, *a, *b));
        }
    }

    /// The chunk's modules in deterministic id order
    pub fn ordered_chunk_modules(
        &mut self,
        modules: &dyn ModuleGraph,
        chunk: ChunkKey,
    ) -> &[ModuleKey] {
        match self.chunk_modules.get_mut(&chunk) {
            Some(set) => {
                set.sort_with("module-id", |a, b| compare_modules_by_id(modules, *a, *b));
                set.as_slice()
            }
            None => &[],
        }
    }

    /// The module's chunks sorted with a caller-supplied comparator
    ///
    /// The label identifies the comparator so repeated calls with the same
    /// order skip the sort.
    pub fn ordered_module_chunks<F>(
        &mut self,
        module: ModuleKey,
        label: &'static str,
        cmp: F,
    ) -> &[ChunkKey]
    where
        F: FnMut(&ChunkKey, &ChunkKey) -> std::cmp::Ordering,
    {
        match self.module_chunks.get_mut(&module) {
            Some(set) => {
                set.sort_with(label, cmp);
                set.as_slice()
            }
            None => &[],
        }
    }

    /// Whether two modules live in exactly the same set of chunks
    ///
    /// Both chunk sets are sorted by `debug_id` and compared pairwise,
    /// avoiding any set hashing.
    pub fn have_modules_equal_chunks(
        &mut self,
        store: &ChunkStore,
        a: ModuleKey,
        b: ModuleKey,
    ) -> bool {
        if self.num_module_chunks(a) != self.num_module_chunks(b) {
            return false;
        }
        for module in [a, b] {
            if let Some(chunks) = self.module_chunks.get_mut(&module) {
                chunks.sort_with("debug-id", |x, y| {
                    store.debug_id(*x).cmp(&store.debug_id(*y))
                });
            }
        }
        self.module_chunks(a)
            .iter()
            .zip(self.module_chunks(b))
            .all(|(x, y)| x == y)
    }

    /// Concatenation of the chunk's module identifiers in id order
    ///
    /// Order is normalized by the sort, so the concatenation is cached
    /// across re-sorts.
    pub fn modules_ident(&mut self, modules: &dyn ModuleGraph, chunk: ChunkKey) -> String {
        let Some(set) = self.chunk_modules.get_mut(&chunk) else {
            return String::new();
        };
        set.sort_with("module-id", |a, b| compare_modules_by_id(modules, *a, *b));
        set.get_from_unordered_cache("ident", |items| {
            let mut ident = String::new();
            for &module in items {
                ident.push_str(modules.identifier(module));
                ident.push('#');
            }
            ident
        })
    }

    /// Total order over chunks for deterministic output lists
    ///
    /// Chunks with more modules sort first; ties break on the lexicographic
    /// order of the module identifier concatenations.
    pub fn compare_chunks(
        &mut self,
        modules: &dyn ModuleGraph,
        a: ChunkKey,
        b: ChunkKey,
    ) -> std::cmp::Ordering {
        let (count_a, count_b) = (self.num_chunk_modules(a), self.num_chunk_modules(b));
        if count_a != count_b {
            return count_b.cmp(&count_a);
        }
        let ident_a = self.modules_ident(modules, a);
        let ident_b = self.modules_ident(modules, b);
        ident_a.cmp(&ident_b)
    }

    /// Whether any module matching `filter` exists in a chunk reachable
    /// from the given chunk's owning groups
    pub fn has_module_in_graph(
        &self,
        store: &ChunkStore,
        groups: &dyn ChunkGroupGraph,
        chunk: ChunkKey,
        filter: &dyn Fn(ModuleKey) -> bool,
        chunk_filter: Option<&dyn Fn(ChunkKey) -> bool>,
    ) -> bool {
        let Some(start) = store.get(chunk) else {
            return false;
        };

        let mut queue: Vec<GroupKey> = start.groups().to_vec();
        let mut seen: HashSet<GroupKey> = queue.iter().copied().collect();
        let mut processed: HashSet<ChunkKey> = HashSet::new();

        let mut i = 0;
        while i < queue.len() {
            let group = queue[i];
            i += 1;
            for &inner in groups.chunks(group) {
                if !processed.insert(inner) {
                    continue;
                }
                if chunk_filter.map_or(true, |keep| keep(inner))
                    && self.chunk_modules(inner).iter().any(|&m| filter(m))
                {
                    return true;
                }
            }
            for &child in groups.children(group) {
                if seen.insert(child) {
                    queue.push(child);
                }
            }
        }
        false
    }

    /// Module id and hash tables of all async chunks below the given chunk,
    /// restricted to modules matching `filter`
    pub fn chunk_module_maps(
        &self,
        store: &ChunkStore,
        groups: &dyn ChunkGroupGraph,
        modules: &dyn ModuleGraph,
        chunk: ChunkKey,
        filter: impl Fn(ModuleKey) -> bool,
    ) -> ChunkModuleMaps {
        let mut maps = ChunkModuleMaps::default();

        for async_chunk in store.all_async_chunks(groups, chunk) {
            let Some(chunk_id) = store.get(async_chunk).and_then(|c| c.id.clone()) else {
                continue;
            };
            let mut ids: Vec<EntityId> = Vec::new();
            for &module in self.chunk_modules(async_chunk) {
                if !filter(module) {
                    continue;
                }
                let Some(module_id) = modules.id(module) else {
                    continue;
                };
                ids.push(module_id.clone());
                maps.hash
                    .insert(module_id.to_string(), modules.hash(module).to_owned());
            }
            if !ids.is_empty() {
                ids.sort();
                maps.id.insert(chunk_id.to_string(), ids);
            }
        }
        maps
    }

    /// The raw membership set of a chunk, for memoized derived values
    pub(crate) fn chunk_modules_set(&self, chunk: ChunkKey) -> Option<&OrderedCachedSet<ModuleKey>> {
        self.chunk_modules.get(&chunk)
    }

    /// Drop the (empty) membership row of a removed chunk
    pub fn purge_chunk(&mut self, chunk: ChunkKey) {
        if let Some(modules) = self.chunk_modules.remove(&chunk) {
            debug_assert!(
                modules.is_empty(),
                "chunk {:?} purged while still holding modules",
                chunk
            );
        }
    }

    /// Detach a module everywhere when the external module graph drops it
    pub fn remove_module(&mut self, module: ModuleKey) {
        for chunk in self.get_module_chunks(module) {
            self.disconnect(chunk, module);
        }
        self.module_chunks.remove(&module);
    }

    /// Full symmetry scan over both side tables
    pub fn check_consistency(&self) -> Result<(), ConsistencyError> {
        for (&module, chunks) in &self.module_chunks {
            for &chunk in chunks.iter() {
                if !self.is_module_in_chunk(module, chunk) {
                    return Err(ConsistencyError::MissingModuleSide { chunk, module });
                }
            }
        }
        for (&chunk, modules) in &self.chunk_modules {
            for &module in modules.iter() {
                let listed = self
                    .module_chunks
                    .get(&module)
                    .map(|chunks| chunks.contains(&chunk))
                    .unwrap_or(false);
                if !listed {
                    return Err(ConsistencyError::MissingChunkSide { chunk, module });
                }
            }
        }
        Ok(())
    }

    #[cfg(debug_assertions)]
    fn debug_check_edge(&self, chunk: ChunkKey, module: ModuleKey, present: bool) {
        let module_side = self
            .module_chunks
            .get(&module)
            .map(|chunks| chunks.contains(&chunk))
            .unwrap_or(false);
        let chunk_side = self.is_module_in_chunk(module, chunk);
        debug_assert_eq!(module_side, present);
        debug_assert_eq!(chunk_side, present);
    }

    #[cfg(not(debug_assertions))]
    fn debug_check_edge(&self, _chunk: ChunkKey, _module: ModuleKey, _present: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestGroups, TestModules};
    use pretty_assertions::assert_eq;

    fn fixture() -> (ChunkGraph, ChunkStore, TestModules) {
        (ChunkGraph::new(), ChunkStore::new(), TestModules::default())
    }

    #[test]
    fn test_connect_is_idempotent() {
        let (mut index, mut store, mut modules) = fixture();
        let chunk = store.create(None);
        let module = modules.add("./a.js", 10.0);

        assert!(index.connect(chunk, module));
        assert!(!index.connect(chunk, module), "second connect is a no-op");
        assert_eq!(index.num_chunk_modules(chunk), 1);
        assert_eq!(index.num_module_chunks(module), 1);
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_disconnect_reports_change() {
        let (mut index, mut store, mut modules) = fixture();
        let chunk = store.create(None);
        let module = modules.add("./a.js", 10.0);

        assert!(!index.disconnect(chunk, module));
        index.connect(chunk, module);
        assert!(index.disconnect(chunk, module));
        assert!(!index.disconnect(chunk, module));
        assert_eq!(index.num_chunk_modules(chunk), 0);
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_edge_symmetry_after_mutation_sequence() {
        let (mut index, mut store, mut modules) = fixture();
        let a = store.create(Some("a"));
        let b = store.create(Some("b"));
        let m1 = modules.add("./1.js", 1.0);
        let m2 = modules.add("./2.js", 2.0);
        let m3 = modules.add("./3.js", 3.0);

        index.connect(a, m1);
        index.connect(a, m2);
        index.connect(b, m2);
        index.connect(b, m3);
        index.disconnect(a, m2);
        index.replace_module(m3, m1);
        index.check_consistency().unwrap();

        assert!(index.is_module_in_chunk(m1, a));
        assert!(index.is_module_in_chunk(m1, b));
        assert!(!index.is_module_in_chunk(m3, b));
    }

    #[test]
    fn test_replace_module_preserves_chunk_order() {
        let (mut index, mut store, mut modules) = fixture();
        let chunk = store.create(None);
        let m1 = modules.add("./1.js", 1.0);
        let m2 = modules.add("./2.js", 1.0);
        let m3 = modules.add("./3.js", 1.0);
        let m9 = modules.add("./9.js", 1.0);
        index.connect(chunk, m1);
        index.connect(chunk, m2);
        index.connect(chunk, m3);

        index.replace_module(m2, m9);

        assert_eq!(index.chunk_modules(chunk), &[m1, m9, m3]);
        assert_eq!(index.module_chunks(m9), &[chunk]);
        assert_eq!(index.num_module_chunks(m2), 0);
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_replace_module_without_chunks_is_noop() {
        let (mut index, _, mut modules) = fixture();
        let m1 = modules.add("./1.js", 1.0);
        let m2 = modules.add("./2.js", 1.0);

        index.replace_module(m1, m2);
        assert_eq!(index.num_module_chunks(m2), 0);
    }

    #[test]
    fn test_replace_module_with_itself_is_noop() {
        let (mut index, mut store, mut modules) = fixture();
        let chunk = store.create(None);
        let module = modules.add("./a.js", 1.0);
        index.connect(chunk, module);

        index.replace_module(module, module);

        assert_eq!(index.chunk_modules(chunk), &[module]);
        assert_eq!(index.module_chunks(module), &[chunk]);
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_is_entry_module() {
        let (mut index, mut store, mut modules) = fixture();
        let chunk = store.create(None);
        let entry = modules.add("./entry.js", 1.0);
        let plain = modules.add("./plain.js", 1.0);
        index.connect(chunk, entry);
        index.connect(chunk, plain);
        store.get_mut(chunk).unwrap().entry_module = Some(entry);

        assert!(index.is_entry_module(&store, entry));
        assert!(!index.is_entry_module(&store, plain));
    }

    #[test]
    fn test_have_modules_equal_chunks() {
        let (mut index, mut store, mut modules) = fixture();
        let a = store.create(None);
        let b = store.create(None);
        let m1 = modules.add("./1.js", 1.0);
        let m2 = modules.add("./2.js", 1.0);
        let m3 = modules.add("./3.js", 1.0);

        index.connect(a, m1);
        index.connect(b, m1);
        // m2 joins the same chunks in the opposite order.
        index.connect(b, m2);
        index.connect(a, m2);
        index.connect(a, m3);

        assert!(index.have_modules_equal_chunks(&store, m1, m2));
        assert!(!index.have_modules_equal_chunks(&store, m1, m3));
    }

    #[test]
    fn test_compare_chunks_prefers_more_modules() {
        let (mut index, mut store, mut modules) = fixture();
        let big = store.create(None);
        let small = store.create(None);
        let m1 = modules.add("./1.js", 1.0);
        let m2 = modules.add("./2.js", 1.0);
        index.connect(big, m1);
        index.connect(big, m2);
        index.connect(small, m1);

        assert_eq!(
            index.compare_chunks(&modules, big, small),
            std::cmp::Ordering::Less
        );
        assert_eq!(
            index.compare_chunks(&modules, small, big),
            std::cmp::Ordering::Greater
        );
    }

    #[test]
    fn test_compare_chunks_ties_break_on_identifiers() {
        let (mut index, mut store, mut modules) = fixture();
        let a = store.create(None);
        let b = store.create(None);
        let ma = modules.add("./aaa.js", 1.0);
        let mb = modules.add("./bbb.js", 1.0);
        index.connect(a, ma);
        index.connect(b, mb);

        assert_eq!(
            index.compare_chunks(&modules, a, b),
            std::cmp::Ordering::Less
        );
    }

    #[test]
    fn test_ordered_chunk_modules_sorts_by_id_then_identifier() {
        let (mut index, mut store, mut modules) = fixture();
        let chunk = store.create(None);
        let with_id = modules.add("./z.js", 1.0);
        let unassigned = modules.add("./a.js", 1.0);
        modules.assign_id(with_id, EntityId::Number(0));
        index.connect(chunk, unassigned);
        index.connect(chunk, with_id);

        assert_eq!(
            index.ordered_chunk_modules(&modules, chunk),
            &[with_id, unassigned],
            "assigned ids sort before identifier fallbacks"
        );
    }

    #[test]
    fn test_ordered_module_chunks_applies_comparator() {
        let (mut index, mut store, mut modules) = fixture();
        let a = store.create(None);
        let b = store.create(None);
        let module = modules.add("./m.js", 1.0);
        index.connect(b, module);
        index.connect(a, module);

        let ordered = index.ordered_module_chunks(module, "debug-id", |x, y| {
            store.debug_id(*x).cmp(&store.debug_id(*y))
        });
        assert_eq!(ordered, &[a, b]);
    }

    #[test]
    fn test_remove_module_detaches_everywhere() {
        let (mut index, mut store, mut modules) = fixture();
        let a = store.create(None);
        let b = store.create(None);
        let module = modules.add("./m.js", 1.0);
        index.connect(a, module);
        index.connect(b, module);

        index.remove_module(module);

        assert_eq!(index.num_chunk_modules(a), 0);
        assert_eq!(index.num_chunk_modules(b), 0);
        assert_eq!(index.num_module_chunks(module), 0);
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_has_module_in_graph_walks_child_groups() {
        let (mut index, mut store, mut modules) = fixture();
        let mut groups = TestGroups::default();

        let entry = store.create(Some("main"));
        let lazy = store.create(None);
        let wanted = modules.add("./wanted.js", 1.0);

        let root = groups.add(true);
        let child = groups.add(false);
        groups.link(root, child);
        groups.attach(&mut store, root, entry);
        groups.attach(&mut store, child, lazy);
        index.connect(lazy, wanted);

        assert!(index.has_module_in_graph(
            &store,
            &groups,
            entry,
            &|m| m == wanted,
            None
        ));
        assert!(!index.has_module_in_graph(
            &store,
            &groups,
            entry,
            &|m| m == wanted,
            Some(&|c| c != lazy)
        ));
    }

    #[test]
    fn test_chunk_module_maps() {
        let (mut index, mut store, mut modules) = fixture();
        let mut groups = TestGroups::default();

        let entry = store.create(Some("main"));
        let lazy = store.create(None);
        store.get_mut(lazy).unwrap().id = Some(EntityId::Number(7));

        let m1 = modules.add("./1.js", 1.0);
        let m2 = modules.add("./2.js", 1.0);
        modules.assign_id(m1, EntityId::Number(3));
        modules.assign_id(m2, EntityId::Number(1));

        let root = groups.add(true);
        let child = groups.add(false);
        groups.link(root, child);
        groups.attach(&mut store, root, entry);
        groups.attach(&mut store, child, lazy);
        index.connect(lazy, m1);
        index.connect(lazy, m2);

        let maps = index.chunk_module_maps(&store, &groups, &modules, entry, |_| true);
        assert_eq!(
            maps.id.get("7"),
            Some(&vec![EntityId::Number(1), EntityId::Number(3)])
        );
        assert_eq!(maps.hash.get("3"), Some(&modules.hash(m1).to_owned()));
    }
}
