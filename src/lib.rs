//! Chunk graph core for the Component build tool
//!
//! Tracks which modules are packaged into which output chunks, how chunks
//! compose into traversal-ordered groups (entry points and split points),
//! and rewrites this graph during optimization: merging near-duplicate
//! chunks, duplicating chunks across entry paths, and removing dead ones.
//! Downstream code generation and emission only consume the read-only views
//! produced here; iteration order is deterministic so output stays
//! reproducible.
//!
//! Modules and chunk groups are owned elsewhere in the pipeline and are
//! addressed through the traits in [`external`]. The core is synchronous
//! and single-threaded; optimization passes run strictly sequentially over
//! one shared graph.

pub mod chunk;
pub mod external;
pub mod graph;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use chunk::{Chunk, ChunkMaps, ChunkStore};
pub use external::{
    ChunkGroupGraph, ChunkHasher, ChunkKey, EntityId, GroupKey, ModuleGraph, ModuleKey,
    SizeOptions, SourceKind,
};
pub use graph::{compare_modules_by_id, ChunkGraph, ChunkModuleMaps, ConsistencyError};
pub use util::OrderedCachedSet;
