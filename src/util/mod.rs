//! Utility data structures and helpers

pub mod ordered_set;

use std::collections::HashSet;
use std::hash::Hash;

pub use ordered_set::OrderedCachedSet;

/// Intersect a list of sets, probing from the smallest one
pub fn intersect<T: Copy + Eq + Hash>(sets: &[HashSet<T>]) -> HashSet<T> {
    let Some(smallest) = sets.iter().min_by_key(|s| s.len()) else {
        return HashSet::new();
    };

    smallest
        .iter()
        .filter(|item| sets.iter().all(|set| set.contains(item)))
        .copied()
        .collect()
}
