//! Insertion-ordered set with lazy sorting and memoized derived values
//!
//! Module and chunk collections get re-sorted repeatedly for deterministic
//! hashing and output, and several derived values (identifier
//! concatenations, summed sizes) are expensive enough to memoize. The set
//! tracks a structural version so caches can tell "same membership, same
//! order" apart from "same membership, any order".

use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

struct CacheSlot {
    version: u64,
    order: u64,
    value: Box<dyn Any>,
}

/// A mutation-tracked set preserving insertion order until sorted
pub struct OrderedCachedSet<T> {
    items: Vec<T>,
    index: HashSet<T>,

    /// Bumped on every membership change
    version: u64,

    /// Bumped on every membership change and every applied sort
    order: u64,

    /// Label of the last applied sort, cleared on mutation
    sorted_by: Option<&'static str>,

    ordered_caches: RefCell<HashMap<&'static str, CacheSlot>>,
    unordered_caches: RefCell<HashMap<&'static str, CacheSlot>>,
}

impl<T: Copy + Eq + Hash> OrderedCachedSet<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashSet::new(),
            version: 0,
            order: 0,
            sorted_by: None,
            ordered_caches: RefCell::new(HashMap::new()),
            unordered_caches: RefCell::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.index.contains(item)
    }

    /// Current structural version; changes on every membership change
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Add an item; reports whether it was newly inserted
    pub fn add(&mut self, item: T) -> bool {
        if !self.index.insert(item) {
            return false;
        }
        self.items.push(item);
        self.touch();
        true
    }

    /// Remove an item; reports whether it was present
    pub fn remove(&mut self, item: &T) -> bool {
        if !self.index.remove(item) {
            return false;
        }
        if let Some(pos) = self.items.iter().position(|i| i == item) {
            self.items.remove(pos);
        }
        self.touch();
        true
    }

    /// Replace `old` with `new` in place, keeping `old`'s position
    ///
    /// When `new` is already a member, `old` is simply removed. Reports
    /// whether `old` was present.
    pub fn replace(&mut self, old: &T, new: T) -> bool {
        if !self.index.remove(old) {
            return false;
        }
        let pos = self.items.iter().position(|i| i == old);
        if self.index.insert(new) {
            if let Some(pos) = pos {
                self.items[pos] = new;
            }
        } else if let Some(pos) = pos {
            self.items.remove(pos);
        }
        self.touch();
        true
    }

    pub fn clear(&mut self) {
        if self.items.is_empty() {
            return;
        }
        self.items.clear();
        self.index.clear();
        self.touch();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// The items in current order
    pub fn as_slice(&self) -> &[T] {
        self.items.as_slice()
    }

    /// Sort the set with the given comparator
    ///
    /// Comparators are identified by `label`: when the last applied sort
    /// carries the same label and the set has not mutated since, this is a
    /// no-op. The sort is stable.
    pub fn sort_with<F>(&mut self, label: &'static str, mut cmp: F)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        if self.sorted_by == Some(label) {
            return;
        }
        self.items.sort_by(|a, b| cmp(a, b));
        self.sorted_by = Some(label);
        self.order += 1;
    }

    /// Memoized derived value, invalidated by membership or order changes
    pub fn get_from_cache<V, F>(&self, label: &'static str, compute: F) -> V
    where
        V: Any + Clone,
        F: FnOnce(&[T]) -> V,
    {
        {
            let caches = self.ordered_caches.borrow();
            if let Some(slot) = caches.get(label) {
                if slot.version == self.version && slot.order == self.order {
                    if let Some(value) = slot.value.downcast_ref::<V>() {
                        return value.clone();
                    }
                }
            }
        }
        let value = compute(&self.items);
        self.ordered_caches.borrow_mut().insert(
            label,
            CacheSlot {
                version: self.version,
                order: self.order,
                value: Box::new(value.clone()),
            },
        );
        value
    }

    /// Memoized derived value, invalidated by membership changes only
    ///
    /// Stable across re-sorts, so the compute function must either not
    /// depend on order or normalize it first.
    pub fn get_from_unordered_cache<V, F>(&self, label: &'static str, compute: F) -> V
    where
        V: Any + Clone,
        F: FnOnce(&[T]) -> V,
    {
        {
            let caches = self.unordered_caches.borrow();
            if let Some(slot) = caches.get(label) {
                if slot.version == self.version {
                    if let Some(value) = slot.value.downcast_ref::<V>() {
                        return value.clone();
                    }
                }
            }
        }
        let value = compute(&self.items);
        self.unordered_caches.borrow_mut().insert(
            label,
            CacheSlot {
                version: self.version,
                order: self.order,
                value: Box::new(value.clone()),
            },
        );
        value
    }

    fn touch(&mut self) {
        self.version += 1;
        self.order += 1;
        self.sorted_by = None;
    }
}

impl<T: Copy + Eq + Hash> Default for OrderedCachedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for OrderedCachedSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.items.iter()).finish()
    }
}

impl<'a, T: Copy + Eq + Hash> IntoIterator for &'a OrderedCachedSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
