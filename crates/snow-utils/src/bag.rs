//! A weighted multiset.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// A multiset whose per-element counts are `u64` weights.
///
/// A sample of validators is a `Bag<NodeId>` where a validator drawn twice
/// carries weight 2; a finished poll is a `Bag<Id>` of weighted votes.
///
/// ```
/// use snow_utils::Bag;
///
/// let mut bag = Bag::new();
/// bag.add("a");
/// bag.add_count("b", 3);
///
/// assert_eq!(bag.count(&"b"), 3);
/// assert_eq!(bag.len(), 4);
/// assert_eq!(bag.mode(), Some(("b", 3)));
/// ```
#[derive(Clone)]
pub struct Bag<T: Eq + Hash + Clone> {
    counts: HashMap<T, u64>,
    size: u64,
}

impl<T: Eq + Hash + Clone> Default for Bag<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone> Bag<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            size: 0,
        }
    }

    /// Builds a bag where every occurrence in `iter` adds weight 1.
    pub fn of<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut bag = Self::new();
        for item in iter {
            bag.add(item);
        }
        bag
    }

    pub fn add(&mut self, item: T) {
        self.add_count(item, 1);
    }

    /// Adds `count` weight to `item`. Zero is a no-op.
    pub fn add_count(&mut self, item: T, count: u64) {
        if count == 0 {
            return;
        }
        *self.counts.entry(item).or_insert(0) += count;
        self.size += count;
    }

    #[must_use]
    pub fn count(&self, item: &T) -> u64 {
        self.counts.get(item).copied().unwrap_or(0)
    }

    /// Total weight across all elements.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of distinct elements.
    #[must_use]
    pub fn unique_len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.counts.contains_key(item)
    }

    /// Distinct elements, in no particular order.
    pub fn list(&self) -> Vec<T> {
        self.counts.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&T, u64)> {
        self.counts.iter().map(|(item, &count)| (item, count))
    }

    /// Returns the heaviest element. Ties are broken arbitrarily.
    pub fn mode(&self) -> Option<(T, u64)> {
        self.counts
            .iter()
            .max_by_key(|(_, &count)| count)
            .map(|(item, &count)| (item.clone(), count))
    }

    pub fn filter<F: Fn(&T) -> bool>(&self, predicate: F) -> Self {
        let mut filtered = Self::new();
        for (item, &count) in &self.counts {
            if predicate(item) {
                filtered.add_count(item.clone(), count);
            }
        }
        filtered
    }

    /// Removes every occurrence of `item`, returning the weight it held.
    pub fn remove(&mut self, item: &T) -> u64 {
        let count = self.counts.remove(item).unwrap_or(0);
        self.size -= count;
        count
    }
}

impl<T: Eq + Hash + Clone> PartialEq for Bag<T> {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size && self.counts == other.counts
    }
}

impl<T: Eq + Hash + Clone> Eq for Bag<T> {}

impl<T: Eq + Hash + Clone> FromIterator<T> for Bag<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::of(iter)
    }
}

impl<T: Eq + Hash + Clone> Extend<(T, u64)> for Bag<T> {
    fn extend<I: IntoIterator<Item = (T, u64)>>(&mut self, iter: I) {
        for (item, count) in iter {
            self.add_count(item, count);
        }
    }
}

impl<T: Eq + Hash + Clone + fmt::Debug> fmt::Debug for Bag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bag(size={}) ", self.size)?;
        f.debug_map().entries(self.counts.iter()).finish()
    }
}

impl<T: Eq + Hash + Clone + fmt::Display> fmt::Display for Bag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bag (Size = {})", self.size)?;
        for (item, count) in &self.counts {
            write!(f, "\n    {item}: {count}")?;
        }
        Ok(())
    }
}
