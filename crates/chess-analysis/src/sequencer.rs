//! Reordering buffer that releases indexed results strictly in order.

use std::collections::BTreeMap;

/// Holds results that arrive ahead of their turn.
///
/// Items are pushed with their index in any order; each push returns the
/// run of items that has become releasable, in index order.
#[derive(Debug)]
pub struct Sequencer<T> {
    next: usize,
    pending: BTreeMap<usize, T>,
}

impl<T> Default for Sequencer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Sequencer<T> {
    pub fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Index of the next item to be released.
    pub fn next_index(&self) -> usize {
        self.next
    }

    /// Number of items waiting for an earlier index.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Accepts `item` for `index` and returns everything now in order.
    ///
    /// Items for an index that was already released or is already waiting
    /// are dropped.
    pub fn push(&mut self, index: usize, item: T) -> Vec<(usize, T)> {
        if index < self.next || self.pending.contains_key(&index) {
            return Vec::new();
        }
        self.pending.insert(index, item);

        let mut released = Vec::new();
        while let Some(item) = self.pending.remove(&self.next) {
            released.push((self.next, item));
            self.next += 1;
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_in_order_passes_through() {
        let mut seq = Sequencer::new();
        assert_eq!(seq.push(0, 'a'), vec![(0, 'a')]);
        assert_eq!(seq.push(1, 'b'), vec![(1, 'b')]);
        assert_eq!(seq.next_index(), 2);
    }

    #[test]
    fn test_holds_until_gap_filled() {
        let mut seq = Sequencer::new();
        assert!(seq.push(2, 'c').is_empty());
        assert!(seq.push(1, 'b').is_empty());
        assert_eq!(seq.pending(), 2);
        assert_eq!(seq.push(0, 'a'), vec![(0, 'a'), (1, 'b'), (2, 'c')]);
        assert_eq!(seq.pending(), 0);
    }

    #[test]
    fn test_duplicates_dropped() {
        let mut seq = Sequencer::new();
        seq.push(0, 'a');
        assert!(seq.push(0, 'x').is_empty());
        seq.push(2, 'c');
        assert!(seq.push(2, 'y').is_empty());
        assert_eq!(seq.push(1, 'b'), vec![(1, 'b'), (2, 'c')]);
    }

    proptest! {
        #[test]
        fn release_order_is_index_order(order in Just((0..40usize).collect::<Vec<_>>()).prop_shuffle()) {
            let mut seq = Sequencer::new();
            let mut released = Vec::new();
            for index in order {
                released.extend(seq.push(index, index * 10));
            }
            let indices: Vec<usize> = released.iter().map(|(i, _)| *i).collect();
            prop_assert_eq!(indices, (0..40).collect::<Vec<_>>());
            prop_assert!(released.iter().all(|(i, v)| *v == i * 10));
            prop_assert_eq!(seq.pending(), 0);
        }
    }
}
