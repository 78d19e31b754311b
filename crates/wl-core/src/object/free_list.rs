//! Object-id allocator.
//!
//! Available ids are kept as a sorted list of disjoint inclusive runs
//! `(first, last)`.  In front of the runs sits a small LIFO cache of
//! recently freed ids, so a freshly released id is the next one handed out.
//! When the cache fills up, a quarter of it is folded back into the runs.
//!
//! ```text
//!   recent: [9, 4]              ← get() pops 4 first
//!   runs:   [2..=2] [6..=8] [10..=0xFEFFFFFF]
//! ```

use crate::error::ResourceError;

/// Upper bound on the recently-freed cache.
pub const RECENT_FREE_MAX: usize = 64;

/// Number of cached ids returned to the runs when the cache is full.
const RECENT_DRAIN: usize = RECENT_FREE_MAX / 4;

#[derive(Debug, Clone)]
pub struct FreeList {
    min: u32,
    max: u32,
    /// Sorted, disjoint, non-adjacent inclusive runs.
    runs: Vec<(u32, u32)>,
    recent: Vec<u32>,
}

impl FreeList {
    /// Creates an allocator over the inclusive range `[min, max]`.
    ///
    /// # Panics
    ///
    /// Panics if `min > max`; the bounds are compile-time constants in
    /// practice.
    pub fn new(min: u32, max: u32) -> Self {
        assert!(min <= max, "FreeList range is empty: {min} > {max}");
        Self {
            min,
            max,
            runs: vec![(min, max)],
            recent: Vec::with_capacity(RECENT_FREE_MAX),
        }
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Takes the next available id, or `None` if every id is in use.
    pub fn get(&mut self) -> Option<u32> {
        if let Some(id) = self.recent.pop() {
            return Some(id);
        }
        let (first, last) = self.runs.first_mut()?;
        let id = *first;
        if *first == *last {
            self.runs.remove(0);
        } else {
            *first += 1;
        }
        Some(id)
    }

    /// Returns `id` to the allocator.
    ///
    /// The caller guarantees `id` is currently allocated; freeing an id
    /// twice would let it be handed out twice.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::IdOutOfRange`] if `id` lies outside `[min, max]`.
    pub fn free(&mut self, id: u32) -> Result<(), ResourceError> {
        if id < self.min || id > self.max {
            return Err(ResourceError::IdOutOfRange(id));
        }
        if self.recent.len() >= RECENT_FREE_MAX {
            for _ in 0..RECENT_DRAIN {
                if let Some(old) = self.recent.pop() {
                    self.put(old);
                }
            }
        }
        self.recent.push(id);
        Ok(())
    }

    /// Number of ids currently available.
    pub fn available(&self) -> u64 {
        let in_runs: u64 = self
            .runs
            .iter()
            .map(|&(first, last)| u64::from(last - first) + 1)
            .sum();
        in_runs + self.recent.len() as u64
    }

    /// Inserts `id` into the run list, merging with neighbours.
    fn put(&mut self, id: u32) {
        // index of the first run that starts after `id`
        let i = self.runs.partition_point(|&(first, _)| first <= id);

        let joins_prev = i > 0 && self.runs[i - 1].1.checked_add(1) == Some(id);
        let joins_next = i < self.runs.len() && id.checked_add(1) == Some(self.runs[i].0);

        match (joins_prev, joins_next) {
            (true, true) => {
                self.runs[i - 1].1 = self.runs[i].1;
                self.runs.remove(i);
            }
            (true, false) => self.runs[i - 1].1 = id,
            (false, true) => self.runs[i].0 = id,
            (false, false) => self.runs.insert(i, (id, id)),
        }
    }

    #[cfg(test)]
    fn runs(&self) -> &[(u32, u32)] {
        &self.runs
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_fresh_list_hands_out_ids_in_order() {
        let mut list = FreeList::new(1, 100);

        let ids: Vec<_> = (0..3).filter_map(|_| list.get()).collect();

        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_freed_id_is_reused_first() {
        // Arrange
        let mut list = FreeList::new(1, 100);
        for _ in 0..10 {
            list.get();
        }

        // Act
        list.free(4).unwrap();
        list.free(7).unwrap();

        // Assert: LIFO
        assert_eq!(list.get(), Some(7));
        assert_eq!(list.get(), Some(4));
        assert_eq!(list.get(), Some(11));
    }

    #[test]
    fn test_exhausted_list_returns_none() {
        let mut list = FreeList::new(5, 6);

        assert_eq!(list.get(), Some(5));
        assert_eq!(list.get(), Some(6));
        assert_eq!(list.get(), None);
    }

    #[test]
    fn test_free_out_of_range_is_rejected() {
        let mut list = FreeList::new(10, 20);

        assert_eq!(list.free(9), Err(ResourceError::IdOutOfRange(9)));
        assert_eq!(list.free(21), Err(ResourceError::IdOutOfRange(21)));
    }

    #[test]
    fn test_full_cache_drains_a_quarter_into_runs() {
        // Arrange: allocate 100 ids, then free RECENT_FREE_MAX of them
        let mut list = FreeList::new(1, 1000);
        for _ in 0..100 {
            list.get();
        }
        for id in 1..=RECENT_FREE_MAX as u32 {
            list.free(id).unwrap();
        }
        assert_eq!(list.runs(), &[(101, 1000)]);

        // Act: one more free overflows the cache
        list.free(80).unwrap();

        // Assert: ids 49..=64 went back to the runs and merged into one run
        assert_eq!(list.runs(), &[(49, 64), (101, 1000)]);
        assert_eq!(list.get(), Some(80));
        assert_eq!(list.get(), Some(48));
    }

    #[test]
    fn test_put_merges_adjacent_runs() {
        let mut list = FreeList::new(1, 10);
        list.runs = vec![(1, 2), (4, 5)];

        list.put(3);

        assert_eq!(list.runs(), &[(1, 5)]);
    }

    #[test]
    fn test_put_at_range_edges() {
        let mut list = FreeList::new(0, u32::MAX);
        list.runs = vec![(5, 10)];

        list.put(u32::MAX);
        list.put(0);
        list.put(4);

        assert_eq!(list.runs(), &[(0, 0), (4, 10), (u32::MAX, u32::MAX)]);
    }

    #[test]
    fn test_available_counts_runs_and_cache() {
        let mut list = FreeList::new(1, 10);
        list.get();
        list.get();
        list.free(1).unwrap();

        assert_eq!(list.available(), 9);
    }

    #[test]
    fn test_randomized_operations_never_double_allocate() {
        // Arrange
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let (min, max) = (1, 500);
        let mut list = FreeList::new(min, max);
        let mut live: HashSet<u32> = HashSet::new();
        let mut live_order: Vec<u32> = Vec::new();

        // Act / Assert
        for _ in 0..20_000 {
            let allocate = live_order.is_empty() || rng.random_bool(0.55);
            if allocate {
                match list.get() {
                    Some(id) => {
                        assert!((min..=max).contains(&id), "id {id} outside range");
                        assert!(live.insert(id), "id {id} handed out while live");
                        live_order.push(id);
                    }
                    None => assert_eq!(live.len(), (max - min + 1) as usize),
                }
            } else {
                let idx = rng.random_range(0..live_order.len());
                let id = live_order.swap_remove(idx);
                live.remove(&id);
                list.free(id).unwrap();

                if list.recent.len() < RECENT_FREE_MAX && rng.random_bool(0.1) {
                    assert_eq!(list.get(), Some(id), "just-freed id is reused");
                    live.insert(id);
                    live_order.push(id);
                }
            }
            assert_eq!(
                list.available() + live.len() as u64,
                u64::from(max - min) + 1
            );
        }
    }
}
