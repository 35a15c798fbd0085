//! Recycling id pools for clients, entities and rooms.

use std::collections::BTreeSet;

use parking_lot::Mutex;

/// Issues ids from `first..=last`, reusing freed ids before minting new
/// ones. Freed ids come back lowest first.
///
/// The lock is held only for the duration of one reserve or free, so a
/// pool can be shared between a room's tick and other threads.
#[derive(Debug)]
pub struct IdPool {
    first: u32,
    last: u32,
    inner: Mutex<PoolState>,
}

#[derive(Debug)]
struct PoolState {
    /// Next id never issued before. Wider than the ids so it can step past
    /// `u32::MAX`.
    next: u64,
    free: BTreeSet<u32>,
}

impl IdPool {
    /// # Panics
    /// Panics if `first > last`.
    pub fn new(first: u32, last: u32) -> Self {
        assert!(first <= last, "empty id range {first}..={last}");
        Self {
            first,
            last,
            inner: Mutex::new(PoolState {
                next: u64::from(first),
                free: BTreeSet::new(),
            }),
        }
    }

    /// `None` when every id in the range is outstanding.
    pub fn reserve(&self) -> Option<u32> {
        let mut state = self.inner.lock();
        if let Some(id) = state.free.pop_first() {
            return Some(id);
        }
        if state.next > u64::from(self.last) {
            return None;
        }
        let id = state.next as u32;
        state.next += 1;
        Some(id)
    }

    /// Returns `id` to the pool. Ids that were never issued or are already
    /// free are ignored and reported as `false`.
    pub fn free(&self, id: u32) -> bool {
        let mut state = self.inner.lock();
        if id < self.first || u64::from(id) >= state.next {
            return false;
        }
        state.free.insert(id)
    }

    /// How many distinct ids have ever been minted.
    pub fn minted(&self) -> u64 {
        self.inner.lock().next - u64::from(self.first)
    }

    /// Ids currently reserved.
    pub fn outstanding(&self) -> u64 {
        let state = self.inner.lock();
        state.next - u64::from(self.first) - state.free.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_free_cycle_does_not_grow() {
        let pool = IdPool::new(1, 100);
        for _ in 0..50 {
            let id = pool.reserve().unwrap();
            assert_eq!(id, 1);
            assert!(pool.free(id));
        }
        assert_eq!(pool.minted(), 1);
    }

    #[test]
    fn test_freed_id_is_reused_before_minting() {
        let pool = IdPool::new(1, 100);
        let a = pool.reserve().unwrap();
        let b = pool.reserve().unwrap();
        let _c = pool.reserve().unwrap();
        pool.free(b);
        pool.free(a);
        assert_eq!(pool.reserve(), Some(a));
        assert_eq!(pool.reserve(), Some(b));
        assert_eq!(pool.reserve(), Some(4));
        assert_eq!(pool.outstanding(), 4);
    }

    #[test]
    fn test_exhaustion_and_double_free() {
        let pool = IdPool::new(u32::MAX - 1, u32::MAX);
        assert_eq!(pool.reserve(), Some(u32::MAX - 1));
        assert_eq!(pool.reserve(), Some(u32::MAX));
        assert_eq!(pool.reserve(), None);
        assert!(pool.free(u32::MAX));
        assert!(!pool.free(u32::MAX));
        assert!(!pool.free(3));
        assert_eq!(pool.reserve(), Some(u32::MAX));
    }
}
