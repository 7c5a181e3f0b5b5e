use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Bounded recency set with FIFO eviction.
///
/// Remembers the last `capacity` distinct keys. Older keys fall out, so a
/// key may be accepted again once enough newer ones have passed.
#[derive(Debug)]
pub struct DedupQueue<K> {
    capacity: usize,
    order: VecDeque<K>,
    members: HashSet<K>,
}

impl<K: Eq + Hash + Clone> DedupQueue<K> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    pub fn has(&self, key: &K) -> bool {
        self.members.contains(key)
    }

    /// Records `key`. Returns `false` if it was already present.
    pub fn insert(&mut self, key: K) -> bool {
        if self.members.contains(&key) {
            return false;
        }

        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }

        self.members.insert(key.clone());
        self.order.push_back(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
