//! ============================================================================
//! Bounded Sequence - append-only list with FIFO eviction
//! ============================================================================
//! Used for conversations, trips and common destinations. The cap is part of
//! the type, so it is enforced on every write and on deserialization.
//! ============================================================================

use std::collections::{vec_deque, VecDeque};

use serde::{Deserialize, Deserializer, Serialize};

/// Append-only sequence holding at most `CAP` items; the oldest item is
/// evicted first
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BoundedVec<T, const CAP: usize> {
    items: VecDeque<T>,
}

impl<T, const CAP: usize> BoundedVec<T, CAP> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::with_capacity(CAP),
        }
    }

    pub const fn capacity(&self) -> usize {
        CAP
    }

    /// Append an item, returning the evicted one if the cap was hit
    pub fn push(&mut self, item: T) -> Option<T> {
        self.items.push_back(item);
        if self.items.len() > CAP {
            self.items.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.items.iter()
    }

    pub fn first(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }
}

impl<T: Clone, const CAP: usize> BoundedVec<T, CAP> {
    /// The newest `n` items in insertion order
    pub fn tail(&self, n: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T: PartialEq, const CAP: usize> BoundedVec<T, CAP> {
    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    /// Append only if absent. Present items keep their position.
    /// Returns whether the sequence changed.
    pub fn push_unique(&mut self, item: T) -> bool {
        if self.contains(&item) {
            return false;
        }
        self.push(item);
        true
    }
}

impl<T, const CAP: usize> Default for BoundedVec<T, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const CAP: usize> FromIterator<T> for BoundedVec<T, CAP> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut bounded = Self::new();
        for item in iter {
            bounded.push(item);
        }
        bounded
    }
}

impl<'de, T: Deserialize<'de>, const CAP: usize> Deserialize<'de> for BoundedVec<T, CAP> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items = Vec::<T>::deserialize(deserializer)?;
        Ok(items.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_evicts_oldest_first() {
        let mut seq: BoundedVec<u32, 3> = BoundedVec::new();
        assert_eq!(seq.push(1), None);
        assert_eq!(seq.push(2), None);
        assert_eq!(seq.push(3), None);
        assert_eq!(seq.push(4), Some(1));
        assert_eq!(seq.to_vec(), vec![2, 3, 4]);
        assert_eq!(seq.len(), seq.capacity());
    }

    #[test]
    fn test_push_unique_keeps_order() {
        let mut seq: BoundedVec<&str, 3> = BoundedVec::new();
        assert!(seq.push_unique("Paris"));
        assert!(seq.push_unique("Tokyo"));
        assert!(!seq.push_unique("Paris"));
        assert_eq!(seq.to_vec(), vec!["Paris", "Tokyo"]);
    }

    #[test]
    fn test_tail_shorter_than_len() {
        let seq: BoundedVec<u32, 10> = (1..=4).collect();
        assert_eq!(seq.tail(2), vec![3, 4]);
        assert_eq!(seq.tail(10), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_deserialize_trims_oversized_input() {
        let seq: BoundedVec<u32, 2> = serde_json::from_str("[1,2,3,4]").unwrap();
        assert_eq!(seq.to_vec(), vec![3, 4]);
        assert_eq!(serde_json::to_string(&seq).unwrap(), "[3,4]");
    }
}
