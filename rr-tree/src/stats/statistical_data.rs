use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A sorted histogram of integer buckets to accumulated counts.
///
/// Used for the deletion-split histogram (fan-out → number of deletions) and
/// for per-level group sizes. `update` accumulates, so the same bucket can be
/// hit many times.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatisticalData {
    data: BTreeMap<i64, i64>,
}

impl StatisticalData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to the count stored under `key`.
    pub fn update(&mut self, key: i64, delta: i64) {
        *self.data.entry(key).or_insert(0) += delta;
    }

    /// Merges every bucket of `other` into this histogram.
    pub fn add(&mut self, other: &StatisticalData) {
        for (&key, &value) in &other.data {
            self.update(key, value);
        }
    }

    pub fn get(&self, key: i64) -> Option<i64> {
        self.data.get(&key).copied()
    }

    pub fn contains_key(&self, key: i64) -> bool {
        self.data.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn reset(&mut self) {
        self.data.clear();
    }

    /// Buckets in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.data.iter().map(|(&k, &v)| (k, v))
    }

    /// Sum of `key * count` over all buckets.
    pub fn weighted_sum(&self) -> i64 {
        self.data.iter().map(|(k, v)| k * v).sum()
    }

    /// Sum of all counts.
    pub fn total(&self) -> i64 {
        self.data.values().sum()
    }
}

impl fmt::Display for StatisticalData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_empty() {
        let data = StatisticalData::new();
        assert!(data.is_empty());
        assert_eq!(data.len(), 0);
        assert_eq!(data.get(1), None);
        assert!(!data.contains_key(1));
    }

    #[test]
    fn test_update_accumulates() {
        let mut data = StatisticalData::new();
        data.update(2, 1);
        data.update(2, 3);
        data.update(-1, 5);

        assert_eq!(data.get(2), Some(4));
        assert_eq!(data.get(-1), Some(5));
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn test_iteration_is_sorted() {
        let mut data = StatisticalData::new();
        data.update(10, 1);
        data.update(1, 1);
        data.update(5, 1);
        let keys: Vec<i64> = data.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![1, 5, 10]);
    }

    #[test]
    fn test_add() {
        let mut a = StatisticalData::new();
        a.update(1, 2);
        a.update(3, 1);
        let mut b = StatisticalData::new();
        b.update(1, 1);
        b.update(4, 7);

        a.add(&b);
        assert_eq!(a.get(1), Some(3));
        assert_eq!(a.get(3), Some(1));
        assert_eq!(a.get(4), Some(7));
    }

    #[test]
    fn test_reset() {
        let mut data = StatisticalData::new();
        data.update(1, 1);
        data.reset();
        assert!(data.is_empty());
    }

    #[test]
    fn test_equality_and_hash() {
        let mut a = StatisticalData::new();
        let mut b = StatisticalData::new();
        a.update(1, 1);
        b.update(1, 1);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));

        b.update(2, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_weighted_sum_and_total() {
        let mut data = StatisticalData::new();
        data.update(0, 4);
        data.update(1, 3);
        data.update(2, 2);
        assert_eq!(data.weighted_sum(), 7);
        assert_eq!(data.total(), 9);
    }

    #[test]
    fn test_display() {
        let mut data = StatisticalData::new();
        assert_eq!(data.to_string(), "{}");
        data.update(2, 2);
        data.update(1, 5);
        assert_eq!(data.to_string(), "{1=5, 2=2}");
    }

    #[test]
    fn test_json_round_trip() {
        let mut data = StatisticalData::new();
        data.update(3, 9);
        let json = serde_json::to_string(&data).unwrap();
        let back: StatisticalData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
    }
}
