//! Mergeable quantile sketch with a deterministic rank-error bound.
//!
//! The sketch is a hierarchy of compactors. Level `h` buffers values that each
//! stand for `2^h` inputs. When a buffer reaches `capacity` it is sorted and
//! every other value (alternating the starting offset) moves up one level with
//! double weight. One compaction at level `h` moves the rank of any query by at
//! most `2^h`, and every compaction is added to [`QuantileSketch::rank_error_bound`],
//! so the bound is bookkeeping rather than an estimate. Merging two sketches
//! concatenates their levels and adds their bounds.
//!
//! A compaction consumes at least `capacity` values, so for `n` inputs the bound
//! never exceeds `n / k * (log2(n / k) + 1)`. [`capacity_for_accuracy`] picks
//! the smallest power-of-two capacity keeping that below `epsilon * n` for every
//! `n` up to `2^40`. Until a sketch has seen `capacity` values it is exact.

use crate::utils::constants::DEFAULT_RANK_ACCURACY;

/// Largest stream length (as a power of two) the accuracy guarantee covers.
pub const MAX_SUPPORTED_LOG2_COUNT: u32 = 40;

const MIN_CAPACITY: usize = 64;
const MAX_CAPACITY: usize = 1 << 20;

/// Smallest power-of-two capacity whose worst-case normalized rank error is at most `epsilon`.
pub fn capacity_for_accuracy(epsilon: f64) -> usize {
    let epsilon = if epsilon.is_finite() && epsilon > 0.0 {
        epsilon
    } else {
        DEFAULT_RANK_ACCURACY
    };

    let mut capacity = MIN_CAPACITY;
    while capacity < MAX_CAPACITY && worst_case_error(capacity) > epsilon {
        capacity *= 2;
    }
    capacity
}

/// Worst-case normalized rank error of a sketch of `capacity` over `2^40` values.
pub fn worst_case_error(capacity: usize) -> f64 {
    let log2_capacity = (capacity.max(2) as f64).log2();
    let levels = (MAX_SUPPORTED_LOG2_COUNT as f64 - log2_capacity).max(0.0) + 1.0;
    levels / capacity as f64
}

#[derive(Debug, Clone)]
pub struct QuantileSketch {
    capacity: usize,
    levels: Vec<Vec<f64>>,
    compactions: Vec<u64>,
    count: u64,
    rank_error: u64,
    min: f64,
    max: f64,
}

impl QuantileSketch {
    pub fn new() -> Self {
        Self::with_accuracy(DEFAULT_RANK_ACCURACY)
    }

    pub fn with_accuracy(epsilon: f64) -> Self {
        Self::with_capacity(capacity_for_accuracy(epsilon))
    }

    /// Capacity is rounded up to an even number of at least 2.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        let capacity = capacity + capacity % 2;
        Self {
            capacity,
            levels: vec![Vec::new()],
            compactions: vec![0],
            count: 0,
            rank_error: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of values fed into this sketch (including merged ones).
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of values currently held in memory.
    pub fn retained(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn min(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.max)
    }

    /// Maximum number of positions any estimate's rank can be off by.
    pub fn rank_error_bound(&self) -> u64 {
        self.rank_error
    }

    /// [`rank_error_bound`](Self::rank_error_bound) as a fraction of the count.
    pub fn normalized_rank_error(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.rank_error as f64 / self.count as f64
        }
    }

    /// Add one value. NaN is ignored.
    pub fn insert(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }

        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.levels[0].push(value);
        if self.levels[0].len() >= self.capacity {
            self.compact_from(0);
        }
    }

    /// Fold `other` into this sketch. The result answers queries over the union
    /// of both inputs with the sum of both error bounds plus any new compactions.
    pub fn merge(&mut self, other: &QuantileSketch) {
        if other.is_empty() {
            return;
        }

        while self.levels.len() < other.levels.len() {
            self.levels.push(Vec::new());
            self.compactions.push(0);
        }
        for (mine, theirs) in self.levels.iter_mut().zip(other.levels.iter()) {
            mine.extend_from_slice(theirs);
        }

        self.count += other.count;
        self.rank_error += other.rank_error;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);

        let mut level = 0;
        while level < self.levels.len() {
            if self.levels[level].len() >= self.capacity {
                self.compact_from(level);
            }
            level += 1;
        }
    }

    fn compact_from(&mut self, start: usize) {
        let mut level = start;
        while level < self.levels.len() && self.levels[level].len() >= self.capacity {
            if level + 1 == self.levels.len() {
                self.levels.push(Vec::new());
                self.compactions.push(0);
            }

            let mut buffer = std::mem::take(&mut self.levels[level]);
            buffer.sort_unstable_by(f64::total_cmp);
            let leftover = if buffer.len() % 2 == 1 { buffer.pop() } else { None };

            let offset = (self.compactions[level] % 2) as usize;
            let promoted: Vec<f64> = buffer.iter().skip(offset).step_by(2).copied().collect();

            self.compactions[level] += 1;
            self.rank_error += 1u64 << level;

            buffer.clear();
            buffer.extend(leftover);
            self.levels[level] = buffer;
            self.levels[level + 1].extend(promoted);

            level += 1;
        }
    }

    /// Estimate the `q` quantile (`0.0..=1.0`), linearly interpolating between
    /// the retained values either side of position `q * (n - 1)`.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.is_empty() || q.is_nan() {
            return None;
        }
        let q = q.clamp(0.0, 1.0);
        if q == 0.0 {
            return Some(self.min);
        }
        if q == 1.0 {
            return Some(self.max);
        }

        let mut weighted: Vec<(f64, u64)> = Vec::with_capacity(self.retained());
        for (level, values) in self.levels.iter().enumerate() {
            let weight = 1u64 << level;
            weighted.extend(values.iter().map(|v| (*v, weight)));
        }
        weighted.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

        let position = q * (self.count - 1) as f64;
        let lower = position.floor() as u64;
        let fraction = position - lower as f64;

        let lower_value = value_at(&weighted, lower)?;
        let upper_value = if fraction > 0.0 {
            value_at(&weighted, lower + 1).unwrap_or(lower_value)
        } else {
            lower_value
        };

        let estimate = lower_value + fraction * (upper_value - lower_value);
        Some(estimate.clamp(self.min, self.max))
    }
}

impl Default for QuantileSketch {
    fn default() -> Self {
        Self::new()
    }
}

/// Value at zero-based `position` of the sorted, weight-expanded sequence.
fn value_at(weighted: &[(f64, u64)], position: u64) -> Option<f64> {
    let mut seen = 0u64;
    for (value, weight) in weighted {
        seen += weight;
        if position < seen {
            return Some(*value);
        }
    }
    weighted.last().map(|(value, _)| *value)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random values in `[0, 1000)`.
    fn lcg_values(n: usize, seed: u64) -> Vec<f64> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                (state >> 11) as f64 / (1u64 << 53) as f64 * 1000.0
            })
            .collect()
    }

    fn exact_quantile(values: &[f64], q: f64) -> f64 {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let position = q * (sorted.len() - 1) as f64;
        let lower = position.floor() as usize;
        let upper = (lower + 1).min(sorted.len() - 1);
        sorted[lower] + (position - lower as f64) * (sorted[upper] - sorted[lower])
    }

    fn sketch_of(values: &[f64], capacity: usize) -> QuantileSketch {
        let mut sketch = QuantileSketch::with_capacity(capacity);
        for value in values {
            sketch.insert(*value);
        }
        sketch
    }

    fn analytic_bound(n: u64, capacity: usize) -> f64 {
        let ratio = (n as f64 / capacity as f64).max(1.0);
        (ratio.log2() + 1.0) / capacity as f64
    }

    /// The estimate must sit between the true values `rank_error_bound` positions either side.
    fn assert_within_rank_error(sketch: &QuantileSketch, values: &[f64], q: f64) {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let estimate = sketch.quantile(q).unwrap();
        let slack = sketch.rank_error_bound() as usize + 1;
        let position = (q * (n - 1) as f64).floor() as usize;
        let low = sorted[position.saturating_sub(slack)];
        let high = sorted[(position + 1 + slack).min(n - 1)];

        assert!(
            low <= estimate && estimate <= high,
            "estimate {} outside [{}, {}] (q={}, bound={})",
            estimate,
            low,
            high,
            q,
            sketch.rank_error_bound()
        );
    }

    #[test]
    fn test_capacity_for_default_accuracy() {
        assert_eq!(capacity_for_accuracy(0.01), 4096);
        assert!(worst_case_error(4096) <= 0.01);
        assert!(worst_case_error(2048) > 0.01);
        assert_eq!(capacity_for_accuracy(0.5), 128);
        assert_eq!(capacity_for_accuracy(f64::NAN), 4096);
    }

    #[test]
    fn test_two_values() {
        let sketch = sketch_of(&[10.0, 20.0], 4096);

        assert!((sketch.quantile(0.9).unwrap() - 19.0).abs() < 1e-9);
        assert_eq!(sketch.quantile(0.0), Some(10.0));
        assert_eq!(sketch.quantile(1.0), Some(20.0));
        assert!((sketch.quantile(0.5).unwrap() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_and_single() {
        let mut sketch = QuantileSketch::new();
        assert_eq!(sketch.quantile(0.9), None);
        assert_eq!(sketch.min(), None);

        sketch.insert(42.0);
        sketch.insert(f64::NAN);
        assert_eq!(sketch.count(), 1);
        assert_eq!(sketch.quantile(0.9), Some(42.0));
        assert_eq!(sketch.quantile(f64::NAN), None);
    }

    #[test]
    fn test_exact_below_capacity() {
        let values = lcg_values(3000, 7);
        let sketch = sketch_of(&values, 4096);

        assert_eq!(sketch.rank_error_bound(), 0);
        assert_eq!(sketch.retained(), 3000);
        for q in [0.1, 0.5, 0.9, 0.99] {
            assert!((sketch.quantile(q).unwrap() - exact_quantile(&values, q)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rank_error_within_bound_for_many_shapes() {
        let n = 20_000;
        let random = lcg_values(n, 42);
        let mut ascending = random.clone();
        ascending.sort_by(f64::total_cmp);
        let descending: Vec<f64> = ascending.iter().rev().copied().collect();
        let constant = vec![12.5; n];
        let bimodal: Vec<f64> = (0..n)
            .map(|i| if i % 10 == 0 { 900.0 + (i % 7) as f64 } else { (i % 13) as f64 })
            .collect();
        let heavy_tail: Vec<f64> = random.iter().map(|v| (v / 1000.0).powi(8) * 1000.0).collect();

        for values in [&random, &ascending, &descending, &constant, &bimodal, &heavy_tail] {
            let sketch = sketch_of(values, 128);

            assert_eq!(sketch.count(), n as u64);
            assert!(sketch.rank_error_bound() > 0);
            assert!(sketch.normalized_rank_error() <= analytic_bound(n as u64, 128));
            assert!(sketch.retained() < n / 4);
            for q in [0.05, 0.5, 0.9, 0.99] {
                assert_within_rank_error(&sketch, values, q);
            }
        }
    }

    #[test]
    fn test_merge_law() {
        let values = lcg_values(30_000, 99);
        let (left, right) = values.split_at(11_111);

        let mut merged = sketch_of(left, 256);
        merged.merge(&sketch_of(right, 256));

        assert_eq!(merged.count(), values.len() as u64);
        assert!(merged.normalized_rank_error() <= analytic_bound(values.len() as u64, 256));
        assert_eq!(merged.min(), values.iter().copied().reduce(f64::min));
        assert_eq!(merged.max(), values.iter().copied().reduce(f64::max));
        for q in [0.5, 0.9] {
            assert_within_rank_error(&merged, &values, q);
        }
    }

    #[test]
    fn test_merge_many_shards() {
        let values = lcg_values(40_000, 5);
        let mut merged = QuantileSketch::with_capacity(256);
        for shard in values.chunks(997) {
            merged.merge(&sketch_of(shard, 256));
        }

        assert_eq!(merged.count(), 40_000);
        assert!(merged.normalized_rank_error() <= analytic_bound(40_000, 256));
        assert_within_rank_error(&merged, &values, 0.9);
    }

    #[test]
    fn test_small_sketch_allocates_on_demand() {
        let mut sketch = QuantileSketch::new();
        assert_eq!(sketch.levels[0].capacity(), 0);

        sketch.insert(4.0);
        assert!(sketch.levels[0].capacity() < sketch.capacity());
    }

    #[test]
    fn test_merge_with_empty() {
        let mut sketch = sketch_of(&[1.0, 2.0, 3.0], 64);
        sketch.merge(&QuantileSketch::with_capacity(64));
        assert_eq!(sketch.count(), 3);

        let mut empty = QuantileSketch::with_capacity(64);
        empty.merge(&sketch);
        assert_eq!(empty.quantile(0.5), Some(2.0));
    }

    #[test]
    fn test_default_accuracy_on_large_stream() {
        let values = lcg_values(100_000, 1234);
        let sketch = sketch_of(&values, capacity_for_accuracy(0.01));

        assert!(sketch.normalized_rank_error() <= 0.01);
        assert_within_rank_error(&sketch, &values, 0.9);
    }
}
