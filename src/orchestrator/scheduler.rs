//! Bucket partitioning.
//!
//! The scheduler splits the discovered units into at most `B` buckets, each
//! of which becomes one runner invocation. How units are spread is decided
//! by a [`Partitioner`]:
//!
//! | Partitioner | Description | Use Case |
//! |-------------|-------------|----------|
//! | [`LongestFirst`] | Heaviest unit to the lightest bucket | Default, balances by hint weights |
//! | [`RoundRobin`] | Unit `i` goes to bucket `i % B` | No hints, comparison runs |
//!
//! # Example
//!
//! ```
//! use bucketrun::framework::TestUnit;
//! use bucketrun::orchestrator::Scheduler;
//!
//! let units: Vec<TestUnit> = [10.0, 1.0, 1.0, 1.0, 1.0]
//!     .iter()
//!     .enumerate()
//!     .map(|(i, w)| TestUnit::new(format!("test_{}.py", i)).with_weight(*w))
//!     .collect();
//!
//! let buckets = Scheduler::new(2, 0).schedule(&units).unwrap();
//! assert_eq!(buckets.len(), 2);
//! assert_eq!(buckets[0].total_weight(), 10.0);
//! assert_eq!(buckets[1].total_weight(), 4.0);
//! ```

use crate::config::Strategy;
use crate::framework::TestUnit;

/// Errors produced while forming buckets.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A bucket was built without any units.
    #[error("Bucket {0} has no test units")]
    EmptyBucket(usize),
}

/// A non-empty group of units run by a single runner invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    index: usize,
    units: Vec<TestUnit>,
    threads: usize,
}

impl Bucket {
    /// Creates a bucket.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::EmptyBucket`] if `units` is empty.
    pub fn new(index: usize, units: Vec<TestUnit>, threads: usize) -> Result<Self, SchedulerError> {
        if units.is_empty() {
            return Err(SchedulerError::EmptyBucket(index));
        }
        Ok(Self {
            index,
            units,
            threads,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn units(&self) -> &[TestUnit] {
        &self.units
    }

    /// Internal parallelism requested from the runner (`-n`).
    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn total_weight(&self) -> f64 {
        self.units.iter().map(TestUnit::weight).sum()
    }

    /// Display name: the first unit, plus a count of the others.
    pub fn name(&self) -> String {
        let first = self.units[0].id();
        match self.units.len() {
            1 => first.to_string(),
            n => format!("{} (+{} more)", first, n - 1),
        }
    }
}

/// Splits units into groups.
pub trait Partitioner: Send + Sync {
    /// Splits `units` into at most `bucket_count` non-empty groups.
    fn partition(&self, units: &[TestUnit], bucket_count: usize) -> Vec<Vec<TestUnit>>;
}

/// Greedy longest-processing-time-first partitioning.
///
/// Units are visited by descending weight (discovery order among equal
/// weights) and each goes to the bucket with the lowest total weight,
/// preferring the bucket with fewer units and then the lower index on ties.
/// Inside a bucket, units keep their discovery order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LongestFirst;

impl Partitioner for LongestFirst {
    fn partition(&self, units: &[TestUnit], bucket_count: usize) -> Vec<Vec<TestUnit>> {
        let bins = bucket_count.max(1).min(units.len());
        if bins == 0 {
            return Vec::new();
        }

        let mut order: Vec<usize> = (0..units.len()).collect();
        order.sort_by(|&a, &b| units[b].weight().total_cmp(&units[a].weight()));

        let mut totals = vec![0.0_f64; bins];
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); bins];
        for idx in order {
            let target = (0..bins)
                .min_by(|&a, &b| {
                    totals[a]
                        .total_cmp(&totals[b])
                        .then(members[a].len().cmp(&members[b].len()))
                })
                .unwrap_or(0);
            totals[target] += units[idx].weight();
            members[target].push(idx);
        }

        members
            .into_iter()
            .map(|mut idxs| {
                idxs.sort_unstable();
                idxs.into_iter().map(|i| units[i].clone()).collect()
            })
            .collect()
    }
}

/// Positional round-robin partitioning, ignoring weights.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl Partitioner for RoundRobin {
    fn partition(&self, units: &[TestUnit], bucket_count: usize) -> Vec<Vec<TestUnit>> {
        let bins = bucket_count.max(1).min(units.len());
        if bins == 0 {
            return Vec::new();
        }

        let mut batches: Vec<Vec<TestUnit>> = vec![Vec::new(); bins];
        for (i, unit) in units.iter().enumerate() {
            batches[i % bins].push(unit.clone());
        }
        batches
    }
}

/// Returns the partitioner for a configured strategy.
pub fn partitioner_for(strategy: Strategy) -> Box<dyn Partitioner> {
    match strategy {
        Strategy::LongestFirst => Box::new(LongestFirst),
        Strategy::RoundRobin => Box::new(RoundRobin),
    }
}

/// Distributes units across parallel buckets.
pub struct Scheduler {
    bucket_count: usize,
    threads: usize,
    partitioner: Box<dyn Partitioner>,
}

impl Scheduler {
    /// Creates a scheduler using [`LongestFirst`].
    ///
    /// `bucket_count` below 1 is clamped to 1.
    pub fn new(bucket_count: usize, threads: usize) -> Self {
        Self {
            bucket_count: bucket_count.max(1),
            threads,
            partitioner: Box::new(LongestFirst),
        }
    }

    /// Replaces the partitioning strategy.
    pub fn with_partitioner(mut self, partitioner: Box<dyn Partitioner>) -> Self {
        self.partitioner = partitioner;
        self
    }

    /// Forms `min(bucket_count, units.len())` non-empty buckets.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::EmptyBucket`] if the partitioner produced
    /// an empty group.
    pub fn schedule(&self, units: &[TestUnit]) -> Result<Vec<Bucket>, SchedulerError> {
        self.partitioner
            .partition(units, self.bucket_count)
            .into_iter()
            .enumerate()
            .map(|(index, group)| Bucket::new(index, group, self.threads))
            .collect()
    }
}
