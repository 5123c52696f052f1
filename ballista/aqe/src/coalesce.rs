// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Computes contiguous ranges of shuffle partitions to be read together.
//!
//! Given map output statistics of one or more shuffle stages which are
//! consumed by the same operator, upstream partitions are packed, left to
//! right, into ranges whose combined size stays within a target size.
//! Ranges never reorder partitions and never span a partition excluded
//! by skew handling.

use crate::statistics::MapOutputStatistics;
use datafusion::common::internal_err;
use datafusion::error::Result;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// lower bound of the effective target size, guarantees progress
/// for an empty shuffle output
const MIN_TARGET_PARTITION_SIZE: u64 = 16;

/// Half open range `[start, end)` of upstream partition indices
/// read by a single coalesced partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionRange {
    pub start: usize,
    pub end: usize,
}

impl PartitionRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(end > start, "partition range can not be empty");
        Self { start, end }
    }

    /// number of upstream partitions covered
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, partition: usize) -> bool {
        partition >= self.start && partition < self.end
    }

    pub fn partitions(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

impl fmt::Display for PartitionRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Effective target size of a coalesced partition.
///
/// The advisory `target_partition_size` is tightened so that at least
/// `min_num_partitions` partitions are produced, but never below
/// [MIN_TARGET_PARTITION_SIZE].
pub fn effective_target_size(
    total_bytes: u64,
    min_num_partitions: usize,
    target_partition_size: u64,
) -> u64 {
    let max_partition_size = total_bytes
        .div_ceil(min_num_partitions.max(1) as u64)
        .max(MIN_TARGET_PARTITION_SIZE);

    target_partition_size.min(max_partition_size)
}

/// Packs upstream partitions into contiguous ranges.
///
/// `statistics` holds one entry per shuffle stage consumed together,
/// `None` marks a stage which produced no partitions and is ignored.
/// All present entries have to report the same number of partitions.
///
/// Returns ranges in ascending order. Every partition not in `excluded`
/// belongs to exactly one range. A range is closed when the next
/// partition would push it over the effective target size, or when an
/// excluded partition interrupts the sequence. A single partition larger
/// than the target is never split. If every partition is excluded the
/// result is empty.
pub fn coalesce_partitions(
    statistics: &[Option<MapOutputStatistics>],
    excluded: &BTreeSet<usize>,
    min_num_partitions: usize,
    target_partition_size: u64,
) -> Result<Vec<PartitionRange>> {
    if min_num_partitions == 0 {
        return internal_err!("minimum number of coalesced partitions has to be positive");
    }

    let statistics = statistics.iter().flatten().collect::<Vec<_>>();
    let num_partitions = match statistics.first() {
        Some(stats) => stats.num_partitions(),
        None => return Ok(vec![]),
    };
    if let Some(stats) = statistics
        .iter()
        .find(|s| s.num_partitions() != num_partitions)
    {
        return internal_err!(
            "stage {} reports {} partitions, expected {}",
            stats.stage_id(),
            stats.num_partitions(),
            num_partitions
        );
    }

    let total_bytes = statistics.iter().map(|s| s.total_bytes()).sum::<u64>();
    let target_size =
        effective_target_size(total_bytes, min_num_partitions, target_partition_size);

    debug!(
        "coalescing {num_partitions} partitions of {} stage(s), total bytes: {total_bytes}, \
        advisory target size: {target_partition_size}, effective target size: {target_size}",
        statistics.len()
    );

    let partition_size = |partition: usize| -> u64 {
        statistics
            .iter()
            .map(|s| s.bytes_by_partition()[partition])
            .sum()
    };

    let mut ranges = vec![];
    // (start, last included partition, accumulated size)
    let mut current: Option<(usize, usize, u64)> = None;

    for partition in (0..num_partitions).filter(|p| !excluded.contains(p)) {
        let size = partition_size(partition);
        current = match current {
            Some((start, last, current_size))
                if last + 1 == partition && current_size + size <= target_size =>
            {
                Some((start, partition, current_size + size))
            }
            Some((start, last, _)) => {
                ranges.push(PartitionRange::new(start, last + 1));
                Some((partition, partition, size))
            }
            None => Some((partition, partition, size)),
        };
    }

    if let Some((start, last, _)) = current {
        ranges.push(PartitionRange::new(start, last + 1));
    }

    info!(
        "coalesced {num_partitions} shuffle partitions ({} excluded) into {} partitions, target size: {target_size}",
        excluded.iter().filter(|p| **p < num_partitions).count(),
        ranges.len()
    );

    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn stats(stage_id: usize, bytes: Vec<u64>) -> Option<MapOutputStatistics> {
        Some(MapOutputStatistics::new(stage_id, bytes))
    }

    fn ranges(bounds: &[(usize, usize)]) -> Vec<PartitionRange> {
        bounds
            .iter()
            .map(|(start, end)| PartitionRange::new(*start, *end))
            .collect()
    }

    /// checks properties every coalescing result has to satisfy
    fn assert_valid(
        result: &[PartitionRange],
        statistics: &[Option<MapOutputStatistics>],
        excluded: &BTreeSet<usize>,
        target_size: u64,
    ) {
        let num_partitions = statistics
            .iter()
            .flatten()
            .map(|s| s.num_partitions())
            .next()
            .unwrap_or_default();

        let covered = result.iter().flat_map(|r| r.partitions()).collect::<Vec<_>>();
        let included = (0..num_partitions)
            .filter(|p| !excluded.contains(p))
            .collect::<Vec<_>>();
        assert_eq!(included, covered, "ranges have to cover included partitions");

        for range in result {
            assert!(!range.is_empty());
            let size = statistics
                .iter()
                .flatten()
                .map(|s| s.bytes_in_range(range))
                .sum::<u64>();
            assert!(
                size <= target_size || range.len() == 1,
                "range {range} of {size} bytes exceeds target {target_size}"
            );
        }
    }

    #[test]
    fn should_coalesce_two_shuffles() -> Result<()> {
        let statistics = vec![
            stats(0, vec![100 * MIB, 20 * MIB, 100 * MIB, 10 * MIB, 30 * MIB]),
            stats(1, vec![10 * MIB, 10 * MIB, 70 * MIB, 5 * MIB, 5 * MIB]),
        ];
        let excluded = BTreeSet::new();

        let result = coalesce_partitions(&statistics, &excluded, 1, 128 * MIB)?;

        assert_eq!(ranges(&[(0, 1), (1, 2), (2, 3), (3, 5)]), result);
        let sizes = result
            .iter()
            .map(|r| {
                statistics
                    .iter()
                    .flatten()
                    .map(|s| s.bytes_in_range(r))
                    .sum::<u64>()
                    / MIB
            })
            .collect::<Vec<_>>();
        assert_eq!(vec![110, 30, 170, 50], sizes);
        assert_valid(&result, &statistics, &excluded, 128 * MIB);
        Ok(())
    }

    #[test]
    fn should_coalesce_single_shuffle() -> Result<()> {
        let statistics = vec![stats(0, vec![10, 0, 20, 0, 30, 25, 5])];

        let result = coalesce_partitions(&statistics, &BTreeSet::new(), 1, 30)?;
        // empty partitions are absorbed by the open range
        assert_eq!(ranges(&[(0, 4), (4, 5), (5, 7)]), result);

        let result = coalesce_partitions(&statistics, &BTreeSet::new(), 1, 1000)?;
        assert_eq!(ranges(&[(0, 7)]), result);
        Ok(())
    }

    #[test]
    fn should_never_span_excluded_partition() -> Result<()> {
        let statistics = vec![stats(0, vec![10, 10, 1000, 10, 10])];
        let excluded = BTreeSet::from([2]);

        let result = coalesce_partitions(&statistics, &excluded, 1, 1000)?;

        assert_eq!(ranges(&[(0, 2), (3, 5)]), result);
        assert_valid(&result, &statistics, &excluded, 1000);
        Ok(())
    }

    #[test]
    fn should_handle_excluded_edges() -> Result<()> {
        let statistics = vec![stats(0, vec![1, 1, 1, 1, 1, 1])];
        let excluded = BTreeSet::from([0, 3, 5]);

        let result = coalesce_partitions(&statistics, &excluded, 1, 1000)?;

        assert_eq!(ranges(&[(1, 3), (4, 5)]), result);
        Ok(())
    }

    #[test]
    fn should_produce_single_range_for_empty_output() -> Result<()> {
        let statistics = vec![stats(0, vec![0; 200]), stats(1, vec![0; 200])];

        let result = coalesce_partitions(&statistics, &BTreeSet::new(), 10, 64 * MIB)?;

        assert_eq!(ranges(&[(0, 200)]), result);
        Ok(())
    }

    #[test]
    fn should_respect_min_partitions() -> Result<()> {
        let statistics = vec![stats(0, vec![10; 10])];
        assert_eq!(25, effective_target_size(100, 4, 1000));

        let result = coalesce_partitions(&statistics, &BTreeSet::new(), 4, 1000)?;

        assert_eq!(ranges(&[(0, 2), (2, 4), (4, 6), (6, 8), (8, 10)]), result);
        assert_valid(&result, &statistics, &BTreeSet::new(), 25);
        Ok(())
    }

    #[test]
    fn should_keep_minimal_target_size() {
        assert_eq!(16, effective_target_size(0, 1, 64 * MIB));
        assert_eq!(16, effective_target_size(100, 50, 64 * MIB));
        assert_eq!(8, effective_target_size(100, 1, 8));
    }

    #[test]
    fn should_not_split_large_partition() -> Result<()> {
        let statistics = vec![stats(0, vec![5, 500, 5, 5])];

        let result = coalesce_partitions(&statistics, &BTreeSet::new(), 1, 100)?;

        assert_eq!(ranges(&[(0, 1), (1, 2), (2, 4)]), result);
        assert_valid(&result, &statistics, &BTreeSet::new(), 100);
        Ok(())
    }

    #[test]
    fn should_ignore_stages_without_partitions() -> Result<()> {
        let statistics = vec![None, stats(1, vec![10, 10, 10]), None];

        let result = coalesce_partitions(&statistics, &BTreeSet::new(), 1, 20)?;
        assert_eq!(ranges(&[(0, 2), (2, 3)]), result);

        let result = coalesce_partitions(&[None, None], &BTreeSet::new(), 1, 20)?;
        assert!(result.is_empty());
        Ok(())
    }

    #[test]
    fn should_return_no_ranges_when_all_excluded() -> Result<()> {
        let statistics = vec![stats(0, vec![10, 10])];

        let result = coalesce_partitions(&statistics, &BTreeSet::from([0, 1]), 1, 20)?;

        assert!(result.is_empty());
        Ok(())
    }

    #[test]
    fn should_reject_invalid_input() {
        let statistics = vec![stats(0, vec![10, 10]), stats(1, vec![10, 10, 10])];
        assert!(coalesce_partitions(&statistics, &BTreeSet::new(), 1, 20).is_err());

        let statistics = vec![stats(0, vec![10, 10])];
        assert!(coalesce_partitions(&statistics, &BTreeSet::new(), 0, 20).is_err());
    }

    #[test]
    fn should_satisfy_invariants_for_generated_statistics() -> Result<()> {
        // deterministic pseudo random sizes
        let mut seed = 42_u64;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            seed >> 33
        };

        for round in 0..50 {
            let num_partitions = 1 + (next() % 40) as usize;
            let statistics = (0..1 + round % 3)
                .map(|stage| stats(stage, (0..num_partitions).map(|_| next() % 200).collect()))
                .collect::<Vec<_>>();
            let excluded = (0..num_partitions)
                .filter(|_| next() % 7 == 0)
                .collect::<BTreeSet<_>>();
            if excluded.len() == num_partitions {
                continue;
            }
            let min_partitions = 1 + (next() % 5) as usize;
            let advisory = 50 + next() % 500;

            let total = statistics
                .iter()
                .flatten()
                .map(|s| s.total_bytes())
                .sum::<u64>();
            let target = effective_target_size(total, min_partitions, advisory);

            let result =
                coalesce_partitions(&statistics, &excluded, min_partitions, advisory)?;

            assert_valid(&result, &statistics, &excluded, target);
            for pair in result.windows(2) {
                assert!(pair[0].end <= pair[1].start);
            }
            for partition in excluded.iter() {
                assert!(result.iter().all(|r| !r.contains(*partition)));
            }
        }
        Ok(())
    }
}
