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

//! Map output statistics reported by completed shuffle stages.

use crate::coalesce::PartitionRange;
use datafusion::arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of every output partition written by one shuffle map stage.
///
/// Index of `bytes_by_partition` is the upstream (pre-coalesce)
/// partition id. Statistics are immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapOutputStatistics {
    stage_id: usize,
    bytes_by_partition: Vec<u64>,
}

impl MapOutputStatistics {
    pub fn new(stage_id: usize, bytes_by_partition: Vec<u64>) -> Self {
        Self {
            stage_id,
            bytes_by_partition,
        }
    }

    /// Collects statistics from in-memory shuffle output,
    /// one vector of batches per output partition.
    pub fn from_batches(stage_id: usize, partitions: &[Vec<RecordBatch>]) -> Self {
        let bytes_by_partition = partitions
            .iter()
            .map(|batches| {
                batches
                    .iter()
                    .map(|b| b.get_array_memory_size() as u64)
                    .sum()
            })
            .collect();

        Self::new(stage_id, bytes_by_partition)
    }

    pub fn stage_id(&self) -> usize {
        self.stage_id
    }

    pub fn bytes_by_partition(&self) -> &[u64] {
        &self.bytes_by_partition
    }

    /// number of upstream partitions
    pub fn num_partitions(&self) -> usize {
        self.bytes_by_partition.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_by_partition.iter().sum()
    }

    /// Bytes read by a coalesced partition covering `range`.
    /// Indices past the end of the statistics are ignored.
    pub fn bytes_in_range(&self, range: &PartitionRange) -> u64 {
        self.bytes_by_partition
            .iter()
            .skip(range.start)
            .take(range.len())
            .sum()
    }
}

impl fmt::Display for MapOutputStatistics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "stage_id={}, partitions={}, total_bytes={}",
            self.stage_id,
            self.num_partitions(),
            self.total_bytes()
        )
    }
}

/// Outcome of a completed shuffle map stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShuffleStageResult {
    /// Input of the map stage had no partitions, hence no map output
    /// statistics exist. Such stages take no part in coalescing.
    NoPartitions,
    /// Map stage finished and reported its output sizes
    Completed(MapOutputStatistics),
}

impl ShuffleStageResult {
    pub fn statistics(&self) -> Option<&MapOutputStatistics> {
        match self {
            ShuffleStageResult::NoPartitions => None,
            ShuffleStageResult::Completed(stats) => Some(stats),
        }
    }
}

impl From<MapOutputStatistics> for ShuffleStageResult {
    fn from(stats: MapOutputStatistics) -> Self {
        ShuffleStageResult::Completed(stats)
    }
}
