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

#![doc = include_str!("../README.md")]

/// Packing of shuffle partitions into contiguous ranges.
pub mod coalesce;
/// Configuration options of adaptive query execution.
pub mod config;
/// Error types and result definitions.
pub mod error;
/// Physical plan nodes reading shuffle query stages.
pub mod execution_plans;
/// Extension traits for DataFusion session configuration.
pub mod extension;
/// Physical optimizer rules.
pub mod optimizer_rule;
/// Map output statistics reported by finished shuffle stages.
pub mod statistics;

#[cfg(test)]
mod test_utils;

pub use coalesce::{PartitionRange, coalesce_partitions};
pub use config::{AqeConfig, CoalesceOptions};
pub use execution_plans::{CoalescedShuffleReaderExec, ShuffleQueryStageExec};
pub use extension::SessionConfigExt;
pub use optimizer_rule::CoalesceShufflePartitionsRule;
pub use statistics::{MapOutputStatistics, ShuffleStageResult};
