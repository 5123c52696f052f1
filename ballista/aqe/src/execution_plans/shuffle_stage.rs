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

//! Query stage leaf backed by materialized shuffle output.

use crate::coalesce::PartitionRange;
use crate::statistics::{MapOutputStatistics, ShuffleStageResult};
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::common::internal_err;
use datafusion::common::stats::Precision;
use datafusion::datasource::memory::MemorySourceConfig;
use datafusion::error::{DataFusionError, Result};
use datafusion::execution::{SendableRecordBatchStream, TaskContext};
use datafusion::physical_expr::EquivalenceProperties;
use datafusion::physical_plan::execution_plan::{Boundedness, EmissionType};
use datafusion::physical_plan::{
    DisplayAs, DisplayFormatType, ExecutionPlan, Partitioning, PlanProperties,
    Statistics,
};
use log::trace;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Physical access to the output of a shuffle map stage.
///
/// Implemented by the storage layer which knows where shuffle files live.
pub trait ShuffleOutput: Debug + Send + Sync {
    /// Creates a plan reading upstream partitions of this shuffle.
    /// Output partition `i` of the returned plan reads every upstream
    /// partition in `partition_ranges[i]`, in order.
    fn create_reader(
        &self,
        schema: SchemaRef,
        partition_ranges: &[PartitionRange],
    ) -> Result<Arc<dyn ExecutionPlan>>;
}

/// [ShuffleOutput] kept in memory, one vector of batches per
/// upstream partition
#[derive(Debug, Clone)]
pub struct MemoryShuffleOutput {
    partitions: Vec<Vec<RecordBatch>>,
}

impl MemoryShuffleOutput {
    pub fn new(partitions: Vec<Vec<RecordBatch>>) -> Self {
        Self { partitions }
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// map output statistics as a shuffle writer would report them
    pub fn statistics(&self, stage_id: usize) -> MapOutputStatistics {
        MapOutputStatistics::from_batches(stage_id, &self.partitions)
    }
}

impl ShuffleOutput for MemoryShuffleOutput {
    fn create_reader(
        &self,
        schema: SchemaRef,
        partition_ranges: &[PartitionRange],
    ) -> Result<Arc<dyn ExecutionPlan>> {
        let mut partitions = Vec::with_capacity(partition_ranges.len());
        for range in partition_ranges {
            if range.is_empty() || range.end > self.partitions.len() {
                return internal_err!(
                    "Invalid partition range {}, shuffle has {} partitions",
                    range,
                    self.partitions.len()
                );
            }
            partitions.push(
                self.partitions[range.partitions()]
                    .iter()
                    .flatten()
                    .cloned()
                    .collect::<Vec<_>>(),
            );
        }

        let exec: Arc<dyn ExecutionPlan> =
            MemorySourceConfig::try_new_exec(&partitions, schema, None)?;
        Ok(exec)
    }
}

/// Leaf of a query stage plan representing a shuffle map stage.
///
/// Once the map stage completes its result is attached with
/// [ShuffleQueryStageExec::resolve]. Result is shared between copies of
/// this node, so it is visible regardless of which copy is resolved.
#[derive(Debug)]
pub struct ShuffleQueryStageExec {
    stage_id: usize,
    schema: SchemaRef,
    output: Arc<dyn ShuffleOutput>,
    properties: PlanProperties,
    result: Arc<Mutex<Option<ShuffleStageResult>>>,
    /// false when partition count has been requested explicitly,
    /// by a user repartition for example
    can_change_num_partitions: bool,
}

impl ShuffleQueryStageExec {
    pub fn new(
        stage_id: usize,
        schema: SchemaRef,
        output: Arc<dyn ShuffleOutput>,
        partitioning: Partitioning,
    ) -> Self {
        let properties = PlanProperties::new(
            EquivalenceProperties::new(schema.clone()),
            partitioning,
            EmissionType::Incremental,
            Boundedness::Bounded,
        );

        Self {
            stage_id,
            schema,
            output,
            properties,
            result: Arc::new(Mutex::new(None)),
            can_change_num_partitions: true,
        }
    }

    pub fn with_can_change_num_partitions(mut self, can_change: bool) -> Self {
        self.can_change_num_partitions = can_change;
        self
    }

    pub fn stage_id(&self) -> usize {
        self.stage_id
    }

    pub fn can_change_num_partitions(&self) -> bool {
        self.can_change_num_partitions
    }

    pub fn num_partitions(&self) -> usize {
        self.properties.partitioning.partition_count()
    }

    /// Attaches result of the finished map stage
    pub fn resolve(&self, result: ShuffleStageResult) {
        self.result.lock().replace(result);
    }

    pub fn is_resolved(&self) -> bool {
        self.result.lock().is_some()
    }

    /// `None` until the map stage has finished
    pub fn result(&self) -> Option<ShuffleStageResult> {
        self.result.lock().clone()
    }

    pub fn map_output_statistics(&self) -> Option<MapOutputStatistics> {
        self.result
            .lock()
            .as_ref()
            .and_then(|r| r.statistics().cloned())
    }

    /// Creates a physical read of this stage's output where every
    /// output partition covers one of `partition_ranges`.
    ///
    /// A stage which produced no partitions reads as empty,
    /// whatever ranges it is asked for.
    pub fn create_shuffle_reader(
        &self,
        partition_ranges: &[PartitionRange],
    ) -> Result<Arc<dyn ExecutionPlan>> {
        if matches!(self.result(), Some(ShuffleStageResult::NoPartitions)) {
            trace!(
                "shuffle query stage {} has no partitions, creating empty reader",
                self.stage_id
            );
            let empty: Arc<dyn ExecutionPlan> = MemorySourceConfig::try_new_exec(
                &vec![vec![]; partition_ranges.len()],
                self.schema.clone(),
                None,
            )?;
            return Ok(empty);
        }

        self.output.create_reader(self.schema.clone(), partition_ranges)
    }
}

impl DisplayAs for ShuffleQueryStageExec {
    fn fmt_as(
        &self,
        t: DisplayFormatType,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        match t {
            DisplayFormatType::Default | DisplayFormatType::Verbose => {
                write!(
                    f,
                    "ShuffleQueryStageExec: stage_id={}, partitions={}, resolved={}",
                    self.stage_id,
                    self.num_partitions(),
                    self.is_resolved()
                )
            }
            DisplayFormatType::TreeRender => {
                writeln!(f, "stage_id={}", self.stage_id)?;
                writeln!(f, "partitions={}", self.num_partitions())?;
                writeln!(f, "resolved={}", self.is_resolved())
            }
        }
    }
}

impl ExecutionPlan for ShuffleQueryStageExec {
    fn name(&self) -> &str {
        "ShuffleQueryStageExec"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn properties(&self) -> &PlanProperties {
        &self.properties
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![]
    }

    fn with_new_children(
        self: Arc<Self>,
        children: Vec<Arc<dyn ExecutionPlan>>,
    ) -> Result<Arc<dyn ExecutionPlan>> {
        if children.is_empty() {
            Ok(self)
        } else {
            Err(DataFusionError::Plan(
                "ShuffleQueryStageExec does not support children plans".to_owned(),
            ))
        }
    }

    fn execute(
        &self,
        partition: usize,
        context: Arc<TaskContext>,
    ) -> Result<SendableRecordBatchStream> {
        if partition >= self.num_partitions() {
            return internal_err!(
                "Invalid partition index: {}, the partition count is {}",
                partition,
                self.num_partitions()
            );
        }

        self.create_shuffle_reader(&[PartitionRange::new(partition, partition + 1)])?
            .execute(0, context)
    }

    fn partition_statistics(&self, partition: Option<usize>) -> Result<Statistics> {
        let mut statistics = Statistics::new_unknown(&self.schema);
        let Some(map_output) = self.map_output_statistics() else {
            return Ok(statistics);
        };

        let total_byte_size = match partition {
            Some(idx) => match map_output.bytes_by_partition().get(idx) {
                Some(bytes) => *bytes,
                None => {
                    return internal_err!(
                        "Invalid partition index: {}, the partition count is {}",
                        idx,
                        map_output.num_partitions()
                    );
                }
            },
            None => map_output.total_bytes(),
        };
        trace!(
            "shuffle query stage {} partition {:?} total bytes: {}",
            self.stage_id, partition, total_byte_size
        );
        statistics.total_byte_size = Precision::Exact(total_byte_size as usize);

        Ok(statistics)
    }
}
