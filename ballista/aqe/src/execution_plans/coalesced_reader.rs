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

use crate::coalesce::PartitionRange;
use crate::execution_plans::ShuffleQueryStageExec;
use datafusion::common::internal_err;
use datafusion::common::stats::Precision;
use datafusion::error::{DataFusionError, Result};
use datafusion::execution::{SendableRecordBatchStream, TaskContext};
use datafusion::physical_expr::EquivalenceProperties;
use datafusion::physical_plan::execution_plan::{Boundedness, EmissionType};
use datafusion::physical_plan::{
    DisplayAs, DisplayFormatType, ExecutionPlan, Partitioning, PlanProperties,
    Statistics,
};
use log::debug;
use once_cell::sync::OnceCell;
use std::any::Any;
use std::sync::Arc;

/// Reads a shuffle query stage with contiguous upstream partitions
/// merged together.
///
/// Every output partition reads one [PartitionRange] of the stage.
/// Nothing is known about ordering or clustering of the merged output.
///
/// The physical shuffle reader is created on first execution and shared
/// by all following executions, including concurrent ones.
#[derive(Debug)]
pub struct CoalescedShuffleReaderExec {
    /// ordinarily [ShuffleQueryStageExec]
    input: Arc<dyn ExecutionPlan>,
    partition_ranges: Vec<PartitionRange>,
    properties: PlanProperties,
    shuffle_reader: OnceCell<Arc<dyn ExecutionPlan>>,
}

impl CoalescedShuffleReaderExec {
    pub fn new(input: Arc<dyn ExecutionPlan>, partition_ranges: Vec<PartitionRange>) -> Self {
        let properties = PlanProperties::new(
            EquivalenceProperties::new(input.schema()),
            Partitioning::UnknownPartitioning(partition_ranges.len()),
            EmissionType::Incremental,
            Boundedness::Bounded,
        );

        Self {
            input,
            partition_ranges,
            properties,
            shuffle_reader: OnceCell::new(),
        }
    }

    pub fn input(&self) -> &Arc<dyn ExecutionPlan> {
        &self.input
    }

    pub fn partition_ranges(&self) -> &[PartitionRange] {
        &self.partition_ranges
    }

    /// Returns physical reader of merged partitions, creating it
    /// on first call.
    ///
    /// Fails if input is not a [ShuffleQueryStageExec], which is
    /// only the case for plans which are not meant to be executed.
    pub fn shuffle_reader(&self) -> Result<Arc<dyn ExecutionPlan>> {
        self.shuffle_reader
            .get_or_try_init(|| {
                match self.input.as_any().downcast_ref::<ShuffleQueryStageExec>() {
                    Some(stage) => {
                        debug!(
                            "creating coalesced shuffle reader for stage {} with {} partitions",
                            stage.stage_id(),
                            self.partition_ranges.len()
                        );
                        stage.create_shuffle_reader(&self.partition_ranges)
                    }
                    None => internal_err!(
                        "CoalescedShuffleReaderExec can read only a shuffle query stage, found {}",
                        self.input.name()
                    ),
                }
            })
            .cloned()
    }
}

impl DisplayAs for CoalescedShuffleReaderExec {
    fn fmt_as(
        &self,
        t: DisplayFormatType,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        let ranges = self
            .partition_ranges
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        match t {
            DisplayFormatType::Default | DisplayFormatType::Verbose => {
                write!(
                    f,
                    "CoalescedShuffleReaderExec: partitions={}, ranges=[{ranges}]",
                    self.partition_ranges.len()
                )
            }
            DisplayFormatType::TreeRender => {
                writeln!(f, "partitions={}", self.partition_ranges.len())?;
                writeln!(f, "ranges=[{ranges}]")
            }
        }
    }
}

impl ExecutionPlan for CoalescedShuffleReaderExec {
    fn name(&self) -> &str {
        "CoalescedShuffleReaderExec"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn properties(&self) -> &PlanProperties {
        &self.properties
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![&self.input]
    }

    fn with_new_children(
        self: Arc<Self>,
        children: Vec<Arc<dyn ExecutionPlan>>,
    ) -> Result<Arc<dyn ExecutionPlan>> {
        if children.len() == 1 {
            Ok(Arc::new(Self::new(
                children[0].clone(),
                self.partition_ranges.clone(),
            )))
        } else {
            Err(DataFusionError::Plan(
                "CoalescedShuffleReaderExec expects single child".to_owned(),
            ))
        }
    }

    fn execute(
        &self,
        partition: usize,
        context: Arc<TaskContext>,
    ) -> Result<SendableRecordBatchStream> {
        if partition >= self.partition_ranges.len() {
            return internal_err!(
                "Invalid partition index: {}, the partition count is {}",
                partition,
                self.partition_ranges.len()
            );
        }

        self.shuffle_reader()?.execute(partition, context)
    }

    fn partition_statistics(&self, partition: Option<usize>) -> Result<Statistics> {
        let schema = self.input.schema();
        let mut statistics = Statistics::new_unknown(&schema);
        let map_output = self
            .input
            .as_any()
            .downcast_ref::<ShuffleQueryStageExec>()
            .and_then(|stage| stage.map_output_statistics());
        let Some(map_output) = map_output else {
            return Ok(statistics);
        };

        let total_byte_size = match partition {
            Some(idx) => match self.partition_ranges.get(idx) {
                Some(range) => map_output.bytes_in_range(range),
                None => {
                    return internal_err!(
                        "Invalid partition index: {}, the partition count is {}",
                        idx,
                        self.partition_ranges.len()
                    );
                }
            },
            None => self
                .partition_ranges
                .iter()
                .map(|range| map_output.bytes_in_range(range))
                .sum(),
        };
        statistics.total_byte_size = Precision::Exact(total_byte_size as usize);

        Ok(statistics)
    }
}
