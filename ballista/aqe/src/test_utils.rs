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

//! Fixtures shared by unit tests

use crate::execution_plans::{
    MemoryShuffleOutput, PartialShuffleReaderExec, ShuffleQueryStageExec,
};
use crate::statistics::MapOutputStatistics;
use datafusion::arrow::array::{Int32Array, RecordBatch};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::error::Result;
use datafusion::physical_plan::{ExecutionPlan, Partitioning};
use std::collections::BTreeSet;
use std::sync::Arc;

pub(crate) fn mock_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("a", DataType::Int32, false),
        Field::new("b", DataType::Int32, false),
        Field::new("c", DataType::Int32, false),
    ]))
}

pub(crate) fn mock_batch() -> Result<RecordBatch> {
    let batch = RecordBatch::try_new(
        mock_schema(),
        vec![
            Arc::new(Int32Array::from(vec![1, 2, 3, 4])),
            Arc::new(Int32Array::from(vec![2, 2, 2, 2])),
            Arc::new(Int32Array::from(vec![1, 1, 3, 3])),
        ],
    )?;
    Ok(batch)
}

/// in memory shuffle output with given number of
/// batches in each upstream partition
pub(crate) fn mock_shuffle_output(batches_per_partition: &[usize]) -> MemoryShuffleOutput {
    let batch = mock_batch().expect("mock batch");
    MemoryShuffleOutput::new(
        batches_per_partition
            .iter()
            .map(|count| vec![batch.clone(); *count])
            .collect(),
    )
}

/// unresolved shuffle stage with `num_partitions` empty upstream partitions
pub(crate) fn mock_stage(stage_id: usize, num_partitions: usize) -> ShuffleQueryStageExec {
    ShuffleQueryStageExec::new(
        stage_id,
        mock_schema(),
        Arc::new(MemoryShuffleOutput::new(vec![vec![]; num_partitions])),
        Partitioning::UnknownPartitioning(num_partitions),
    )
}

/// shuffle stage resolved with given bytes per upstream partition
pub(crate) fn mock_resolved_stage(
    stage_id: usize,
    bytes_by_partition: Vec<u64>,
) -> Arc<ShuffleQueryStageExec> {
    let stage = mock_stage(stage_id, bytes_by_partition.len());
    stage.resolve(MapOutputStatistics::new(stage_id, bytes_by_partition).into());
    Arc::new(stage)
}

pub(crate) fn mock_partial_reader(
    stage: Arc<ShuffleQueryStageExec>,
    excluded_partitions: &[usize],
) -> Arc<dyn ExecutionPlan> {
    Arc::new(PartialShuffleReaderExec::new(
        stage,
        excluded_partitions.iter().copied().collect::<BTreeSet<_>>(),
    ))
}

pub(crate) const MIB: u64 = 1024 * 1024;

/// Checks is the plan same as expected string representation
#[macro_export]
macro_rules! assert_plan {
    ($PLAN: expr, @ $EXPECTED_LINES: literal $(,)?) => {
        let plan = datafusion::physical_plan::displayable($PLAN).indent(true).to_string();
        let actual_lines = plan.trim();

        insta::assert_snapshot!(actual_lines, @ $EXPECTED_LINES);
    };
}
