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

use crate::execution_plans::ShuffleQueryStageExec;
use datafusion::common::internal_err;
use datafusion::error::{DataFusionError, Result};
use datafusion::execution::{SendableRecordBatchStream, TaskContext};
use datafusion::physical_expr::EquivalenceProperties;
use datafusion::physical_plan::execution_plan::{Boundedness, EmissionType};
use datafusion::physical_plan::{
    DisplayAs, DisplayFormatType, ExecutionPlan, ExecutionPlanProperties, Partitioning,
    PlanProperties,
};
use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Reads a shuffle query stage without partitions handled separately
/// by skew join handling.
///
/// Output partition `i` is the `i`-th upstream partition not listed in
/// `excluded_partitions`.
#[derive(Debug)]
pub struct PartialShuffleReaderExec {
    input: Arc<dyn ExecutionPlan>,
    excluded_partitions: BTreeSet<usize>,
    included_partitions: Vec<usize>,
    properties: PlanProperties,
}

impl PartialShuffleReaderExec {
    pub fn new(input: Arc<dyn ExecutionPlan>, excluded_partitions: BTreeSet<usize>) -> Self {
        let included_partitions = (0..input.output_partitioning().partition_count())
            .filter(|p| !excluded_partitions.contains(p))
            .collect::<Vec<_>>();
        let properties = PlanProperties::new(
            EquivalenceProperties::new(input.schema()),
            Partitioning::UnknownPartitioning(included_partitions.len()),
            EmissionType::Incremental,
            Boundedness::Bounded,
        );

        Self {
            input,
            excluded_partitions,
            included_partitions,
            properties,
        }
    }

    pub fn input(&self) -> &Arc<dyn ExecutionPlan> {
        &self.input
    }

    /// wrapped stage, `None` if input is not a [ShuffleQueryStageExec]
    pub fn stage(&self) -> Option<&ShuffleQueryStageExec> {
        self.input.as_any().downcast_ref::<ShuffleQueryStageExec>()
    }

    pub fn excluded_partitions(&self) -> &BTreeSet<usize> {
        &self.excluded_partitions
    }
}

impl DisplayAs for PartialShuffleReaderExec {
    fn fmt_as(
        &self,
        t: DisplayFormatType,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        let excluded = self
            .excluded_partitions
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        match t {
            DisplayFormatType::Default | DisplayFormatType::Verbose => {
                write!(
                    f,
                    "PartialShuffleReaderExec: excluded_partitions=[{excluded}]"
                )
            }
            DisplayFormatType::TreeRender => {
                writeln!(f, "excluded_partitions=[{excluded}]")
            }
        }
    }
}

impl ExecutionPlan for PartialShuffleReaderExec {
    fn name(&self) -> &str {
        "PartialShuffleReaderExec"
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
                self.excluded_partitions.clone(),
            )))
        } else {
            Err(DataFusionError::Plan(
                "PartialShuffleReaderExec expects single child".to_owned(),
            ))
        }
    }

    fn execute(
        &self,
        partition: usize,
        context: Arc<TaskContext>,
    ) -> Result<SendableRecordBatchStream> {
        match self.included_partitions.get(partition) {
            Some(upstream) => self.input.execute(*upstream, context),
            None => internal_err!(
                "Invalid partition index: {}, the partition count is {}",
                partition,
                self.included_partitions.len()
            ),
        }
    }
}
