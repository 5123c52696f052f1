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

use datafusion::error::{DataFusionError, Result};
use datafusion::execution::{SendableRecordBatchStream, TaskContext};
use datafusion::physical_plan::{
    DisplayAs, DisplayFormatType, ExecutionPlan, PlanProperties,
};
use std::any::Any;
use std::sync::Arc;

/// Reads a split of a single skewed shuffle partition.
///
/// Produced by skew join handling, which plans the split reader itself.
/// The split reader is not exposed as a child, so this node is a leaf
/// and it does not take part in shuffle partition coalescing.
#[derive(Debug)]
pub struct SkewedPartitionReaderExec {
    stage_id: usize,
    partition: usize,
    reader: Arc<dyn ExecutionPlan>,
}

impl SkewedPartitionReaderExec {
    pub fn new(stage_id: usize, partition: usize, reader: Arc<dyn ExecutionPlan>) -> Self {
        Self {
            stage_id,
            partition,
            reader,
        }
    }

    pub fn stage_id(&self) -> usize {
        self.stage_id
    }

    /// upstream partition this node reads a split of
    pub fn partition(&self) -> usize {
        self.partition
    }
}

impl DisplayAs for SkewedPartitionReaderExec {
    fn fmt_as(
        &self,
        t: DisplayFormatType,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        match t {
            DisplayFormatType::Default | DisplayFormatType::Verbose => {
                write!(
                    f,
                    "SkewedPartitionReaderExec: stage_id={}, partition={}",
                    self.stage_id, self.partition
                )
            }
            DisplayFormatType::TreeRender => {
                writeln!(f, "stage_id={}", self.stage_id)?;
                writeln!(f, "partition={}", self.partition)
            }
        }
    }
}

impl ExecutionPlan for SkewedPartitionReaderExec {
    fn name(&self) -> &str {
        "SkewedPartitionReaderExec"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn properties(&self) -> &PlanProperties {
        self.reader.properties()
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
                "SkewedPartitionReaderExec does not support children plans".to_owned(),
            ))
        }
    }

    fn execute(
        &self,
        partition: usize,
        context: Arc<TaskContext>,
    ) -> Result<SendableRecordBatchStream> {
        self.reader.execute(partition, context)
    }
}
