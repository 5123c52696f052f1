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

use crate::coalesce::coalesce_partitions;
use crate::config::{AqeConfig, CoalesceOptions};
use crate::execution_plans::{
    CoalescedShuffleReaderExec, PartialShuffleReaderExec, ShuffleQueryStageExec,
    SkewedPartitionReaderExec,
};
use crate::statistics::ShuffleStageResult;
use datafusion::common::internal_err;
use datafusion::common::tree_node::{Transformed, TreeNode, TreeNodeRecursion};
use datafusion::config::ConfigOptions;
use datafusion::error::Result;
use datafusion::physical_optimizer::PhysicalOptimizerRule;
use datafusion::physical_plan::ExecutionPlan;
use log::{debug, info, trace};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Shuffle related shapes the rule cares about,
/// everything else is [ShuffleNode::Other]
enum ShuffleNode<'a> {
    Stage(&'a ShuffleQueryStageExec),
    PartialReader {
        reader: &'a PartialShuffleReaderExec,
        stage: &'a ShuffleQueryStageExec,
    },
    SkewedReader,
    CoalescedReader,
    Other,
}

impl<'a> ShuffleNode<'a> {
    fn classify(plan: &'a dyn ExecutionPlan) -> Self {
        let any = plan.as_any();
        if let Some(stage) = any.downcast_ref::<ShuffleQueryStageExec>() {
            ShuffleNode::Stage(stage)
        } else if let Some(reader) = any.downcast_ref::<PartialShuffleReaderExec>()
            && let Some(stage) = reader.stage()
        {
            ShuffleNode::PartialReader { reader, stage }
        } else if any.is::<SkewedPartitionReaderExec>() {
            ShuffleNode::SkewedReader
        } else if any.is::<CoalescedShuffleReaderExec>() {
            ShuffleNode::CoalescedReader
        } else {
            ShuffleNode::Other
        }
    }
}

/// Shuffle stage read by the plan, with partitions its reader excludes
struct ShuffleInput {
    stage_id: usize,
    can_change_num_partitions: bool,
    result: Option<ShuffleStageResult>,
    excluded_partitions: BTreeSet<usize>,
}

impl ShuffleInput {
    fn new(stage: &ShuffleQueryStageExec, excluded_partitions: BTreeSet<usize>) -> Self {
        Self {
            stage_id: stage.stage_id(),
            can_change_num_partitions: stage.can_change_num_partitions(),
            result: stage.result(),
            excluded_partitions,
        }
    }
}

/// Merges small contiguous shuffle partitions of finished shuffle stages,
/// so the next stage does not run lots of tiny tasks.
///
/// All shuffle stages read by the plan are coalesced together, using the
/// same partition ranges, so partitions of sibling stages (join sides for
/// example) stay aligned. The plan is returned unchanged if:
///
/// - coalescing is disabled
/// - the plan reads anything other than shuffle stages
/// - a shuffle stage has to keep its partition count
/// - shuffle stages disagree on partition count or excluded partitions
///
/// Reading a stage which has not finished yet is an error.
#[derive(Debug, Clone, Default)]
pub struct CoalesceShufflePartitionsRule {}

impl CoalesceShufflePartitionsRule {
    pub fn rewrite(
        &self,
        plan: Arc<dyn ExecutionPlan>,
        options: &CoalesceOptions,
    ) -> Result<Arc<dyn ExecutionPlan>> {
        if !options.enabled {
            debug!("shuffle partition coalescing is disabled");
            return Ok(plan);
        }

        if !Self::has_only_shuffle_leaves(&plan)? {
            debug!("plan reads more than shuffle stages, partitions will not be coalesced");
            return Ok(plan);
        }

        let inputs = Self::collect_shuffle_inputs(&plan)?;
        if let Some(input) = inputs.iter().find(|i| !i.can_change_num_partitions) {
            debug!(
                "stage {} can not change number of partitions, partitions will not be coalesced",
                input.stage_id
            );
            return Ok(plan);
        }

        let mut statistics = Vec::with_capacity(inputs.len());
        for input in inputs.iter() {
            match &input.result {
                Some(result) => {
                    trace!("stage {} statistics: {:?}", input.stage_id, result);
                    statistics.push(result.statistics().cloned())
                }
                None => {
                    return internal_err!(
                        "stage {} has to be resolved before coalescing its partitions",
                        input.stage_id
                    );
                }
            }
        }

        let partition_counts = statistics
            .iter()
            .flatten()
            .map(|s| s.num_partitions())
            .collect::<HashSet<_>>();
        if partition_counts.len() != 1 {
            debug!(
                "shuffle stages report partition counts {partition_counts:?}, partitions will not be coalesced"
            );
            return Ok(plan);
        }

        let excluded_sets = inputs
            .iter()
            .map(|i| &i.excluded_partitions)
            .collect::<HashSet<_>>();
        let excluded = match excluded_sets.iter().next() {
            Some(excluded) if excluded_sets.len() == 1 => *excluded,
            _ => {
                debug!(
                    "shuffle readers exclude different partitions, partitions will not be coalesced"
                );
                return Ok(plan);
            }
        };

        let ranges = coalesce_partitions(
            &statistics,
            excluded,
            options.min_num_partitions,
            options.target_partition_size,
        )?;
        if ranges.is_empty() {
            debug!("all partitions are excluded, partitions will not be coalesced");
            return Ok(plan);
        }

        info!(
            "coalescing {:?} partitions of stages {:?} into {} partitions",
            partition_counts,
            inputs.iter().map(|i| i.stage_id).collect::<Vec<_>>(),
            ranges.len()
        );

        let mut visited = HashSet::new();
        let result = plan.transform_down(|node| {
            let transformed = match ShuffleNode::classify(node.as_ref()) {
                ShuffleNode::PartialReader { reader, stage } => {
                    visited.insert(stage.stage_id());
                    Transformed::new(
                        Arc::new(CoalescedShuffleReaderExec::new(
                            reader.input().clone(),
                            ranges.clone(),
                        )) as Arc<dyn ExecutionPlan>,
                        true,
                        TreeNodeRecursion::Jump,
                    )
                }
                ShuffleNode::Stage(stage) if visited.insert(stage.stage_id()) => {
                    Transformed::new(
                        Arc::new(CoalescedShuffleReaderExec::new(
                            node.clone(),
                            ranges.clone(),
                        )) as Arc<dyn ExecutionPlan>,
                        true,
                        TreeNodeRecursion::Jump,
                    )
                }
                ShuffleNode::CoalescedReader => {
                    Transformed::new(node.clone(), false, TreeNodeRecursion::Jump)
                }
                _ => Transformed::no(node.clone()),
            };
            Ok(transformed)
        })?;

        Ok(result.data)
    }

    /// `false` if any leaf is neither a shuffle stage
    /// nor a skewed partition read
    fn has_only_shuffle_leaves(plan: &Arc<dyn ExecutionPlan>) -> Result<bool> {
        let mut only_shuffle_leaves = true;
        plan.apply(|node| {
            if !node.children().is_empty() {
                return Ok(TreeNodeRecursion::Continue);
            }
            match ShuffleNode::classify(node.as_ref()) {
                ShuffleNode::Stage(_) | ShuffleNode::SkewedReader => {
                    Ok(TreeNodeRecursion::Continue)
                }
                _ => {
                    trace!("found leaf which is not a shuffle stage: {}", node.name());
                    only_shuffle_leaves = false;
                    Ok(TreeNodeRecursion::Stop)
                }
            }
        })?;

        Ok(only_shuffle_leaves)
    }

    /// Shuffle stages which are not read through a coalesced reader yet
    fn collect_shuffle_inputs(plan: &Arc<dyn ExecutionPlan>) -> Result<Vec<ShuffleInput>> {
        let mut inputs = vec![];
        plan.apply(|node| match ShuffleNode::classify(node.as_ref()) {
            ShuffleNode::PartialReader { reader, stage } => {
                inputs.push(ShuffleInput::new(
                    stage,
                    reader.excluded_partitions().clone(),
                ));
                Ok(TreeNodeRecursion::Jump)
            }
            ShuffleNode::Stage(stage) => {
                inputs.push(ShuffleInput::new(stage, BTreeSet::new()));
                Ok(TreeNodeRecursion::Continue)
            }
            ShuffleNode::CoalescedReader => Ok(TreeNodeRecursion::Jump),
            ShuffleNode::SkewedReader | ShuffleNode::Other => {
                Ok(TreeNodeRecursion::Continue)
            }
        })?;

        Ok(inputs)
    }
}

impl PhysicalOptimizerRule for CoalesceShufflePartitionsRule {
    fn optimize(
        &self,
        plan: Arc<dyn ExecutionPlan>,
        config: &ConfigOptions,
    ) -> Result<Arc<dyn ExecutionPlan>> {
        let options = config
            .extensions
            .get::<AqeConfig>()
            .map(|c| c.coalesce_options())
            .unwrap_or_default();

        self.rewrite(plan, &options)
    }

    fn name(&self) -> &str {
        "CoalesceShufflePartitionsRule"
    }

    fn schema_check(&self) -> bool {
        false
    }
}
