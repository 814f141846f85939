//! Stage ordering and parallel grouping.
//!
//! A *position* is one step of progress: a single non-parallel stage, or a run of
//! consecutive parallel stages that are all signed before the idea moves on.

use std::sync::Arc;

use crate::errors::AppError;
use crate::models::workflow::WorkflowStage;
use crate::store::WorkflowStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePosition {
    stages: Vec<WorkflowStage>,
}

impl StagePosition {
    pub fn stages(&self) -> &[WorkflowStage] {
        &self.stages
    }

    /// Lowest stage number of the position.
    pub fn head(&self) -> i32 {
        self.stages.first().map(|s| s.stage).unwrap_or(0)
    }

    /// Highest stage number of the position.
    pub fn last(&self) -> i32 {
        self.stages.last().map(|s| s.stage).unwrap_or(0)
    }

    pub fn is_parallel(&self) -> bool {
        self.stages.len() > 1
    }

    pub fn contains(&self, stage: i32) -> bool {
        self.stages.iter().any(|s| s.stage == stage)
    }

    pub fn stage(&self, stage: i32) -> Option<&WorkflowStage> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn stage_numbers(&self) -> Vec<i32> {
        self.stages.iter().map(|s| s.stage).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    pub workflow_id: i64,
    positions: Vec<StagePosition>,
}

impl StagePlan {
    pub fn from_stages(workflow_id: i64, mut stages: Vec<WorkflowStage>) -> Self {
        stages.sort_by_key(|s| s.stage);
        let mut positions: Vec<StagePosition> = Vec::new();
        for stage in stages {
            match positions.last_mut() {
                Some(current)
                    if stage.is_parallel && current.stages.last().is_some_and(|s| s.is_parallel) =>
                {
                    current.stages.push(stage);
                }
                _ => positions.push(StagePosition { stages: vec![stage] }),
            }
        }
        StagePlan { workflow_id, positions }
    }

    pub fn positions(&self) -> &[StagePosition] {
        &self.positions
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn max_stage(&self) -> i32 {
        self.positions.last().map(StagePosition::last).unwrap_or(0)
    }

    pub fn position_of(&self, stage: i32) -> Option<&StagePosition> {
        self.positions.iter().find(|p| p.contains(stage))
    }

    /// Positions lying entirely after `stage`, in order.
    pub fn positions_after(&self, stage: i32) -> impl Iterator<Item = &StagePosition> {
        self.positions.iter().filter(move |p| p.head() > stage)
    }

    /// First defined stage number at or after `stage`.
    pub fn next_defined_stage(&self, stage: i32) -> Option<i32> {
        self.positions
            .iter()
            .flat_map(|p| p.stages.iter())
            .map(|s| s.stage)
            .find(|n| *n >= stage)
    }
}

/// Read side of stage configuration.
pub struct StagePlanner {
    workflows: Arc<dyn WorkflowStore>,
}

impl StagePlanner {
    pub fn new(workflows: Arc<dyn WorkflowStore>) -> Self {
        StagePlanner { workflows }
    }

    pub async fn get_max_stage(&self, workflow_id: i64) -> Result<i32, AppError> {
        self.workflows.get_max_stage(workflow_id).await
    }

    pub async fn get_stage(&self, workflow_id: i64, stage: i32) -> Result<Option<WorkflowStage>, AppError> {
        self.workflows.get_stage(workflow_id, stage).await
    }

    pub async fn get_stage_sequence(&self, workflow_id: i64) -> Result<Vec<WorkflowStage>, AppError> {
        self.workflows.get_stage_sequence(workflow_id).await
    }

    /// Grouped plan for a workflow. A workflow without stages is a `NotFound`.
    pub async fn plan(&self, workflow_id: i64) -> Result<StagePlan, AppError> {
        let stages = self.get_stage_sequence(workflow_id).await?;
        if stages.is_empty() {
            return Err(AppError::NotFound(format!("stages of workflow #{workflow_id}")));
        }
        Ok(StagePlan::from_stages(workflow_id, stages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(n: i32, parallel: bool) -> WorkflowStage {
        WorkflowStage {
            id: n as i64,
            workflow_id: 1,
            stage: n,
            level_id: 10 + n as i64,
            is_mandatory: true,
            is_parallel: parallel,
        }
    }

    #[test]
    fn sequential_stages_are_one_position_each() {
        let plan = StagePlan::from_stages(1, vec![stage(3, false), stage(1, false), stage(2, false)]);
        let heads: Vec<i32> = plan.positions().iter().map(StagePosition::head).collect();
        assert_eq!(heads, vec![1, 2, 3]);
        assert_eq!(plan.max_stage(), 3);
    }

    #[test]
    fn consecutive_parallel_stages_share_a_position() {
        let plan = StagePlan::from_stages(
            1,
            vec![stage(1, false), stage(2, true), stage(3, true), stage(4, false)],
        );
        assert_eq!(plan.positions().len(), 3);
        let middle = plan.position_of(3).unwrap();
        assert_eq!(middle.stage_numbers(), vec![2, 3]);
        assert!(middle.is_parallel());
        assert_eq!(middle.head(), 2);
        assert_eq!(middle.last(), 3);
    }

    #[test]
    fn parallel_runs_split_by_a_sequential_stage() {
        let plan = StagePlan::from_stages(
            1,
            vec![stage(1, true), stage(2, true), stage(3, false), stage(4, true)],
        );
        let groups: Vec<Vec<i32>> = plan.positions().iter().map(StagePosition::stage_numbers).collect();
        assert_eq!(groups, vec![vec![1, 2], vec![3], vec![4]]);
    }

    #[test]
    fn positions_after_skip_current_group() {
        let plan = StagePlan::from_stages(
            1,
            vec![stage(1, false), stage(2, true), stage(3, true), stage(4, false)],
        );
        let after: Vec<i32> = plan.positions_after(3).map(StagePosition::head).collect();
        assert_eq!(after, vec![4]);
        let after_one: Vec<i32> = plan.positions_after(1).map(StagePosition::head).collect();
        assert_eq!(after_one, vec![2, 4]);
    }

    #[test]
    fn next_defined_stage_fills_gaps() {
        let plan = StagePlan::from_stages(1, vec![stage(1, false), stage(3, false), stage(5, false)]);
        assert_eq!(plan.next_defined_stage(2), Some(3));
        assert_eq!(plan.next_defined_stage(5), Some(5));
        assert_eq!(plan.next_defined_stage(6), None);
    }
}
