use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::AppError;

/// Which idea attribute a condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionType {
    SavingCost,
    Category,
    Division,
    Department,
    Event,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::SavingCost => "SAVING_COST",
            ConditionType::Category => "CATEGORY",
            ConditionType::Division => "DIVISION",
            ConditionType::Department => "DEPARTMENT",
            ConditionType::Event => "EVENT",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SAVING_COST" => Ok(ConditionType::SavingCost),
            "CATEGORY" => Ok(ConditionType::Category),
            "DIVISION" => Ok(ConditionType::Division),
            "DEPARTMENT" => Ok(ConditionType::Department),
            "EVENT" => Ok(ConditionType::Event),
            other => Err(AppError::Configuration(format!("unknown condition type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT_IN")]
    NotIn,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::In => "IN",
            Operator::NotIn => "NOT_IN",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            ">=" => Ok(Operator::Gte),
            "<=" => Ok(Operator::Lte),
            "=" | "==" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::Ne),
            "IN" => Ok(Operator::In),
            "NOT_IN" | "NOT IN" => Ok(Operator::NotIn),
            other => Err(AppError::Configuration(format!("unknown operator '{other}'"))),
        }
    }
}

/// A stored condition row, as the admin screens wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCondition {
    pub id: i64,
    pub workflow_id: i64,
    pub condition_type: ConditionType,
    pub operator: Operator,
    pub condition_value: String,
    pub is_active: bool,
}

/// One approval stage of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub id: i64,
    pub workflow_id: i64,
    pub stage: i32,
    pub level_id: i64,
    pub is_mandatory: bool,
    pub is_parallel: bool,
}

/// A workflow definition with its stages (ascending) and conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub is_active: bool,
    pub priority: i32,
    pub stages: Vec<WorkflowStage>,
    pub conditions: Vec<WorkflowCondition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn max_stage(&self) -> i32 {
        self.stages.iter().map(|s| s.stage).max().unwrap_or(0)
    }
}

/// Input for a new stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStage {
    pub stage: i32,
    pub level_id: i64,
    pub is_mandatory: bool,
    pub is_parallel: bool,
}

/// Input for a new condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCondition {
    pub condition_type: ConditionType,
    pub operator: Operator,
    pub condition_value: String,
    pub is_active: bool,
}

/// Input for creating a workflow together with its stages and conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub name: String,
    pub description: String,
    pub is_active: bool,
    pub priority: i32,
    pub stages: Vec<NewStage>,
    pub conditions: Vec<NewCondition>,
}

/// Header fields an admin may edit in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowUpdate {
    pub name: String,
    pub description: String,
    pub priority: i32,
    pub is_active: bool,
}
