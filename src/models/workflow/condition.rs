//! Compiled workflow conditions.
//!
//! Stored conditions are loose `(type, operator, value)` strings. `Condition::compile`
//! turns them into a typed variant once, so a malformed row is rejected when an admin
//! writes it instead of silently never matching at resolution time.

use std::collections::BTreeSet;

use super::types::{ConditionType, NewCondition, Operator, WorkflowCondition};
use crate::errors::AppError;
use crate::models::idea::IdeaContext;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Comparison {
    AtLeast,
    AtMost,
    Equal,
    NotEqual,
}

/// Set test over organizational or category codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    Is(String),
    IsNot(String),
    In(BTreeSet<String>),
    NotIn(BTreeSet<String>),
}

impl Membership {
    fn compile(ct: ConditionType, op: Operator, raw: &str) -> Result<Self, AppError> {
        match op {
            Operator::Eq | Operator::Ne => {
                let code = raw.trim();
                if code.is_empty() {
                    return Err(AppError::Configuration(format!("{ct} {op} needs a value")));
                }
                if code.contains(',') {
                    return Err(AppError::Configuration(format!(
                        "{ct} {op} takes a single code, use IN/NOT_IN for lists"
                    )));
                }
                Ok(if op == Operator::Eq {
                    Membership::Is(code.to_string())
                } else {
                    Membership::IsNot(code.to_string())
                })
            }
            Operator::In | Operator::NotIn => {
                let codes: BTreeSet<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect();
                if codes.is_empty() {
                    return Err(AppError::Configuration(format!("{ct} {op} needs at least one code")));
                }
                Ok(if op == Operator::In {
                    Membership::In(codes)
                } else {
                    Membership::NotIn(codes)
                })
            }
            Operator::Gte | Operator::Lte => Err(AppError::Configuration(format!(
                "{ct} does not support ordering operator {op}"
            ))),
        }
    }

    /// `None` means the idea carries no value for this attribute.
    fn test(&self, value: Option<&str>) -> bool {
        let value = value.map(str::trim);
        match self {
            Membership::Is(code) => value == Some(code.as_str()),
            Membership::IsNot(code) => value != Some(code.as_str()),
            Membership::In(codes) => value.is_some_and(|v| codes.contains(v)),
            Membership::NotIn(codes) => !value.is_some_and(|v| codes.contains(v)),
        }
    }

    fn canonical(&self) -> String {
        let join = |codes: &BTreeSet<String>| codes.iter().cloned().collect::<Vec<_>>().join(",");
        match self {
            Membership::Is(c) => format!("= {c}"),
            Membership::IsNot(c) => format!("!= {c}"),
            Membership::In(codes) => format!("IN {}", join(codes)),
            Membership::NotIn(codes) => format!("NOT_IN {}", join(codes)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    SavingCost { op: Comparison, threshold: f64 },
    Category(Membership),
    Division(Membership),
    Department(Membership),
    Event(Membership),
}

impl Condition {
    pub fn compile(ct: ConditionType, op: Operator, raw: &str) -> Result<Self, AppError> {
        match ct {
            ConditionType::SavingCost => {
                let op = match op {
                    Operator::Gte => Comparison::AtLeast,
                    Operator::Lte => Comparison::AtMost,
                    Operator::Eq => Comparison::Equal,
                    Operator::Ne => Comparison::NotEqual,
                    Operator::In | Operator::NotIn => {
                        return Err(AppError::Configuration(format!(
                            "SAVING_COST does not support set operator {op}"
                        )));
                    }
                };
                let threshold = raw
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| {
                        AppError::Configuration(format!("SAVING_COST value '{}' is not a number", raw.trim()))
                    })?;
                Ok(Condition::SavingCost { op, threshold })
            }
            ConditionType::Category => Ok(Condition::Category(Membership::compile(ct, op, raw)?)),
            ConditionType::Division => Ok(Condition::Division(Membership::compile(ct, op, raw)?)),
            ConditionType::Department => Ok(Condition::Department(Membership::compile(ct, op, raw)?)),
            ConditionType::Event => Ok(Condition::Event(Membership::compile(ct, op, raw)?)),
        }
    }

    pub fn from_stored(row: &WorkflowCondition) -> Result<Self, AppError> {
        Self::compile(row.condition_type, row.operator, &row.condition_value)
    }

    pub fn from_new(input: &NewCondition) -> Result<Self, AppError> {
        Self::compile(input.condition_type, input.operator, &input.condition_value)
    }

    pub fn evaluate(&self, ctx: &IdeaContext) -> bool {
        match self {
            Condition::SavingCost { op, threshold } => {
                let cost = ctx.saving_cost;
                match op {
                    Comparison::AtLeast => cost >= *threshold,
                    Comparison::AtMost => cost <= *threshold,
                    Comparison::Equal => cost == *threshold,
                    Comparison::NotEqual => cost != *threshold,
                }
            }
            Condition::Category(m) => m.test(Some(&ctx.category_id)),
            Condition::Division(m) => m.test(Some(&ctx.division_id)),
            Condition::Department(m) => m.test(Some(&ctx.department_id)),
            Condition::Event(m) => m.test(ctx.event_id.as_deref()),
        }
    }

    /// Normalized text form, used to detect two workflows with identical rules.
    pub fn canonical(&self) -> String {
        match self {
            Condition::SavingCost { op, threshold } => {
                let op = match op {
                    Comparison::AtLeast => ">=",
                    Comparison::AtMost => "<=",
                    Comparison::Equal => "=",
                    Comparison::NotEqual => "!=",
                };
                format!("SAVING_COST {op} {threshold}")
            }
            Condition::Category(m) => format!("CATEGORY {}", m.canonical()),
            Condition::Division(m) => format!("DIVISION {}", m.canonical()),
            Condition::Department(m) => format!("DEPARTMENT {}", m.canonical()),
            Condition::Event(m) => format!("EVENT {}", m.canonical()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(cost: f64, division: &str) -> IdeaContext {
        IdeaContext {
            category_id: "CAT-1".into(),
            division_id: division.into(),
            department_id: "DEP-1".into(),
            saving_cost: cost,
            event_id: None,
        }
    }

    #[test]
    fn saving_cost_threshold_is_numeric() {
        let c = Condition::compile(ConditionType::SavingCost, Operator::Gte, " 5000 ").unwrap();
        assert!(c.evaluate(&ctx(6000.0, "D01")));
        assert!(c.evaluate(&ctx(5000.0, "D01")));
        assert!(!c.evaluate(&ctx(4000.0, "D01")));
    }

    #[test]
    fn saving_cost_rejects_set_operators_and_text() {
        assert!(Condition::compile(ConditionType::SavingCost, Operator::In, "1,2").is_err());
        assert!(Condition::compile(ConditionType::SavingCost, Operator::Gte, "lots").is_err());
        assert!(Condition::compile(ConditionType::SavingCost, Operator::Gte, "NaN").is_err());
    }

    #[test]
    fn division_rejects_ordering_operators() {
        let err = Condition::compile(ConditionType::Division, Operator::Gte, "D01").unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn in_list_is_trimmed_and_split() {
        let c = Condition::compile(ConditionType::Division, Operator::In, "D01, D02 ,,").unwrap();
        assert!(c.evaluate(&ctx(0.0, "D02")));
        assert!(!c.evaluate(&ctx(0.0, "D03")));

        let not_in = Condition::compile(ConditionType::Division, Operator::NotIn, "D01,D02").unwrap();
        assert!(not_in.evaluate(&ctx(0.0, "D03")));
        assert!(!not_in.evaluate(&ctx(0.0, "D01")));
    }

    #[test]
    fn empty_list_is_a_configuration_error() {
        assert!(Condition::compile(ConditionType::Category, Operator::In, " , ").is_err());
        assert!(Condition::compile(ConditionType::Category, Operator::Eq, "  ").is_err());
    }

    #[test]
    fn equality_with_comma_is_rejected() {
        assert!(Condition::compile(ConditionType::Category, Operator::Eq, "A,B").is_err());
    }

    #[test]
    fn missing_event_only_satisfies_negative_tests() {
        let no_event = ctx(0.0, "D01");
        let is = Condition::compile(ConditionType::Event, Operator::Eq, "EXPO").unwrap();
        let is_not = Condition::compile(ConditionType::Event, Operator::Ne, "EXPO").unwrap();
        let in_list = Condition::compile(ConditionType::Event, Operator::In, "EXPO,HACK").unwrap();
        let not_in = Condition::compile(ConditionType::Event, Operator::NotIn, "EXPO").unwrap();
        assert!(!is.evaluate(&no_event));
        assert!(is_not.evaluate(&no_event));
        assert!(!in_list.evaluate(&no_event));
        assert!(not_in.evaluate(&no_event));

        let with_event = IdeaContext { event_id: Some("HACK".into()), ..no_event };
        assert!(in_list.evaluate(&with_event));
    }

    #[test]
    fn canonical_form_ignores_list_order_and_spacing() {
        let a = Condition::compile(ConditionType::Category, Operator::In, "B, A").unwrap();
        let b = Condition::compile(ConditionType::Category, Operator::In, "A,B").unwrap();
        assert_eq!(a.canonical(), b.canonical());
    }
}
